//! Command-line flags, parsed with `argh` in a flat-struct style.
use argh::FromArgs;

/// Omesh: a distributed full-text search node.
#[derive(FromArgs, Debug)]
pub struct Args {
    /// http listen port (default 8080)
    #[argh(option)]
    pub http: Option<u16>,

    /// enable the mesh reactor (default on unless --no-mesh is given)
    #[argh(switch)]
    pub mesh: bool,

    /// disable the mesh reactor entirely
    #[argh(switch)]
    pub no_mesh: bool,

    /// mesh listen port (default 9000)
    #[argh(option, default = "9000")]
    pub mesh_port: u16,

    /// seed peer as host:port; may be repeated
    #[argh(option)]
    pub peer: Vec<String>,

    /// override the persisted node id (hex)
    #[argh(option)]
    pub node_id: Option<String>,

    /// create ~/.omesh/, assign a node id, and exit
    #[argh(switch)]
    pub setup: bool,

    /// print the resolved configuration as JSON and exit
    #[argh(switch)]
    pub show_config: bool,

    /// data directory override (default ~/.omesh/)
    #[argh(option)]
    pub data_dir: Option<String>,

    /// peer-list file path override (default ./omesh.peers)
    #[argh(option)]
    pub peers_file: Option<String>,
}

impl Args {
    /// The resolved HTTP port, defaulting to 8080.
    pub fn http_port(&self) -> u16 {
        self.http.unwrap_or(8080)
    }

    /// Whether the mesh reactor should run at all.
    pub fn mesh_enabled(&self) -> bool {
        !self.no_mesh
    }

    /// Parse one `host:port` seed peer spec.
    pub fn parse_peer_spec(spec: &str) -> Result<(String, u16), String> {
        let (host, port) = spec.rsplit_once(':').ok_or_else(|| format!("peer spec `{spec}` must be host:port"))?;
        let port: u16 = port.parse().map_err(|_| format!("peer spec `{spec}` has a bad port"))?;
        if host.is_empty() {
            return Err(format!("peer spec `{spec}` has an empty host"));
        }
        Ok((host.to_string(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_spec_requires_host_and_port() {
        assert_eq!(Args::parse_peer_spec("10.0.0.1:9000").unwrap(), ("10.0.0.1".to_string(), 9000));
        assert!(Args::parse_peer_spec("no-port").is_err());
        assert!(Args::parse_peer_spec(":9000").is_err());
    }
}
