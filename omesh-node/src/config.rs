//! Resolved runtime configuration: turns scattered CLI flags into plain
//! data, built once and passed by value instead of reading flags ad hoc
//! throughout `main`.
use std::path::PathBuf;

use omesh_common::NodeId;

use crate::cli::Args;

/// Everything `main` needs to stand up one node, resolved and validated once.
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's identity (loaded, generated, or taken from `--node-id`).
    pub node_id: NodeId,
    /// HTTP listen port (`--http`, default 8080).
    pub http_port: u16,
    /// Whether the mesh reactor should run at all (`--no-mesh`).
    pub mesh_enabled: bool,
    /// Mesh listen port (`--mesh-port`, default 9000).
    pub mesh_port: u16,
    /// Resolved data directory (`--data-dir`, default `~/.omesh/`).
    pub data_dir: PathBuf,
    /// Resolved peer-list path: `--peers-file` if given, else `./omesh.peers`
    /// in the current directory (not under `data_dir`, which holds the
    /// index and node identity instead).
    pub peers_path: PathBuf,
    /// Parsed `(host, port)` seed peers from one or more `--peer` flags.
    pub seed_peers: Vec<(String, u16)>,
}

impl Config {
    /// Validate and resolve `args` into a `Config`, or a CLI-facing error
    /// message naming the first flag that failed.
    pub fn from_args(args: &Args, node_id: NodeId) -> Result<Self, String> {
        let seed_peers = args.peer.iter().map(|spec| Args::parse_peer_spec(spec)).collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            node_id,
            http_port: args.http_port(),
            mesh_enabled: args.mesh_enabled(),
            mesh_port: args.mesh_port,
            data_dir: resolve_data_dir(args),
            peers_path: args.peers_file.as_deref().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./omesh.peers")),
            seed_peers,
        })
    }

    /// Render as the JSON object `--show-config` prints.
    pub fn to_json(&self) -> omesh_common::Json {
        omesh_common::Json::object([
            ("node_id", omesh_common::Json::str(self.node_id.to_hex())),
            ("http_port", omesh_common::Json::Number(self.http_port as f64)),
            ("mesh", omesh_common::Json::Bool(self.mesh_enabled)),
            ("mesh_port", omesh_common::Json::Number(self.mesh_port as f64)),
            ("data_dir", omesh_common::Json::str(self.data_dir.display().to_string())),
            ("peers_path", omesh_common::Json::str(self.peers_path.display().to_string())),
            (
                "seed_peers",
                omesh_common::Json::Array(
                    self.seed_peers.iter().map(|(h, p)| omesh_common::Json::str(format!("{h}:{p}"))).collect(),
                ),
            ),
        ])
    }
}

fn resolve_data_dir(args: &Args) -> PathBuf {
    if let Some(dir) = &args.data_dir {
        return PathBuf::from(dir);
    }
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".omesh")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            http: None,
            mesh: false,
            no_mesh: false,
            mesh_port: 9000,
            peer: Vec::new(),
            node_id: None,
            setup: false,
            show_config: false,
            data_dir: None,
            peers_file: None,
        }
    }

    #[test]
    fn resolves_defaults() {
        let cfg = Config::from_args(&base_args(), NodeId(42)).unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert!(cfg.mesh_enabled);
        assert_eq!(cfg.mesh_port, 9000);
        assert_eq!(cfg.peers_path, PathBuf::from("./omesh.peers"));
    }

    #[test]
    fn peers_file_flag_overrides_the_default() {
        let mut args = base_args();
        args.peers_file = Some("/tmp/custom.peers".to_string());
        let cfg = Config::from_args(&args, NodeId(1)).unwrap();
        assert_eq!(cfg.peers_path, PathBuf::from("/tmp/custom.peers"));
    }

    #[test]
    fn no_mesh_disables_mesh() {
        let mut args = base_args();
        args.no_mesh = true;
        let cfg = Config::from_args(&args, NodeId(1)).unwrap();
        assert!(!cfg.mesh_enabled);
    }
}
