//! Node identity: a 64-bit id assigned on first run and persisted across
//! restarts. Zero is reserved for "unknown".
use std::fs;
use std::path::Path;

use crate::error::Error;

/// A node's 64-bit identifier. `NodeId(0)` means "not yet learned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The reserved "unknown" id.
    pub const UNKNOWN: NodeId = NodeId(0);

    /// Generate a fresh random node id. Never returns [`NodeId::UNKNOWN`].
    pub fn generate(rng: &fastrand::Rng) -> Self {
        loop {
            let candidate = rng.u64(..);
            if candidate != 0 {
                return Self(candidate);
            }
        }
    }

    /// Whether this id is the reserved "unknown" sentinel.
    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }

    /// Render as 16 lowercase hex characters, the format `/peers` and the
    /// HELLO log lines use.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parse 16 (or fewer) hex characters into a node id.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map(NodeId)
            .map_err(|_| Error::argument(format!("invalid node id hex string: {s:?}")))
    }

    /// Load a persisted node id from `path`, or generate and persist a new
    /// one if the file doesn't exist yet.
    pub fn load_or_create(path: &Path, rng: &fastrand::Rng) -> Result<Self, Error> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_hex(contents.trim()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let id = Self::generate(rng);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, id.to_hex())?;
                log::info!(target: "common", "generated new node id {id} at {}", path.display());
                Ok(id)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_never_returns_unknown() {
        let rng = fastrand::Rng::with_seed(1);
        for _ in 0..1000 {
            assert!(!NodeId::generate(&rng).is_unknown());
        }
    }

    #[test]
    fn hex_round_trips() {
        let id = NodeId(0xdead_beef_1234_5678);
        assert_eq!(NodeId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(id.to_hex(), "deadbeef12345678");
    }

    #[test]
    fn load_or_create_persists_across_calls() {
        let dir = std::env::temp_dir().join(format!("omesh-test-{}", fastrand::u64(..)));
        let path = dir.join("node_id");
        let rng = fastrand::Rng::new();

        let first = NodeId::load_or_create(&path, &rng).unwrap();
        let second = NodeId::load_or_create(&path, &rng).unwrap();
        assert_eq!(first, second);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
