//! Errors raised by the mesh message codec, peer list, and reactor.
use thiserror::Error;

/// An error from the mesh layer.
#[derive(Error, Debug)]
pub enum MeshError {
    /// An I/O error from a socket or file operation.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A mesh message failed header validation (bad magic, length, or checksum).
    #[error("malformed mesh message: {0}")]
    Protocol(String),
    /// The peer list is at capacity.
    #[error("peer list is full")]
    PeerListFull,
    /// An add would duplicate an existing node id or (host, port) pair.
    #[error("duplicate peer")]
    DuplicatePeer,
    /// The connection table has no free slot.
    #[error("connection table is full")]
    ConnectionTableFull,
    /// Caller input was invalid (bad host, empty device, oversized payload, ...).
    #[error("invalid argument: {0}")]
    Argument(String),
}
