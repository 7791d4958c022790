//! Errors raised while parsing an HTTP request or standing up the engine.
use thiserror::Error;

/// An error from the HTTP layer.
#[derive(Error, Debug)]
pub enum HttpError {
    /// An I/O error from the listener or a client socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The request could not be parsed as HTTP/1.1.
    #[error("malformed request: {0}")]
    BadRequest(String),
    /// Caller input was invalid (bad port, bad data dir, ...).
    #[error("invalid argument: {0}")]
    Argument(String),
    /// A mesh-layer failure surfaced while wiring up the engine.
    #[error(transparent)]
    Mesh(#[from] omesh_mesh::MeshError),
    /// A local index-store failure surfaced while handling `/index`.
    #[error(transparent)]
    Index(#[from] omesh_index::IndexError),
}
