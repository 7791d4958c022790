//! Errors the index store can raise.
use thiserror::Error;

/// An error from the local document store / inverted index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// An I/O error persisting or loading the store.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A document with this id was already present (or absent, on delete).
    #[error("document {0} not found")]
    NotFound(u64),
    /// The on-disk store file is corrupt or has an unrecognized format.
    #[error("index store is corrupt: {0}")]
    Corrupt(String),
    /// Content exceeded the configured per-document size limit.
    #[error("document content of {len} bytes exceeds the {limit}-byte limit")]
    ContentTooLarge {
        /// The offending document's length.
        len: usize,
        /// The configured limit.
        limit: usize,
    },
}
