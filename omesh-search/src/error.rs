//! Errors raised by the pending-search registry and coordinator.
use thiserror::Error;

/// An error from the distributed-search layer.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Caller input was invalid (empty query string, zero `max_results`).
    #[error("invalid argument: {0}")]
    Argument(String),
}
