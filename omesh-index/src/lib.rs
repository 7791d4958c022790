//! The local document store and inverted index: the "external collaborator"
//! the crate's public surface describes only by interface (`index_local`, query execution,
//! and a persistence call behind a dirty flag). Implemented here as a real
//! term→postings map so end-to-end indexing and search are
//! exercisable, not just contractually present.
#![warn(missing_docs)]

mod error;
mod store;

pub use error::IndexError;
pub use store::{Index, Posting};
