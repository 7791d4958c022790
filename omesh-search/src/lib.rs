//! The pending-search registry and distributed-search coordinator (spec
//! §4.5): turns one local query into a mesh-wide fan-out, a bounded
//! deadline-driven collection of peer RESULTS, and one merged response.
#![warn(missing_docs)]

mod coordinator;
mod error;
mod registry;

pub use coordinator::{broadcast, collect, search, SearchOutcome};
pub use error::SearchError;
pub use registry::{PendingSearchRegistry, RESULT_CAPACITY};
