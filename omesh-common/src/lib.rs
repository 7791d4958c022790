//! Types and functions shared by all `omesh` crates: node identity, the
//! error-kind taxonomy, a clock abstraction, and a small JSON value type.
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod identity;
pub mod json;

pub use clock::{Clock, SystemClock};
pub use error::{Error, ErrorKind};
pub use identity::NodeId;
pub use json::Value as Json;
