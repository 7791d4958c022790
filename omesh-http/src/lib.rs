//! The HTTP/1.1 request parser, response builder, route table, and the
//! `Engine` that cooperatively schedules the HTTP listener against the mesh
//! reactor on one thread.
#![warn(missing_docs)]
#![allow(missing_docs)] // Route handlers are terse by design; see module docs.

mod engine;
mod error;
mod request;
mod response;
mod routes;

pub use engine::Engine;
pub use error::HttpError;
pub use request::Request;
