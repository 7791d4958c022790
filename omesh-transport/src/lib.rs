//! The transport abstraction: a uniform send/recv/peer/quality contract
//! multiplexed over heterogeneous link types, plus the
//! length-delimited CRC-protected framing shared by all datagram-like
//! transports.
#![warn(missing_docs)]
#![allow(missing_docs)] // Individual backend internals are terse by design; see module docs.

pub mod backend;
pub mod backends;
pub mod framing;
pub mod registry;

pub use backend::{Backend, BackendConfig, BackendPeer, BackendStats, TransportKind};
pub use registry::{Registry, SelectionMode};
