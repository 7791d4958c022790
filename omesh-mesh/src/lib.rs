//! Mesh wire messages, the persistent peer list, and the single-threaded
//! poll-based reactor that drives them.
#![warn(missing_docs)]
#![allow(missing_docs)] // Wire codec internals are terse by design; see module docs.

mod error;
mod message;
mod peer;
mod poller;
mod reactor;

pub use error::MeshError;
pub use message::{
    Body, Header, HelloPayload, IndexOp, IndexPayload, Message, MessageType, PeerRecord,
    PeersPayload, ResultRecord, ResultsPayload, SearchPayload, HEADER_LEN, MAX_PAYLOAD,
};
pub use peer::{PeerEntry, PeerList, PeerStatus, CAPACITY as PEER_LIST_CAPACITY};
pub use poller::{Event as PollEvent, Interest, Poller};
pub use reactor::{
    ConnState, Direction, NullSink, Reactor, SearchResultSink, CONNECTION_TABLE_CAPACITY,
    HEARTBEAT_INTERVAL, MAINTENANCE_INTERVAL,
};
