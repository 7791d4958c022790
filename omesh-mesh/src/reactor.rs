//! The mesh reactor: a single-threaded, event-driven connection
//! engine. It owns the connection table, the listener, the peer list, and
//! the local document index (the INDEX/SEARCH handlers need the index to
//! answer a peer in-line; only `RESULTS` bubbles out, via [`SearchResultSink`],
//! since the pending-search registry that consumes it lives in the
//! `omesh-search` crate, one layer above this one).
use std::io::{Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use omesh_common::Clock;
use omesh_index::Index;
use omesh_transport::TransportKind;

use crate::error::MeshError;
use crate::message::{
    self, Body, Header, HelloPayload, IndexOp, IndexPayload, Message, PeerRecord, PeersPayload,
    ResultRecord, ResultsPayload, SearchPayload,
};
use crate::peer::{PeerList, PeerStatus, FLAG_DISCOVERED, FLAG_PERSISTENT_SEED, TIMEOUT_SECS};
use crate::poller::{Event as PollEvent, Interest, Poller};

/// Fixed size of the connection table.
pub const CONNECTION_TABLE_CAPACITY: usize = 64;
/// Chunk size for one read off a ready socket.
pub const READ_CHUNK: usize = 16 * 1024;
/// Cadence of the PING heartbeat sweep.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Cadence of the peer-timeout / reconnect sweep.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);
/// Upper bound on a connection's receive buffer before it is treated as a
/// protocol violation and torn down (a header plus the largest legal
/// payload, so one well-formed message always fits).
const MAX_RECV_BUFFER: usize = message::HEADER_LEN + message::MAX_PAYLOAD;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Slot unused.
    Free,
    /// Outbound connect issued, awaiting writable/error.
    Connecting,
    /// Socket established, HELLO not yet exchanged.
    AwaitHello,
    /// HELLO exchanged; heartbeats running.
    Connected,
    /// Torn down on next sweep.
    Closing,
}

/// Who initiated a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted via the listener.
    Inbound,
    /// Initiated by this node.
    Outbound,
}

struct Connection {
    stream: Option<TcpStream>,
    state: ConnState,
    direction: Direction,
    peer_idx: Option<usize>,
    remote_node_id: u64,
    recv_buf: Vec<u8>,
    /// Unwritten tail of a frame that hit `WouldBlock`; resumed from the
    /// poller's next writable-readiness event rather than retried inline.
    pending_write: Vec<u8>,
}

impl Connection {
    fn free() -> Self {
        Self {
            stream: None,
            state: ConnState::Free,
            direction: Direction::Inbound,
            peer_idx: None,
            remote_node_id: 0,
            recv_buf: Vec::new(),
            pending_write: Vec::new(),
        }
    }

    fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }
}

/// Implemented by the owner of the pending-search registry (`omesh-search`)
/// so the reactor can deliver `RESULTS` without depending on that crate.
pub trait SearchResultSink {
    /// A `RESULTS` message arrived for `query_id`, carrying `records`.
    fn on_results(&mut self, query_id: u32, records: &[(u64, u32)]);
}

/// A sink that drops every result; used by callers that only want HELLO/
/// heartbeat/discovery processing (e.g. tests) with no active search.
pub struct NullSink;
impl SearchResultSink for NullSink {
    fn on_results(&mut self, _query_id: u32, _records: &[(u64, u32)]) {}
}

/// The mesh event loop, connection table, peer list, and local index.
pub struct Reactor {
    poller: Poller,
    listener: Option<TcpListener>,
    connections: Vec<Connection>,
    peer_list: PeerList,
    index: Index,
    local_node_id: u64,
    mesh_port: u16,
    http_port: u16,
    running: bool,
    last_heartbeat: Instant,
    last_maintenance: Instant,
}

impl Reactor {
    /// Bind the mesh listener on `mesh_port` and construct an empty reactor.
    /// Bind/listen failures are treated as fatal initialization errors.
    pub fn new(local_node_id: u64, mesh_port: u16, http_port: u16) -> Result<Self, MeshError> {
        let listener = TcpListener::bind(("0.0.0.0", mesh_port))
            .map_err(|e| MeshError::Io(e))?;
        listener.set_nonblocking(true)?;

        let mut poller = Poller::new();
        poller.add(listener.as_raw_fd(), Interest::READABLE);

        let mut connections = Vec::with_capacity(CONNECTION_TABLE_CAPACITY);
        connections.resize_with(CONNECTION_TABLE_CAPACITY, Connection::free);

        let mut peer_list = PeerList::init();
        peer_list.set_local_id(local_node_id);

        let now = Instant::now();
        Ok(Self {
            poller,
            listener: Some(listener),
            connections,
            peer_list,
            index: Index::new(),
            local_node_id,
            mesh_port,
            http_port,
            running: true,
            last_heartbeat: now,
            last_maintenance: now,
        })
    }

    /// The local node id this reactor announces in HELLO.
    pub fn local_node_id(&self) -> u64 {
        self.local_node_id
    }

    /// Borrow the peer list.
    pub fn peer_list(&self) -> &PeerList {
        &self.peer_list
    }

    /// Mutably borrow the peer list.
    pub fn peer_list_mut(&mut self) -> &mut PeerList {
        &mut self.peer_list
    }

    /// Borrow the local document index.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Mutably borrow the local document index.
    pub fn index_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    /// Load a persisted peer list, re-asserting the local id.
    pub fn load_peers(&mut self, path: &Path) {
        self.peer_list = PeerList::load(path);
        self.peer_list.set_local_id(self.local_node_id);
    }

    /// Persist the peer list.
    pub fn save_peers(&self, path: &Path) -> Result<(), MeshError> {
        self.peer_list.save(path)
    }

    /// Add a configured seed peer and immediately attempt to connect it.
    /// Seed peers are the only ones the maintenance sweep auto-reconnects.
    pub fn add_seed_peer(&mut self, host: &str, port: u16) -> Result<(), MeshError> {
        let idx = self.peer_list.add(host, port, 0)?;
        if let Some(entry) = self.peer_list.get_mut(idx) {
            entry.flags |= FLAG_PERSISTENT_SEED;
        }
        self.connect_peer(idx);
        Ok(())
    }

    /// Whether the loop's `running` flag is still set.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Clear the running flag; the caller's loop checks this at the top of
    /// every iteration.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Release every socket and the listener. Idempotent.
    pub fn shutdown(&mut self) {
        for slot in 0..self.connections.len() {
            if self.connections[slot].state != ConnState::Free {
                self.teardown(slot);
            }
        }
        if let Some(listener) = self.listener.take() {
            self.poller.remove(listener.as_raw_fd());
        }
    }

    /// Number of connections currently in the `Connected` state.
    pub fn connected_count(&self) -> usize {
        self.connections.iter().filter(|c| c.state == ConnState::Connected).count()
    }

    /// Send `body` to every `Connected` connection, returning how many
    /// sends succeeded.
    pub fn broadcast_connected(&mut self, body: &Body) -> usize {
        let Ok(frame) = message::encode(body, self.local_node_id, 0) else {
            warn!(target: "mesh", "refusing to broadcast an oversized payload");
            return 0;
        };
        let mut sent = 0;
        for slot in 0..self.connections.len() {
            if self.connections[slot].state != ConnState::Connected {
                continue;
            }
            if self.write_frame(slot, &frame).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Send `body` to one specific connection slot (used to reply to a
    /// `SEARCH` on the connection it arrived on).
    pub fn send_to_conn(&mut self, conn_idx: usize, body: &Body) -> Result<(), MeshError> {
        let frame = message::encode(body, self.local_node_id, 0)?;
        self.write_frame(conn_idx, &frame)
    }

    /// Queue `frame` for `slot`. If the connection already has an unwritten
    /// tail pending from a previous `WouldBlock`, `frame` is appended behind
    /// it rather than attempted immediately, so frames stay in order.
    fn write_frame(&mut self, slot: usize, frame: &[u8]) -> Result<(), MeshError> {
        let has_pending = match self.connections.get(slot) {
            Some(conn) if conn.stream.is_some() => !conn.pending_write.is_empty(),
            Some(_) => return Err(MeshError::Argument("connection has no socket".to_string())),
            None => return Err(MeshError::Argument(format!("no such connection slot {slot}"))),
        };
        if has_pending {
            self.connections[slot].pending_write.extend_from_slice(frame);
            return Ok(());
        }
        self.write_now(slot, frame, 0)
    }

    /// Write `frame[start..]` without blocking. On `WouldBlock`, the
    /// unwritten tail is stashed in the connection's `pending_write` buffer
    /// and the poller is told to watch writability too; [`Reactor::flush_pending`]
    /// resumes the write from there once the socket reports writable again.
    /// No thread ever sleeps waiting for backpressure to clear.
    fn write_now(&mut self, slot: usize, frame: &[u8], start: usize) -> Result<(), MeshError> {
        let mut off = start;
        let result = loop {
            let Some(conn) = self.connections.get_mut(slot) else {
                return Err(MeshError::Argument(format!("no such connection slot {slot}")));
            };
            let Some(stream) = conn.stream.as_mut() else {
                return Err(MeshError::Argument("connection has no socket".to_string()));
            };
            if off >= frame.len() {
                break Ok(());
            }
            match stream.write(&frame[off..]) {
                Ok(0) => {
                    break Err(MeshError::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "connection closed mid-write",
                    )))
                }
                Ok(n) => off += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    conn.pending_write = frame[off..].to_vec();
                    break Ok(());
                }
                Err(e) => break Err(MeshError::Io(e)),
            }
        };
        if result.is_ok() {
            let needs_writable = self.connections.get(slot).map(|c| !c.pending_write.is_empty()).unwrap_or(false);
            if needs_writable {
                if let Some(fd) = self.connections[slot].fd() {
                    self.poller.modify(fd, Interest { readable: true, writable: true });
                }
            }
        }
        result
    }

    /// Resume a connection's stalled write once the poller reports it
    /// writable again. Drops back to readable-only interest once drained.
    fn flush_pending(&mut self, slot: usize) {
        let pending = match self.connections.get_mut(slot) {
            Some(conn) if !conn.pending_write.is_empty() => std::mem::take(&mut conn.pending_write),
            _ => return,
        };
        if self.write_now(slot, &pending, 0).is_err() {
            self.teardown(slot);
            return;
        }
        let drained = self.connections.get(slot).map(|c| c.pending_write.is_empty()).unwrap_or(true);
        if drained {
            if let Some(fd) = self.connections.get(slot).and_then(|c| c.fd()) {
                self.poller.modify(fd, Interest::READABLE);
            }
        }
    }

    /// One pump of the reactor: wait up to `timeout` for readiness, dispatch
    /// every ready event, then run periodic maintenance. `sink`
    /// receives any `RESULTS` messages that arrive.
    pub fn pump(
        &mut self,
        timeout: Duration,
        clock: &dyn Clock,
        sink: &mut dyn SearchResultSink,
    ) -> Result<(), MeshError> {
        let events = self.poller.wait(timeout)?;
        for event in events {
            self.handle_io_event(event, sink);
        }
        self.run_maintenance(clock);
        Ok(())
    }

    fn listener_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(|l| l.as_raw_fd())
    }

    fn handle_io_event(&mut self, event: PollEvent, sink: &mut dyn SearchResultSink) {
        if Some(event.fd) == self.listener_fd() {
            if event.readable {
                self.accept_pending();
            }
            return;
        }
        let Some(slot) = self.connections.iter().position(|c| c.fd() == Some(event.fd)) else {
            return;
        };
        if event.error || event.hup {
            self.teardown(slot);
            return;
        }
        if self.connections[slot].state == ConnState::Connecting && event.writable {
            self.finish_connect(slot);
            return;
        }
        if event.writable && !self.connections[slot].pending_write.is_empty() {
            self.flush_pending(slot);
        }
        if event.readable {
            self.read_connection(slot, sink);
        }
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else { return };
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let Some(slot) = self.free_slot() else {
                        debug!(target: "mesh", "connection table full, dropping inbound connection");
                        continue;
                    };
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    self.connections[slot] = Connection {
                        stream: Some(stream),
                        state: ConnState::AwaitHello,
                        direction: Direction::Inbound,
                        peer_idx: None,
                        remote_node_id: 0,
                        recv_buf: Vec::new(),
                        pending_write: Vec::new(),
                    };
                    self.poller.add(fd, Interest::READABLE);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.connections.iter().position(|c| c.state == ConnState::Free)
    }

    /// Allocate a connection slot, resolve `host:port`, and issue a
    /// non-blocking connect. IPv4 only, matching the peer address format
    /// used throughout the connection table.
    fn connect_peer(&mut self, peer_idx: usize) {
        let Some(entry) = self.peer_list.get(peer_idx) else { return };
        let host = entry.host.clone();
        let port = entry.port;

        let Some(slot) = self.free_slot() else {
            warn!(target: "mesh", "connection table full, cannot connect {host}:{port}");
            return;
        };
        match self.start_nonblocking_connect(&host, port) {
            Ok(fd) => {
                // SAFETY: `fd` was just created by `socket(2)` above and is
                // owned exclusively by this `TcpStream`.
                let stream = unsafe { TcpStream::from_raw_fd(fd) };
                self.connections[slot] = Connection {
                    stream: Some(stream),
                    state: ConnState::Connecting,
                    direction: Direction::Outbound,
                    peer_idx: Some(peer_idx),
                    remote_node_id: 0,
                    recv_buf: Vec::new(),
                    pending_write: Vec::new(),
                };
                self.poller.add(fd, Interest::WRITABLE);
                self.peer_list.update_status(peer_idx, PeerStatus::Connecting);
            }
            Err(err) => {
                warn!(target: "mesh", "connect to {host}:{port} failed: {err}");
                self.peer_list.update_status(peer_idx, PeerStatus::Failed);
            }
        }
    }

    fn start_nonblocking_connect(&self, host: &str, port: u16) -> Result<RawFd, MeshError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| MeshError::Argument(format!("cannot resolve {host}:{port}: {e}")))?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| MeshError::Argument(format!("{host}:{port} has no IPv4 address")))?;
        let SocketAddr::V4(addr) = addr else { unreachable!() };

        unsafe {
            let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                libc::close(fd);
                return Err(std::io::Error::last_os_error().into());
            }
            let sockaddr = sockaddr_in_for(addr);
            let rc = libc::connect(
                fd,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            );
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINPROGRESS) {
                    libc::close(fd);
                    return Err(err.into());
                }
            }
            Ok(fd)
        }
    }

    fn finish_connect(&mut self, slot: usize) {
        let Some(stream) = self.connections[slot].stream.as_ref() else { return };
        match stream.take_error() {
            Ok(None) => {
                self.connections[slot].state = ConnState::AwaitHello;
                let fd = self.connections[slot].fd().unwrap();
                self.poller.modify(fd, Interest::READABLE);
                if let Some(peer_idx) = self.connections[slot].peer_idx {
                    self.peer_list.update_status(peer_idx, PeerStatus::Connecting);
                }
                let hello = self.hello_body();
                let _ = self.send_to_conn(slot, &hello);
            }
            _ => self.teardown(slot),
        }
    }

    fn hello_body(&self) -> Body {
        Body::Hello(HelloPayload {
            node_id: self.local_node_id,
            version: message::VERSION as u32,
            mesh_port: self.mesh_port,
            http_port: self.http_port,
            flags: 0,
            reserved: 0,
        })
    }

    fn read_connection(&mut self, slot: usize, sink: &mut dyn SearchResultSink) {
        let mut chunk = [0u8; READ_CHUNK];
        let read = {
            let Some(stream) = self.connections[slot].stream.as_mut() else { return };
            stream.read(&mut chunk)
        };
        match read {
            Ok(0) => {
                self.teardown(slot);
                return;
            }
            Ok(n) => self.connections[slot].recv_buf.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(_) => {
                self.teardown(slot);
                return;
            }
        }

        let mut recv_buf = std::mem::take(&mut self.connections[slot].recv_buf);
        let mut drop_connection = false;

        loop {
            if recv_buf.len() < message::HEADER_LEN {
                break;
            }
            if recv_buf[0..4] != message::MAGIC {
                match find_magic(&recv_buf[1..]) {
                    Some(offset) => {
                        recv_buf.drain(0..offset + 1);
                        continue;
                    }
                    None => {
                        recv_buf.clear();
                        break;
                    }
                }
            }
            let payload_len = u32::from_le_bytes(recv_buf[24..28].try_into().unwrap()) as usize;
            let total = message::HEADER_LEN + payload_len;
            if total > MAX_RECV_BUFFER {
                warn!(target: "mesh", "peer declared an oversized payload, disconnecting");
                drop_connection = true;
                break;
            }
            if recv_buf.len() < total {
                break; // wait for the rest of the frame
            }
            let frame: Vec<u8> = recv_buf.drain(0..total).collect();
            match message::decode(&frame, message::MAX_PAYLOAD) {
                Ok(msg) => self.dispatch_message(slot, msg, sink),
                Err(err) => {
                    // Protocol errors are dropped, not fatal to the stream: we already
                    // resynced to a magic boundary above, so just log and keep reading.
                    debug!(target: "mesh", "dropping malformed mesh message: {err}");
                }
            }
        }

        if drop_connection {
            self.teardown(slot);
        } else if self.connections[slot].state != ConnState::Free {
            self.connections[slot].recv_buf = recv_buf;
        }
    }

    fn dispatch_message(&mut self, slot: usize, msg: Message, sink: &mut dyn SearchResultSink) {
        let Header { source_id, .. } = msg.header;
        let Some(body) = msg.body else {
            trace!(target: "mesh", "dropping unrecognized mesh message type");
            return;
        };
        match body {
            Body::Hello(hello) => self.handle_hello(slot, source_id, hello),
            Body::Ping => self.handle_ping(slot),
            Body::Pong => self.handle_pong(slot),
            Body::Discover => self.handle_discover(slot),
            Body::Peers(peers) => self.handle_peers(peers),
            Body::Search(search) => self.handle_search(slot, search),
            Body::Results(results) => self.handle_results(results, sink),
            Body::Index(index_msg) => self.handle_index(index_msg),
        }
    }

    fn handle_hello(&mut self, slot: usize, remote_id: u64, hello: HelloPayload) {
        self.connections[slot].remote_node_id = remote_id;
        let was_inbound = self.connections[slot].direction == Direction::Inbound;
        self.connections[slot].state = ConnState::Connected;

        let remote_addr = self.connections[slot]
            .stream
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .map(|a| a.ip().to_string());

        let peer_idx = self.peer_list.find(remote_id).or_else(|| {
            remote_addr.as_deref().and_then(|host| self.peer_list.find_by_addr(host, hello.mesh_port))
        });
        let peer_idx = match peer_idx {
            Some(idx) => {
                self.peer_list.update_node_id(idx, remote_id);
                idx
            }
            None => match remote_addr {
                Some(host) => match self.peer_list.add(&host, hello.mesh_port, remote_id) {
                    Ok(idx) => {
                        if let Some(entry) = self.peer_list.get_mut(idx) {
                            entry.flags |= FLAG_DISCOVERED;
                        }
                        idx
                    }
                    Err(err) => {
                        debug!(target: "mesh", "could not record peer from HELLO: {err}");
                        self.connections[slot].peer_idx = None;
                        if was_inbound {
                            let hello_reply = self.hello_body();
                            let _ = self.send_to_conn(slot, &hello_reply);
                        }
                        let discover = Body::Discover;
                        let _ = self.send_to_conn(slot, &discover);
                        return;
                    }
                },
                None => {
                    self.connections[slot].peer_idx = None;
                    return;
                }
            },
        };

        self.connections[slot].peer_idx = Some(peer_idx);
        self.peer_list.update_status(peer_idx, PeerStatus::Connected);
        self.peer_list.set_transport(peer_idx, TransportKind::StreamSocket);
        if let Some(entry) = self.peer_list.get_mut(peer_idx) {
            entry.conn_fd = self.connections[slot].fd().unwrap_or(-1);
        }

        if was_inbound {
            let hello_reply = self.hello_body();
            let _ = self.send_to_conn(slot, &hello_reply);
        }
        let discover = Body::Discover;
        let _ = self.send_to_conn(slot, &discover);
    }

    fn handle_ping(&mut self, slot: usize) {
        self.stamp_last_seen(slot);
        let _ = self.send_to_conn(slot, &Body::Pong);
    }

    fn handle_pong(&mut self, slot: usize) {
        self.stamp_last_seen(slot);
    }

    fn stamp_last_seen(&mut self, slot: usize) {
        if let Some(peer_idx) = self.connections[slot].peer_idx {
            if let Some(entry) = self.peer_list.get_mut(peer_idx) {
                entry.last_seen = current_wall_secs();
            }
        }
    }

    fn handle_discover(&mut self, slot: usize) {
        let records = self
            .peer_list
            .iter()
            .filter(|p| p.node_id != self.local_node_id)
            .map(|p| PeerRecord { node_id: p.node_id, host: p.host.clone(), port: p.port })
            .collect();
        let reply = Body::Peers(PeersPayload { records });
        let _ = self.send_to_conn(slot, &reply);
    }

    fn handle_peers(&mut self, peers: PeersPayload) {
        for record in peers.records {
            if record.node_id == self.local_node_id {
                continue;
            }
            let already_known = (record.node_id != 0 && self.peer_list.find(record.node_id).is_some())
                || self.peer_list.find_by_addr(&record.host, record.port).is_some();
            if already_known {
                continue;
            }
            match self.peer_list.add(&record.host, record.port, record.node_id) {
                Ok(idx) => {
                    if let Some(entry) = self.peer_list.get_mut(idx) {
                        entry.flags |= FLAG_DISCOVERED;
                    }
                    self.connect_peer(idx);
                }
                Err(err) => debug!(target: "mesh", "could not record discovered peer: {err}"),
            }
        }
    }

    fn handle_search(&mut self, slot: usize, search: SearchPayload) {
        let hits = self.index.query(&search.query, search.max_results as usize);
        let reply = Body::Results(ResultsPayload {
            query_id: search.query_id,
            records: hits.into_iter().map(|h| ResultRecord { doc_id: h.doc_id, score: h.score }).collect(),
        });
        let _ = self.send_to_conn(slot, &reply);
    }

    fn handle_results(&mut self, results: ResultsPayload, sink: &mut dyn SearchResultSink) {
        let records: Vec<(u64, u32)> = results.records.iter().map(|r| (r.doc_id, r.score)).collect();
        sink.on_results(results.query_id, &records);
    }

    fn handle_index(&mut self, index_msg: IndexPayload) {
        let result = match index_msg.operation {
            IndexOp::Put => {
                let content = String::from_utf8_lossy(&index_msg.content).into_owned();
                self.index.index_local(index_msg.doc_id, &content)
            }
            IndexOp::Delete => self.index.delete_local(index_msg.doc_id),
        };
        if let Err(err) = result {
            debug!(target: "mesh", "replicated index operation failed: {err}");
        }
    }

    fn teardown(&mut self, slot: usize) {
        let Some(conn) = self.connections.get_mut(slot) else { return };
        if conn.state == ConnState::Free {
            return;
        }
        if let Some(fd) = conn.fd() {
            self.poller.remove(fd);
        }
        if let Some(peer_idx) = conn.peer_idx {
            self.peer_list.update_status(peer_idx, PeerStatus::Disconnected);
            if let Some(entry) = self.peer_list.get_mut(peer_idx) {
                entry.conn_fd = -1;
            }
        }
        self.connections[slot] = Connection::free();
    }

    fn run_maintenance(&mut self, clock: &dyn Clock) {
        let now = clock.now_monotonic();
        if now.duration_since(self.last_heartbeat) >= HEARTBEAT_INTERVAL {
            self.last_heartbeat = now;
            self.send_heartbeats();
        }
        if now.duration_since(self.last_maintenance) >= MAINTENANCE_INTERVAL {
            self.last_maintenance = now;
            self.sweep_peers(clock);
        }
    }

    fn send_heartbeats(&mut self) {
        for slot in 0..self.connections.len() {
            if self.connections[slot].state == ConnState::Connected {
                let _ = self.send_to_conn(slot, &Body::Ping);
            }
        }
    }

    fn sweep_peers(&mut self, clock: &dyn Clock) {
        let now = clock.now_secs();
        let indices: Vec<usize> = (0..self.peer_list.count()).collect();
        for idx in indices {
            let Some(entry) = self.peer_list.get(idx) else { continue };
            match entry.status {
                PeerStatus::Connected => {
                    if entry.last_seen != 0 && now.saturating_sub(entry.last_seen) > TIMEOUT_SECS {
                        let conn_fd = entry.conn_fd;
                        self.peer_list.update_status(idx, PeerStatus::Disconnected);
                        if let Some(slot) = self.connections.iter().position(|c| c.fd() == Some(conn_fd)) {
                            self.teardown(slot);
                        }
                    }
                }
                PeerStatus::Disconnected if entry.is_persistent_seed() => {
                    self.peer_list.update_status(idx, PeerStatus::Connecting);
                    self.connect_peer(idx);
                }
                _ => {}
            }
        }
    }
}

fn find_magic(haystack: &[u8]) -> Option<usize> {
    haystack.windows(message::MAGIC.len()).position(|w| w == message::MAGIC)
}

fn current_wall_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn sockaddr_in_for(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(addr.ip().octets()) },
        sin_zero: [0; 8],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omesh_common::SystemClock;

    struct CollectingSink(Vec<(u32, Vec<(u64, u32)>)>);
    impl SearchResultSink for CollectingSink {
        fn on_results(&mut self, query_id: u32, records: &[(u64, u32)]) {
            self.0.push((query_id, records.to_vec()));
        }
    }

    #[test]
    fn two_reactors_complete_a_hello_handshake() {
        let clock = SystemClock;
        let mut a = Reactor::new(1, 0, 8080).unwrap();
        let mut b = Reactor::new(2, 0, 8081).unwrap();
        let a_port = a.listener.as_ref().unwrap().local_addr().unwrap().port();

        b.add_seed_peer("127.0.0.1", a_port).unwrap();

        let mut sink = NullSink;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            a.pump(Duration::from_millis(50), &clock, &mut sink).unwrap();
            b.pump(Duration::from_millis(50), &clock, &mut sink).unwrap();
            if a.peer_list().iter().any(|p| p.status == PeerStatus::Connected)
                && b.peer_list().iter().any(|p| p.status == PeerStatus::Connected)
            {
                break;
            }
        }

        assert!(a.peer_list().iter().any(|p| p.node_id == 2 && p.status == PeerStatus::Connected));
        assert!(b.peer_list().iter().any(|p| p.node_id == 1 && p.status == PeerStatus::Connected));
    }

    #[test]
    fn search_round_trips_to_results() {
        let clock = SystemClock;
        let mut a = Reactor::new(10, 0, 0).unwrap();
        let mut b = Reactor::new(20, 0, 0).unwrap();
        let a_port = a.listener.as_ref().unwrap().local_addr().unwrap().port();
        b.add_seed_peer("127.0.0.1", a_port).unwrap();

        a.index_mut().index_local(1, "hello mesh").unwrap();

        let mut sink = NullSink;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            a.pump(Duration::from_millis(20), &clock, &mut sink).unwrap();
            b.pump(Duration::from_millis(20), &clock, &mut sink).unwrap();
            if b.connected_count() > 0 {
                break;
            }
        }
        assert_eq!(b.connected_count(), 1);

        let sent = b.broadcast_connected(&Body::Search(SearchPayload {
            query_id: 7,
            flags: 0,
            max_results: 10,
            query: "hello".to_string(),
        }));
        assert_eq!(sent, 1);

        let mut collecting = CollectingSink(Vec::new());
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && collecting.0.is_empty() {
            a.pump(Duration::from_millis(20), &clock, &mut NullSink).unwrap();
            b.pump(Duration::from_millis(20), &clock, &mut collecting).unwrap();
        }

        assert_eq!(collecting.0.len(), 1);
        assert_eq!(collecting.0[0].0, 7);
        assert_eq!(collecting.0[0].1, vec![(1, 1)]);
    }

    #[test]
    fn connection_table_capacity_is_64() {
        assert_eq!(CONNECTION_TABLE_CAPACITY, 64);
    }
}
