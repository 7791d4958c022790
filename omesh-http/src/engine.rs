//! `Engine`: owns the mesh reactor, the pending-search registry, and the
//! HTTP listener, and runs the cooperative loop that drives both on one
//! thread.
use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use omesh_common::{Clock, SystemClock};
use omesh_index::IndexError;
use omesh_mesh::{Body, IndexOp, IndexPayload, Interest, PollEvent, Poller, Reactor};
use omesh_search::PendingSearchRegistry;

use crate::error::HttpError;
use crate::{request, response, routes};

/// Timeout for one HTTP-listener readiness wait.
const HTTP_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Owns every piece of mutable state this node has and drives the HTTP/mesh
/// cooperative loop.
pub struct Engine {
    reactor: Reactor,
    registry: PendingSearchRegistry,
    listener: TcpListener,
    http_poller: Poller,
    clock: SystemClock,
    running: bool,
    next_doc_id: u64,
    peers_path: PathBuf,
    index_path: PathBuf,
}

impl Engine {
    /// Bind the HTTP listener on `http_port` and the mesh listener on
    /// `mesh_port`, then load any persisted peer list and index under
    /// `data_dir`. The peer-list path defaults to `data_dir/omesh.peers`
    /// pass `peers_path_override` to honor
    /// `--peers-file`.
    pub fn new(node_id: u64, http_port: u16, mesh_port: u16, data_dir: &Path) -> Result<Self, HttpError> {
        Self::with_peers_path(node_id, http_port, mesh_port, data_dir, None)
    }

    /// As [`Engine::new`], but allows overriding the peer-list path instead
    /// of defaulting it to `data_dir/omesh.peers`.
    pub fn with_peers_path(
        node_id: u64,
        http_port: u16,
        mesh_port: u16,
        data_dir: &Path,
        peers_path_override: Option<&Path>,
    ) -> Result<Self, HttpError> {
        let listener = TcpListener::bind(("0.0.0.0", http_port))?;
        listener.set_nonblocking(true)?;

        let mut http_poller = Poller::new();
        http_poller.add(listener.as_raw_fd(), Interest::READABLE);

        let mut reactor = Reactor::new(node_id, mesh_port, http_port)?;

        let peers_path = peers_path_override.map(Path::to_path_buf).unwrap_or_else(|| data_dir.join("omesh.peers"));
        let index_path = data_dir.join("index.db");
        reactor.load_peers(&peers_path);
        match omesh_index::Index::load(&index_path) {
            Ok(index) => *reactor.index_mut() = index,
            Err(IndexError::Io(ref err)) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(target: "http", "could not load index store: {err}"),
        }

        Ok(Self {
            reactor,
            registry: PendingSearchRegistry::new(),
            listener,
            http_poller,
            clock: SystemClock,
            running: true,
            next_doc_id: 0,
            peers_path,
            index_path,
        })
    }

    /// Add a seed peer and connect to it immediately.
    pub fn add_seed_peer(&mut self, host: &str, port: u16) -> Result<(), HttpError> {
        self.reactor.add_seed_peer(host, port)?;
        Ok(())
    }

    /// Whether the cooperative loop should keep running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Clear the running flag (checked at the top of every
    /// iteration); called from the signal handler.
    pub fn stop(&mut self) {
        self.running = false;
        self.reactor.stop();
    }

    /// Persist the peer list and (if dirty) the index, releasing every
    /// socket. Called once after the loop exits.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.reactor.save_peers(&self.peers_path) {
            warn!(target: "http", "could not save peer list: {err}");
        }
        if let Err(err) = self.reactor.index_mut().save(&self.index_path) {
            warn!(target: "http", "could not save index: {err}");
        }
        self.reactor.shutdown();
    }

    /// Borrow the mesh reactor.
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Mutably borrow the mesh reactor.
    pub fn reactor_mut(&mut self) -> &mut Reactor {
        &mut self.reactor
    }

    /// Mutably borrow the pending-search registry.
    pub fn registry_mut(&mut self) -> &mut PendingSearchRegistry {
        &mut self.registry
    }

    /// Mutably borrow the mesh reactor and the pending-search registry at
    /// once, for callers (the `/search` route) that need to hand both to
    /// [`omesh_search::search`] without fighting the borrow checker over two
    /// separate `&mut self` accessors.
    pub fn reactor_and_registry_mut(&mut self) -> (&mut omesh_mesh::Reactor, &mut PendingSearchRegistry) {
        (&mut self.reactor, &mut self.registry)
    }

    /// The clock this engine uses for deadlines and peer timeouts.
    pub fn clock(&self) -> &SystemClock {
        &self.clock
    }

    /// Allocate the next document id. Spec §4.6 assigns "a doc id (monotonic
    /// clock seconds)"; seeded from wall-clock seconds but bumped past any
    /// prior id so two ingests in the same second still get distinct ids.
    pub fn allocate_doc_id(&mut self) -> u64 {
        let candidate = self.clock.now_secs().max(self.next_doc_id + 1);
        self.next_doc_id = candidate;
        candidate
    }

    /// Write `content` to the local index under a fresh doc id and broadcast
    /// an INDEX message to every connected peer ("Replication
    /// entry point"). Peer send failures are logged, not propagated: the
    /// local write having succeeded is enough to report success.
    pub fn index_local_and_broadcast(&mut self, content: &str) -> Result<u64, HttpError> {
        let doc_id = self.allocate_doc_id();
        self.reactor.index_mut().index_local(doc_id, content)?;

        let body = Body::Index(IndexPayload { doc_id, operation: IndexOp::Put, content: content.as_bytes().to_vec() });
        let sent = self.reactor.broadcast_connected(&body);
        info!(target: "http", "indexed doc {doc_id}, replicated to {sent} peer(s)");
        Ok(doc_id)
    }

    /// Run one iteration of the cooperative loop: at most one HTTP client
    /// served, then one non-blocking mesh pump.
    pub fn tick(&mut self) -> Result<(), HttpError> {
        let events = self.http_poller.wait(HTTP_POLL_TIMEOUT).map_err(|e| HttpError::Argument(e.to_string()))?;
        if events.iter().any(|event| event.is_readable_on(&self.listener)) {
            self.serve_one_client();
        }
        self.reactor.pump(Duration::from_millis(0), &self.clock, &mut self.registry)?;
        Ok(())
    }

    /// Run [`Engine::tick`] until [`Engine::stop`] is called, then shut down.
    pub fn run(&mut self) {
        while self.running {
            if let Err(err) = self.tick() {
                warn!(target: "http", "tick failed: {err}");
            }
        }
        self.shutdown();
    }

    fn serve_one_client(&mut self) {
        let mut stream = match self.listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(_) => return,
        };
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));

        let mut buf = vec![0u8; request::MAX_REQUEST_LEN];
        let read = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(_) => return,
        };
        buf.truncate(read);

        let response_bytes = match request::parse(&buf) {
            Ok(req) => routes::route(&req, self),
            Err(err) => response::error(400, err.to_string()),
        };
        let _ = stream.write_all(&response_bytes);
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
}
