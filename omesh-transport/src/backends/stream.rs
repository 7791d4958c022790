//! Stream-socket (TCP) backend.
//!
//! This backend is self-contained: it keeps its own peer table and does not
//! share the mesh reactor's connection table (which drives the handshake
//! state machine directly over raw file descriptors). It exists
//! so TCP is selectable through the same six-operation contract as every
//! other transport, and is independently testable.
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use omesh_common::error::Error;

use crate::backend::{Backend, BackendConfig, BackendPeer, BackendStats, TransportKind};

#[derive(Debug)]
pub struct StreamSocketBackend {
    listener: Option<TcpListener>,
    peers: HashMap<u64, TcpStream>,
    next_peer_id: u64,
    stats: BackendStats,
}

impl Default for StreamSocketBackend {
    fn default() -> Self {
        Self {
            listener: None,
            peers: HashMap::new(),
            next_peer_id: 1,
            stats: BackendStats::default(),
        }
    }
}

impl StreamSocketBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn accept_pending(&mut self) {
        let Some(listener) = &self.listener else { return };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if stream.set_nonblocking(true).is_ok() {
                        let id = self.next_peer_id;
                        self.next_peer_id += 1;
                        log::debug!(target: "transport", "stream-socket: accepted peer {id} from {addr}");
                        self.peers.insert(id, stream);
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

impl Backend for StreamSocketBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamSocket
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), Error> {
        if config.listen {
            let listener = TcpListener::bind(("0.0.0.0", config.port))?;
            listener.set_nonblocking(true)?;
            self.listener = Some(listener);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.listener = None;
        self.peers.clear();
    }

    fn send(&mut self, peer_id: u64, data: &[u8]) -> Result<usize, Error> {
        if peer_id == 0 {
            let mut sent = 0;
            for stream in self.peers.values_mut() {
                sent += stream.write(data).unwrap_or(0);
            }
            return Ok(sent);
        }
        let stream = self
            .peers
            .get_mut(&peer_id)
            .ok_or_else(|| Error::peer_not_found(format!("no such peer {peer_id}")))?;
        Ok(stream.write(data)?)
    }

    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<(Vec<u8>, u64), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            self.accept_pending();

            let mut buf = vec![0u8; max_len];
            let mut found = None;
            for (&id, stream) in self.peers.iter_mut() {
                match stream.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        found = Some((buf[..n].to_vec(), id));
                        break;
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(_) => continue,
                }
            }
            if let Some((data, id)) = found {
                self.stats.rx_ok += 1;
                return Ok((data, id));
            }
            if Instant::now() >= deadline {
                return Err(Error::link("recv timed out"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn get_peers(&self) -> Vec<BackendPeer> {
        self.peers
            .iter()
            .filter_map(|(&id, stream)| {
                stream.peer_addr().ok().map(|addr| BackendPeer {
                    peer_id: id,
                    address: addr.to_string(),
                })
            })
            .collect()
    }

    fn get_link_quality(&self, peer_id: u64) -> Option<u8> {
        self.peers.contains_key(&peer_id).then_some(100)
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn send_to_unknown_peer_is_peer_not_found() {
        let mut backend = StreamSocketBackend::new();
        let err = backend.send(42, b"hi").unwrap_err();
        assert_eq!(err.kind, omesh_common::ErrorKind::PeerNotFound);
    }

    #[test]
    fn accepts_and_exchanges_data() {
        let mut backend = StreamSocketBackend::new();
        backend
            .init(BackendConfig {
                listen: true,
                port: 0,
                ..Default::default()
            })
            .unwrap();
        let local_port = backend.listener.as_ref().unwrap().local_addr().unwrap().port();

        let mut client = StdTcpStream::connect(("127.0.0.1", local_port)).unwrap();
        client.write_all(b"ping").unwrap();

        let (data, peer_id) = backend.recv(16, Duration::from_secs(1)).unwrap();
        assert_eq!(data, b"ping");
        assert!(peer_id >= 1);
    }
}
