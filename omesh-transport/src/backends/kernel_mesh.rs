//! Kernel 802.11s mesh backend: a datagram socket bound to a caller-named
//! mesh interface, using the §4.1 framing codec, with link quality derived
//! from a crude traffic heuristic.
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use omesh_common::error::Error;

use crate::backend::{Backend, BackendConfig, BackendPeer, BackendStats, TransportKind};
use crate::framing::{self, MIN_CAP};

#[derive(Debug, Default)]
struct PeerTraffic {
    addr: SocketAddr,
    frames_seen: u64,
    frames_last_window: u64,
}

#[derive(Debug)]
pub struct KernelMeshBackend {
    socket: Option<UdpSocket>,
    peers: HashMap<u64, PeerTraffic>,
    next_peer_id: u64,
    cap: usize,
    stats: BackendStats,
}

impl Default for KernelMeshBackend {
    fn default() -> Self {
        Self {
            socket: None,
            peers: HashMap::new(),
            next_peer_id: 1,
            cap: MIN_CAP,
            stats: BackendStats::default(),
        }
    }
}

impl KernelMeshBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(target_os = "linux")]
    fn bind_to_interface(socket: &UdpSocket, interface: &str) -> Result<(), Error> {
        let mut name = interface.as_bytes().to_vec();
        name.push(0);
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                name.as_ptr() as *const libc::c_void,
                name.len() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn bind_to_interface(_socket: &UdpSocket, _interface: &str) -> Result<(), Error> {
        Err(Error::argument("kernel-mesh backend requires Linux"))
    }

    fn peer_id_for(&mut self, addr: SocketAddr) -> u64 {
        if let Some((&id, _)) = self.peers.iter().find(|(_, p)| p.addr == addr) {
            return id;
        }
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        self.peers.insert(id, PeerTraffic { addr, ..Default::default() });
        id
    }
}

impl Backend for KernelMeshBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::KernelMesh
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), Error> {
        let interface = config
            .interface
            .filter(|i| !i.is_empty())
            .ok_or_else(|| Error::argument("kernel-mesh backend requires a named interface"))?;
        let socket = UdpSocket::bind(("0.0.0.0", config.port))?;
        socket.set_nonblocking(true)?;
        Self::bind_to_interface(&socket, &interface)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.socket = None;
        self.peers.clear();
    }

    fn send(&mut self, peer_id: u64, data: &[u8]) -> Result<usize, Error> {
        let socket = self.socket.as_ref().ok_or_else(|| Error::not_initialized("kernel-mesh backend"))?;
        let mut framed = Vec::new();
        framing::encode(data, self.cap, &mut framed)?;

        if peer_id == 0 {
            let mut sent = 0;
            for peer in self.peers.values() {
                sent += socket.send_to(&framed, peer.addr).unwrap_or(0);
            }
            return Ok(sent);
        }
        let peer = self
            .peers
            .get(&peer_id)
            .ok_or_else(|| Error::peer_not_found(format!("no such peer {peer_id}")))?;
        Ok(socket.send_to(&framed, peer.addr)?)
    }

    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<(Vec<u8>, u64), Error> {
        let socket = self.socket.as_ref().ok_or_else(|| Error::not_initialized("kernel-mesh backend"))?;
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; max_len.max(MIN_CAP)];

        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let id = self.peer_id_for(from);
                    if let Ok(payload) = framing::decode_one(&buf[..n], self.cap) {
                        if let Some(peer) = self.peers.get_mut(&id) {
                            peer.frames_seen += 1;
                            peer.frames_last_window += 1;
                        }
                        self.stats.rx_ok += 1;
                        return Ok((payload, id));
                    }
                    self.stats.rx_fail += 1;
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
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
            .map(|(&id, p)| BackendPeer { peer_id: id, address: p.addr.to_string() })
            .collect()
    }

    fn get_link_quality(&self, peer_id: u64) -> Option<u8> {
        // Crude traffic heuristic: more frames seen in the recent window is
        // treated as a healthier link, capped at 100.
        self.peers.get(&peer_id).map(|p| p.frames_last_window.min(100) as u8)
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_interface_name() {
        let mut backend = KernelMeshBackend::new();
        let err = backend.init(BackendConfig::default()).unwrap_err();
        assert_eq!(err.kind, omesh_common::ErrorKind::Argument);
    }
}
