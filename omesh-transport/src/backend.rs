//! The six-operation transport backend contract.
use std::time::Duration;

use omesh_common::error::Error;

/// Identifies one kind of link. Used as the registry key and as the tag
/// stored in a peer-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
    /// No transport (peer entry default before first contact).
    None,
    /// OS stream socket (TCP).
    StreamSocket,
    /// OS datagram socket (UDP), with the §4.1 framing codec.
    DatagramSocket,
    /// Framed UART / serial link.
    Serial,
    /// Long-range radio (e.g. LoRa).
    RadioLongRange,
    /// Short-range radio (e.g. a local packet radio).
    RadioShort,
    /// Kernel 802.11s mesh interface.
    KernelMesh,
}

impl TransportKind {
    /// Fixed tie-break priority score: higher wins.
    pub fn priority_score(&self) -> u8 {
        match self {
            TransportKind::StreamSocket => 100,
            TransportKind::Serial => 90,
            TransportKind::RadioShort => 80,
            TransportKind::DatagramSocket => 70,
            TransportKind::KernelMesh => 60,
            TransportKind::RadioLongRange => 50,
            TransportKind::None => 0,
        }
    }

    /// Short machine-readable name (matches spec.md's `--transport` vocabulary,
    /// even though no current CLI flag feeds this parser — see DESIGN.md).
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::None => "none",
            TransportKind::StreamSocket => "tcp",
            TransportKind::DatagramSocket => "udp",
            TransportKind::Serial => "serial",
            TransportKind::RadioLongRange => "lora",
            TransportKind::RadioShort => "bluetooth",
            TransportKind::KernelMesh => "wifi-mesh",
        }
    }

    /// Parse one of the names `as_str` produces.
    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "tcp" => Ok(TransportKind::StreamSocket),
            "udp" => Ok(TransportKind::DatagramSocket),
            "serial" => Ok(TransportKind::Serial),
            "lora" => Ok(TransportKind::RadioLongRange),
            "bluetooth" => Ok(TransportKind::RadioShort),
            "wifi-mesh" => Ok(TransportKind::KernelMesh),
            other => Err(Error::argument(format!("unknown transport `{other}`"))),
        }
    }
}

/// Configuration handed to a backend's `init`.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Listen for inbound connections/datagrams.
    pub listen: bool,
    /// Enable broadcast sends (datagram backend).
    pub broadcast: bool,
    /// Port to bind, for socket-based backends.
    pub port: u16,
    /// Device path, for serial/radio backends.
    pub device: Option<String>,
    /// Baud rate, for serial/radio backends.
    pub baud: u32,
    /// Network interface name, for the kernel-mesh backend.
    pub interface: Option<String>,
}

/// Per-backend link-quality and error counters, exposed so callers can
/// observe them (spec §8 scenario 6) without reaching into the backend's
/// internals.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendStats {
    /// Frames dropped to a CRC mismatch.
    pub crc_errors: u64,
    /// Frames dropped to desync/out-of-range length.
    pub frame_errors: u64,
    /// Successful receives, used to derive link quality.
    pub rx_ok: u64,
    /// Failed/garbled receives.
    pub rx_fail: u64,
}

impl BackendStats {
    /// Link quality derived from the rx success ratio, 0..=100.
    pub fn link_quality(&self) -> u8 {
        let total = self.rx_ok + self.rx_fail;
        if total == 0 {
            255 // unknown
        } else {
            ((self.rx_ok * 100) / total) as u8
        }
    }
}

/// A discovered remote peer, as enumerated by [`Backend::get_peers`].
#[derive(Debug, Clone)]
pub struct BackendPeer {
    /// Backend-local peer identifier. `0` is reserved for "broadcast" in
    /// `send`, so real peers are numbered from 1.
    pub peer_id: u64,
    /// Printable address (host:port, device path, or radio id).
    pub address: String,
}

/// The uniform six-operation contract every transport backend implements
///. `peer_id = 0` in [`Backend::send`] means "broadcast to all
/// known peers of this backend".
pub trait Backend: std::fmt::Debug + Send {
    /// Which kind of link this backend implements.
    fn kind(&self) -> TransportKind;

    /// Initialize the backend (bind/open/configure the underlying link).
    fn init(&mut self, config: BackendConfig) -> Result<(), Error>;

    /// Tear down the backend, releasing any held resources.
    fn shutdown(&mut self);

    /// Send `data` to `peer_id` (or broadcast if `peer_id == 0`). Returns
    /// the number of bytes sent.
    fn send(&mut self, peer_id: u64, data: &[u8]) -> Result<usize, Error>;

    /// Receive up to `max_len` bytes, waiting at most `timeout`. Returns
    /// the payload and the id of the peer it came from.
    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<(Vec<u8>, u64), Error>;

    /// Enumerate known peers of this backend.
    fn get_peers(&self) -> Vec<BackendPeer>;

    /// Link quality for one peer, 0..=100, or `None` if unknown/no such
    /// peer.
    fn get_link_quality(&self, peer_id: u64) -> Option<u8>;

    /// Error/quality counters for this backend.
    fn stats(&self) -> BackendStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_matches_spec_default_policy() {
        let mut kinds = [
            TransportKind::DatagramSocket,
            TransportKind::StreamSocket,
            TransportKind::KernelMesh,
            TransportKind::RadioLongRange,
            TransportKind::Serial,
            TransportKind::RadioShort,
        ];
        kinds.sort_by_key(|k| std::cmp::Reverse(k.priority_score()));
        assert_eq!(
            kinds,
            [
                TransportKind::StreamSocket,
                TransportKind::Serial,
                TransportKind::RadioShort,
                TransportKind::DatagramSocket,
                TransportKind::KernelMesh,
                TransportKind::RadioLongRange,
            ]
        );
    }

    #[test]
    fn transport_name_round_trips() {
        for kind in [
            TransportKind::StreamSocket,
            TransportKind::DatagramSocket,
            TransportKind::Serial,
            TransportKind::RadioLongRange,
            TransportKind::RadioShort,
            TransportKind::KernelMesh,
        ] {
            assert_eq!(TransportKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_transport_name_is_an_argument_error() {
        assert!(TransportKind::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn link_quality_unknown_when_no_traffic() {
        let stats = BackendStats::default();
        assert_eq!(stats.link_quality(), 255);
    }

    #[test]
    fn link_quality_reflects_success_ratio() {
        let stats = BackendStats {
            rx_ok: 3,
            rx_fail: 1,
            ..Default::default()
        };
        assert_eq!(stats.link_quality(), 75);
    }
}
