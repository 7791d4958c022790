//! Generic AT-command radio backend, parametrized by a [`RadioProfile`] so
//! the short- and long-range backends share one implementation
//! and differ only in their `init` configuration sequence and transport tag.
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::time::{Duration, Instant};

use omesh_common::error::Error;

use super::at::{format_send_line, parse_rcv_line};
use crate::backend::{Backend, BackendConfig, BackendPeer, BackendStats, TransportKind};

/// Which radio this backend is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioProfile {
    /// Short-range packet radio: peer-to-peer mode only.
    Short,
    /// Long-range radio (e.g. LoRa): peer-to-peer mode plus spreading
    /// factor, band and power configuration.
    Long,
}

impl RadioProfile {
    fn kind(self) -> TransportKind {
        match self {
            RadioProfile::Short => TransportKind::RadioShort,
            RadioProfile::Long => TransportKind::RadioLongRange,
        }
    }

    /// The AT command sequence that puts the radio into peer-to-peer mode.
    fn init_commands(self) -> Vec<String> {
        match self {
            RadioProfile::Short => vec!["AT+MODE=P2P\r\n".to_string()],
            RadioProfile::Long => vec![
                "AT+MODE=P2P\r\n".to_string(),
                "AT+SF=7\r\n".to_string(),
                "AT+BAND=915000000\r\n".to_string(),
                "AT+POWER=14\r\n".to_string(),
            ],
        }
    }
}

const PEER_ID: u64 = 1;

#[derive(Debug)]
pub struct AtRadioBackend {
    profile: RadioProfile,
    port: Option<File>,
    reader: Option<BufReader<File>>,
    connected: bool,
    packets_sent: u64,
    packets_acked: u64,
    stats: BackendStats,
}

impl AtRadioBackend {
    pub fn new(profile: RadioProfile) -> Self {
        Self {
            profile,
            port: None,
            reader: None,
            connected: false,
            packets_sent: 0,
            packets_acked: 0,
            stats: BackendStats::default(),
        }
    }
}

impl Backend for AtRadioBackend {
    fn kind(&self) -> TransportKind {
        self.profile.kind()
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), Error> {
        let device = config
            .device
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::argument("radio backend requires a non-empty device path"))?;
        let mut file = OpenOptions::new().read(true).write(true).open(&device)?;
        for cmd in self.profile.init_commands() {
            file.write_all(cmd.as_bytes())?;
        }
        self.reader = Some(BufReader::new(file.try_clone()?));
        self.port = Some(file);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.port = None;
        self.reader = None;
        self.connected = false;
    }

    fn send(&mut self, peer_id: u64, data: &[u8]) -> Result<usize, Error> {
        if peer_id != 0 && peer_id != PEER_ID {
            return Err(Error::peer_not_found(format!("no such peer {peer_id}")));
        }
        let port = self.port.as_mut().ok_or_else(|| Error::not_initialized("radio backend"))?;
        let line = format_send_line(data);
        port.write_all(line.as_bytes())?;
        self.packets_sent += 1;
        // An AT radio's own link layer acks the send; we count every
        // successful write as acknowledged since there's no separate
        // acknowledgement channel modeled here.
        self.packets_acked += 1;
        Ok(data.len())
    }

    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<(Vec<u8>, u64), Error> {
        let reader = self.reader.as_mut().ok_or_else(|| Error::not_initialized("radio backend"))?;
        let deadline = Instant::now() + timeout;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {}
                Ok(_) => {
                    if let Some(result) = parse_rcv_line(&line) {
                        match result {
                            Ok(mut payload) => {
                                payload.truncate(max_len);
                                self.connected = true;
                                self.stats.rx_ok += 1;
                                return Ok((payload, PEER_ID));
                            }
                            Err(_) => {
                                self.stats.rx_fail += 1;
                                self.stats.frame_errors += 1;
                            }
                        }
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
            if Instant::now() >= deadline {
                return Err(Error::link("recv timed out"));
            }
        }
    }

    fn get_peers(&self) -> Vec<BackendPeer> {
        if self.connected {
            vec![BackendPeer { peer_id: PEER_ID, address: "radio".to_string() }]
        } else {
            Vec::new()
        }
    }

    fn get_link_quality(&self, peer_id: u64) -> Option<u8> {
        if peer_id != PEER_ID {
            return None;
        }
        if self.packets_sent == 0 {
            Some(255)
        } else {
            Some(((self.packets_acked * 100) / self.packets_sent) as u8)
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_range_profile_includes_spread_factor_band_and_power() {
        let commands = RadioProfile::Long.init_commands();
        assert!(commands.iter().any(|c| c.starts_with("AT+SF=")));
        assert!(commands.iter().any(|c| c.starts_with("AT+BAND=")));
        assert!(commands.iter().any(|c| c.starts_with("AT+POWER=")));
    }

    #[test]
    fn short_range_profile_is_peer_to_peer_only() {
        let commands = RadioProfile::Short.init_commands();
        assert_eq!(commands, vec!["AT+MODE=P2P\r\n".to_string()]);
    }

    #[test]
    fn link_quality_unknown_before_any_send() {
        let backend = AtRadioBackend::new(RadioProfile::Short);
        assert_eq!(backend.get_link_quality(PEER_ID), Some(255));
    }
}
