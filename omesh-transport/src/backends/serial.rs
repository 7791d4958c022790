//! Framed UART/serial backend. Point-to-point: the remote end
//! is always peer id 1 once a byte has been exchanged.
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use omesh_common::error::Error;

use crate::backend::{Backend, BackendConfig, BackendPeer, BackendStats, TransportKind};
use crate::framing::{Decoder, MIN_CAP};

/// The lone point-to-point peer id for serial/radio links.
pub const PEER_ID: u64 = 1;

#[derive(Debug)]
pub struct SerialBackend {
    port: Option<File>,
    decoder: Decoder,
    connected: bool,
    stats: BackendStats,
}

impl Default for SerialBackend {
    fn default() -> Self {
        Self {
            port: None,
            decoder: Decoder::new(MIN_CAP),
            connected: false,
            stats: BackendStats::default(),
        }
    }
}

impl SerialBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(unix)]
    fn configure_termios(file: &File, baud: u32) -> Result<(), Error> {
        // 8N1, VMIN=1/VTIME=0 (blocking single-byte reads, non-canonical),
        // no flow control. This is the minimum configuration the spec
        // requires every serial backend to apply before use.
        unsafe {
            let fd = file.as_raw_fd();
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            libc::cfmakeraw(&mut tio);
            let speed = baud_to_speed(baud)?;
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
            tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
            tio.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
            tio.c_cc[libc::VMIN] = 1;
            tio.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn configure_termios(_file: &File, _baud: u32) -> Result<(), Error> {
        Err(Error::argument("serial backend requires a unix target"))
    }
}

#[cfg(unix)]
fn baud_to_speed(baud: u32) -> Result<libc::speed_t, Error> {
    match baud {
        9600 => Ok(libc::B9600),
        19200 => Ok(libc::B19200),
        38400 => Ok(libc::B38400),
        57600 => Ok(libc::B57600),
        115200 => Ok(libc::B115200),
        0 => Err(Error::argument("serial baud rate must be non-zero")),
        other => Err(Error::argument(format!("unsupported baud rate {other}"))),
    }
}

impl Backend for SerialBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), Error> {
        let device = config
            .device
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::argument("serial backend requires a non-empty device path"))?;
        let file = OpenOptions::new().read(true).write(true).open(&device)?;
        Self::configure_termios(&file, config.baud)?;
        self.port = Some(file);
        self.connected = false;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.port = None;
        self.connected = false;
    }

    fn send(&mut self, peer_id: u64, data: &[u8]) -> Result<usize, Error> {
        if peer_id != 0 && peer_id != PEER_ID {
            return Err(Error::peer_not_found(format!("no such peer {peer_id}")));
        }
        let port = self.port.as_mut().ok_or_else(|| Error::not_initialized("serial backend"))?;
        let mut framed = Vec::new();
        crate::framing::encode(data, MIN_CAP, &mut framed)?;
        Ok(port.write(&framed)?)
    }

    fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<(Vec<u8>, u64), Error> {
        let port = self.port.as_mut().ok_or_else(|| Error::not_initialized("serial backend"))?;
        let deadline = Instant::now() + timeout;
        let mut byte = [0u8; 1];

        loop {
            match port.read(&mut byte) {
                Ok(1) => {
                    if let Some(payload) = self.decoder.feed(byte[0]) {
                        self.connected = true;
                        self.stats.rx_ok += 1;
                        let len = payload.len().min(max_len);
                        return Ok((payload[..len].to_vec(), PEER_ID));
                    }
                }
                Ok(_) => {}
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
            self.stats.crc_errors = self.decoder.crc_errors;
            self.stats.frame_errors = self.decoder.frame_errors;
            if Instant::now() >= deadline {
                return Err(Error::link("recv timed out"));
            }
        }
    }

    fn get_peers(&self) -> Vec<BackendPeer> {
        if self.connected {
            vec![BackendPeer { peer_id: PEER_ID, address: "serial".to_string() }]
        } else {
            Vec::new()
        }
    }

    fn get_link_quality(&self, peer_id: u64) -> Option<u8> {
        (peer_id == PEER_ID && self.connected).then_some(100)
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_device_path() {
        let mut backend = SerialBackend::new();
        let err = backend
            .init(BackendConfig { device: Some(String::new()), baud: 9600, ..Default::default() })
            .unwrap_err();
        assert_eq!(err.kind, omesh_common::ErrorKind::Argument);
    }

    #[test]
    fn rejects_zero_baud() {
        #[cfg(unix)]
        assert!(baud_to_speed(0).is_err());
    }

    #[test]
    fn send_to_wrong_peer_id_is_peer_not_found() {
        let mut backend = SerialBackend::new();
        let err = backend.send(2, b"x").unwrap_err();
        assert_eq!(err.kind, omesh_common::ErrorKind::PeerNotFound);
    }
}
