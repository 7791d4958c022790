//! A small `poll(2)`-based readiness-notification facility standing in for
//! an epoll-style "add/mod/del + wait with timeout" interface.
//!
//! `poll(2)` rather than a raw epoll binding: the reactor's connection table
//! tops out at [`crate::reactor::CONNECTION_TABLE_CAPACITY`] entries, well
//! within the range where poll's O(n) rescan costs nothing measurable, and
//! staying on POSIX poll keeps this facility as portable as the rest of the
//! workspace already is (the serial backend's termios use is unix-only too).
use std::os::unix::io::RawFd;
use std::time::Duration;

use omesh_common::error::Error;

/// What a caller wants to be notified about for one fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// Notify when the fd has data to read, or (for a listener) a pending
    /// inbound connection.
    pub readable: bool,
    /// Notify when the fd can accept a write, or (for a connecting socket)
    /// when the connect attempt has resolved.
    pub writable: bool,
}

impl Interest {
    /// Readable only.
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    /// Writable only; used while an outbound connect is in flight.
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
}

/// One readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// The fd this event concerns.
    pub fd: RawFd,
    /// Ready for reading (or: a listener has a pending connection).
    pub readable: bool,
    /// Ready for writing (or: a pending connect has resolved).
    pub writable: bool,
    /// Peer closed its end.
    pub hup: bool,
    /// The fd is in an error state (e.g. a failed connect).
    pub error: bool,
}

impl Event {
    /// Whether this event reports readability on `owner`'s file descriptor.
    /// A small convenience for callers matching a batch of events against a
    /// single well-known listener, e.g. the HTTP loop's listening socket.
    pub fn is_readable_on(&self, owner: &impl std::os::unix::io::AsRawFd) -> bool {
        self.readable && self.fd == owner.as_raw_fd()
    }
}

/// The add/mod/del + `wait(timeout)` notification facility the reactor
/// multiplexes all mesh sockets (and the listener) through.
#[derive(Debug, Default)]
pub struct Poller {
    fds: Vec<libc::pollfd>,
}

impl Poller {
    /// An empty poller with nothing registered.
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    /// Register `fd` for `interest`, replacing any existing registration.
    pub fn add(&mut self, fd: RawFd, interest: Interest) {
        self.remove(fd);
        self.fds.push(libc::pollfd {
            fd,
            events: events_for(interest),
            revents: 0,
        });
    }

    /// Change the interest set for an already-registered fd.
    pub fn modify(&mut self, fd: RawFd, interest: Interest) {
        self.add(fd, interest);
    }

    /// Stop watching `fd`. A no-op if it wasn't registered.
    pub fn remove(&mut self, fd: RawFd) {
        self.fds.retain(|p| p.fd != fd);
    }

    /// Wait up to `timeout` for any registered fd to become ready, returning
    /// every event that fired. An empty poll set just sleeps out the
    /// timeout rather than calling into `poll(2)` with zero fds.
    pub fn wait(&mut self, timeout: Duration) -> Result<Vec<Event>, Error> {
        if self.fds.is_empty() {
            std::thread::sleep(timeout.min(Duration::from_millis(50)));
            return Ok(Vec::new());
        }
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe {
            libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms)
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err.into());
        }
        let mut events = Vec::new();
        for pfd in &self.fds {
            if pfd.revents == 0 {
                continue;
            }
            events.push(Event {
                fd: pfd.fd,
                readable: pfd.revents & libc::POLLIN != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                hup: pfd.revents & libc::POLLHUP != 0,
                error: pfd.revents & libc::POLLERR != 0,
            });
        }
        Ok(events)
    }
}

fn events_for(interest: Interest) -> libc::c_short {
    let mut mask: libc::c_short = 0;
    if interest.readable {
        mask |= libc::POLLIN as libc::c_short;
    }
    if interest.writable {
        mask |= libc::POLLOUT as libc::c_short;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn reports_readability_once_data_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut poller = Poller::new();
        poller.add(server.as_raw_fd(), Interest::READABLE);

        client.write_all(b"hi").unwrap();
        let events = poller.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].readable);
    }

    #[test]
    fn empty_poller_just_sleeps_out_the_timeout() {
        let mut poller = Poller::new();
        let events = poller.wait(Duration::from_millis(10)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn remove_stops_future_notifications() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut poller = Poller::new();
        poller.add(server.as_raw_fd(), Interest::READABLE);
        poller.remove(server.as_raw_fd());

        client.write_all(b"hi").unwrap();
        let events = poller.wait(Duration::from_millis(50)).unwrap();
        assert!(events.is_empty());
    }
}
