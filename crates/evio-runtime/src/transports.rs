//! Stock transport implementations
//!
//! Three ways bytes move through a stream:
//!
//! - [`SockTransport`] - connection-oriented sockets via recv/send
//! - [`FdTransport`] - pipes, ttys and regular files via read/write
//! - [`DgramTransport`] - datagram sockets via recvfrom/sendto with
//!   source tracking, so request/reply protocols over raw or UDP
//!   sockets can answer whoever last spoke
//!
//! All three follow the `Transport` contract: EAGAIN becomes
//! `WouldBlock`, EINTR retries, peer teardown becomes `Closed`.

use std::os::fd::RawFd;

use evio_core::error::{ConnectError, TransportError};
use evio_core::outcome::IoOutcome;
use evio_core::{Endpoint, Transport};

use crate::sock;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[inline]
fn is_wouldblock(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

#[inline]
fn is_peer_gone(errno: i32) -> bool {
    errno == libc::EPIPE || errno == libc::ECONNRESET
}

/// Connection-oriented socket transport (TCP, unix stream)
#[derive(Debug, Default)]
pub struct SockTransport;

impl Transport for SockTransport {
    fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> Result<IoOutcome, TransportError> {
        loop {
            let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
            if n > 0 {
                return Ok(IoOutcome::Transferred(n as usize));
            }
            if n == 0 {
                return Ok(IoOutcome::Closed);
            }
            let e = sock::last_errno();
            if e == libc::EINTR {
                continue;
            }
            if is_wouldblock(e) {
                return Ok(IoOutcome::WouldBlock);
            }
            if is_peer_gone(e) {
                return Ok(IoOutcome::Closed);
            }
            return Err(TransportError::Io(e));
        }
    }

    fn write(&mut self, fd: RawFd, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        loop {
            let n = unsafe {
                libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), SEND_FLAGS)
            };
            if n >= 0 {
                return Ok(IoOutcome::Transferred(n as usize));
            }
            let e = sock::last_errno();
            if e == libc::EINTR {
                continue;
            }
            if is_wouldblock(e) {
                return Ok(IoOutcome::WouldBlock);
            }
            if is_peer_gone(e) {
                return Ok(IoOutcome::Closed);
            }
            return Err(TransportError::Io(e));
        }
    }

    fn shutdown(&mut self, fd: RawFd) -> Result<(), TransportError> {
        // Half-close the send side; errors here are not actionable
        unsafe {
            libc::shutdown(fd, libc::SHUT_WR);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sock"
    }
}

/// Plain fd transport for pipes and files
#[derive(Debug, Default)]
pub struct FdTransport;

impl Transport for FdTransport {
    fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> Result<IoOutcome, TransportError> {
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n > 0 {
                return Ok(IoOutcome::Transferred(n as usize));
            }
            if n == 0 {
                return Ok(IoOutcome::Closed);
            }
            let e = sock::last_errno();
            if e == libc::EINTR {
                continue;
            }
            if is_wouldblock(e) {
                return Ok(IoOutcome::WouldBlock);
            }
            return Err(TransportError::Io(e));
        }
    }

    fn write(&mut self, fd: RawFd, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        loop {
            let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(IoOutcome::Transferred(n as usize));
            }
            let e = sock::last_errno();
            if e == libc::EINTR {
                continue;
            }
            if is_wouldblock(e) {
                return Ok(IoOutcome::WouldBlock);
            }
            if e == libc::EPIPE {
                return Ok(IoOutcome::Closed);
            }
            return Err(TransportError::Io(e));
        }
    }

    fn name(&self) -> &'static str {
        "fd"
    }
}

/// Datagram transport with last-source tracking
///
/// Reads record where the datagram came from; writes go to the fixed
/// target when one was configured, otherwise back to the last source.
/// This is the shape request/reply engines over raw sockets need: read
/// a packet, answer the sender.
pub struct DgramTransport {
    target: Option<(libc::sockaddr_storage, libc::socklen_t)>,
    last_from: Option<(libc::sockaddr_storage, libc::socklen_t)>,
    last_peer: Option<Endpoint>,
}

impl DgramTransport {
    /// Reply-to-sender mode: each write answers the last read's source
    pub fn new() -> Self {
        DgramTransport {
            target: None,
            last_from: None,
            last_peer: None,
        }
    }

    /// Fixed-target mode: every write goes to `addr`
    pub fn to(addr: &Endpoint) -> Result<Self, ConnectError> {
        let (host, port) = match addr {
            Endpoint::Inet { host, port, .. } => (host.as_str(), *port),
            Endpoint::Local(_) => return Err(ConnectError::InvalidAddress(addr.to_string())),
        };
        let sa = sock::sockaddr_v4(host, port)
            .ok_or_else(|| ConnectError::InvalidAddress(addr.to_string()))?;
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(
                &sa as *const _ as *const u8,
                &mut storage as *mut _ as *mut u8,
                std::mem::size_of::<libc::sockaddr_in>(),
            );
        }
        Ok(DgramTransport {
            target: Some((storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)),
            last_from: None,
            last_peer: None,
        })
    }

    /// Source of the most recent datagram read
    pub fn last_peer(&self) -> Option<&Endpoint> {
        self.last_peer.as_ref()
    }
}

impl Default for DgramTransport {
    fn default() -> Self {
        DgramTransport::new()
    }
}

impl Transport for DgramTransport {
    fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> Result<IoOutcome, TransportError> {
        loop {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            let n = unsafe {
                libc::recvfrom(
                    fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut storage as *mut _ as *mut libc::sockaddr,
                    &mut len,
                )
            };
            if n >= 0 {
                // Datagrams have no EOF; an empty payload is a payload
                self.last_peer = sock::endpoint_from_storage(&storage);
                self.last_from = Some((storage, len));
                return Ok(IoOutcome::Transferred(n as usize));
            }
            let e = sock::last_errno();
            if e == libc::EINTR {
                continue;
            }
            if is_wouldblock(e) {
                return Ok(IoOutcome::WouldBlock);
            }
            return Err(TransportError::Io(e));
        }
    }

    fn write(&mut self, fd: RawFd, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        let (dest, dest_len) = match self.target.as_ref().or(self.last_from.as_ref()) {
            Some((sa, len)) => (sa as *const _ as *const libc::sockaddr, *len),
            // Nothing read yet and no target configured
            None => return Err(TransportError::NotOpen),
        };
        loop {
            let n = unsafe {
                libc::sendto(
                    fd,
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    SEND_FLAGS,
                    dest,
                    dest_len,
                )
            };
            if n >= 0 {
                return Ok(IoOutcome::Transferred(n as usize));
            }
            let e = sock::last_errno();
            if e == libc::EINTR {
                continue;
            }
            if is_wouldblock(e) {
                return Ok(IoOutcome::WouldBlock);
            }
            if e == libc::ECONNREFUSED {
                // ICMP port-unreachable bounced a previous send
                return Ok(IoOutcome::Closed);
            }
            return Err(TransportError::Io(e));
        }
    }

    fn peer(&self) -> Option<&Endpoint> {
        self.last_peer.as_ref()
    }

    fn name(&self) -> &'static str {
        "dgram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sock::{close_fd, dgram_bind, local_endpoint_of, pipe_pair};

    #[test]
    fn test_fd_transport_pipe() {
        let (r, w) = pipe_pair().unwrap();
        let mut t = FdTransport;

        assert_eq!(t.write(w, b"hello").unwrap(), IoOutcome::Transferred(5));
        let mut buf = [0u8; 16];
        assert_eq!(t.read(r, &mut buf).unwrap(), IoOutcome::Transferred(5));
        assert_eq!(&buf[..5], b"hello");

        // Empty non-blocking pipe
        assert_eq!(t.read(r, &mut buf).unwrap(), IoOutcome::WouldBlock);

        // Writer closed: reader sees EOF
        close_fd(w);
        assert_eq!(t.read(r, &mut buf).unwrap(), IoOutcome::Closed);
        close_fd(r);
    }

    #[test]
    fn test_sock_transport_socketpair() {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
        };
        assert_eq!(rc, 0);
        let mut t = SockTransport;

        assert_eq!(t.write(fds[0], b"ping").unwrap(), IoOutcome::Transferred(4));
        let mut buf = [0u8; 16];
        assert_eq!(t.read(fds[1], &mut buf).unwrap(), IoOutcome::Transferred(4));
        assert_eq!(&buf[..4], b"ping");

        close_fd(fds[0]);
        assert_eq!(t.read(fds[1], &mut buf).unwrap(), IoOutcome::Closed);
        close_fd(fds[1]);
    }

    #[test]
    fn test_dgram_reply_to_sender() {
        let any: Endpoint = "127.0.0.1:0".parse().unwrap();
        let server_fd = dgram_bind(&any).unwrap();
        let client_fd = dgram_bind(&any).unwrap();
        let server_at = local_endpoint_of(server_fd).unwrap();

        let mut client = DgramTransport::to(&server_at).unwrap();
        let mut server = DgramTransport::new();

        assert_eq!(client.write(client_fd, b"probe").unwrap(), IoOutcome::Transferred(5));

        let mut buf = [0u8; 64];
        assert_eq!(server.read(server_fd, &mut buf).unwrap(), IoOutcome::Transferred(5));
        assert_eq!(&buf[..5], b"probe");
        let peer = server.last_peer().cloned().unwrap();
        assert_eq!(peer.host(), Some("127.0.0.1"));

        // Reply goes back to the recorded source without any target setup
        assert_eq!(server.write(server_fd, b"ack").unwrap(), IoOutcome::Transferred(3));
        assert_eq!(client.read(client_fd, &mut buf).unwrap(), IoOutcome::Transferred(3));
        assert_eq!(&buf[..3], b"ack");

        close_fd(server_fd);
        close_fd(client_fd);
    }

    #[test]
    fn test_dgram_write_without_peer_fails() {
        let any: Endpoint = "127.0.0.1:0".parse().unwrap();
        let fd = dgram_bind(&any).unwrap();
        let mut t = DgramTransport::new();
        assert_eq!(t.write(fd, b"x").unwrap_err(), TransportError::NotOpen);
        close_fd(fd);
    }
}
