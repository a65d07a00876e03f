//! Listening socket producing streams
//!
//! A listener is bound once; the endpoint never changes afterwards.
//! Accepted streams inherit the listener's block mode, buffer size and
//! read/write timeout, so per-connection setup cost is zero. For high
//! accept rates a caller can hand a used stream back into `accept` and
//! have it recycled in place instead of allocated fresh.

use std::os::fd::RawFd;
use std::time::Duration;

use evio_core::constants::{DEFAULT_BUFFER_SIZE, INVALID_FD};
use evio_core::error::{AcceptError, BindError, TransportError};
use evio_core::Endpoint;

use crate::sock;
use crate::stream::{BlockMode, Stream};

/// Bound, listening socket (TCP or unix-domain)
#[derive(Debug)]
pub struct Listener {
    fd: RawFd,
    endpoint: Endpoint,
    backlog: u32,
    mode: BlockMode,
    buffer_size: usize,
    rw_timeout: Option<Duration>,
}

impl Listener {
    /// Bind and listen with defaults: blocking accepts, default buffer
    /// size, no stream timeout
    pub fn bind(addr: &str, backlog: u32) -> Result<Listener, BindError> {
        Listener::bind_ex(addr, backlog, BlockMode::Blocking, DEFAULT_BUFFER_SIZE, None)
    }

    /// Bind and listen with full control over what accepted streams
    /// inherit
    pub fn bind_ex(
        addr: &str,
        backlog: u32,
        mode: BlockMode,
        buffer_size: usize,
        rw_timeout: Option<Duration>,
    ) -> Result<Listener, BindError> {
        let endpoint: Endpoint = addr.parse()?;
        let fd = match &endpoint {
            Endpoint::Local(path) => sock::unix_listen(path, backlog)?,
            Endpoint::Inet { .. } => sock::tcp_listen(&endpoint, backlog)?,
        };
        if !mode.is_blocking() {
            if let Err(e) = sock::set_nonblocking(fd, true) {
                sock::close_fd(fd);
                return Err(BindError::Transport(e));
            }
        }
        Ok(Listener {
            fd,
            endpoint,
            backlog,
            mode,
            buffer_size,
            rw_timeout,
        })
    }

    /// Adopt an already-listening fd, e.g. one inherited from a
    /// supervising daemon. The endpoint is recovered from the socket.
    pub fn from_fd(
        fd: RawFd,
        mode: BlockMode,
        buffer_size: usize,
        rw_timeout: Option<Duration>,
    ) -> Result<Listener, TransportError> {
        if fd < 0 {
            return Err(TransportError::NotOpen);
        }
        let endpoint = sock::local_endpoint_of(fd)?;
        sock::set_nonblocking(fd, !mode.is_blocking())?;
        Ok(Listener {
            fd,
            endpoint,
            backlog: 0, // unknown for inherited sockets
            mode,
            buffer_size,
            rw_timeout,
        })
    }

    /// Accept one connection.
    ///
    /// With `reuse`, the supplied stream is rebound to the new
    /// connection in place: its previous handle is closed and its
    /// buffers and timeout state fully discarded before the new peer's
    /// bytes can touch it. Without `reuse` a fresh stream is built.
    /// The reuse stream is consumed even when the accept fails.
    ///
    /// Non-blocking listeners report an empty backlog as
    /// `AcceptError::WouldBlock`; that is flow control, not a fault.
    pub fn accept(&mut self, reuse: Option<Stream>) -> Result<Stream, AcceptError> {
        let (cfd, peer) = self.accept_raw()?;
        self.finish_accept(cfd, peer, reuse)
            .map_err(AcceptError::Transport)
    }

    /// First half of accept: just the descriptor and peer address. The
    /// dispatch loop uses this so it can ask for a recycled stream only
    /// once a connection actually arrived.
    pub(crate) fn accept_raw(&mut self) -> Result<(RawFd, Option<Endpoint>), AcceptError> {
        if self.fd < 0 {
            return Err(AcceptError::TransportClosed);
        }
        sock::accept_fd(self.fd)
    }

    /// Second half of accept: wrap the descriptor, recycling `reuse` when
    /// provided. The new stream inherits this listener's block mode,
    /// buffer size and timeouts.
    pub(crate) fn finish_accept(
        &self,
        cfd: RawFd,
        peer: Option<Endpoint>,
        reuse: Option<Stream>,
    ) -> Result<Stream, TransportError> {
        match reuse {
            Some(mut s) => {
                s.reset_for_accept(cfd, peer, self.mode, self.buffer_size, self.rw_timeout)?;
                Ok(s)
            }
            None => Stream::from_accepted(cfd, peer, self.mode, self.buffer_size, self.rw_timeout),
        }
    }

    /// The address actually bound, with `:0` binds resolved to their
    /// ephemeral port
    pub fn local_endpoint(&self) -> Result<Endpoint, TransportError> {
        if self.fd < 0 {
            return Err(TransportError::NotOpen);
        }
        sock::local_endpoint_of(self.fd)
    }

    /// The endpoint as requested at bind time
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// Backlog requested at bind; 0 when the socket was inherited
    #[inline]
    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn rw_timeout(&self) -> Option<Duration> {
        self.rw_timeout
    }

    /// Reactor registration drives accepts level-triggered; the fd
    /// must not block
    pub(crate) fn force_nonblocking(&mut self) -> Result<(), TransportError> {
        if self.fd < 0 {
            return Err(TransportError::NotOpen);
        }
        sock::set_nonblocking(self.fd, true)?;
        self.mode = BlockMode::NonBlocking;
        Ok(())
    }

    /// Stop listening. Idempotent.
    pub fn close(&mut self) {
        sock::close_fd(self.fd);
        self.fd = INVALID_FD;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        sock::close_fd(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sock::{close_fd, pipe_pair};
    use crate::stream::StreamKind;
    use evio_core::outcome::IoOutcome;
    use std::io::Write;

    fn ephemeral() -> Listener {
        Listener::bind_ex(
            "127.0.0.1:0",
            4,
            BlockMode::Blocking,
            4096,
            Some(Duration::from_secs(2)),
        )
        .unwrap()
    }

    fn connect_and_send(addr: String, data: &'static [u8]) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let mut c = std::net::TcpStream::connect(addr).unwrap();
            c.write_all(data).unwrap();
            // Hold the connection open until the test finishes reading
            std::thread::sleep(Duration::from_millis(200));
        })
    }

    /// Stream with leftover buffered bytes from a previous life
    fn dirty_stream() -> Stream {
        let (r, w) = pipe_pair().unwrap();
        let mut s = Stream::from_fd(r, StreamKind::Pipe, BlockMode::NonBlocking, 4096, None)
            .unwrap();
        let n = unsafe { libc::write(w, b"stalestale".as_ptr() as *const libc::c_void, 10) };
        assert_eq!(n, 10);
        let mut sink = [0u8; 4];
        assert_eq!(s.read(&mut sink).unwrap(), IoOutcome::Transferred(4));
        assert_eq!(s.buffered(), 6);
        close_fd(w);
        s
    }

    #[test]
    fn test_bind_resolves_ephemeral_port() {
        let l = ephemeral();
        let bound = l.local_endpoint().unwrap();
        assert_eq!(bound.host(), Some("127.0.0.1"));
        assert!(bound.port().unwrap() > 0);
        // Requested endpoint keeps the :0 as asked
        assert_eq!(l.endpoint().port(), Some(0));
    }

    #[test]
    fn test_accept_with_reuse_discards_stale_state() {
        let mut l = ephemeral();
        let addr = l.local_endpoint().unwrap().to_string();
        let peer = connect_and_send(addr, b"hello");

        let reuse = dirty_stream();
        let mut s = l.accept(Some(reuse)).unwrap();
        // Recycled stream must start clean
        assert_eq!(s.buffered(), 0);
        assert!(s.peer_endpoint().is_some());

        let mut buf = [0u8; 5];
        assert_eq!(s.read(&mut buf).unwrap(), IoOutcome::Transferred(5));
        assert_eq!(&buf, b"hello");
        peer.join().unwrap();
    }

    #[test]
    fn test_accept_fresh_stream_reads_peer_bytes() {
        let mut l = ephemeral();
        let addr = l.local_endpoint().unwrap().to_string();
        let peer = connect_and_send(addr, b"fresh");

        let mut s = l.accept(None).unwrap();
        assert_eq!(s.read_timeout(), Some(Duration::from_secs(2)));
        let mut buf = [0u8; 5];
        assert_eq!(s.read(&mut buf).unwrap(), IoOutcome::Transferred(5));
        assert_eq!(&buf, b"fresh");
        peer.join().unwrap();
    }

    #[test]
    fn test_nonblocking_accept_would_block() {
        let mut l = Listener::bind_ex("127.0.0.1:0", 2, BlockMode::NonBlocking, 1024, None)
            .unwrap();
        assert_eq!(l.accept(None).unwrap_err(), AcceptError::WouldBlock);
    }

    #[test]
    fn test_unix_listener_roundtrip() {
        let path = "/tmp/evio-listener-test.sock";
        let mut l =
            Listener::bind_ex(path, 4, BlockMode::Blocking, 1024, Some(Duration::from_secs(2)))
                .unwrap();
        let peer = {
            let path = path.to_string();
            std::thread::spawn(move || {
                let mut c = std::os::unix::net::UnixStream::connect(path).unwrap();
                c.write_all(b"ping").unwrap();
                std::thread::sleep(Duration::from_millis(200));
            })
        };
        let mut s = l.accept(None).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), IoOutcome::Transferred(4));
        assert_eq!(&buf, b"ping");
        peer.join().unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_from_fd_recovers_endpoint() {
        let ep: Endpoint = "127.0.0.1:0".parse().unwrap();
        let raw = sock::tcp_listen(&ep, 4).unwrap();
        let l = Listener::from_fd(raw, BlockMode::NonBlocking, 2048, None).unwrap();
        assert_eq!(l.endpoint().host(), Some("127.0.0.1"));
        assert!(l.endpoint().port().unwrap() > 0);
        assert_eq!(l.backlog(), 0);
    }

    #[test]
    fn test_close_idempotent() {
        let mut l = ephemeral();
        l.close();
        l.close();
        assert!(matches!(l.accept(None), Err(AcceptError::TransportClosed)));
    }
}
