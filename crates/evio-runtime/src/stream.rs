//! Buffered stream over any transport
//!
//! One read/write/timeout contract across sockets, pipes, files and
//! custom transports, in both blocking and non-blocking mode:
//!
//! - reads drain the internal buffer before touching the transport,
//!   and refill it in `buffer_size` chunks
//! - blocking mode parks the caller in a poll wait bounded by the
//!   configured timeout; non-blocking mode reports `WouldBlock`
//! - `close` is idempotent; the fd sentinel makes double-close a no-op
//! - a handle can be taken out (`take_handle`) or the whole object
//!   recycled in place by `Listener::accept`, discarding every trace
//!   of the previous connection including timeout state
//!
//! The stream owns exactly one fd. Constructors release it on their
//! own error paths; nothing leaks on failure.

use core::fmt;
use std::os::fd::RawFd;
use std::time::Duration;

use evio_core::constants::{INVALID_FD, MIN_BUFFER_SIZE};
use evio_core::error::{ConnectError, TransportError};
use evio_core::interest::Interest;
use evio_core::outcome::IoOutcome;
use evio_core::{Endpoint, IoBuffer, Transport};

use crate::sock;
use crate::transports::{FdTransport, SockTransport};

/// What the handle underneath the stream is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Socket,
    File,
    Pipe,
    Custom,
}

impl StreamKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Socket => "socket",
            StreamKind::File => "file",
            StreamKind::Pipe => "pipe",
            StreamKind::Custom => "custom",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether stream calls park the caller or return `WouldBlock`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Blocking,
    NonBlocking,
}

impl BlockMode {
    #[inline]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, BlockMode::Blocking)
    }
}

/// Buffered stream over one fd and one transport
pub struct Stream {
    fd: RawFd,
    kind: StreamKind,
    mode: BlockMode,
    rbuf: IoBuffer,
    wbuf: IoBuffer,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    transport: Box<dyn Transport>,
    peer: Option<Endpoint>,
    connecting: bool,
}

impl Stream {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Wrap an already-open fd.
    ///
    /// Configures the requested block mode on the fd and picks the
    /// stock transport for the kind (`Custom` starts with the plain fd
    /// transport until [`Stream::set_transport`] replaces it).
    pub fn from_fd(
        fd: RawFd,
        kind: StreamKind,
        mode: BlockMode,
        buffer_size: usize,
        rw_timeout: Option<Duration>,
    ) -> Result<Stream, TransportError> {
        if fd < 0 {
            return Err(TransportError::NotOpen);
        }
        if let Err(e) = sock::set_nonblocking(fd, !mode.is_blocking()) {
            sock::close_fd(fd);
            return Err(e);
        }
        let transport: Box<dyn Transport> = match kind {
            StreamKind::Socket => Box::new(SockTransport),
            StreamKind::File | StreamKind::Pipe | StreamKind::Custom => Box::new(FdTransport),
        };
        Ok(Stream {
            fd,
            kind,
            mode,
            rbuf: IoBuffer::with_capacity(buffer_size),
            wbuf: IoBuffer::with_capacity(buffer_size),
            read_timeout: rw_timeout,
            write_timeout: rw_timeout,
            transport,
            peer: None,
            connecting: false,
        })
    }

    /// Open an outbound connection.
    ///
    /// `addr` uses the `[bind@]host:port` or unix-path syntax. In
    /// blocking mode the call completes (or fails) within
    /// `connect_timeout`; in non-blocking mode the stream may come
    /// back connect-in-progress, to be completed through the reactor.
    pub fn connect(
        addr: &str,
        mode: BlockMode,
        connect_timeout: Option<Duration>,
        rw_timeout: Option<Duration>,
        buffer_size: usize,
    ) -> Result<Stream, ConnectError> {
        let endpoint: Endpoint = addr.parse()?;
        let (fd, in_progress) = match &endpoint {
            Endpoint::Local(path) => sock::unix_connect_start(path)?,
            Endpoint::Inet { .. } => sock::tcp_connect_start(&endpoint)?,
        };

        let mut connecting = in_progress;
        if in_progress && mode.is_blocking() {
            match sock::poll_wait(fd, Interest::WRITABLE, connect_timeout) {
                Ok(Some(_)) => {
                    let err = match sock::so_error(fd) {
                        Ok(e) => e,
                        Err(te) => {
                            sock::close_fd(fd);
                            return Err(ConnectError::Transport(te));
                        }
                    };
                    if err != 0 {
                        sock::close_fd(fd);
                        return Err(sock::map_connect_errno(err));
                    }
                    connecting = false;
                }
                Ok(None) => {
                    sock::close_fd(fd);
                    return Err(ConnectError::TimedOut);
                }
                Err(te) => {
                    sock::close_fd(fd);
                    return Err(ConnectError::Transport(te));
                }
            }
        }

        if mode.is_blocking() {
            if let Err(e) = sock::set_nonblocking(fd, false) {
                sock::close_fd(fd);
                return Err(ConnectError::Transport(e));
            }
        }

        Ok(Stream {
            fd,
            kind: StreamKind::Socket,
            mode,
            rbuf: IoBuffer::with_capacity(buffer_size),
            wbuf: IoBuffer::with_capacity(buffer_size),
            read_timeout: rw_timeout,
            write_timeout: rw_timeout,
            transport: Box::new(SockTransport),
            peer: Some(endpoint),
            connecting,
        })
    }

    /// Stream for a freshly accepted connection
    pub(crate) fn from_accepted(
        fd: RawFd,
        peer: Option<Endpoint>,
        mode: BlockMode,
        buffer_size: usize,
        rw_timeout: Option<Duration>,
    ) -> Result<Stream, TransportError> {
        let mut s = Stream::from_fd(fd, StreamKind::Socket, mode, buffer_size, rw_timeout)?;
        s.peer = peer;
        Ok(s)
    }

    /// Rebind this stream to a freshly accepted connection, in place.
    ///
    /// The previous connection is closed and every piece of its state
    /// discarded: buffered bytes, peer, connect progress and all
    /// timeout settings. Only the buffer allocations survive (when the
    /// capacity matches), which is the point of reuse.
    pub(crate) fn reset_for_accept(
        &mut self,
        fd: RawFd,
        peer: Option<Endpoint>,
        mode: BlockMode,
        buffer_size: usize,
        rw_timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.close();
        if let Err(e) = sock::set_nonblocking(fd, !mode.is_blocking()) {
            sock::close_fd(fd);
            return Err(e);
        }
        self.fd = fd;
        self.kind = StreamKind::Socket;
        self.mode = mode;
        self.transport = Box::new(SockTransport);
        self.peer = peer;
        self.connecting = false;
        self.read_timeout = rw_timeout;
        self.write_timeout = rw_timeout;
        if self.rbuf.capacity() != buffer_size.max(MIN_BUFFER_SIZE) {
            self.rbuf = IoBuffer::with_capacity(buffer_size);
            self.wbuf = IoBuffer::with_capacity(buffer_size);
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    #[inline]
    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// Peer address: tracked by the stream for connected sockets, or
    /// by the transport for datagram-style ones
    pub fn peer_endpoint(&self) -> Option<&Endpoint> {
        self.peer.as_ref().or_else(|| self.transport.peer())
    }

    /// The locally bound address of the underlying socket
    pub fn local_endpoint(&self) -> Result<Endpoint, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        sock::local_endpoint_of(self.fd)
    }

    /// Unread bytes sitting in the read buffer
    #[inline]
    pub fn buffered(&self) -> usize {
        self.rbuf.len()
    }

    /// Bytes staged for a later flush
    #[inline]
    pub fn staged(&self) -> usize {
        self.wbuf.len()
    }

    #[inline]
    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Switch between blocking and non-blocking operation
    pub fn set_block_mode(&mut self, mode: BlockMode) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        sock::set_nonblocking(self.fd, !mode.is_blocking())?;
        self.mode = mode;
        Ok(())
    }

    /// Replace how bytes move, keeping the fd and buffers.
    /// This is the plug-in point for protocol-specific transports.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = transport;
        self.kind = StreamKind::Custom;
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    // ========================================================================
    // Connect completion (reactor side)
    // ========================================================================

    /// Resolve a connect-in-progress after the fd polled writable
    pub(crate) fn finish_connect(&mut self) -> Result<(), ConnectError> {
        if !self.is_open() {
            return Err(ConnectError::Transport(TransportError::NotOpen));
        }
        let err = sock::so_error(self.fd).map_err(ConnectError::Transport)?;
        if err != 0 {
            return Err(sock::map_connect_errno(err));
        }
        self.connecting = false;
        Ok(())
    }

    // ========================================================================
    // Read side
    // ========================================================================

    /// Read into `out`, buffered.
    ///
    /// Buffered bytes are returned first; only an empty buffer touches
    /// the transport. Blocking mode waits up to the read timeout for
    /// the transport to become readable.
    pub fn read(&mut self, out: &mut [u8]) -> Result<IoOutcome, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if out.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }
        if !self.rbuf.is_empty() {
            return Ok(IoOutcome::Transferred(self.rbuf.drain_to(out)));
        }
        loop {
            match self.transport.read(self.fd, self.rbuf.spare())? {
                IoOutcome::Transferred(n) => {
                    self.rbuf.commit(n);
                    return Ok(IoOutcome::Transferred(self.rbuf.drain_to(out)));
                }
                IoOutcome::WouldBlock => {
                    if !self.mode.is_blocking() {
                        return Ok(IoOutcome::WouldBlock);
                    }
                    match sock::poll_wait(self.fd, Interest::READABLE, self.read_timeout)? {
                        Some(_) => continue,
                        None => return Ok(IoOutcome::TimedOut),
                    }
                }
                other => return Ok(other),
            }
        }
    }

    /// Read up to and including the next `\n`, appending to `out`.
    ///
    /// Returns `Transferred` with the bytes appended by this call once
    /// a newline lands. On `WouldBlock`/`TimedOut` any partial line
    /// read so far stays in `out` and the caller retries. At EOF an
    /// unterminated tail is returned as a final `Transferred`; the
    /// next call reports `Closed`.
    pub fn read_line(&mut self, out: &mut Vec<u8>) -> Result<IoOutcome, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let mut appended = 0usize;
        loop {
            if let Some(pos) = self.rbuf.find_byte(b'\n') {
                let take = pos + 1;
                out.extend_from_slice(&self.rbuf.peek()[..take]);
                self.rbuf.consume(take);
                return Ok(IoOutcome::Transferred(appended + take));
            }
            // No newline buffered: move what we have out, then refill
            let held = self.rbuf.len();
            if held > 0 {
                out.extend_from_slice(self.rbuf.peek());
                self.rbuf.consume(held);
                appended += held;
            }
            match self.transport.read(self.fd, self.rbuf.spare())? {
                IoOutcome::Transferred(n) => self.rbuf.commit(n),
                IoOutcome::WouldBlock => {
                    if !self.mode.is_blocking() {
                        return Ok(IoOutcome::WouldBlock);
                    }
                    match sock::poll_wait(self.fd, Interest::READABLE, self.read_timeout)? {
                        Some(_) => continue,
                        None => return Ok(IoOutcome::TimedOut),
                    }
                }
                IoOutcome::Closed => {
                    return if appended > 0 {
                        Ok(IoOutcome::Transferred(appended))
                    } else {
                        Ok(IoOutcome::Closed)
                    };
                }
                other => return Ok(other),
            }
        }
    }

    // ========================================================================
    // Write side
    // ========================================================================

    /// One write attempt against the transport.
    ///
    /// May transfer fewer bytes than offered. Blocking mode waits up
    /// to the write timeout for writability first.
    pub fn write(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if buf.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }
        loop {
            match self.transport.write(self.fd, buf)? {
                IoOutcome::WouldBlock => {
                    if !self.mode.is_blocking() {
                        return Ok(IoOutcome::WouldBlock);
                    }
                    match sock::poll_wait(self.fd, Interest::WRITABLE, self.write_timeout)? {
                        Some(_) => continue,
                        None => return Ok(IoOutcome::TimedOut),
                    }
                }
                other => return Ok(other),
            }
        }
    }

    /// Write the whole of `buf`, looping over short writes.
    ///
    /// `WouldBlock`/`TimedOut`/`Closed` mid-way surface as-is; bytes
    /// already accepted by the transport stay sent.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        let mut off = 0usize;
        while off < buf.len() {
            match self.write(&buf[off..])? {
                IoOutcome::Transferred(n) => off += n,
                other => return Ok(other),
            }
        }
        Ok(IoOutcome::Transferred(buf.len()))
    }

    /// Stage bytes for a later flush.
    ///
    /// Flushes first when the staging buffer cannot hold the new
    /// bytes; payloads at least a buffer large write straight through.
    pub fn stage(&mut self, buf: &[u8]) -> Result<IoOutcome, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if self.wbuf.len() + buf.len() > self.wbuf.capacity() {
            match self.flush()? {
                IoOutcome::Transferred(_) => {}
                other => return Ok(other),
            }
        }
        if buf.len() >= self.wbuf.capacity() {
            return self.write_all(buf);
        }
        let pushed = self.wbuf.push(buf);
        debug_assert_eq!(pushed, buf.len());
        Ok(IoOutcome::Transferred(pushed))
    }

    /// Push all staged bytes to the transport
    pub fn flush(&mut self) -> Result<IoOutcome, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let total = self.wbuf.len();
        if total == 0 {
            return Ok(IoOutcome::Transferred(0));
        }
        while !self.wbuf.is_empty() {
            match self.transport.write(self.fd, self.wbuf.peek())? {
                IoOutcome::Transferred(n) => self.wbuf.consume(n),
                IoOutcome::WouldBlock => {
                    if !self.mode.is_blocking() {
                        return Ok(IoOutcome::WouldBlock);
                    }
                    match sock::poll_wait(self.fd, Interest::WRITABLE, self.write_timeout)? {
                        Some(_) => continue,
                        None => return Ok(IoOutcome::TimedOut),
                    }
                }
                other => return Ok(other),
            }
        }
        Ok(IoOutcome::Transferred(total))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the stream. Staged bytes get a best-effort flush; the fd
    /// is released and the sentinel makes repeated calls no-ops.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        if !self.wbuf.is_empty() {
            let _ = self.flush();
        }
        sock::close_fd(self.fd);
        self.fd = INVALID_FD;
        self.rbuf.clear();
        self.wbuf.clear();
        self.peer = None;
        self.connecting = false;
    }

    /// Take ownership of the fd out of the stream, leaving it closed
    /// without releasing the fd. Buffered state is discarded.
    pub fn take_handle(&mut self) -> RawFd {
        let fd = self.fd;
        self.fd = INVALID_FD;
        self.rbuf.clear();
        self.wbuf.clear();
        self.peer = None;
        self.connecting = false;
        fd
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("fd", &self.fd)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("transport", &self.transport.name())
            .field("peer", &self.peer)
            .field("buffered", &self.rbuf.len())
            .field("staged", &self.wbuf.len())
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        sock::close_fd(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sock::{close_fd, pipe_pair};
    use std::io::{Read, Write};
    use std::time::Instant;

    fn pipe_stream(mode: BlockMode) -> (Stream, RawFd) {
        let (r, w) = pipe_pair().unwrap();
        let s = Stream::from_fd(r, StreamKind::Pipe, mode, 1024, Some(Duration::from_millis(80)))
            .unwrap();
        (s, w)
    }

    fn raw_write(fd: RawFd, data: &[u8]) {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        assert_eq!(n as usize, data.len());
    }

    #[test]
    fn test_buffered_read_drains_before_transport() {
        let (mut s, w) = pipe_stream(BlockMode::Blocking);
        raw_write(w, b"0123456789");

        let mut out = [0u8; 4];
        assert_eq!(s.read(&mut out).unwrap(), IoOutcome::Transferred(4));
        assert_eq!(&out, b"0123");
        assert_eq!(s.buffered(), 6);

        // Writer is gone, but buffered bytes must still come out
        close_fd(w);
        let mut rest = [0u8; 16];
        assert_eq!(s.read(&mut rest).unwrap(), IoOutcome::Transferred(6));
        assert_eq!(&rest[..6], b"456789");
        assert_eq!(s.read(&mut rest).unwrap(), IoOutcome::Closed);
    }

    #[test]
    fn test_nonblocking_read_would_block() {
        let (mut s, w) = pipe_stream(BlockMode::NonBlocking);
        let mut out = [0u8; 8];
        assert_eq!(s.read(&mut out).unwrap(), IoOutcome::WouldBlock);
        close_fd(w);
    }

    #[test]
    fn test_blocking_read_times_out() {
        let (mut s, w) = pipe_stream(BlockMode::Blocking);
        let start = Instant::now();
        let mut out = [0u8; 8];
        assert_eq!(s.read(&mut out).unwrap(), IoOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(60));
        close_fd(w);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut s, w) = pipe_stream(BlockMode::NonBlocking);
        assert!(s.is_open());
        s.close();
        assert!(!s.is_open());
        s.close(); // second close must be a no-op
        assert!(!s.is_open());

        let mut out = [0u8; 4];
        assert_eq!(s.read(&mut out).unwrap_err(), TransportError::NotOpen);
        assert_eq!(s.write(b"x").unwrap_err(), TransportError::NotOpen);
        close_fd(w);
    }

    #[test]
    fn test_stage_and_flush() {
        let (r, w) = pipe_pair().unwrap();
        let mut s =
            Stream::from_fd(w, StreamKind::Pipe, BlockMode::Blocking, 1024, None).unwrap();

        assert_eq!(s.stage(b"hello ").unwrap(), IoOutcome::Transferred(6));
        assert_eq!(s.stage(b"world").unwrap(), IoOutcome::Transferred(5));
        assert_eq!(s.staged(), 11);

        // Nothing on the wire until flush
        let mut probe = [0u8; 16];
        let n = unsafe { libc::read(r, probe.as_mut_ptr() as *mut libc::c_void, probe.len()) };
        assert!(n < 0);

        assert_eq!(s.flush().unwrap(), IoOutcome::Transferred(11));
        assert_eq!(s.staged(), 0);
        let n = unsafe { libc::read(r, probe.as_mut_ptr() as *mut libc::c_void, probe.len()) };
        assert_eq!(n, 11);
        assert_eq!(&probe[..11], b"hello world");
        close_fd(r);
    }

    #[test]
    fn test_oversized_stage_writes_through() {
        let (r, w) = pipe_pair().unwrap();
        // Minimum capacity is 128; a 300 byte payload must bypass staging
        let mut s = Stream::from_fd(w, StreamKind::Pipe, BlockMode::Blocking, 1, None).unwrap();
        let payload = vec![42u8; 300];
        assert_eq!(s.stage(&payload).unwrap(), IoOutcome::Transferred(300));
        assert_eq!(s.staged(), 0);

        let mut got = vec![0u8; 512];
        let n = unsafe { libc::read(r, got.as_mut_ptr() as *mut libc::c_void, got.len()) };
        assert_eq!(n, 300);
        close_fd(r);
    }

    #[test]
    fn test_read_line() {
        let (mut s, w) = pipe_stream(BlockMode::Blocking);
        raw_write(w, b"one\ntwo");

        let mut line = Vec::new();
        assert_eq!(s.read_line(&mut line).unwrap(), IoOutcome::Transferred(4));
        assert_eq!(line, b"one\n");

        // "two" has no terminator yet; blocking read times out with the
        // partial line moved into the caller's buffer
        line.clear();
        assert_eq!(s.read_line(&mut line).unwrap(), IoOutcome::TimedOut);
        assert_eq!(line, b"two");

        // EOF: nothing further buffered, so the reader sees Closed
        close_fd(w);
        let mut tail = Vec::new();
        assert_eq!(s.read_line(&mut tail).unwrap(), IoOutcome::Closed);
    }

    #[test]
    fn test_connect_blocking_roundtrip() {
        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("127.0.0.1:{}", server.local_addr().unwrap().port());

        let mut s = Stream::connect(
            &addr,
            BlockMode::Blocking,
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(2)),
            2048,
        )
        .unwrap();
        assert!(!s.is_connecting());
        assert_eq!(s.peer_endpoint().unwrap().to_string(), addr);

        let (mut peer, _) = server.accept().unwrap();
        assert_eq!(s.write_all(b"marco").unwrap(), IoOutcome::Transferred(5));
        let mut got = [0u8; 5];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"marco");

        peer.write_all(b"polo").unwrap();
        let mut back = [0u8; 4];
        assert_eq!(s.read(&mut back).unwrap(), IoOutcome::Transferred(4));
        assert_eq!(&back, b"polo");
    }

    #[test]
    fn test_connect_refused() {
        // Grab a port that is then closed again
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let addr = format!("127.0.0.1:{}", port);
        let err = Stream::connect(
            &addr,
            BlockMode::Blocking,
            Some(Duration::from_secs(2)),
            None,
            1024,
        )
        .unwrap_err();
        assert_eq!(err, ConnectError::Refused);
    }

    #[test]
    fn test_connect_bad_address() {
        let err = Stream::connect("nonsense", BlockMode::Blocking, None, None, 1024).unwrap_err();
        assert!(matches!(err, ConnectError::InvalidAddress(_)));
    }

    #[test]
    fn test_take_handle_leaves_stream_closed() {
        let (mut s, w) = pipe_stream(BlockMode::NonBlocking);
        let fd = s.take_handle();
        assert!(fd >= 0);
        assert!(!s.is_open());
        // The fd survives the stream; we own it now
        drop(s);
        let mut probe = [0u8; 1];
        raw_write(w, b"z");
        let n = unsafe { libc::read(fd, probe.as_mut_ptr() as *mut libc::c_void, 1) };
        assert_eq!(n, 1);
        close_fd(fd);
        close_fd(w);
    }
}
