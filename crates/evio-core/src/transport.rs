//! Transport capability trait
//!
//! A `Stream` does its buffering, timeout and lifecycle work against
//! this trait rather than against `read(2)`/`write(2)` directly. The
//! stock implementations (TCP, raw fd, datagram) live in the platform
//! crate; a protocol with unusual framing (a raw-socket ping engine,
//! a userspace tunnel) supplies its own and carries whatever context
//! it needs inside the impl.

use std::os::fd::RawFd;

use crate::addr::Endpoint;
use crate::error::TransportError;
use crate::outcome::IoOutcome;

/// How bytes actually move for one stream
///
/// # Contract
///
/// - `read` fills `buf` from the handle. A would-block condition
///   (EAGAIN/EWOULDBLOCK) maps to `Ok(IoOutcome::WouldBlock)`; a
///   zero-byte result on a connection-oriented handle maps to
///   `Ok(IoOutcome::Closed)`. EINTR retries internally. Only real
///   faults become `Err`.
/// - `write` mirrors `read`; short writes report the partial count as
///   `Transferred`.
/// - Neither method ever produces `IoOutcome::TimedOut`; timeouts are
///   the stream's business, layered on top with its poll wait.
/// - `shutdown` is advisory teardown before close (e.g. `SHUT_WR`);
///   the default does nothing.
pub trait Transport: Send {
    fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> Result<IoOutcome, TransportError>;

    fn write(&mut self, fd: RawFd, buf: &[u8]) -> Result<IoOutcome, TransportError>;

    fn shutdown(&mut self, _fd: RawFd) -> Result<(), TransportError> {
        Ok(())
    }

    /// Peer known to the transport itself, e.g. the source of the last
    /// datagram. Connection-oriented transports leave this `None`; the
    /// stream tracks their peer.
    fn peer(&self) -> Option<&Endpoint> {
        None
    }

    /// Short tag for diagnostics
    fn name(&self) -> &'static str {
        "custom"
    }
}
