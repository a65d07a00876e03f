//! Raw socket plumbing
//!
//! Thin unsafe layer over libc: socket creation, bind/listen/accept,
//! non-blocking connect initiation, single-fd poll waits and sockaddr
//! conversions. Everything above this module works in terms of
//! `Endpoint`, `Readiness` and the error taxonomy; everything below it
//! is errno.
//!
//! Error discipline: every function that creates an fd closes it again
//! on its own failure paths. Callers receive either a live fd or an
//! error, never both.

use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use evio_core::error::{AcceptError, BindError, ConnectError, TransportError};
use evio_core::interest::{Interest, Readiness};
use evio_core::Endpoint;

/// errno of the most recent failed call on this thread
#[inline]
pub fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[inline]
fn is_wouldblock(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

/// Close an fd, ignoring errors. Safe on the invalid sentinel.
#[inline]
pub fn close_fd(fd: RawFd) {
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Toggle O_NONBLOCK
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<(), TransportError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(TransportError::Configure(last_errno()));
    }
    let new_flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if new_flags != flags {
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) };
        if rc < 0 {
            return Err(TransportError::Configure(last_errno()));
        }
    }
    Ok(())
}

/// Set FD_CLOEXEC
pub fn set_cloexec(fd: RawFd) -> Result<(), TransportError> {
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(TransportError::Configure(last_errno()));
    }
    Ok(())
}

/// Non-blocking, close-on-exec pipe. Returns (read end, write end).
pub fn pipe_pair() -> Result<(RawFd, RawFd), TransportError> {
    let mut fds = [0 as RawFd; 2];
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
            if rc < 0 {
                return Err(TransportError::Create(last_errno()));
            }
        } else {
            let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
            if rc < 0 {
                return Err(TransportError::Create(last_errno()));
            }
            for fd in fds {
                if let Err(e) = set_nonblocking(fd, true).and_then(|_| set_cloexec(fd)) {
                    close_fd(fds[0]);
                    close_fd(fds[1]);
                    return Err(e);
                }
            }
        }
    }
    Ok((fds[0], fds[1]))
}

// ============================================================================
// sockaddr conversions
// ============================================================================

/// Numeric IPv4 sockaddr for `host:port`. Hostnames are rejected here;
/// resolution policy stays out of the runtime.
pub(crate) fn sockaddr_v4(host: &str, port: u16) -> Option<libc::sockaddr_in> {
    let ip: Ipv4Addr = host.parse().ok()?;
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = port.to_be();
    sa.sin_addr.s_addr = u32::from_ne_bytes(ip.octets());
    Some(sa)
}

pub(crate) fn sockaddr_unix(path: &str) -> Option<libc::sockaddr_un> {
    let mut sa: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    sa.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let bytes = path.as_bytes();
    if bytes.is_empty() || bytes.len() >= sa.sun_path.len() {
        return None;
    }
    for (dst, src) in sa.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }
    Some(sa)
}

/// Recover an `Endpoint` from a kernel-filled sockaddr
pub(crate) fn endpoint_from_storage(storage: &libc::sockaddr_storage) -> Option<Endpoint> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes());
            Some(Endpoint::inet(ip.to_string(), u16::from_be(sa.sin_port)))
        }
        libc::AF_UNIX => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_un) };
            let path: String = sa
                .sun_path
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as u8 as char)
                .collect();
            if path.is_empty() {
                None // unnamed peer socket
            } else {
                Some(Endpoint::local(path))
            }
        }
        _ => None,
    }
}

/// The address this fd is actually bound to (resolves `:0` binds)
pub fn local_endpoint_of(fd: RawFd) -> Result<Endpoint, TransportError> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if rc < 0 {
        return Err(TransportError::Io(last_errno()));
    }
    endpoint_from_storage(&storage).ok_or(TransportError::NotOpen)
}

/// Pending SO_ERROR, cleared by reading
pub fn so_error(fd: RawFd) -> Result<i32, TransportError> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(TransportError::Io(last_errno()));
    }
    Ok(err)
}

// ============================================================================
// Listen
// ============================================================================

fn map_bind_errno(errno: i32, addr: &Endpoint) -> BindError {
    match errno {
        libc::EADDRINUSE => BindError::AddressInUse(addr.to_string()),
        libc::EACCES | libc::EPERM => BindError::Permission(addr.to_string()),
        libc::EADDRNOTAVAIL | libc::EINVAL => BindError::InvalidAddress(addr.to_string()),
        e => BindError::Transport(TransportError::Io(e)),
    }
}

/// Bound, listening TCP socket with SO_REUSEADDR
pub fn tcp_listen(addr: &Endpoint, backlog: u32) -> Result<RawFd, BindError> {
    let (host, port) = match addr {
        Endpoint::Inet { host, port, .. } => (host.as_str(), *port),
        Endpoint::Local(_) => return Err(BindError::InvalidAddress(addr.to_string())),
    };
    let sa = sockaddr_v4(host, port).ok_or_else(|| BindError::InvalidAddress(addr.to_string()))?;

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(BindError::Transport(TransportError::Create(last_errno())));
    }

    let optval: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let e = last_errno();
        close_fd(fd);
        return Err(BindError::Transport(TransportError::Configure(e)));
    }

    let rc = unsafe {
        libc::bind(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let e = last_errno();
        close_fd(fd);
        return Err(map_bind_errno(e, addr));
    }

    let rc = unsafe { libc::listen(fd, backlog.min(i32::MAX as u32) as libc::c_int) };
    if rc < 0 {
        let e = last_errno();
        close_fd(fd);
        return Err(BindError::Transport(TransportError::Io(e)));
    }
    Ok(fd)
}

/// Bound UDP socket (datagram streams, tests, discovery protocols)
pub fn dgram_bind(addr: &Endpoint) -> Result<RawFd, BindError> {
    let (host, port) = match addr {
        Endpoint::Inet { host, port, .. } => (host.as_str(), *port),
        Endpoint::Local(_) => return Err(BindError::InvalidAddress(addr.to_string())),
    };
    let sa = sockaddr_v4(host, port).ok_or_else(|| BindError::InvalidAddress(addr.to_string()))?;

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(BindError::Transport(TransportError::Create(last_errno())));
    }
    let rc = unsafe {
        libc::bind(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let e = last_errno();
        close_fd(fd);
        return Err(map_bind_errno(e, addr));
    }
    Ok(fd)
}

/// Bound, listening unix-domain socket. A stale socket file at the
/// path is unlinked first.
pub fn unix_listen(path: &str, backlog: u32) -> Result<RawFd, BindError> {
    let addr = Endpoint::local(path);
    let sa = sockaddr_unix(path).ok_or_else(|| BindError::InvalidAddress(addr.to_string()))?;

    // Stale file from a previous run makes bind fail with EADDRINUSE
    let _ = std::fs::remove_file(path);

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(BindError::Transport(TransportError::Create(last_errno())));
    }

    let rc = unsafe {
        libc::bind(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let e = last_errno();
        close_fd(fd);
        return Err(map_bind_errno(e, &addr));
    }

    let rc = unsafe { libc::listen(fd, backlog.min(i32::MAX as u32) as libc::c_int) };
    if rc < 0 {
        let e = last_errno();
        close_fd(fd);
        return Err(BindError::Transport(TransportError::Io(e)));
    }
    Ok(fd)
}

// ============================================================================
// Accept
// ============================================================================

/// One accept attempt. EINTR and aborted-in-backlog connections retry
/// internally; an empty backlog reports `WouldBlock`.
pub fn accept_fd(listener_fd: RawFd) -> Result<(RawFd, Option<Endpoint>), AcceptError> {
    loop {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept(
                listener_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if fd >= 0 {
            return Ok((fd, endpoint_from_storage(&storage)));
        }
        let e = last_errno();
        if e == libc::EINTR || e == libc::ECONNABORTED {
            continue;
        }
        if is_wouldblock(e) {
            return Err(AcceptError::WouldBlock);
        }
        if e == libc::EBADF || e == libc::EINVAL {
            return Err(AcceptError::TransportClosed);
        }
        return Err(AcceptError::Transport(TransportError::Io(e)));
    }
}

// ============================================================================
// Connect
// ============================================================================

pub(crate) fn map_connect_errno(errno: i32) -> ConnectError {
    match errno {
        libc::ECONNREFUSED => ConnectError::Refused,
        libc::ENETUNREACH | libc::EHOSTUNREACH => ConnectError::Unreachable,
        libc::ETIMEDOUT => ConnectError::TimedOut,
        e => ConnectError::Transport(TransportError::Io(e)),
    }
}

/// Start a TCP connect in non-blocking mode.
///
/// Returns the socket fd and whether the connect is still in progress
/// (EINPROGRESS). The fd is always non-blocking on return; callers
/// wanting a blocking stream flip the mode after completion. The
/// `bind@` part of the endpoint, when present, pins the local address.
pub fn tcp_connect_start(addr: &Endpoint) -> Result<(RawFd, bool), ConnectError> {
    let (bind, host, port) = match addr {
        Endpoint::Inet { bind, host, port } => (bind.as_deref(), host.as_str(), *port),
        Endpoint::Local(_) => return Err(ConnectError::InvalidAddress(addr.to_string())),
    };
    let sa = sockaddr_v4(host, port)
        .ok_or_else(|| ConnectError::InvalidAddress(addr.to_string()))?;

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(ConnectError::Transport(TransportError::Create(last_errno())));
    }
    if let Err(e) = set_nonblocking(fd, true) {
        close_fd(fd);
        return Err(ConnectError::Transport(e));
    }

    if let Some(local) = bind {
        let local_sa = match sockaddr_v4(local, 0) {
            Some(sa) => sa,
            None => {
                close_fd(fd);
                return Err(ConnectError::InvalidAddress(addr.to_string()));
            }
        };
        let rc = unsafe {
            libc::bind(
                fd,
                &local_sa as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let e = last_errno();
            close_fd(fd);
            return Err(ConnectError::Transport(TransportError::Configure(e)));
        }
    }

    let rc = unsafe {
        libc::connect(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        return Ok((fd, false));
    }
    let e = last_errno();
    if e == libc::EINPROGRESS {
        return Ok((fd, true));
    }
    close_fd(fd);
    Err(map_connect_errno(e))
}

/// Unix-domain connect. Completes immediately or fails; an overfull
/// server backlog surfaces as `Refused`.
pub fn unix_connect_start(path: &str) -> Result<(RawFd, bool), ConnectError> {
    let sa = sockaddr_unix(path)
        .ok_or_else(|| ConnectError::InvalidAddress(path.to_string()))?;

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(ConnectError::Transport(TransportError::Create(last_errno())));
    }
    if let Err(e) = set_nonblocking(fd, true) {
        close_fd(fd);
        return Err(ConnectError::Transport(e));
    }

    let rc = unsafe {
        libc::connect(
            fd,
            &sa as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        return Ok((fd, false));
    }
    let e = last_errno();
    match e {
        libc::EINPROGRESS => Ok((fd, true)),
        libc::EAGAIN | libc::ECONNREFUSED | libc::ENOENT => {
            close_fd(fd);
            Err(ConnectError::Refused)
        }
        _ => {
            close_fd(fd);
            Err(map_connect_errno(e))
        }
    }
}

// ============================================================================
// Single-fd waits
// ============================================================================

pub(crate) fn readiness_from_poll(revents: libc::c_short) -> Readiness {
    let mut r = Readiness::NONE;
    if revents & (libc::POLLIN | libc::POLLPRI) != 0 {
        r = r.add(Readiness::READABLE);
    }
    if revents & libc::POLLOUT != 0 {
        r = r.add(Readiness::WRITABLE);
    }
    if revents & libc::POLLHUP != 0 {
        // Hangup surfaces as EOF through the read path
        r = r.add(Readiness::READABLE);
    }
    if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        // Wake both directions so the next syscall surfaces the errno
        r = r
            .add(Readiness::ERROR)
            .add(Readiness::READABLE)
            .add(Readiness::WRITABLE);
    }
    r
}

pub(crate) fn poll_events_for(interest: Interest) -> libc::c_short {
    let mut ev: libc::c_short = 0;
    if interest.is_readable() {
        ev |= libc::POLLIN;
    }
    if interest.is_writable() {
        ev |= libc::POLLOUT;
    }
    ev
}

pub(crate) fn timeout_ms(d: Duration) -> libc::c_int {
    let ms = d.as_millis().min(i32::MAX as u128) as libc::c_int;
    if ms == 0 && !d.is_zero() {
        1 // sub-millisecond waits round up rather than spin
    } else {
        ms
    }
}

/// Block the calling thread until `fd` is ready for `interest`, the
/// timeout elapses (`Ok(None)`), or the poll itself fails. EINTR
/// retries against the original deadline.
pub fn poll_wait(
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
) -> Result<Option<Readiness>, TransportError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let ms = match deadline {
            None => -1,
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Ok(None);
                }
                timeout_ms(d - now)
            }
        };
        let mut pfd = libc::pollfd {
            fd,
            events: poll_events_for(interest),
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
        if rc > 0 {
            return Ok(Some(readiness_from_poll(pfd.revents)));
        }
        if rc == 0 {
            return Ok(None);
        }
        let e = last_errno();
        if e == libc::EINTR {
            continue;
        }
        return Err(TransportError::Io(e));
    }
}
