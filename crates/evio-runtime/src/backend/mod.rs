//! Multiplexer backends.
//!
//! A backend watches a set of descriptors and reports which became ready.
//! The reactor drives exactly one backend; the trait keeps the reactor
//! oblivious to whether readiness comes from poll(2), epoll, kqueue or
//! io_uring.
//!
//! Contract highlights (see [`EventBackend`] for the fine print):
//! - `register` is an upsert: re-registering an fd replaces its token and
//!   interest in one call.
//! - `deregister` of an unknown fd is not an error. Descriptors get closed
//!   behind the backend's back during teardown and the kernel may already
//!   have dropped them.
//! - `wait` never delivers spurious tokens, but it may deliver readiness
//!   for an fd whose slot was recycled since the event was queued. Callers
//!   detect that through token generations.

use std::fmt;
use std::os::unix::io::RawFd;
use std::str::FromStr;
use std::time::Duration;

use evio_core::error::ReactorError;
use evio_core::evinfo;
use evio_core::interest::{Interest, Readiness};

mod poll;
pub use poll::PollBackend;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use epoll::EpollBackend;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))] {
        mod kqueue;
        pub use kqueue::KqueueBackend;
    }
}

#[cfg(all(target_os = "linux", feature = "uring"))]
mod uring;
#[cfg(all(target_os = "linux", feature = "uring"))]
pub use uring::UringBackend;

// ===== Token =====

/// Opaque cookie attached to a registration and echoed back on readiness.
///
/// The backend never inspects the value. The reactor packs a slot index and
/// a generation counter into it so stale events can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

// ===== Events =====

/// One readiness report out of [`EventBackend::wait`].
#[derive(Debug, Clone, Copy)]
pub struct PollEvent {
    pub token: Token,
    pub readiness: Readiness,
}

// ===== Backend trait =====

/// Readiness multiplexer over a set of raw descriptors.
///
/// Implementations normalise platform readiness into [`Readiness`]:
/// hang-up reports as readable (the next read observes EOF) and error
/// conditions report as readable and writable with the error bit set, so
/// the owning code reaches a syscall that surfaces the real errno.
pub trait EventBackend: Send {
    /// Start (or update) watching `fd`.
    ///
    /// Upsert semantics: if `fd` is already registered its token and
    /// interest are replaced. Registering with an empty interest parks the
    /// fd without watching it for anything.
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<(), ReactorError>;

    /// Stop watching `fd`. Unknown descriptors are ignored.
    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError>;

    /// Block until readiness or timeout.
    ///
    /// Clears `events` and fills it with whatever became ready, returning
    /// the count. `None` blocks indefinitely, `Some(ZERO)` polls without
    /// blocking. An interrupting signal yields `Ok(0)`.
    fn wait(
        &mut self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> Result<usize, ReactorError>;

    /// Short name for logs ("poll", "epoll", ...).
    fn name(&self) -> &'static str;
}

// ===== Backend selection =====

/// Which multiplexer implementation to drive the reactor with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Portable poll(2). Works everywhere, O(n) per wait.
    Poll,
    /// Linux epoll, level-triggered.
    Epoll,
    /// BSD / macOS kqueue.
    Kqueue,
    /// Linux io_uring poll submissions (feature `uring`).
    Uring,
}

impl BackendKind {
    /// Preferred backend for the current platform.
    pub fn default_for_platform() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                BackendKind::Epoll
            } else if #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))] {
                BackendKind::Kqueue
            } else {
                BackendKind::Poll
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Poll => "poll",
            BackendKind::Epoll => "epoll",
            BackendKind::Kqueue => "kqueue",
            BackendKind::Uring => "uring",
        }
    }

    /// Whether this kind can actually be constructed in this build.
    pub fn available(&self) -> bool {
        match self {
            BackendKind::Poll => true,
            BackendKind::Epoll => cfg!(any(target_os = "linux", target_os = "android")),
            BackendKind::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            )),
            BackendKind::Uring => cfg!(all(target_os = "linux", feature = "uring")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(BackendKind::Poll),
            "epoll" => Ok(BackendKind::Epoll),
            "kqueue" => Ok(BackendKind::Kqueue),
            "uring" | "io_uring" | "io-uring" => Ok(BackendKind::Uring),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Build the requested backend, falling back to poll(2) when the request
/// is not available on this platform or in this build.
///
/// `max_events` sizes the per-wait completion batch for backends that
/// buffer kernel reports (poll reports its whole ready set regardless).
pub fn create_backend(
    kind: BackendKind,
    max_events: usize,
) -> Result<Box<dyn EventBackend>, ReactorError> {
    let effective = if kind.available() {
        kind
    } else {
        evinfo!("backend {} unavailable here, using poll", kind);
        BackendKind::Poll
    };

    match effective {
        BackendKind::Poll => Ok(Box::new(PollBackend::new())),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        BackendKind::Epoll => Ok(Box::new(EpollBackend::new(max_events)?)),
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        BackendKind::Kqueue => Ok(Box::new(KqueueBackend::new(max_events)?)),
        #[cfg(all(target_os = "linux", feature = "uring"))]
        BackendKind::Uring => Ok(Box::new(UringBackend::new(max_events)?)),
        #[allow(unreachable_patterns)]
        _ => Ok(Box::new(PollBackend::new())),
    }
}
