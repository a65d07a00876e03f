//! # evio-runtime
//!
//! Event-driven I/O runtime: buffered streams, listeners, and the
//! single-threaded reactor that dispatches their readiness.
//!
//! This crate provides:
//! - Buffered [`Stream`] over sockets, pipes and custom transports
//! - [`Listener`] with stream recycling on accept
//! - Multiplexer backends (poll / epoll / kqueue / io_uring)
//! - [`Reactor`] with slot-table dispatch and heap timers
//!
//! Everything here is process-local and single-threaded by design; the
//! supervision and signal layer lives in `evio-service`.

pub mod backend;
pub mod config;
pub mod listener;
pub mod reactor;
mod sock;
pub mod stream;
pub mod timer;
pub mod transports;

// Re-exports
pub use backend::{BackendKind, EventBackend, PollEvent, Token};
pub use config::ReactorConfig;
pub use listener::Listener;
pub use reactor::{
    AcceptHandler, Action, ConnectHandler, Reactor, ReactorStats, StreamHandler, StreamId,
    TimerCallback,
};
pub use stream::{BlockMode, Stream, StreamKind};
pub use timer::{TimerId, TimerOutcome, TimerQueue, TimerStats};
pub use transports::{DgramTransport, FdTransport, SockTransport};

// Unix-only: everything below the backends speaks raw fds.
#[cfg(not(unix))]
compile_error!("evio-runtime requires a unix platform");
