//! # evio - Event-driven IO runtime
//!
//! Single-threaded, readiness-driven networking for Rust daemons.
//!
//! ## Features
//!
//! - **Buffered streams**: one `Stream` type over sockets, pipes, files
//!   and custom transports, blocking or non-blocking, with per-call
//!   timeouts
//! - **Pluggable multiplexer**: poll, epoll, kqueue, io_uring (feature
//!   `uring`) behind one backend trait, chosen per platform or by
//!   `EVIO_BACKEND`
//! - **Reactor**: slot table with generation-checked stream ids, one-shot
//!   timers, batched accepts, non-blocking connect resolution
//! - **Service template**: standalone or supervisor-inherited listeners,
//!   lifecycle hooks, privilege drop, SIGTERM/SIGINT stop plumbing
//!
//! ## Quick Start
//!
//! ```ignore
//! use evio::{Action, Interest, IoOutcome, Reactor, Service, ServiceConfig,
//!            ServiceRunner, Stream, StreamHandler, StreamId};
//!
//! struct Echo;
//!
//! impl StreamHandler for Echo {
//!     fn on_readable(&mut self, _rt: &mut Reactor, _id: StreamId,
//!                    stream: &mut Stream) -> Action {
//!         let mut buf = [0u8; 4096];
//!         match stream.read(&mut buf) {
//!             Ok(IoOutcome::Transferred(n)) => {
//!                 let _ = stream.write_all(&buf[..n]);
//!                 Action::Rearm(Interest::READABLE)
//!             }
//!             Ok(IoOutcome::WouldBlock) => Action::Rearm(Interest::READABLE),
//!             _ => Action::Close,
//!         }
//!     }
//! }
//!
//! struct EchoService;
//!
//! impl Service for EchoService {
//!     fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool {
//!         rt.register(stream, Interest::READABLE, Echo).is_ok()
//!     }
//! }
//!
//! fn main() {
//!     let runner = ServiceRunner::new(ServiceConfig::from_env());
//!     if let Err(e) = runner.run_alone("127.0.0.1:7000", EchoService) {
//!         eprintln!("echo service failed: {}", e);
//!         std::process::exit(1);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   Service                       │
//! │     on_accept(), lifecycle hooks, run modes     │
//! └─────────────────────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌─────────────────────────────────────────────────┐
//! │                   Reactor                       │
//! │   slot table, timers, dispatch, StreamId gen    │
//! └─────────────────────────────────────────────────┘
//!                         │
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!   ┌──────────┐    ┌──────────┐    ┌──────────┐
//!   │   poll   │    │  epoll   │    │  kqueue  │   (+ io_uring)
//!   └──────────┘    └──────────┘    └──────────┘
//!         │               │               │
//!         └───────────────┼───────────────┘
//!                         ▼
//! ┌─────────────────────────────────────────────────┐
//! │               Stream / Listener                 │
//! │    buffered IO over sockets, pipes, custom      │
//! └─────────────────────────────────────────────────┘
//! ```

// Re-export core vocabulary
pub use evio_core::{
    Endpoint, Interest, IoBuffer, IoOutcome, ParseEndpointError, Readiness, Transport,
};
pub use evio_core::error::{
    AcceptError, BindError, ConfigError, ConnectError, IoResult, ReactorError, ServiceError,
    TransportError,
};
pub use evio_core::constants;

// Re-export evprint macros for leveled logging
pub use evio_core::{evdebug, everror, evinfo, evprint, evprintln, evtrace, evwarn};
pub use evio_core::evprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use evio_core::env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use evio_runtime::{
    AcceptHandler, Action, BackendKind, BlockMode, ConnectHandler, DgramTransport, FdTransport,
    Listener, Reactor, ReactorConfig, ReactorStats, SockTransport, Stream, StreamHandler,
    StreamId, StreamKind, TimerId, TimerOutcome,
};

// Re-export the service template
pub use evio_service::{
    RunMode, Service, ServiceConfig, ServiceRunner, StopHandle, SupervisorEnv,
};
