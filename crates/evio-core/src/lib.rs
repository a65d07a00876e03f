//! Core types and traits for the evio reactor
//!
//! This crate is platform-agnostic: addresses, buffers, interest sets,
//! I/O outcomes, the transport capability trait and the error taxonomy
//! live here, with zero external dependencies. The platform layer
//! (`evio-runtime`) supplies sockets, multiplexer backends and the
//! reactor itself on top of these types.
//!
//! # Layering
//!
//! ```text
//!   evio-service     process lifecycle (standalone / supervised)
//!   evio-runtime     sockets, backends, Stream, Listener, Reactor
//!   evio-core        types + traits (this crate)
//! ```

pub mod addr;
pub mod buffer;
pub mod env;
pub mod error;
pub mod evprint;
pub mod interest;
pub mod outcome;
pub mod transport;

// Re-export the common vocabulary at the crate root
pub use addr::{Endpoint, ParseEndpointError};
pub use buffer::IoBuffer;
pub use error::{
    AcceptError, BindError, ConfigError, ConnectError, IoResult, ReactorError, ServiceError,
    TransportError,
};
pub use interest::{Interest, Readiness};
pub use outcome::IoOutcome;
pub use transport::Transport;

/// Shared constants
pub mod constants {
    use std::os::fd::RawFd;

    /// Sentinel for "no file descriptor" (closed / taken handles)
    pub const INVALID_FD: RawFd = -1;

    /// Default stream buffer size in bytes
    pub const DEFAULT_BUFFER_SIZE: usize = 8192;

    /// Smallest accepted stream buffer size
    pub const MIN_BUFFER_SIZE: usize = 128;

    /// Default listen backlog
    pub const DEFAULT_BACKLOG: u32 = 128;

    /// Default cap on registered streams per reactor
    pub const DEFAULT_MAX_STREAMS: usize = 4096;

    /// Default readiness batch per multiplexer wait
    pub const DEFAULT_MAX_EVENTS: usize = 256;

    /// Default accepts drained per listener readiness event
    pub const DEFAULT_ACCEPT_BATCH: usize = 16;
}
