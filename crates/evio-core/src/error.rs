//! Error types for the evio runtime
//!
//! One enum per failure domain: transport plumbing, bind, connect,
//! accept, reactor bookkeeping, configuration and service lifecycle.
//! Variants that wrap an OS failure carry the raw errno so callers can
//! inspect the cause without string matching.

use core::fmt;

use crate::addr::ParseEndpointError;

/// Result type for raw transport operations
pub type IoResult<T> = Result<T, TransportError>;

/// Failures at the file-descriptor level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// socket()/pipe() or similar creation call failed
    Create(i32),

    /// fcntl/setsockopt style configuration failed
    Configure(i32),

    /// read/write/poll failed
    Io(i32),

    /// Operation on a stream whose handle was closed or taken
    NotOpen,
}

impl TransportError {
    /// The errno behind this error, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            TransportError::Create(e)
            | TransportError::Configure(e)
            | TransportError::Io(e) => Some(*e),
            TransportError::NotOpen => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Create(e) => write!(f, "transport creation failed (errno {})", e),
            TransportError::Configure(e) => write!(f, "transport configuration failed (errno {})", e),
            TransportError::Io(e) => write!(f, "transport I/O failed (errno {})", e),
            TransportError::NotOpen => write!(f, "stream is not open"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Failures binding a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Endpoint already bound by another socket
    AddressInUse(String),

    /// Insufficient privilege for the endpoint (low port, protected path)
    Permission(String),

    /// Endpoint string did not parse or names an unusable address
    InvalidAddress(String),

    /// Underlying socket plumbing failed
    Transport(TransportError),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::AddressInUse(a) => write!(f, "address already in use: {}", a),
            BindError::Permission(a) => write!(f, "permission denied binding: {}", a),
            BindError::InvalidAddress(a) => write!(f, "invalid bind address: {}", a),
            BindError::Transport(e) => write!(f, "bind transport error: {}", e),
        }
    }
}

impl std::error::Error for BindError {}

impl From<TransportError> for BindError {
    fn from(e: TransportError) -> Self {
        BindError::Transport(e)
    }
}

impl From<ParseEndpointError> for BindError {
    fn from(e: ParseEndpointError) -> Self {
        BindError::InvalidAddress(e.to_string())
    }
}

/// Failures establishing an outbound connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Connection attempt exceeded the configured timeout
    TimedOut,

    /// Peer actively refused
    Refused,

    /// No route / network or host unreachable
    Unreachable,

    /// Endpoint string did not parse
    InvalidAddress(String),

    /// Underlying socket plumbing failed
    Transport(TransportError),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::TimedOut => write!(f, "connect timed out"),
            ConnectError::Refused => write!(f, "connection refused"),
            ConnectError::Unreachable => write!(f, "host or network unreachable"),
            ConnectError::InvalidAddress(a) => write!(f, "invalid connect address: {}", a),
            ConnectError::Transport(e) => write!(f, "connect transport error: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<TransportError> for ConnectError {
    fn from(e: TransportError) -> Self {
        ConnectError::Transport(e)
    }
}

impl From<ParseEndpointError> for ConnectError {
    fn from(e: ParseEndpointError) -> Self {
        ConnectError::InvalidAddress(e.to_string())
    }
}

/// Failures accepting a connection
///
/// `WouldBlock` is a routine outcome on non-blocking listeners, not a
/// fault; callers must not log it as one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptError {
    /// No pending connection (non-blocking listener)
    WouldBlock,

    /// The listening socket itself is gone
    TransportClosed,

    /// Underlying accept plumbing failed
    Transport(TransportError),
}

impl fmt::Display for AcceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptError::WouldBlock => write!(f, "no pending connection"),
            AcceptError::TransportClosed => write!(f, "listener is closed"),
            AcceptError::Transport(e) => write!(f, "accept transport error: {}", e),
        }
    }
}

impl std::error::Error for AcceptError {}

impl From<TransportError> for AcceptError {
    fn from(e: TransportError) -> Self {
        AcceptError::Transport(e)
    }
}

/// Failures in reactor bookkeeping or its multiplexer backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactorError {
    /// Multiplexer backend failed unrecoverably (errno)
    Backend(i32),

    /// Slot table is at its configured capacity
    SlotsExhausted,

    /// Id does not name a live registration (stale generation, freed
    /// slot, or a stream currently inside its own callback)
    StaleId,

    /// Rejected reactor configuration
    Config(ConfigError),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::Backend(e) => write!(f, "multiplexer backend error (errno {})", e),
            ReactorError::SlotsExhausted => write!(f, "no stream slots available"),
            ReactorError::StaleId => write!(f, "stale or invalid stream id"),
            ReactorError::Config(e) => write!(f, "reactor config error: {}", e),
        }
    }
}

impl std::error::Error for ReactorError {}

impl From<ConfigError> for ReactorError {
    fn from(e: ConfigError) -> Self {
        ReactorError::Config(e)
    }
}

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed validation; the message names the field
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(what) => write!(f, "invalid value: {}", what),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failures in the service lifecycle template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A runner already owns this process's reactor
    AlreadyRunning,

    /// Standalone bind failed
    Bind(BindError),

    /// Reactor construction or dispatch failed
    Reactor(ReactorError),

    /// Rejected service configuration
    Config(ConfigError),

    /// A lifecycle hook returned an error; fatal during startup
    Hook {
        name: &'static str,
        detail: String,
    },

    /// Supervisor handoff contract violated (LISTEN_FDS / LISTEN_PID)
    Supervisor(String),

    /// Privilege drop failed
    Privilege(String),

    /// Signal handler installation failed
    Signal(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::AlreadyRunning => write!(f, "a service runner is already active in this process"),
            ServiceError::Bind(e) => write!(f, "service bind failed: {}", e),
            ServiceError::Reactor(e) => write!(f, "service reactor failed: {}", e),
            ServiceError::Config(e) => write!(f, "service config error: {}", e),
            ServiceError::Hook { name, detail } => write!(f, "lifecycle hook {} failed: {}", name, detail),
            ServiceError::Supervisor(msg) => write!(f, "supervisor handoff error: {}", msg),
            ServiceError::Privilege(msg) => write!(f, "privilege drop failed: {}", msg),
            ServiceError::Signal(msg) => write!(f, "signal setup failed: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<BindError> for ServiceError {
    fn from(e: BindError) -> Self {
        ServiceError::Bind(e)
    }
}

impl From<ReactorError> for ServiceError {
    fn from(e: ReactorError) -> Self {
        ServiceError::Reactor(e)
    }
}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        ServiceError::Config(e)
    }
}
