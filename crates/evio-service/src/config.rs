//! Service configuration and supervisor handoff
//!
//! Two concerns live here:
//! - `ServiceConfig`: everything a [`ServiceRunner`](crate::template::ServiceRunner)
//!   needs beyond the reactor itself (listener backlog, per-stream
//!   buffering and timeouts, the unprivileged user to drop to).
//! - `SupervisorEnv`: the `LISTEN_FDS` / `LISTEN_PID` socket-activation
//!   contract. A supervising daemon binds the listening sockets itself
//!   and passes them to us starting at fd 3.

use std::os::unix::io::RawFd;
use std::time::Duration;

use evio_core::constants::{DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE};
use evio_core::env::{env_get, env_get_ms, env_get_str, env_is_set};
use evio_core::error::{ConfigError, ServiceError};
use evio_core::evinfo;
use evio_runtime::ReactorConfig;

/// Inherited listener fds start here, right after stdio.
pub const LISTEN_FDS_START: RawFd = 3;

const DEFAULT_MAX_IDLE: Duration = Duration::from_millis(1000);

/// Configuration for a [`ServiceRunner`](crate::template::ServiceRunner).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Reactor tuning, forwarded verbatim
    pub reactor: ReactorConfig,

    /// Read buffer size accepted streams start with
    pub buffer_size: usize,

    /// Listen backlog for standalone binds
    pub backlog: u32,

    /// Read/write timeout accepted streams inherit; `None` waits forever
    pub rw_timeout: Option<Duration>,

    /// Longest the dispatch loop sleeps between stop-flag checks
    pub max_idle: Duration,

    /// Unprivileged user to become when started as root
    pub user: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            backlog: DEFAULT_BACKLOG,
            rw_timeout: None,
            max_idle: DEFAULT_MAX_IDLE,
            user: None,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `EVIO_BUFFER_SIZE`, `EVIO_BACKLOG`,
    /// `EVIO_RW_TIMEOUT_MS`, `EVIO_MAX_IDLE_MS` and `EVIO_USER`, on top
    /// of [`ReactorConfig::from_env`].
    pub fn from_env() -> Self {
        let d = Self::default();
        let user = if env_is_set("EVIO_USER") {
            Some(env_get_str("EVIO_USER", ""))
        } else {
            None
        };
        Self {
            reactor: ReactorConfig::from_env(),
            buffer_size: env_get("EVIO_BUFFER_SIZE", d.buffer_size),
            backlog: env_get("EVIO_BACKLOG", d.backlog),
            rw_timeout: env_get_ms("EVIO_RW_TIMEOUT_MS"),
            max_idle: env_get_ms("EVIO_MAX_IDLE_MS").unwrap_or(d.max_idle),
            user,
        }
    }

    /// Set the reactor configuration
    pub fn reactor(mut self, cfg: ReactorConfig) -> Self {
        self.reactor = cfg;
        self
    }

    /// Set the accepted-stream buffer size
    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    /// Set the standalone listen backlog
    pub fn backlog(mut self, n: u32) -> Self {
        self.backlog = n;
        self
    }

    /// Set the read/write timeout accepted streams inherit
    pub fn rw_timeout(mut self, t: Option<Duration>) -> Self {
        self.rw_timeout = t;
        self
    }

    /// Set the longest sleep between stop-flag checks
    pub fn max_idle(mut self, t: Duration) -> Self {
        self.max_idle = t;
        self
    }

    /// Set the user to drop privileges to
    pub fn user(mut self, name: &str) -> Self {
        self.user = Some(name.to_string());
        self
    }

    /// Validate configuration, including the nested reactor config
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reactor.validate()?;
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size must be at least 1"));
        }
        if self.backlog == 0 {
            return Err(ConfigError::InvalidValue("backlog must be at least 1"));
        }
        if self.max_idle.is_zero() {
            return Err(ConfigError::InvalidValue("max_idle must be non-zero"));
        }
        Ok(())
    }

    pub fn print(&self) {
        self.reactor.print();
        evinfo!("service config:");
        evinfo!("  buffer_size   : {}", self.buffer_size);
        evinfo!("  backlog       : {}", self.backlog);
        evinfo!("  rw_timeout    : {:?}", self.rw_timeout);
        evinfo!("  max_idle      : {:?}", self.max_idle);
        evinfo!("  user          : {:?}", self.user);
    }
}

// ===== Supervisor handoff =====

/// Listening sockets inherited from a supervising daemon.
///
/// The contract: the supervisor sets `LISTEN_FDS` to the number of
/// sockets it passed, numbered consecutively from fd 3, and `LISTEN_PID`
/// to the pid the sockets are meant for. Both variables are consumed
/// (removed) on a successful read so forked children do not inherit a
/// stale claim.
#[derive(Debug, Clone)]
pub struct SupervisorEnv {
    /// Inherited listening sockets, fd 3 upward
    pub fds: Vec<RawFd>,
}

impl SupervisorEnv {
    /// Read and consume the handoff variables.
    ///
    /// `LISTEN_PID`, when present, must name this process. `LISTEN_FDS`
    /// must be a positive count. Close-on-exec is set on each fd
    /// best-effort; an fd that is not actually open surfaces later when
    /// the listener adopts it.
    pub fn from_env() -> Result<SupervisorEnv, ServiceError> {
        if let Ok(pid_str) = std::env::var("LISTEN_PID") {
            let claimed: u32 = pid_str.parse().map_err(|_| {
                ServiceError::Supervisor(format!("LISTEN_PID={:?} is not a pid", pid_str))
            })?;
            if claimed != std::process::id() {
                return Err(ServiceError::Supervisor(format!(
                    "LISTEN_PID={} does not match this process (pid {})",
                    claimed,
                    std::process::id()
                )));
            }
        }

        let count_str = std::env::var("LISTEN_FDS").map_err(|_| {
            ServiceError::Supervisor("LISTEN_FDS is not set; not started by a supervisor?".into())
        })?;
        let count: usize = match count_str.parse() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(ServiceError::Supervisor(format!(
                    "LISTEN_FDS={:?} is not a positive count",
                    count_str
                )))
            }
        };

        let fds: Vec<RawFd> = (0..count).map(|i| LISTEN_FDS_START + i as RawFd).collect();
        for &fd in &fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }

        std::env::remove_var("LISTEN_FDS");
        std::env::remove_var("LISTEN_PID");
        Ok(SupervisorEnv { fds })
    }
}
