//! # evio-service
//!
//! Service lifecycle template for evio reactors:
//! - Standalone mode: bind an address and serve (`run_alone`)
//! - Supervised mode: adopt `LISTEN_FDS` sockets from a supervising
//!   daemon and serve (`run_daemon`)
//! - Lifecycle hooks: `pre_jail`, `post_init`, `pre_exit`
//! - Privilege drop to an unprivileged user when started as root
//! - SIGTERM/SIGINT stop via an async-signal-safe queue and wake pipe
//!
//! One runner per process: the template owns the process's reactor and
//! refuses a second claim.

pub mod config;
pub mod signal;
pub mod template;

pub use config::{ServiceConfig, SupervisorEnv, LISTEN_FDS_START};
pub use signal::StopHandle;
pub use template::{RunMode, Service, ServiceRunner};

pub use evio_core::error::ServiceError;

#[cfg(not(unix))]
compile_error!("evio-service requires a unix platform");
