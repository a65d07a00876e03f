//! Reactor configuration

use evio_core::constants::{DEFAULT_ACCEPT_BATCH, DEFAULT_MAX_EVENTS, DEFAULT_MAX_STREAMS};
use evio_core::env::{env_get, env_get_opt};
use evio_core::error::ConfigError;
use evio_core::evinfo;

use crate::backend::BackendKind;

/// Configuration for a [`Reactor`](crate::reactor::Reactor).
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Multiplexer implementation to drive dispatch with
    pub backend: BackendKind,

    /// Maximum concurrently registered streams and listeners
    pub max_streams: usize,

    /// Readiness reports consumed per wait round
    pub max_events: usize,

    /// Connections accepted from one listener per readiness event
    pub accept_batch: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default_for_platform(),
            max_streams: DEFAULT_MAX_STREAMS,
            max_events: DEFAULT_MAX_EVENTS,
            accept_batch: DEFAULT_ACCEPT_BATCH,
        }
    }
}

impl ReactorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `EVIO_BACKEND`, `EVIO_MAX_STREAMS`,
    /// `EVIO_MAX_EVENTS` and `EVIO_ACCEPT_BATCH`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            backend: env_get_opt("EVIO_BACKEND").unwrap_or(d.backend),
            max_streams: env_get("EVIO_MAX_STREAMS", d.max_streams),
            max_events: env_get("EVIO_MAX_EVENTS", d.max_events),
            accept_batch: env_get("EVIO_ACCEPT_BATCH", d.accept_batch),
        }
    }

    /// Set the multiplexer backend
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Set the registration capacity
    pub fn max_streams(mut self, n: usize) -> Self {
        self.max_streams = n;
        self
    }

    /// Set the per-wait event batch size
    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    /// Set how many accepts one readiness event may drain
    pub fn accept_batch(mut self, n: usize) -> Self {
        self.accept_batch = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_streams == 0 {
            return Err(ConfigError::InvalidValue("max_streams must be at least 1"));
        }
        // Slot indexes are packed into 32 bits of the readiness token.
        if self.max_streams >= u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_streams exceeds slot index width"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::InvalidValue("max_events must be at least 1"));
        }
        if self.accept_batch == 0 {
            return Err(ConfigError::InvalidValue("accept_batch must be at least 1"));
        }
        Ok(())
    }

    pub fn print(&self) {
        evinfo!("reactor config:");
        evinfo!("  backend       : {}", self.backend);
        evinfo!("  max_streams   : {}", self.max_streams);
        evinfo!("  max_events    : {}", self.max_events);
        evinfo!("  accept_batch  : {}", self.accept_batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = ReactorConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.backend.available());
    }

    #[test]
    fn test_builders() {
        let cfg = ReactorConfig::new()
            .backend(BackendKind::Poll)
            .max_streams(32)
            .max_events(8)
            .accept_batch(4);
        assert_eq!(cfg.backend, BackendKind::Poll);
        assert_eq!(cfg.max_streams, 32);
        assert_eq!(cfg.max_events, 8);
        assert_eq!(cfg.accept_batch, 4);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        assert!(ReactorConfig::new().max_streams(0).validate().is_err());
        assert!(ReactorConfig::new().max_events(0).validate().is_err());
        assert!(ReactorConfig::new().accept_batch(0).validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        // Single test body touches the real variable names, so there is
        // no cross-test env race inside this binary.
        std::env::set_var("EVIO_BACKEND", "poll");
        std::env::set_var("EVIO_MAX_STREAMS", "128");
        std::env::set_var("EVIO_ACCEPT_BATCH", "2");

        let cfg = ReactorConfig::from_env();
        assert_eq!(cfg.backend, BackendKind::Poll);
        assert_eq!(cfg.max_streams, 128);
        assert_eq!(cfg.max_events, DEFAULT_MAX_EVENTS);
        assert_eq!(cfg.accept_batch, 2);

        std::env::remove_var("EVIO_BACKEND");
        std::env::remove_var("EVIO_MAX_STREAMS");
        std::env::remove_var("EVIO_ACCEPT_BATCH");
    }
}
