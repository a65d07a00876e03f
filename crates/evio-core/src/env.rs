//! Environment variable utilities
//!
//! Generic `env_get<T>` parsing with defaults, used by the `EVIO_*`
//! configuration surface.
//!
//! # Usage
//!
//! ```ignore
//! use evio_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let bufsize: usize = env_get("EVIO_BUFFER_SIZE", 8192);
//! let backlog: u32 = env_get("EVIO_BACKLOG", 128);
//! let flush: bool = env_get_bool("EVIO_FLUSH_EPRINT", false);
//!
//! // Millisecond knobs where 0 or unset means "no timeout"
//! let rw_timeout = env_get_ms("EVIO_RW_TIMEOUT_MS");
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Works with any type that implements `FromStr`. Unset or unparsable
/// values fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Everything else when set is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` if the variable is set and parses successfully,
/// `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Get a millisecond knob as a `Duration`
///
/// Unset, unparsable, or `0` all mean "disabled" and return `None`.
/// Timeout fields throughout the runtime use this convention.
#[inline]
pub fn env_get_ms(key: &str) -> Option<Duration> {
    match env_get_opt::<u64>(key) {
        Some(0) | None => None,
        Some(ms) => Some(Duration::from_millis(ms)),
    }
}

/// Get environment variable as string, or return default
///
/// Convenience wrapper that doesn't require `FromStr`.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__EVIO_TEST_UNSET__", 8192);
        assert_eq!(val, 8192);
    }

    #[test]
    fn test_env_get_set_and_invalid() {
        std::env::set_var("__EVIO_TEST_NUM__", "4096");
        let val: usize = env_get("__EVIO_TEST_NUM__", 0);
        assert_eq!(val, 4096);

        std::env::set_var("__EVIO_TEST_NUM__", "not_a_number");
        let val: usize = env_get("__EVIO_TEST_NUM__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__EVIO_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        assert!(env_get_bool("__EVIO_TEST_UNSET__", true));
        assert!(!env_get_bool("__EVIO_TEST_UNSET__", false));

        for truthy in ["1", "true", "YES", "on"] {
            std::env::set_var("__EVIO_TEST_BOOL__", truthy);
            assert!(env_get_bool("__EVIO_TEST_BOOL__", false), "{}", truthy);
        }
        for falsy in ["0", "false", "off", "garbage"] {
            std::env::set_var("__EVIO_TEST_BOOL__", falsy);
            assert!(!env_get_bool("__EVIO_TEST_BOOL__", true), "{}", falsy);
        }
        std::env::remove_var("__EVIO_TEST_BOOL__");
    }

    #[test]
    fn test_env_get_opt() {
        let val: Option<u16> = env_get_opt("__EVIO_TEST_UNSET__");
        assert!(val.is_none());

        std::env::set_var("__EVIO_TEST_OPT__", "7070");
        assert_eq!(env_get_opt::<u16>("__EVIO_TEST_OPT__"), Some(7070));
        std::env::remove_var("__EVIO_TEST_OPT__");
    }

    #[test]
    fn test_env_get_ms_zero_is_disabled() {
        assert_eq!(env_get_ms("__EVIO_TEST_UNSET__"), None);

        std::env::set_var("__EVIO_TEST_MS__", "0");
        assert_eq!(env_get_ms("__EVIO_TEST_MS__"), None);

        std::env::set_var("__EVIO_TEST_MS__", "1500");
        assert_eq!(env_get_ms("__EVIO_TEST_MS__"), Some(Duration::from_millis(1500)));
        std::env::remove_var("__EVIO_TEST_MS__");
    }

    #[test]
    fn test_env_get_str_and_is_set() {
        assert_eq!(env_get_str("__EVIO_TEST_UNSET__", "fallback"), "fallback");
        assert!(!env_is_set("__EVIO_TEST_UNSET__"));
        // PATH should always be set
        assert!(env_is_set("PATH"));
    }
}
