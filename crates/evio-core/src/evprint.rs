//! Leveled stderr print macros for evio
//!
//! Thread-safe, optionally-flushing diagnostic output. Event loops are
//! latency-sensitive, so level checks are a single atomic load and
//! disabled levels cost no formatting.
//!
//! # Environment Variables
//!
//! - `EVIO_FLUSH_EPRINT=1` - Flush stderr after each print (useful when chasing crashes)
//! - `EVIO_LOG_LEVEL=<level>` - Set log level: 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//!
//! # Usage
//!
//! ```ignore
//! use evio_core::{evprintln, evdebug, evinfo, evwarn, everror};
//!
//! evprintln!("Simple message");
//! evdebug!("fd={} readiness={:?}", fd, readiness);
//! evinfo!("listening on {}", endpoint);
//! evwarn!("slot table at {} of {}", used, cap);
//! everror!("backend wait failed: errno {}", errno);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization (e.g. before dropping privileges).
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    if let Ok(val) = std::env::var("EVIO_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("EVIO_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Check if flush is enabled
#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Set flush mode programmatically
pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

/// Internal: Write and optionally flush
///
/// Uses a lock on stderr to ensure atomic line output.
#[doc(hidden)]
pub fn _evprint_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Internal: Write with newline and optionally flush
#[doc(hidden)]
pub fn _evprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Internal: Leveled print
#[doc(hidden)]
pub fn _evlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to stderr (no newline)
///
/// Like `eprint!` but with optional auto-flush and mutex protection.
#[macro_export]
macro_rules! evprint {
    ($($arg:tt)*) => {{
        $crate::evprint::_evprint_impl(format_args!($($arg)*));
    }};
}

/// Print to stderr with newline
///
/// Like `eprintln!` but with optional auto-flush and mutex protection.
#[macro_export]
macro_rules! evprintln {
    () => {{
        $crate::evprint::_evprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::evprint::_evprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! everror {
    ($($arg:tt)*) => {{
        $crate::evprint::_evlog_impl(
            $crate::evprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! evwarn {
    ($($arg:tt)*) => {{
        $crate::evprint::_evlog_impl(
            $crate::evprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! evinfo {
    ($($arg:tt)*) => {{
        $crate::evprint::_evlog_impl(
            $crate::evprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log
#[macro_export]
macro_rules! evdebug {
    ($($arg:tt)*) => {{
        $crate::evprint::_evlog_impl(
            $crate::evprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! evtrace {
    ($($arg:tt)*) => {{
        $crate::evprint::_evlog_impl(
            $crate::evprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

// ============================================================================
// Tests
// ============================================================================
