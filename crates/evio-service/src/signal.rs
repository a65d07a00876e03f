//! Async-signal-safe stop plumbing
//!
//! SIGTERM and SIGINT must end the dispatch loop without tearing
//! through it. The handler is allowed exactly three things: an atomic
//! load, a lock-free queue push and a `write(2)` to the wake pipe.
//! Everything else (draining the queue, stopping the reactor) happens
//! on the dispatch thread when the wake byte makes the pipe readable.
//!
//! The same wake path serves [`StopHandle`], so another thread can end
//! the loop without raising a signal.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::OnceLock;

use crossbeam_queue::ArrayQueue;
use evio_core::error::ServiceError;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

const SIGNAL_QUEUE_CAP: usize = 32;

static PENDING: OnceLock<ArrayQueue<i32>> = OnceLock::new();
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static STOP: AtomicBool = AtomicBool::new(false);
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(sig: libc::c_int) {
    if let Some(q) = PENDING.get() {
        // A full queue drops the signal; the stop flag still latches
        // once the queue is drained.
        let _ = q.push(sig);
    }
    wake();
}

fn wake() {
    let fd = WAKE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte: u8 = 1;
        unsafe {
            let _ = libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Install the SIGTERM/SIGINT handlers and ignore SIGPIPE.
///
/// Installing twice is a no-op.
pub fn install() -> Result<(), ServiceError> {
    PENDING.get_or_init(|| ArrayQueue::new(SIGNAL_QUEUE_CAP));
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(()); // Already installed
    }

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGTERM, Signal::SIGINT] {
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| ServiceError::Signal(format!("sigaction({}): {}", sig, e)))?;
    }

    // Writes to a peer that went away must surface as EPIPE, not kill
    // the process.
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGPIPE, &ignore) }
        .map_err(|e| ServiceError::Signal(format!("sigaction(SIGPIPE): {}", e)))?;
    Ok(())
}

/// Pop one queued signal number, oldest first.
pub fn next_pending() -> Option<i32> {
    PENDING.get().and_then(|q| q.pop())
}

/// Ask the dispatch loop to finish its round and return.
pub fn request_stop() {
    STOP.store(true, Ordering::SeqCst);
    wake();
}

/// Whether a stop was requested.
pub fn stop_requested() -> bool {
    STOP.load(Ordering::SeqCst)
}

/// The runner owns the stop flag; it clears stale requests when it
/// takes the process slot.
pub(crate) fn reset_stop() {
    STOP.store(false, Ordering::SeqCst);
}

pub(crate) fn set_wake_fd(fd: i32) {
    WAKE_FD.store(fd, Ordering::Release);
}

pub(crate) fn clear_wake_fd() {
    WAKE_FD.store(-1, Ordering::Release);
}

/// Cross-thread stop trigger.
///
/// Cloneable and sendable; `stop()` wakes the dispatch loop through the
/// same pipe the signal handler uses. Once the loop has returned (or
/// before it starts) the call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(());

impl StopHandle {
    pub fn new() -> Self {
        StopHandle(())
    }

    pub fn stop(&self) {
        request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        install().unwrap();
        install().unwrap();
    }
}
