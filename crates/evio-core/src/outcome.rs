//! I/O operation outcomes
//!
//! Every stream read/write resolves to one of four non-fault outcomes.
//! Faults (bad fd, errno from the kernel) travel separately as
//! `TransportError`; an `IoOutcome` is always a legitimate answer.

/// Outcome of a read, write or flush on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// Bytes moved (may be fewer than requested)
    Transferred(usize),

    /// No progress possible right now (non-blocking mode)
    WouldBlock,

    /// Configured timeout elapsed before progress (blocking mode)
    TimedOut,

    /// Peer closed; no further bytes will move in this direction
    Closed,
}

impl IoOutcome {
    /// Bytes transferred, if any were
    #[inline]
    pub const fn transferred(&self) -> Option<usize> {
        match self {
            IoOutcome::Transferred(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_would_block(&self) -> bool {
        matches!(self, IoOutcome::WouldBlock)
    }

    #[inline]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, IoOutcome::TimedOut)
    }

    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, IoOutcome::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transferred_accessor() {
        assert_eq!(IoOutcome::Transferred(5).transferred(), Some(5));
        assert_eq!(IoOutcome::WouldBlock.transferred(), None);
        assert_eq!(IoOutcome::Closed.transferred(), None);
    }

    #[test]
    fn test_predicates() {
        assert!(IoOutcome::WouldBlock.is_would_block());
        assert!(IoOutcome::TimedOut.is_timed_out());
        assert!(IoOutcome::Closed.is_closed());
        assert!(!IoOutcome::Transferred(0).is_closed());
    }
}
