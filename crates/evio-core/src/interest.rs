//! Interest and readiness bit sets
//!
//! Plain u8 bit sets rather than a flags crate: two interest bits and
//! three readiness bits are the whole vocabulary, and const fns keep
//! them usable in constant positions.
//!
//! `Interest` is what a registration asks the multiplexer to watch.
//! `Readiness` is what a wait delivered. The error bit only ever
//! appears on `Readiness`; backends fold hangup into readable so that
//! handlers observe EOF through their read path.

use core::fmt;

const READABLE_BIT: u8 = 0b001;
const WRITABLE_BIT: u8 = 0b010;
const ERROR_BIT: u8 = 0b100;

/// What to watch a registered handle for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(READABLE_BIT);
    pub const WRITABLE: Interest = Interest(WRITABLE_BIT);
    pub const BOTH: Interest = Interest(READABLE_BIT | WRITABLE_BIT);

    /// Union of two interest sets
    #[inline]
    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    /// Remove the bits of `other`
    #[inline]
    pub const fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    #[inline]
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.0 & READABLE_BIT != 0
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE_BIT != 0
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "r+w"),
            (true, false) => write!(f, "r"),
            (false, true) => write!(f, "w"),
            (false, false) => write!(f, "-"),
        }
    }
}

/// What a multiplexer wait observed on a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Readiness(u8);

impl Readiness {
    pub const NONE: Readiness = Readiness(0);
    pub const READABLE: Readiness = Readiness(READABLE_BIT);
    pub const WRITABLE: Readiness = Readiness(WRITABLE_BIT);
    pub const ERROR: Readiness = Readiness(ERROR_BIT);

    /// Union of two readiness sets
    #[inline]
    pub const fn add(self, other: Readiness) -> Readiness {
        Readiness(self.0 | other.0)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.0 & READABLE_BIT != 0
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE_BIT != 0
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    /// True when any bit relevant to the given interest is set
    #[inline]
    pub const fn intersects_interest(self, interest: Interest) -> bool {
        (interest.is_readable() && self.is_readable())
            || (interest.is_writable() && self.is_writable())
            || self.is_error()
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        if self.is_readable() {
            write!(f, "r")?;
        }
        if self.is_writable() {
            write!(f, "w")?;
        }
        if self.is_error() {
            write!(f, "e")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_algebra() {
        let i = Interest::READABLE.add(Interest::WRITABLE);
        assert_eq!(i, Interest::BOTH);
        assert!(i.contains(Interest::READABLE));
        assert!(i.contains(Interest::WRITABLE));

        let r = i.remove(Interest::WRITABLE);
        assert_eq!(r, Interest::READABLE);
        assert!(!r.is_writable());
        assert!(Interest::NONE.is_empty());
    }

    #[test]
    fn test_contains_is_subset() {
        assert!(Interest::BOTH.contains(Interest::READABLE));
        assert!(!Interest::READABLE.contains(Interest::BOTH));
        // Every set contains the empty set
        assert!(Interest::NONE.contains(Interest::NONE));
        assert!(Interest::READABLE.contains(Interest::NONE));
    }

    #[test]
    fn test_readiness_bits() {
        let r = Readiness::READABLE.add(Readiness::ERROR);
        assert!(r.is_readable());
        assert!(r.is_error());
        assert!(!r.is_writable());
    }

    #[test]
    fn test_intersects_interest() {
        let r = Readiness::WRITABLE;
        assert!(r.intersects_interest(Interest::WRITABLE));
        assert!(!r.intersects_interest(Interest::READABLE));
        // Error readiness is always relevant
        assert!(Readiness::ERROR.intersects_interest(Interest::READABLE));
    }

    #[test]
    fn test_display() {
        assert_eq!(Interest::BOTH.to_string(), "r+w");
        assert_eq!(Interest::NONE.to_string(), "-");
        assert_eq!(Readiness::READABLE.add(Readiness::ERROR).to_string(), "re");
    }
}
