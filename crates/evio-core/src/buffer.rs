//! Linear byte buffer with read/write cursors
//!
//! Backing store for stream buffering: the read side fills the spare
//! tail from the transport and consumers drain from the front. Capacity
//! is fixed at construction; the buffer never grows behind the
//! configured size.
//!
//! Cursor layout:
//!
//! ```text
//!   0 ........ rpos ........ wpos ........ capacity
//!   consumed   |  unread     |   spare     |
//! ```

use crate::constants::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Fixed-capacity byte buffer with consume/fill cursors
#[derive(Debug)]
pub struct IoBuffer {
    data: Vec<u8>,
    rpos: usize,
    wpos: usize,
}

impl IoBuffer {
    /// Create a buffer with the given capacity, clamped to the minimum
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(MIN_BUFFER_SIZE);
        IoBuffer {
            data: vec![0u8; cap],
            rpos: 0,
            wpos: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Unread bytes currently held
    #[inline]
    pub fn len(&self) -> usize {
        self.wpos - self.rpos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rpos == self.wpos
    }

    /// Total room left (spare tail plus consumed head)
    #[inline]
    pub fn room(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Drop all content and reset both cursors
    #[inline]
    pub fn clear(&mut self) {
        self.rpos = 0;
        self.wpos = 0;
    }

    /// Writable tail for a fill; commit with [`IoBuffer::commit`]
    #[inline]
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.data[self.wpos..]
    }

    /// Record `n` bytes written into the spare tail
    #[inline]
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.wpos + n <= self.data.len());
        self.wpos += n;
    }

    /// Unread content
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.data[self.rpos..self.wpos]
    }

    /// Mark `n` unread bytes as consumed
    #[inline]
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.rpos += n;
        if self.rpos == self.wpos {
            // Empty: reset so the whole capacity is spare again
            self.clear();
        }
    }

    /// Copy as much unread content as fits into `out`, consuming it.
    /// Returns the number of bytes copied.
    pub fn drain_to(&mut self, out: &mut [u8]) -> usize {
        let n = self.len().min(out.len());
        out[..n].copy_from_slice(&self.data[self.rpos..self.rpos + n]);
        self.consume(n);
        n
    }

    /// Move unread content to the front, making the consumed head
    /// available as spare tail again
    pub fn compact(&mut self) {
        if self.rpos == 0 {
            return;
        }
        let len = self.len();
        self.data.copy_within(self.rpos..self.wpos, 0);
        self.rpos = 0;
        self.wpos = len;
    }

    /// Append bytes, compacting first when the tail alone is too small.
    /// Returns the number of bytes that fit.
    pub fn push(&mut self, src: &[u8]) -> usize {
        if self.data.len() - self.wpos < src.len() {
            self.compact();
        }
        let n = (self.data.len() - self.wpos).min(src.len());
        self.data[self.wpos..self.wpos + n].copy_from_slice(&src[..n]);
        self.wpos += n;
        n
    }

    /// Offset of `byte` within the unread content, if present
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        self.peek().iter().position(|&b| b == byte)
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        IoBuffer::with_capacity(DEFAULT_BUFFER_SIZE)
    }
}
