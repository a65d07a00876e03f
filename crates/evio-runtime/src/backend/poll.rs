//! poll(2) backend. Portable fallback, rebuilds its pollfd array per wait.

use std::os::unix::io::RawFd;
use std::time::Duration;

use evio_core::error::ReactorError;
use evio_core::interest::Interest;

use crate::backend::{EventBackend, PollEvent, Token};
use crate::sock;

struct Entry {
    fd: RawFd,
    token: Token,
    interest: Interest,
}

/// Registration list plus scratch space for the kernel call.
///
/// Every `wait` walks the registrations, so this backend is O(n) in watched
/// descriptors. It exists for platforms without epoll/kqueue and as the
/// fallback when a requested backend is unavailable. Everything ready is
/// reported in a single pass; there is no batching cap.
pub struct PollBackend {
    entries: Vec<Entry>,
    scratch: Vec<libc::pollfd>,
    scratch_tokens: Vec<Token>,
}

impl PollBackend {
    pub fn new() -> Self {
        PollBackend {
            entries: Vec::new(),
            scratch: Vec::new(),
            scratch_tokens: Vec::new(),
        }
    }

    #[cfg(test)]
    fn registered_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for PollBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBackend for PollBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<(), ReactorError> {
        for e in self.entries.iter_mut() {
            if e.fd == fd {
                e.token = token;
                e.interest = interest;
                return Ok(());
            }
        }
        self.entries.push(Entry { fd, token, interest });
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        self.entries.retain(|e| e.fd != fd);
        Ok(())
    }

    fn wait(
        &mut self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> Result<usize, ReactorError> {
        events.clear();
        self.scratch.clear();
        self.scratch_tokens.clear();

        // Parked entries (empty interest) stay out of the kernel set, else
        // poll would still wake us for their HUP/ERR conditions.
        for e in &self.entries {
            if e.interest.is_empty() {
                continue;
            }
            self.scratch.push(libc::pollfd {
                fd: e.fd,
                events: sock::poll_events_for(e.interest),
                revents: 0,
            });
            self.scratch_tokens.push(e.token);
        }

        let ms = match timeout {
            Some(d) => sock::timeout_ms(d),
            None => -1,
        };

        let rc = unsafe {
            libc::poll(
                self.scratch.as_mut_ptr(),
                self.scratch.len() as libc::nfds_t,
                ms,
            )
        };
        if rc < 0 {
            let errno = sock::last_errno();
            if errno == libc::EINTR {
                return Ok(0);
            }
            return Err(ReactorError::Backend(errno));
        }
        if rc == 0 {
            return Ok(0);
        }

        for (pfd, token) in self.scratch.iter().zip(self.scratch_tokens.iter()) {
            if pfd.revents == 0 {
                continue;
            }
            events.push(PollEvent {
                token: *token,
                readiness: sock::readiness_from_poll(pfd.revents),
            });
        }
        Ok(events.len())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
