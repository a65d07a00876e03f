//! io_uring backend (feature `uring`).
//!
//! Poll submissions are oneshot: each registered fd gets a POLL_ADD queued
//! at wait time, and a completed poll leaves the fd unarmed until the next
//! wait re-arms it. Wait timeouts ride the same ring as a TIMEOUT SQE, so
//! a single `submit_and_wait(1)` covers both readiness and the deadline.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use io_uring::{opcode, squeue, types, IoUring};

use evio_core::error::ReactorError;
use evio_core::interest::{Interest, Readiness};

use crate::backend::{EventBackend, PollEvent, Token};
use crate::sock;

// Sentinel user_data values. Live tokens carry a slot index in their low
// 32 bits and slot tables never grow to u32::MAX entries, so these cannot
// collide with a real registration.
const TIMEOUT_DATA: u64 = u64::MAX;
const CANCEL_DATA: u64 = u64::MAX - 1;

fn io_to_backend(e: io::Error) -> ReactorError {
    ReactorError::Backend(e.raw_os_error().unwrap_or(libc::EIO))
}

fn poll_mask(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.is_readable() {
        bits |= libc::POLLIN as u32;
    }
    if interest.is_writable() {
        bits |= libc::POLLOUT as u32;
    }
    bits
}

pub struct UringBackend {
    ring: IoUring,
    registered: HashMap<RawFd, (Token, Interest)>,
    // Both directions of "which poll is in flight", keyed for the two
    // lookups we need: by fd at register time, by user_data at completion.
    armed: HashMap<RawFd, u64>,
    armed_rev: HashMap<u64, RawFd>,
    // Timeout SQEs hold a pointer into this field until completion.
    timeout_ts: types::Timespec,
}

impl UringBackend {
    pub fn new(max_events: usize) -> Result<Self, ReactorError> {
        let entries = max_events.next_power_of_two().clamp(8, 4096) as u32;
        let ring = IoUring::new(entries).map_err(io_to_backend)?;
        Ok(UringBackend {
            ring,
            registered: HashMap::new(),
            armed: HashMap::new(),
            armed_rev: HashMap::new(),
            timeout_ts: types::Timespec::new(),
        })
    }

    fn push_sqe(&mut self, entry: squeue::Entry) -> Result<(), ReactorError> {
        unsafe {
            if self.ring.submission().push(&entry).is_ok() {
                return Ok(());
            }
        }
        // Queue full: flush what we have and retry once.
        self.ring.submit().map_err(io_to_backend)?;
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|_| ReactorError::Backend(libc::ENOSPC))
        }
    }

    fn cancel_inflight(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        if let Some(data) = self.armed.remove(&fd) {
            self.armed_rev.remove(&data);
            let sqe = opcode::AsyncCancel::new(data)
                .build()
                .user_data(CANCEL_DATA);
            self.push_sqe(sqe)?;
        }
        Ok(())
    }
}

impl EventBackend for UringBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<(), ReactorError> {
        // A poll already in flight describes the old token or interest, so
        // it has to go. The usual rearm path never hits this: the previous
        // poll completed, which is why the fd is being re-registered.
        let stale = match (self.armed.get(&fd), self.registered.get(&fd)) {
            (Some(&data), Some(&(old_token, old_interest))) => {
                data != token.0 || old_token != token || old_interest != interest
            }
            (Some(_), None) => true,
            _ => false,
        };
        if stale {
            self.cancel_inflight(fd)?;
        }
        self.registered.insert(fd, (token, interest));
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        self.cancel_inflight(fd)?;
        self.registered.remove(&fd);
        Ok(())
    }

    fn wait(
        &mut self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> Result<usize, ReactorError> {
        events.clear();

        // ── Arm pass: oneshot polls for every watched fd not in flight ──
        let to_arm: Vec<(RawFd, u64, u32)> = self
            .registered
            .iter()
            .filter(|(fd, (_, interest))| !interest.is_empty() && !self.armed.contains_key(fd))
            .map(|(&fd, &(token, interest))| (fd, token.0, poll_mask(interest)))
            .collect();
        for (fd, data, mask) in to_arm {
            let sqe = opcode::PollAdd::new(types::Fd(fd), mask)
                .build()
                .user_data(data);
            self.push_sqe(sqe)?;
            self.armed.insert(fd, data);
            self.armed_rev.insert(data, fd);
        }

        if let Some(d) = timeout {
            self.timeout_ts = types::Timespec::new()
                .sec(d.as_secs())
                .nsec(d.subsec_nanos());
            let ts_ptr = &self.timeout_ts as *const types::Timespec;
            let sqe = opcode::Timeout::new(ts_ptr).build().user_data(TIMEOUT_DATA);
            self.push_sqe(sqe)?;
        }

        // ── Submit and wait ──
        // Completions left over from an interrupted round are consumed
        // first instead of waiting for fresh ones.
        if self.ring.completion().is_empty() {
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
                Err(e) => return Err(io_to_backend(e)),
            }
        } else {
            self.ring.submit().map_err(io_to_backend)?;
        }

        // ── Drain completions ──
        let cqes: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();
        for (data, res) in cqes {
            if data == TIMEOUT_DATA || data == CANCEL_DATA {
                continue;
            }
            if let Some(fd) = self.armed_rev.remove(&data) {
                self.armed.remove(&fd);
            }
            if res == -libc::ECANCELED {
                continue;
            }
            let readiness = if res < 0 {
                Readiness::ERROR
                    .add(Readiness::READABLE)
                    .add(Readiness::WRITABLE)
            } else {
                sock::readiness_from_poll(res as libc::c_short)
            };
            if readiness.is_empty() {
                continue;
            }
            events.push(PollEvent {
                token: Token(data),
                readiness,
            });
        }
        Ok(events.len())
    }

    fn name(&self) -> &'static str {
        "uring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sock::pipe_pair;

    fn write_byte(fd: RawFd) {
        let b = [0x2au8];
        let n = unsafe { libc::write(fd, b.as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);
    }

    #[test]
    fn test_uring_reports_readable_pipe() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = UringBackend::new(16).unwrap();
        backend.register(r, Token(42), Interest::READABLE).unwrap();

        let mut events = Vec::new();
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(10))).unwrap(),
            0
        );

        write_byte(w);
        let n = backend
            .wait(&mut events, Some(Duration::from_millis(1000)))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].token, Token(42));
        assert!(events[0].readiness.is_readable());

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_uring_rearms_after_completion() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = UringBackend::new(16).unwrap();
        backend.register(r, Token(1), Interest::READABLE).unwrap();

        write_byte(w);
        let mut events = Vec::new();
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(1000))).unwrap(),
            1
        );

        // Oneshot completed; the next wait must re-arm and see data again.
        let mut drain = [0u8; 8];
        unsafe {
            libc::read(r, drain.as_mut_ptr() as *mut libc::c_void, drain.len());
        }
        write_byte(w);
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(1000))).unwrap(),
            1
        );

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_uring_deregister_cancels() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = UringBackend::new(16).unwrap();
        backend.register(r, Token(5), Interest::READABLE).unwrap();

        let mut events = Vec::new();
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(10))).unwrap(),
            0
        );
        backend.deregister(r).unwrap();

        write_byte(w);
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(50))).unwrap(),
            0,
            "cancelled poll must not report"
        );

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}
