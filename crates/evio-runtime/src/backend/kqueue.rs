//! kqueue backend for macOS and the BSDs.
//!
//! kqueue registers read and write as separate filters, so interest
//! changes are applied as a diff against what the kernel already holds.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use evio_core::error::ReactorError;
use evio_core::interest::{Interest, Readiness};

use crate::backend::{EventBackend, PollEvent, Token};
use crate::sock;

pub struct KqueueBackend {
    kq: RawFd,
    registered: HashMap<RawFd, (Token, Interest)>,
    scratch: Vec<libc::kevent>,
}

impl KqueueBackend {
    pub fn new(max_events: usize) -> Result<Self, ReactorError> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(ReactorError::Backend(sock::last_errno()));
        }
        unsafe {
            libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC);
        }
        let cap = max_events.max(1);
        let scratch = (0..cap).map(|_| unsafe { std::mem::zeroed() }).collect();
        Ok(KqueueBackend {
            kq,
            registered: HashMap::new(),
            scratch,
        })
    }

    fn change(&self, fd: RawFd, filter: i16, flags: u16, token: u64) -> Result<(), i32> {
        let ev = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter: filter as _,
            flags: flags as _,
            fflags: 0,
            data: 0,
            udata: token as _,
        };
        let rc = unsafe {
            libc::kevent(self.kq, &ev, 1, std::ptr::null_mut(), 0, std::ptr::null())
        };
        if rc < 0 {
            Err(sock::last_errno())
        } else {
            Ok(())
        }
    }

    fn add_filter(&self, fd: RawFd, filter: i16, token: Token) -> Result<(), ReactorError> {
        // Re-adding an existing filter updates its udata, so this doubles
        // as the token-rewrite path.
        self.change(fd, filter, libc::EV_ADD | libc::EV_ENABLE, token.0)
            .map_err(ReactorError::Backend)
    }

    fn del_filter(&self, fd: RawFd, filter: i16) {
        // ENOENT / EBADF just mean the filter or fd is already gone.
        let _ = self.change(fd, filter, libc::EV_DELETE, 0);
    }
}

impl EventBackend for KqueueBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<(), ReactorError> {
        let old = self
            .registered
            .get(&fd)
            .map(|(_, i)| *i)
            .unwrap_or(Interest::NONE);

        if interest.is_readable() {
            self.add_filter(fd, libc::EVFILT_READ as i16, token)?;
        } else if old.is_readable() {
            self.del_filter(fd, libc::EVFILT_READ as i16);
        }

        if interest.is_writable() {
            self.add_filter(fd, libc::EVFILT_WRITE as i16, token)?;
        } else if old.is_writable() {
            self.del_filter(fd, libc::EVFILT_WRITE as i16);
        }

        self.registered.insert(fd, (token, interest));
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        if let Some((_, interest)) = self.registered.remove(&fd) {
            if interest.is_readable() {
                self.del_filter(fd, libc::EVFILT_READ as i16);
            }
            if interest.is_writable() {
                self.del_filter(fd, libc::EVFILT_WRITE as i16);
            }
        }
        Ok(())
    }

    fn wait(
        &mut self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> Result<usize, ReactorError> {
        events.clear();

        let ts;
        let ts_ptr = match timeout {
            Some(d) => {
                ts = libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as libc::c_long,
                };
                &ts as *const libc::timespec
            }
            None => std::ptr::null(),
        };

        let rc = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                self.scratch.as_mut_ptr(),
                self.scratch.len() as libc::c_int,
                ts_ptr,
            )
        };
        if rc < 0 {
            let errno = sock::last_errno();
            if errno == libc::EINTR {
                return Ok(0);
            }
            return Err(ReactorError::Backend(errno));
        }

        for ev in self.scratch.iter().take(rc as usize) {
            let token = Token(ev.udata as u64);
            let mut readiness = Readiness::NONE;
            if ev.flags & libc::EV_ERROR != 0 {
                readiness = readiness
                    .add(Readiness::ERROR)
                    .add(Readiness::READABLE)
                    .add(Readiness::WRITABLE);
            } else if ev.filter == libc::EVFILT_READ as _ {
                // EV_EOF folds into readable; the read path observes EOF.
                readiness = readiness.add(Readiness::READABLE);
            } else if ev.filter == libc::EVFILT_WRITE as _ {
                readiness = readiness.add(Readiness::WRITABLE);
            }
            if readiness.is_empty() {
                continue;
            }
            events.push(PollEvent { token, readiness });
        }
        Ok(events.len())
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
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
    fn test_kqueue_reports_readable_pipe() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = KqueueBackend::new(16).unwrap();
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
    fn test_kqueue_interest_diff_drops_filter() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = KqueueBackend::new(16).unwrap();
        backend.register(r, Token(1), Interest::READABLE).unwrap();
        write_byte(w);

        backend.register(r, Token(1), Interest::NONE).unwrap();
        let mut events = Vec::new();
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(10))).unwrap(),
            0,
            "dropped filter must not report"
        );

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_kqueue_deregister_after_close_is_ok() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = KqueueBackend::new(16).unwrap();
        backend.register(r, Token(3), Interest::READABLE).unwrap();
        unsafe {
            libc::close(r);
            libc::close(w);
        }
        backend.deregister(r).unwrap();
    }
}
