//! Linux epoll backend, level-triggered.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use evio_core::error::ReactorError;
use evio_core::interest::{Interest, Readiness};

use crate::backend::{EventBackend, PollEvent, Token};
use crate::sock;

fn epoll_mask(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

fn epoll_readiness(bits: u32) -> Readiness {
    let mut r = Readiness::NONE;
    if bits & (libc::EPOLLIN as u32 | libc::EPOLLPRI as u32) != 0 {
        r = r.add(Readiness::READABLE);
    }
    if bits & libc::EPOLLOUT as u32 != 0 {
        r = r.add(Readiness::WRITABLE);
    }
    // Peer hang-up surfaces as readable so the owner reads through to EOF.
    if bits & libc::EPOLLHUP as u32 != 0 {
        r = r.add(Readiness::READABLE);
    }
    // Hard errors wake both directions; the next syscall reports the errno.
    if bits & libc::EPOLLERR as u32 != 0 {
        r = r.add(Readiness::ERROR).add(Readiness::READABLE).add(Readiness::WRITABLE);
    }
    r
}

/// Kernel-side interest set. One epoll fd per backend instance.
///
/// Parked registrations (empty interest) are removed from the kernel set
/// entirely, because epoll reports HUP and ERR even for a zero event mask.
/// The map below remembers them so a later re-register knows whether the
/// kernel still holds the fd.
pub struct EpollBackend {
    epfd: RawFd,
    registered: HashMap<RawFd, (Token, Interest)>,
    scratch: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new(max_events: usize) -> Result<Self, ReactorError> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(ReactorError::Backend(sock::last_errno()));
        }
        let cap = max_events.max(1);
        Ok(EpollBackend {
            epfd,
            registered: HashMap::new(),
            scratch: vec![libc::epoll_event { events: 0, u64: 0 }; cap],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mut ev: libc::epoll_event) -> Result<(), i32> {
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            Err(sock::last_errno())
        } else {
            Ok(())
        }
    }

    fn kernel_del(&self, fd: RawFd) {
        // The kernel drops closed fds on its own, so ENOENT/EBADF here
        // just means we lost that race.
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        let _ = rc;
    }
}

impl EventBackend for EpollBackend {
    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<(), ReactorError> {
        let in_kernel = matches!(self.registered.get(&fd), Some((_, i)) if !i.is_empty());

        if interest.is_empty() {
            if in_kernel {
                self.kernel_del(fd);
            }
            self.registered.insert(fd, (token, interest));
            return Ok(());
        }

        let ev = libc::epoll_event {
            events: epoll_mask(interest),
            u64: token.0,
        };
        let op = if in_kernel { libc::EPOLL_CTL_MOD } else { libc::EPOLL_CTL_ADD };
        if let Err(errno) = self.ctl(op, fd, ev) {
            // Our map can drift from the kernel when an fd number was
            // closed and reused behind our back. Retry with the other op.
            let retry = match errno {
                libc::EEXIST => libc::EPOLL_CTL_MOD,
                libc::ENOENT => libc::EPOLL_CTL_ADD,
                _ => return Err(ReactorError::Backend(errno)),
            };
            self.ctl(retry, fd, ev).map_err(ReactorError::Backend)?;
        }
        self.registered.insert(fd, (token, interest));
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        if let Some((_, interest)) = self.registered.remove(&fd) {
            if !interest.is_empty() {
                self.kernel_del(fd);
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
        let ms = match timeout {
            Some(d) => sock::timeout_ms(d),
            None => -1,
        };

        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.scratch.as_mut_ptr(),
                self.scratch.len() as libc::c_int,
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

        for ev in self.scratch.iter().take(rc as usize) {
            let bits = ev.events;
            let token = ev.u64;
            events.push(PollEvent {
                token: Token(token),
                readiness: epoll_readiness(bits),
            });
        }
        Ok(events.len())
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
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
    fn test_epoll_reports_readable_pipe() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
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
    fn test_epoll_upsert_changes_token_and_interest() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
        backend.register(w, Token(1), Interest::READABLE).unwrap();
        backend.register(w, Token(2), Interest::WRITABLE).unwrap();

        let mut events = Vec::new();
        let n = backend
            .wait(&mut events, Some(Duration::from_millis(1000)))
            .unwrap();
        assert_eq!(n, 1, "empty pipe is writable");
        assert_eq!(events[0].token, Token(2));
        assert!(events[0].readiness.is_writable());

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_epoll_parked_entry_stays_silent() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
        backend.register(r, Token(5), Interest::READABLE).unwrap();
        write_byte(w);

        backend.register(r, Token(5), Interest::NONE).unwrap();
        let mut events = Vec::new();
        assert_eq!(
            backend.wait(&mut events, Some(Duration::from_millis(10))).unwrap(),
            0
        );

        backend.register(r, Token(5), Interest::READABLE).unwrap();
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
    fn test_epoll_deregister_after_close_is_ok() {
        let (r, w) = pipe_pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
        backend.register(r, Token(3), Interest::READABLE).unwrap();
        unsafe {
            libc::close(r);
            libc::close(w);
        }
        backend.deregister(r).unwrap();
    }
}
