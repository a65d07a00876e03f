//! Service lifecycle template
//!
//! A [`ServiceRunner`] wires one reactor, its listeners and the
//! stop plumbing into a process lifecycle:
//! 1. Claim the process slot (one runner per process, ever)
//! 2. Acquire listeners: bind an address (standalone) or adopt
//!    supervisor-inherited fds (supervised)
//! 3. Run the `pre_jail` hook, then drop privileges if configured
//! 4. Build the reactor, register the wake pipe and signal handlers,
//!    run the `post_init` hook
//! 5. Dispatch until a signal or [`StopHandle`](crate::signal::StopHandle)
//!    requests stop
//! 6. Run the `pre_exit` hook and release the reactor
//!
//! The [`Service`] trait is the sole extension point; the template owns
//! everything else.

use std::cell::RefCell;
use std::fmt;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use evio_core::error::ServiceError;
use evio_core::{evdebug, evinfo, evwarn, Endpoint, Interest, IoOutcome};
use evio_runtime::{
    AcceptHandler, Action, BlockMode, Listener, Reactor, Stream, StreamHandler, StreamId,
    StreamKind,
};
use nix::fcntl::OFlag;
use nix::unistd::{pipe2, User};

use crate::config::{ServiceConfig, SupervisorEnv};
use crate::signal::{self, StopHandle};

/// Read buffer for draining wake bytes; they carry no payload.
const WAKE_BUF: usize = 128;

// ===== Service trait =====

/// What a concrete service plugs into the template.
///
/// Only `on_accept` is mandatory. The lifecycle hooks default to
/// success; `pre_jail` and `post_init` failures abort startup while a
/// `pre_exit` failure is logged and swallowed (the process is leaving
/// anyway).
pub trait Service {
    /// A connection arrived; ownership of the stream transfers here.
    /// Return `false` to pause accepting on the listener that produced
    /// it (resume later with [`Reactor::resume_accept`]).
    fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool;

    /// Offer a used stream for in-place accept recycling.
    fn supply_reuse(&mut self) -> Option<Stream> {
        None
    }

    /// A listener is bound and about to start accepting. Reports the
    /// resolved endpoint, so an ephemeral `:0` bind shows its real port.
    fn on_listen(&mut self, endpoint: &Endpoint) {
        let _ = endpoint;
    }

    /// Runs before privileges drop, while the process still has its
    /// starting identity.
    fn pre_jail(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Runs once the reactor and listeners exist, right before the
    /// dispatch loop.
    fn post_init(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Runs after the dispatch loop, before the reactor tears down.
    fn pre_exit(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// How the runner came by its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Bound its own listener from an address string.
    Standalone,
    /// Adopted listeners inherited from a supervising daemon.
    Supervised,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Standalone => write!(f, "standalone"),
            RunMode::Supervised => write!(f, "supervised"),
        }
    }
}

// ===== Process slot =====

static RUNNING: AtomicBool = AtomicBool::new(false);

/// One runner per process, ever. The slot is claimed before any other
/// startup work and never released, so a failed start still refuses a
/// second attempt.
fn claim_process_slot() -> Result<(), ServiceError> {
    if RUNNING.swap(true, Ordering::SeqCst) {
        return Err(ServiceError::AlreadyRunning);
    }
    Ok(())
}

// ===== Reactor-side adapters =====

/// Drains the wake pipe and turns queued signals into a stop request.
struct WakePipe;

impl StreamHandler for WakePipe {
    fn on_readable(&mut self, rt: &mut Reactor, _id: StreamId, stream: &mut Stream) -> Action {
        let mut sink = [0u8; WAKE_BUF];
        while let Ok(IoOutcome::Transferred(_)) = stream.read(&mut sink) {}

        while let Some(sig) = signal::next_pending() {
            match sig {
                libc::SIGTERM | libc::SIGINT => {
                    evinfo!("signal {} received, stopping", sig);
                    signal::request_stop();
                }
                other => evdebug!("ignoring signal {}", other),
            }
        }
        if signal::stop_requested() {
            rt.stop();
        }
        Action::Rearm(Interest::READABLE)
    }
}

/// Routes listener callbacks to the shared service.
struct ServiceListener<S: Service> {
    service: Rc<RefCell<S>>,
}

impl<S: Service> AcceptHandler for ServiceListener<S> {
    fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool {
        self.service.borrow_mut().on_accept(rt, stream)
    }

    fn supply_reuse(&mut self) -> Option<Stream> {
        self.service.borrow_mut().supply_reuse()
    }
}

/// Owns the wake pipe's write end for the duration of a run. The read
/// end lives inside the reactor as a registered stream.
struct WakeGuard {
    wfd: RawFd,
}

impl WakeGuard {
    fn new(reactor: &mut Reactor) -> Result<WakeGuard, ServiceError> {
        let (r, w) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
            .map_err(|e| ServiceError::Signal(format!("wake pipe: {}", e)))?;
        let rfd = r.into_raw_fd();
        let wfd = w.into_raw_fd();

        // from_fd closes rfd itself on failure.
        let wake = match Stream::from_fd(rfd, StreamKind::Pipe, BlockMode::NonBlocking, WAKE_BUF, None)
        {
            Ok(s) => s,
            Err(e) => {
                unsafe {
                    libc::close(wfd);
                }
                return Err(ServiceError::Signal(format!("wake stream: {}", e)));
            }
        };
        if let Err(e) = reactor.register(wake, Interest::READABLE, WakePipe) {
            unsafe {
                libc::close(wfd);
            }
            return Err(ServiceError::Reactor(e));
        }
        signal::set_wake_fd(wfd);
        Ok(WakeGuard { wfd })
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        signal::clear_wake_fd();
        unsafe {
            libc::close(self.wfd);
        }
    }
}

// ===== Runner =====

/// Builds and drives the process's one reactor around a [`Service`].
pub struct ServiceRunner {
    config: ServiceConfig,
}

impl ServiceRunner {
    pub fn new(config: ServiceConfig) -> ServiceRunner {
        ServiceRunner { config }
    }

    /// Runner configured from `EVIO_*` environment variables.
    pub fn from_env() -> ServiceRunner {
        ServiceRunner::new(ServiceConfig::from_env())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Stop trigger usable from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new()
    }

    /// Run standalone: bind `addr`, dispatch until stop.
    ///
    /// Binds before `pre_jail` and the privilege drop, so a low port is
    /// still reachable when started as root with a `user` configured.
    pub fn run_alone<S>(self, addr: &str, service: S) -> Result<(), ServiceError>
    where
        S: Service + 'static,
    {
        claim_process_slot()?;
        signal::reset_stop();
        self.config.validate()?;

        let listener = Listener::bind_ex(
            addr,
            self.config.backlog,
            BlockMode::NonBlocking,
            self.config.buffer_size,
            self.config.rw_timeout,
        )?;
        evinfo!("standalone bind on {}", listener.endpoint());

        let service = Rc::new(RefCell::new(service));
        run_hook("pre_jail", service.borrow_mut().pre_jail())?;
        if let Some(user) = &self.config.user {
            drop_privileges(user)?;
        }
        self.serve(RunMode::Standalone, vec![listener], service)
    }

    /// Run supervised: adopt the `LISTEN_FDS` listeners, dispatch until
    /// stop. Never parses a bind address.
    pub fn run_daemon<S>(self, service: S) -> Result<(), ServiceError>
    where
        S: Service + 'static,
    {
        claim_process_slot()?;
        signal::reset_stop();
        self.config.validate()?;

        let sup = SupervisorEnv::from_env()?;
        evinfo!("supervised start with {} inherited fd(s)", sup.fds.len());

        let service = Rc::new(RefCell::new(service));
        run_hook("pre_jail", service.borrow_mut().pre_jail())?;
        if let Some(user) = &self.config.user {
            drop_privileges(user)?;
        }

        let mut listeners = Vec::with_capacity(sup.fds.len());
        for fd in sup.fds {
            let listener = Listener::from_fd(
                fd,
                BlockMode::NonBlocking,
                self.config.buffer_size,
                self.config.rw_timeout,
            )
            .map_err(|e| {
                ServiceError::Supervisor(format!("inherited fd {} is not usable: {}", fd, e))
            })?;
            listeners.push(listener);
        }
        self.serve(RunMode::Supervised, listeners, service)
    }

    /// Common tail of both run modes: reactor, wake pipe, signal
    /// handlers, listener registration, dispatch, teardown.
    fn serve<S>(
        &self,
        mode: RunMode,
        listeners: Vec<Listener>,
        service: Rc<RefCell<S>>,
    ) -> Result<(), ServiceError>
    where
        S: Service + 'static,
    {
        let mut reactor = Reactor::with_config(self.config.reactor.clone())?;
        let _wake = WakeGuard::new(&mut reactor)?;
        signal::install()?;

        for listener in listeners {
            let endpoint = listener
                .local_endpoint()
                .unwrap_or_else(|_| listener.endpoint().clone());
            service.borrow_mut().on_listen(&endpoint);
            evinfo!("{} listener on {} ({})", mode, endpoint, reactor.backend_name());
            reactor.register_listener(
                listener,
                ServiceListener {
                    service: service.clone(),
                },
            )?;
        }

        run_hook("post_init", service.borrow_mut().post_init())?;

        // ── Dispatch ──
        let run_result = loop {
            if reactor.stopped() || signal::stop_requested() {
                break Ok(());
            }
            if let Err(e) = reactor.run_once(Some(self.config.max_idle)) {
                break Err(ServiceError::Reactor(e));
            }
        };
        evinfo!("{} service stopping: {:?}", mode, reactor.stats());

        if let Err(detail) = service.borrow_mut().pre_exit() {
            evwarn!("pre_exit hook failed: {}", detail);
        }
        run_result
    }
}

fn run_hook(name: &'static str, result: Result<(), String>) -> Result<(), ServiceError> {
    result.map_err(|detail| ServiceError::Hook { name, detail })
}

/// Become `user` when running as root; otherwise keep the current
/// identity. Order matters: supplementary groups first, then gid, then
/// uid, because after `setuid` the process can no longer change groups.
fn drop_privileges(user: &str) -> Result<(), ServiceError> {
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        evdebug!("not root (euid {}), keeping current identity", euid);
        return Ok(());
    }

    let pw = User::from_name(user)
        .map_err(|e| ServiceError::Privilege(format!("lookup {:?}: {}", user, e)))?
        .ok_or_else(|| ServiceError::Privilege(format!("no such user: {:?}", user)))?;
    let uid = pw.uid.as_raw();
    let gid = pw.gid.as_raw();

    unsafe {
        if libc::setgroups(1, &gid) != 0 {
            return Err(ServiceError::Privilege(format!(
                "setgroups: {}",
                std::io::Error::last_os_error()
            )));
        }
        if libc::setgid(gid) != 0 {
            return Err(ServiceError::Privilege(format!(
                "setgid({}): {}",
                gid,
                std::io::Error::last_os_error()
            )));
        }
        if libc::setuid(uid) != 0 {
            return Err(ServiceError::Privilege(format!(
                "setuid({}): {}",
                uid,
                std::io::Error::last_os_error()
            )));
        }
    }
    evinfo!("dropped privileges to {} (uid {}, gid {})", user, uid, gid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    struct EchoBack;

    impl StreamHandler for EchoBack {
        fn on_readable(
            &mut self,
            _rt: &mut Reactor,
            _id: StreamId,
            stream: &mut Stream,
        ) -> Action {
            let mut buf = [0u8; 256];
            match stream.read(&mut buf) {
                Ok(IoOutcome::Transferred(n)) => {
                    let _ = stream.write_all(&buf[..n]);
                    Action::Rearm(Interest::READABLE)
                }
                Ok(IoOutcome::WouldBlock) => Action::Rearm(Interest::READABLE),
                _ => Action::Close,
            }
        }
    }

    struct TestService {
        hooks: Arc<Mutex<Vec<&'static str>>>,
        port: Arc<Mutex<Option<u16>>>,
        served: Arc<AtomicUsize>,
    }

    impl Service for TestService {
        fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool {
            self.served.fetch_add(1, Ordering::SeqCst);
            rt.register(stream, Interest::READABLE, EchoBack).is_ok()
        }

        fn on_listen(&mut self, endpoint: &Endpoint) {
            *self.port.lock().unwrap() = endpoint.port();
        }

        fn pre_jail(&mut self) -> Result<(), String> {
            self.hooks.lock().unwrap().push("pre_jail");
            Ok(())
        }

        fn post_init(&mut self) -> Result<(), String> {
            self.hooks.lock().unwrap().push("post_init");
            Ok(())
        }

        fn pre_exit(&mut self) -> Result<(), String> {
            self.hooks.lock().unwrap().push("pre_exit");
            Ok(())
        }
    }

    struct NullService;

    impl Service for NullService {
        fn on_accept(&mut self, _rt: &mut Reactor, _stream: Stream) -> bool {
            true
        }
    }

    // The process slot and signal state are global, so the whole runner
    // lifecycle lives in one test body.
    #[test]
    fn test_runner_lifecycle() {
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let port = Arc::new(Mutex::new(None));
        let served = Arc::new(AtomicUsize::new(0));
        let svc = TestService {
            hooks: hooks.clone(),
            port: port.clone(),
            served: served.clone(),
        };

        let runner = ServiceRunner::new(ServiceConfig::new().max_idle(Duration::from_millis(20)));
        let handle = runner.stop_handle();
        let worker = thread::spawn(move || runner.run_alone("127.0.0.1:0", svc));

        let deadline = Instant::now() + Duration::from_secs(5);
        let p = loop {
            if let Some(p) = *port.lock().unwrap() {
                break p;
            }
            assert!(Instant::now() < deadline, "service never reported its port");
            thread::sleep(Duration::from_millis(5));
        };

        let mut client = std::net::TcpStream::connect(("127.0.0.1", p)).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(b"hello").unwrap();
        let mut back = [0u8; 5];
        client.read_exact(&mut back).unwrap();
        assert_eq!(&back, b"hello");
        drop(client);

        // End-to-end stop: handler queues the signal, the wake pipe
        // delivers it to the dispatch loop.
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "runner did not stop on SIGTERM");
            thread::sleep(Duration::from_millis(5));
        }
        worker.join().unwrap().unwrap();

        assert_eq!(served.load(Ordering::SeqCst), 1);
        assert_eq!(
            *hooks.lock().unwrap(),
            vec!["pre_jail", "post_init", "pre_exit"]
        );

        // The process slot stays claimed.
        let second = ServiceRunner::new(ServiceConfig::new()).run_alone("127.0.0.1:0", NullService);
        assert!(matches!(second, Err(ServiceError::AlreadyRunning)));

        // Stop after exit is a no-op.
        handle.stop();
    }

    #[test]
    fn test_run_mode_display() {
        assert_eq!(RunMode::Standalone.to_string(), "standalone");
        assert_eq!(RunMode::Supervised.to_string(), "supervised");
    }
}
