//! TCP echo daemon on the evio reactor
//!
//! Supervised mode: never binds anything itself. The listening sockets
//! arrive from the supervisor through the `LISTEN_FDS` / `LISTEN_PID`
//! contract (fds start at 3), so the supervisor decides addresses,
//! ports and restart policy.
//!
//! Usage:
//!     cargo build --release -p echod
//!     systemd-socket-activate -l 7000 ./target/release/echod
//!
//! All knobs come from the environment:
//!     EVIO_BACKEND        poll | epoll | kqueue | uring
//!     EVIO_BUFFER_SIZE    stream buffer size in bytes
//!     EVIO_RW_TIMEOUT_MS  per-connection read/write timeout
//!     EVIO_MAX_IDLE_MS    dispatch loop wakeup cap
//!     EVIO_USER           user to become when started as root
//!     EVIO_LOG_LEVEL      off | error | warn | info | debug | trace
//!
//! Test with:
//!     echo "hello" | nc 127.0.0.1 7000

use std::cell::RefCell;
use std::rc::Rc;

use evio::{
    init_logging, Action, Interest, IoOutcome, Reactor, Service, ServiceRunner, Stream,
    StreamHandler, StreamId,
};

#[derive(Default)]
struct Stats {
    accepts: u64,
    bytes_in: u64,
    bytes_out: u64,
    closes: u64,
}

/// Same one-read-in-flight echo as the standalone binary: while owed
/// bytes wait in `pending`, read interest stays off.
struct EchoConn {
    stats: Rc<RefCell<Stats>>,
    pending: Vec<u8>,
}

impl EchoConn {
    fn send(&mut self, stream: &mut Stream, data: &[u8]) -> Action {
        let mut off = 0;
        while off < data.len() {
            match stream.write(&data[off..]) {
                Ok(IoOutcome::Transferred(n)) => {
                    off += n;
                    self.stats.borrow_mut().bytes_out += n as u64;
                }
                Ok(IoOutcome::WouldBlock) => {
                    self.pending.extend_from_slice(&data[off..]);
                    return Action::Rearm(Interest::WRITABLE);
                }
                _ => {
                    self.stats.borrow_mut().closes += 1;
                    return Action::Close;
                }
            }
        }
        Action::Rearm(Interest::READABLE)
    }
}

impl StreamHandler for EchoConn {
    fn on_readable(&mut self, _rt: &mut Reactor, _id: StreamId, stream: &mut Stream) -> Action {
        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(IoOutcome::Transferred(n)) => {
                self.stats.borrow_mut().bytes_in += n as u64;
                self.send(stream, &buf[..n])
            }
            Ok(IoOutcome::WouldBlock) => Action::Rearm(Interest::READABLE),
            _ => {
                self.stats.borrow_mut().closes += 1;
                Action::Close
            }
        }
    }

    fn on_writable(&mut self, _rt: &mut Reactor, _id: StreamId, stream: &mut Stream) -> Action {
        let owed = std::mem::take(&mut self.pending);
        self.send(stream, &owed)
    }
}

struct EchoService {
    stats: Rc<RefCell<Stats>>,
}

impl Service for EchoService {
    fn on_accept(&mut self, rt: &mut Reactor, stream: Stream) -> bool {
        self.stats.borrow_mut().accepts += 1;
        let conn = EchoConn {
            stats: self.stats.clone(),
            pending: Vec::new(),
        };
        if rt.register(stream, Interest::READABLE, conn).is_err() {
            evio::evwarn!("echod: dropping connection, reactor refused it");
        }
        true
    }

    fn pre_exit(&mut self) -> Result<(), String> {
        let stats = self.stats.borrow();
        evio::evinfo!(
            "echod: served {} connection(s), {} bytes in, {} bytes out, {} closed",
            stats.accepts,
            stats.bytes_in,
            stats.bytes_out,
            stats.closes
        );
        Ok(())
    }
}

fn main() {
    // Deterministic logging setup before any privilege drop.
    init_logging();

    let stats = Rc::new(RefCell::new(Stats::default()));
    let service = EchoService {
        stats: stats.clone(),
    };

    let runner = ServiceRunner::from_env();
    if let Err(e) = runner.run_daemon(service) {
        eprintln!("echod: {}", e);
        std::process::exit(1);
    }
}
