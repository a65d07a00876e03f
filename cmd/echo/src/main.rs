//! TCP echo server on the evio reactor
//!
//! Standalone mode: binds its own listener and serves until SIGTERM or
//! SIGINT. One thread, readiness-driven, buffered streams.
//!
//! Usage:
//!     cargo build --release -p echo
//!     ./target/release/echo [-l addr] [-b bufsize] [-t timeout_ms] [-v]
//!
//! Test with:
//!     echo "hello" | nc 127.0.0.1 7000
//!
//! `EVIO_BACKEND=poll|epoll|kqueue|uring` selects the multiplexer.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use evio::{
    set_log_level, Action, Interest, IoOutcome, LogLevel, Reactor, Service, ServiceConfig,
    ServiceRunner, Stream, StreamHandler, StreamId,
};

const DEFAULT_ADDR: &str = "0.0.0.0:7000";

// ── Counters, printed at exit ──
#[derive(Default)]
struct Stats {
    accepts: u64,
    bytes_in: u64,
    bytes_out: u64,
    closes: u64,
}

/// Per-connection handler: read what arrived, write it straight back.
///
/// One read in flight at a time: while echoed bytes sit in `pending`
/// waiting for the kernel's send buffer, read interest stays off.
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
                // EOF or error; either way the conversation is over.
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
            evio::evwarn!("echo: dropping connection, reactor refused it");
        }
        true
    }

    fn pre_exit(&mut self) -> Result<(), String> {
        let stats = self.stats.borrow();
        evio::evinfo!(
            "echo: served {} connection(s), {} bytes in, {} bytes out, {} closed",
            stats.accepts,
            stats.bytes_in,
            stats.bytes_out,
            stats.closes
        );
        Ok(())
    }
}

fn usage() -> ! {
    eprintln!("usage: echo [-l addr] [-b bufsize] [-t timeout_ms] [-v]");
    eprintln!("  -l addr        listen address (default {})", DEFAULT_ADDR);
    eprintln!("  -b bufsize     stream buffer size in bytes");
    eprintln!("  -t timeout_ms  per-connection read/write timeout");
    eprintln!("  -v             verbose (debug) logging");
    std::process::exit(2);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut addr = DEFAULT_ADDR.to_string();
    let mut config = ServiceConfig::from_env();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-l" => {
                i += 1;
                addr = args.get(i).cloned().unwrap_or_else(|| usage());
            }
            "-b" => {
                i += 1;
                let n = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| usage());
                config = config.buffer_size(n);
            }
            "-t" => {
                i += 1;
                let ms: u64 = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| usage());
                config = config.rw_timeout(if ms == 0 {
                    None
                } else {
                    Some(Duration::from_millis(ms))
                });
            }
            "-v" => set_log_level(LogLevel::Debug),
            _ => usage(),
        }
        i += 1;
    }

    let stats = Rc::new(RefCell::new(Stats::default()));
    let service = EchoService {
        stats: stats.clone(),
    };

    let runner = ServiceRunner::new(config);
    if let Err(e) = runner.run_alone(&addr, service) {
        eprintln!("echo: {}", e);
        std::process::exit(1);
    }
}
