use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::time::Duration;

use evio_runtime::{BlockMode, Stream, StreamKind};

// Small enough to sit whole in any platform's pipe buffer, so a single
// thread can fill first and drain after.
const PAYLOAD: usize = 12 * 1024;

fn pipe_stream(buffer_size: usize) -> (Stream, i32) {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe failed");
    let stream = Stream::from_fd(fds[0], StreamKind::Pipe, BlockMode::Blocking, buffer_size, None)
        .expect("pipe stream");
    (stream, fds[1])
}

fn fill_pipe(wfd: i32, data: &[u8]) {
    let mut off = 0;
    while off < data.len() {
        let n = unsafe {
            libc::write(
                wfd,
                data[off..].as_ptr() as *const libc::c_void,
                data.len() - off,
            )
        };
        assert!(n > 0, "pipe write failed");
        off += n as usize;
    }
}

fn bench_stream_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_read");
    group.throughput(criterion::Throughput::Bytes(PAYLOAD as u64));

    let payload = vec![0x61u8; PAYLOAD];

    for &chunk in &[256usize, 4096] {
        group.bench_function(BenchmarkId::new("drain_chunks", chunk), |b| {
            let (mut stream, wfd) = pipe_stream(8192);
            let mut out = vec![0u8; chunk];
            b.iter(|| {
                fill_pipe(wfd, &payload);
                let mut total = 0usize;
                while total < PAYLOAD {
                    match stream.read(&mut out) {
                        Ok(outcome) => total += outcome.transferred().unwrap_or(0),
                        Err(e) => panic!("read failed: {}", e),
                    }
                }
                black_box(total)
            });
            unsafe {
                libc::close(wfd);
            }
        });
    }

    group.bench_function("read_line_32b", |b| {
        let (mut stream, wfd) = pipe_stream(8192);
        let line: Vec<u8> = {
            let mut l = vec![0x62u8; 31];
            l.push(b'\n');
            l
        };
        let lines = PAYLOAD / line.len();
        let mut out = Vec::with_capacity(64);
        b.iter(|| {
            for _ in 0..lines {
                fill_pipe(wfd, &line);
            }
            for _ in 0..lines {
                out.clear();
                stream.read_line(&mut out).expect("read_line failed");
                black_box(out.len());
            }
        });
        unsafe {
            libc::close(wfd);
        }
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(20);
    targets = bench_stream_read
}
criterion_main!(benches);
