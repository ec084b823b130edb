//! Performance benchmarks for message processing.
//!
//! These benchmarks measure the hot paths of a terminal session:
//! - Decoding inbound messages (keystrokes and resize requests)
//! - Encoding process output into frames
//! - Handing output chunks between the pty reader and the output pump

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use protocol::{ControlFrame, OutputEncoder, OutputEncoding, ResizeRequest};

/// Benchmark decoding of client messages.
fn bench_control_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_decode");

    // Single keystroke
    let keystroke = b"l".to_vec();
    group.throughput(Throughput::Bytes(keystroke.len() as u64));
    group.bench_function("keystroke_1B", |b| {
        b.iter(|| ControlFrame::decode(black_box(&keystroke)));
    });

    // Pasted line that is not JSON
    let paste = vec![b'x'; 1024];
    group.throughput(Throughput::Bytes(paste.len() as u64));
    group.bench_function("paste_1KB", |b| {
        b.iter(|| ControlFrame::decode(black_box(&paste)));
    });

    // Well-formed resize request
    let resize = ResizeRequest::new(120, 40).to_json().unwrap().into_bytes();
    group.throughput(Throughput::Bytes(resize.len() as u64));
    group.bench_function("resize", |b| {
        b.iter(|| ControlFrame::decode(black_box(&resize)));
    });

    // JSON that falls back to raw input
    let invalid = br#"{"type":"resize","cols":"wide","rows":40}"#.to_vec();
    group.throughput(Throughput::Bytes(invalid.len() as u64));
    group.bench_function("invalid_resize", |b| {
        b.iter(|| ControlFrame::decode(black_box(&invalid)));
    });

    group.finish();
}

/// Benchmark framing of process output.
fn bench_output_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_encode");

    let ascii = "drwxr-xr-x  2 user user 4096 Jan  1 00:00 src\r\n"
        .repeat(100)
        .into_bytes();
    let chunk = &ascii[..4096];
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    group.bench_function("text_ascii_4KB", |b| {
        let mut encoder = OutputEncoder::new(OutputEncoding::Text);
        b.iter(|| encoder.encode(black_box(chunk)));
    });

    group.bench_function("binary_4KB", |b| {
        let mut encoder = OutputEncoder::new(OutputEncoding::Binary);
        b.iter(|| encoder.encode(black_box(chunk)));
    });

    // Multi-byte text read in chunks that split characters
    let unicode = "│ 終端 ─ ünïcödé ─ 🖥️ │\r\n".repeat(200).into_bytes();
    group.throughput(Throughput::Bytes(unicode.len() as u64));
    group.bench_function("text_split_unicode", |b| {
        b.iter(|| {
            let mut encoder = OutputEncoder::new(OutputEncoding::Text);
            for piece in unicode.chunks(1021) {
                black_box(encoder.encode(piece));
            }
            encoder.finish()
        });
    });

    group.finish();
}

/// Benchmark the pty-to-pump channel.
fn bench_output_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_channel");

    group.bench_function("unbounded_send_recv_4KB", |b| {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        let data = vec![0u8; 4096];

        b.iter(|| {
            tx.send(black_box(data.clone())).unwrap();
            let received = rx.try_recv().unwrap();
            black_box(received)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_control_decode,
    bench_output_encode,
    bench_output_channel,
);

criterion_main!(benches);
