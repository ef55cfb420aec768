//! Throughput benchmarks

use atlink_core::core::echo::EchoSuppressor;
use atlink_core::core::urc::UrcClassifier;
use atlink_core::LineFramer;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

fn modem_stream() -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..64 {
        data.extend_from_slice(b"AT+CSQ\r\r\n+CSQ: 21,0\r\n\r\nOK\r\n");
        data.extend_from_slice(format!("+CMTI: \"SM\",{}\r\n", i).as_bytes());
        data.extend_from_slice(b"+CMT: \"+15551234567\",,\"25/01/01,00:00:00+00\"\r\nHello there\r\n");
    }
    data
}

fn framing_benchmark(c: &mut Criterion) {
    let data = modem_stream();

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("single_chunk", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let count = framer.feed(black_box(&data)).count();
            black_box(count)
        })
    });

    group.bench_function("serial_sized_chunks", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let mut count = 0;
            for chunk in black_box(&data).chunks(32) {
                count += framer.feed(chunk).count();
            }
            black_box(count)
        })
    });

    group.finish();
}

fn classify_benchmark(c: &mut Criterion) {
    let data = modem_stream();
    let lines: Vec<String> = LineFramer::new().feed(&data).collect();

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(lines.len() as u64));

    group.bench_function("echo_and_urc", |b| {
        b.iter(|| {
            let mut echo = EchoSuppressor::new();
            let mut urc = UrcClassifier::new();
            let mut forwarded = 0;
            for line in &lines {
                if line.starts_with("AT") {
                    echo.command_sent(line);
                }
                if !echo.is_echo(line) {
                    black_box(urc.classify(line));
                    forwarded += 1;
                }
            }
            black_box(forwarded)
        })
    });

    group.finish();
}

criterion_group!(benches, framing_benchmark, classify_benchmark);
criterion_main!(benches);
