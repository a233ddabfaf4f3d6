use criterion::{Criterion, criterion_group, criterion_main};
use hat_protocol::{CommandRequest, NodeStatus, StatusDatagram};
use std::hint::black_box;

fn node_status() -> NodeStatus {
    NodeStatus {
        host_name: "brainhat-bench".to_string(),
        eth0_address: "192.168.1.20".to_string(),
        wlan0_address: "10.0.0.12".to_string(),
        log_port: 50092,
        is_recording: true,
        recording_file_name: "session_142233.txt".to_string(),
        recording_duration_seconds: 93.25,
        sample_rate: 250,
        is_streaming: true,
        unix_time_millis: 1_700_000_000_000,
        ..NodeStatus::default()
    }
}

fn bench_status(c: &mut Criterion) {
    let datagram = StatusDatagram::new(node_status());
    c.bench_function("encode status datagram", |b| {
        b.iter(|| black_box(&datagram).encode().unwrap())
    });

    let line = datagram.encode().unwrap();
    c.bench_function("parse status datagram", |b| {
        b.iter(|| StatusDatagram::parse(black_box(&line)).unwrap())
    });
}

fn bench_request(c: &mut Criterion) {
    c.bench_function("parse command request", |b| {
        b.iter(|| {
            let request = CommandRequest::parse(black_box("loglevel?dest=a&level=3\r\n"));
            black_box(request.arguments().get_int("level"))
        })
    });
}

criterion_group!(benches, bench_status, bench_request);
criterion_main!(benches);
