//! Criterion benchmarks for the discovery and framing hot paths.
//!
//! `frame_text` runs once per serial read (up to 1024 bytes), so it sits on
//! the data path between the device and every client.  Probing runs on every
//! status query.
//!
//! Run with:
//! ```bash
//! cargo bench --package serialws-core --bench probe_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serialws_core::{frame_text, group_ports, Prober, UsbPort};

/// A typical desk: a few adapters, one of them multi-port, one unknown.
fn sample_ports() -> Vec<UsbPort> {
    let mk = |name: &str, vid: u16, pid: u16, serial: &str| UsbPort {
        port_name: name.to_string(),
        vendor_id: vid,
        product_id: pid,
        serial_number: Some(serial.to_string()),
    };
    vec![
        mk("/dev/ttyUSB0", 0x0403, 0x6011, "FT4"),
        mk("/dev/ttyUSB1", 0x0403, 0x6011, "FT4"),
        mk("/dev/ttyUSB2", 0x0403, 0x6011, "FT4"),
        mk("/dev/ttyUSB3", 0x0403, 0x6011, "FT4"),
        mk("/dev/ttyUSB4", 0x1A86, 0x7522, "CH"),
        mk("/dev/ttyACM0", 0x2341, 0x0043, "UNO"),
        mk("/dev/ttyACM1", 0xDEAD, 0xBEEF, "X"),
    ]
}

fn bench_probe(c: &mut Criterion) {
    let prober = Prober::default();
    let devices = group_ports(sample_ports());

    c.bench_function("group_ports", |b| {
        b.iter(|| group_ports(black_box(sample_ports())));
    });

    c.bench_function("probe_default_tables", |b| {
        b.iter(|| prober.probe(black_box(&devices), |_| true));
    });
}

fn bench_frame_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_text");
    for size in [16usize, 256, 1024] {
        let mut chunk = vec![b'A'; size - 1];
        chunk.push(b'\n');
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunk, |b, chunk| {
            b.iter(|| frame_text(black_box(chunk), true));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_probe, bench_frame_text);
criterion_main!(benches);
