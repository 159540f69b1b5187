//! Criterion benchmarks for the device-list parser and device selection.
//!
//! `adb devices -l` is parsed on every connection attempt; these benchmarks
//! keep an eye on the cost for hosts with many attached devices (device farms).
//!
//! Run with:
//! ```bash
//! cargo bench --package adbtun-core --bench parse_bench
//! ```

use adbtun_core::{parse_device_ip, parse_devices, select_device, DeviceSelector};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Builds a listing with `count` devices, alternating USB, TCP/IP and emulator.
fn make_listing(count: usize) -> String {
    let mut out = String::from("List of devices attached\n");
    for i in 0..count {
        match i % 3 {
            0 => out.push_str(&format!(
                "{i:016x}       device usb:2-{i} product:p{i} model:Model_{i} device:d{i} transport_id:{i}\n"
            )),
            1 => out.push_str(&format!(
                "192.168.1.{}:5555       device product:p{i} model:Model_{i} transport_id:{i}\n",
                i % 250
            )),
            _ => out.push_str(&format!("emulator-{}          offline transport_id:{i}\n", 5554 + i)),
        }
    }
    out
}

fn bench_parse_devices(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_devices");
    for count in [1usize, 8, 64] {
        let listing = make_listing(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &listing, |b, listing| {
            b.iter(|| parse_devices(black_box(listing)));
        });
    }
    group.finish();
}

fn bench_select_by_serial(c: &mut Criterion) {
    let devices = parse_devices(&make_listing(64));
    let selector = DeviceSelector::BySerial(format!("{:016x}", 30));
    c.bench_function("select_device/by_serial_64", |b| {
        b.iter(|| {
            let mut listing = devices.clone();
            let _ = select_device(black_box(&mut listing), black_box(&selector));
        });
    });
}

fn bench_parse_device_ip(c: &mut Criterion) {
    let output = "10.0.2.0/24 dev eth0  proto kernel  scope link  src 10.0.2.15\n\
        192.168.1.0/24 dev wlan0  proto kernel  scope link  src 192.168.1.23\n";
    c.bench_function("parse_device_ip", |b| {
        b.iter(|| parse_device_ip(black_box(output)));
    });
}

criterion_group!(
    benches,
    bench_parse_devices,
    bench_select_by_serial,
    bench_parse_device_ip
);
criterion_main!(benches);
