//! Event log write and view benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use vnet_elog::{Arg, Buffer, CallSite, elog};

static RX: CallSite = CallSite::new("bench::rx", file!(), line!(), "rx %d packets on %s");

fn enabled_buffer(events: usize) -> Buffer {
    let b = Buffer::new(events);
    b.enable(true);
    b
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("elog_add");
    group.throughput(Throughput::Elements(1));
    let b = enabled_buffer(1 << 14);

    group.bench_function("f1u", |bench| {
        let mut i = 0u64;
        bench.iter(|| {
            b.f1u(&RX, i);
            i = i.wrapping_add(1);
        });
    });
    group.bench_function("log_two_args", |bench| {
        bench.iter(|| b.log(&RX, &[Arg::Uint(32), Arg::Str("eth0")]));
    });
    group.bench_function("macro", |bench| {
        bench.iter(|| elog!(b, "tx %d bytes", criterion::black_box(1500u32)));
    });

    let off = Buffer::new(1 << 10);
    group.bench_function("disabled", |bench| {
        bench.iter(|| elog!(off, "tx %d bytes", criterion::black_box(1500u32)));
    });
    group.finish();
}

fn bench_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("elog_view");
    for &n in &[1usize << 10, 1 << 14] {
        let b = enabled_buffer(n);
        for i in 0..n as u64 {
            b.f1u(&RX, i);
        }
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("new_view", n), &n, |bench, _| {
            bench.iter(|| criterion::black_box(b.new_view().num_events()));
        });
        let v = b.new_view();
        group.bench_with_input(BenchmarkId::new("event_lines", n), &n, |bench, &n| {
            bench.iter(|| {
                for i in (0..n).step_by(64) {
                    criterion::black_box(v.event_lines(i));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_view);
criterion_main!(benches);
