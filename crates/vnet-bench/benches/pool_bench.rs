//! Buffer pool allocate/free benchmarks.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use vnet_elog::Buffer;
use vnet_hwbuf::{BufferMain, BufferTemplate, HeapDma, PoolConfig, Ref, RefChain};

fn registry() -> BufferMain {
    BufferMain::new(Arc::new(HeapDma::default()), Arc::new(Buffer::new(1 << 10)))
}

fn bench_alloc_free(c: &mut Criterion) {
    let main = registry();
    let mut group = c.benchmark_group("pool_alloc_free");

    for &burst in &[1usize, 32, 256] {
        let pool = main
            .add_buffer_pool(PoolConfig::new(format!("burst-{burst}"), BufferTemplate::new(2048)))
            .unwrap();
        let mut refs = vec![Ref::default(); burst];
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::new("cycle", burst), &burst, |b, _| {
            b.iter(|| {
                pool.alloc_refs(&mut refs).unwrap();
                pool.free_refs(&refs, false).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let main = registry();
    let pool = main
        .add_buffer_pool(PoolConfig::new("chain", BufferTemplate::new(512)))
        .unwrap();
    let mut group = c.benchmark_group("pool_chain");

    for &segments in &[2usize, 8] {
        let mut refs = vec![Ref::default(); segments];
        group.bench_with_input(BenchmarkId::new("build_free", segments), &segments, |b, _| {
            b.iter(|| {
                pool.alloc_refs(&mut refs).unwrap();
                let mut chain = RefChain::new();
                for r in &refs {
                    chain.append(pool.dma(), r).unwrap();
                }
                pool.free_refs(std::slice::from_ref(chain.head()), true).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_alloc_free, bench_chain);
criterion_main!(benches);
