//! Drive buffer pools so their events land in the log.

use vnet_hwbuf::{BufferMain, BufferTemplate, PoolConfig, Ref, RefChain, Result};

use crate::generate::XorShift64;

#[derive(Debug, Clone, Copy)]
pub struct PoolDemoOptions {
    pub pools: usize,
    pub rounds: usize,
    /// Refs allocated per pool per round.
    pub burst: usize,
    /// Payload bytes per buffer.
    pub size: usize,
    /// Segments per chained packet.
    pub segments: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolDemoReport {
    pub allocated: usize,
    pub packets: usize,
    pub bytes: usize,
}

/// Allocate bursts, chain them into packets, and free the packets by head.
pub fn run(main: &BufferMain, opts: &PoolDemoOptions) -> Result<PoolDemoReport> {
    let pools = (0..opts.pools)
        .map(|i| main.add_buffer_pool(PoolConfig::new(format!("pool-{i}"), BufferTemplate::new(opts.size))))
        .collect::<Result<Vec<_>>>()?;
    let segments = opts.segments.max(1);
    let mut rng = XorShift64::new(0x9e37_79b9_7f4a_7c15);
    let mut report = PoolDemoReport::default();
    let mut refs = vec![Ref::default(); opts.burst];
    for _ in 0..opts.rounds {
        for pool in &pools {
            pool.alloc_refs(&mut refs)?;
            report.allocated += refs.len();
            let mut heads = Vec::new();
            for packet in refs.chunks_mut(segments) {
                let mut chain = RefChain::new();
                for r in packet.iter_mut() {
                    let len = (rng.next_u64() % pool.size() as u64) as usize + 1;
                    let fill = (rng.next_u64() & 0xff) as u8;
                    pool.set_data(r, &vec![fill; len])?;
                    chain.append(pool.dma(), r)?;
                }
                chain.validate(pool.dma());
                report.bytes += chain.len();
                heads.push(*chain.head());
            }
            report.packets += heads.len();
            pool.free_refs(&heads, true)?;
        }
    }
    for pool in &pools {
        tracing::info!(
            pool = pool.name(),
            free = pool.free_len(),
            dma_kib = pool.dma_alloc_bytes() / 1024,
            "pool demo finished"
        );
        main.del_buffer_pool(pool);
    }
    Ok(report)
}
