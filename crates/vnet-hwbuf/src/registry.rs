//! The buffer pool registry.
//!
//! A [`BufferMain`] owns the DMA collaborator, the event log pools report to
//! and the allocation-state trails. Its mutex guards only the pool map and
//! index table and is never held across a DMA allocation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use vnet_elog::Buffer as ElogBuffer;

use crate::config::HeapDmaConfig;
use crate::dma::{DmaMemory, HeapDma};
use crate::error::Result;
use crate::pool::BufferPool;
use crate::template::BufferTemplate;
use crate::trace::{BufferState, TraceTable};

/// Name given to pools registered without one.
pub const DEFAULT_POOL_NAME: &str = "no-name";

pub(crate) struct Shared {
    pub(crate) dma: Arc<dyn DmaMemory>,
    pub(crate) elog: Arc<ElogBuffer>,
    pub(crate) traces: Mutex<TraceTable>,
}

#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub name: String,
    pub template: BufferTemplate,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, template: BufferTemplate) -> Self {
        Self {
            name: name.into(),
            template,
        }
    }
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, Arc<BufferPool>>,
    pools: Vec<Option<Arc<BufferPool>>>,
    free_indices: Vec<u32>,
}

pub struct BufferMain {
    shared: Arc<Shared>,
    registry: Mutex<Registry>,
}

impl BufferMain {
    pub fn new(dma: Arc<dyn DmaMemory>, elog: Arc<ElogBuffer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                dma,
                elog,
                traces: Mutex::new(TraceTable::default()),
            }),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Registry over a [`HeapDma`] configured from the environment.
    pub fn from_env(elog: Arc<ElogBuffer>) -> Self {
        Self::new(Arc::new(HeapDma::new(HeapDmaConfig::from_env())), elog)
    }

    #[must_use]
    pub fn dma(&self) -> &Arc<dyn DmaMemory> {
        &self.shared.dma
    }

    #[must_use]
    pub fn elog(&self) -> &Arc<ElogBuffer> {
        &self.shared.elog
    }

    /// Register a pool and size its buffers. If a pool with the same name is
    /// already registered it is returned unchanged.
    pub fn add_buffer_pool(&self, config: PoolConfig) -> Result<Arc<BufferPool>> {
        let PoolConfig { name, mut template } = config;
        let name = if name.is_empty() {
            DEFAULT_POOL_NAME.to_owned()
        } else {
            name
        };
        if let Some(p) = self.pool_by_name(&name) {
            return Ok(p);
        }
        template.init()?;

        let mut reg = self.registry.lock();
        if let Some(p) = reg.by_name.get(&name) {
            return Ok(Arc::clone(p));
        }
        let index = match reg.free_indices.pop() {
            Some(i) => i,
            None => {
                reg.pools.push(None);
                (reg.pools.len() - 1) as u32
            }
        };
        let pool = Arc::new(BufferPool::new(Arc::clone(&self.shared), index, &name, template));
        reg.pools[index as usize] = Some(Arc::clone(&pool));
        reg.by_name.insert(name, Arc::clone(&pool));
        drop(reg);
        tracing::debug!(
            pool = pool.name(),
            index,
            size = pool.size(),
            size_including_overhead = pool.size_including_overhead(),
            "buffer pool added"
        );
        Ok(pool)
    }

    /// Unregister `pool`, free its DMA chunks and forget the trails of its
    /// free buffers. Refs still held elsewhere must not be used afterwards.
    pub fn del_buffer_pool(&self, pool: &BufferPool) {
        {
            let mut reg = self.registry.lock();
            let registered = reg
                .pools
                .get(pool.index() as usize)
                .and_then(Option::as_ref)
                .is_some_and(|p| std::ptr::eq(p.as_ref(), pool));
            if !registered {
                return;
            }
            reg.by_name.remove(pool.name());
            reg.pools[pool.index() as usize] = None;
            reg.free_indices.push(pool.index());
        }
        pool.release();
        tracing::debug!(pool = pool.name(), "buffer pool deleted");
    }

    #[must_use]
    pub fn pool_by_name(&self, name: &str) -> Option<Arc<BufferPool>> {
        self.registry.lock().by_name.get(name).cloned()
    }

    #[must_use]
    pub fn pool_by_index(&self, index: u32) -> Option<Arc<BufferPool>> {
        self.registry.lock().pools.get(index as usize).cloned().flatten()
    }

    /// Registered pool names, sorted.
    #[must_use]
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Traced state of the buffer at `offset`.
    #[must_use]
    pub fn buffer_state(&self, offset: u32) -> BufferState {
        self.shared.traces.lock().state(offset)
    }
}

impl std::fmt::Debug for BufferMain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMain")
            .field("pools", &self.pool_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main() -> BufferMain {
        BufferMain::new(Arc::new(HeapDma::default()), Arc::new(ElogBuffer::new(64)))
    }

    #[test]
    fn unnamed_pools_get_default_name() {
        let m = main();
        let p = m.add_buffer_pool(PoolConfig::default()).unwrap();
        assert_eq!(p.name(), DEFAULT_POOL_NAME);
        assert!(m.pool_by_name(DEFAULT_POOL_NAME).is_some());
    }

    #[test]
    fn same_name_returns_existing_pool() {
        let m = main();
        let a = m.add_buffer_pool(PoolConfig::new("rx", BufferTemplate::new(512))).unwrap();
        let b = m.add_buffer_pool(PoolConfig::new("rx", BufferTemplate::new(4096))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.size_including_overhead(), a.size_including_overhead());
    }

    #[test]
    fn deleted_indices_are_reused() {
        let m = main();
        let rx = m.add_buffer_pool(PoolConfig::new("rx", BufferTemplate::default())).unwrap();
        let tx = m.add_buffer_pool(PoolConfig::new("tx", BufferTemplate::default())).unwrap();
        assert_eq!((rx.index(), tx.index()), (0, 1));
        m.del_buffer_pool(&rx);
        assert!(m.pool_by_name("rx").is_none());
        assert!(m.pool_by_index(0).is_none());
        let punt = m.add_buffer_pool(PoolConfig::new("punt", BufferTemplate::default())).unwrap();
        assert_eq!(punt.index(), 0);
        assert_eq!(m.pool_names(), ["punt", "tx"]);
        // Deleting twice is a no-op.
        m.del_buffer_pool(&rx);
        assert!(m.pool_by_index(0).is_some());
    }

    #[test]
    fn delete_returns_dma_memory() {
        let dma = Arc::new(HeapDma::default());
        let m = BufferMain::new(dma.clone(), Arc::new(ElogBuffer::new(64)));
        let p = m.add_buffer_pool(PoolConfig::new("rx", BufferTemplate::default())).unwrap();
        let mut refs = vec![crate::refs::Ref::default(); 4];
        p.alloc_refs(&mut refs).unwrap();
        assert!(dma.in_use() > 0);
        m.del_buffer_pool(&p);
        assert_eq!(dma.in_use(), 0);
        assert_eq!(p.dma_alloc_bytes(), 0);
    }
}
