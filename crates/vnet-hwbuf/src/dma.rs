//! DMA memory collaborator.
//!
//! Buffer pools never see addresses. All buffer memory is named by a `u32`
//! offset into one flat DMA offset space, and every access goes through a
//! [`DmaMemory`] which bounds-checks it. [`HeapDma`] is the in-process
//! implementation: chunks of heap memory laid out at increasing offsets, each
//! behind its own `parking_lot::Mutex`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::HeapDmaConfig;
use crate::error::DmaError;

/// Alignment of every chunk offset and length. Offset 0 is never valid.
pub const DMA_ALIGN: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u32);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A chunk handed out by [`DmaMemory::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChunk {
    pub id: ChunkId,
    /// Offset of the first byte.
    pub offset: u32,
    pub len: usize,
}

pub trait DmaMemory: Send + Sync {
    /// Allocate at least `n_bytes` of zeroed memory.
    fn alloc(&self, n_bytes: usize) -> Result<DmaChunk, DmaError>;
    fn free(&self, id: ChunkId) -> Result<(), DmaError>;
    fn is_valid_offset(&self, offset: u32) -> bool;
    fn phys_address(&self, offset: u32) -> Option<u64>;
    fn read(&self, offset: u32, out: &mut [u8]) -> Result<(), DmaError>;
    fn write(&self, offset: u32, data: &[u8]) -> Result<(), DmaError>;
    fn fill(&self, offset: u32, len: usize, byte: u8) -> Result<(), DmaError>;
    /// Read-modify-write `len` bytes at `offset` with no other access to them
    /// in between.
    fn update(&self, offset: u32, len: usize, f: &mut dyn FnMut(&mut [u8])) -> Result<(), DmaError>;
}

struct Chunk {
    base: u32,
    len: usize,
    bytes: Mutex<Box<[u8]>>,
}

struct Layout {
    by_base: BTreeMap<u32, Arc<Chunk>>,
    by_id: HashMap<ChunkId, u32>,
    next_base: u64,
    next_id: u32,
    in_use: usize,
}

/// Heap-backed DMA arena.
pub struct HeapDma {
    config: HeapDmaConfig,
    layout: RwLock<Layout>,
}

impl HeapDma {
    #[must_use]
    pub fn new(config: HeapDmaConfig) -> Self {
        Self {
            config,
            layout: RwLock::new(Layout {
                by_base: BTreeMap::new(),
                by_id: HashMap::new(),
                next_base: u64::from(DMA_ALIGN),
                next_id: 0,
                in_use: 0,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HeapDmaConfig {
        &self.config
    }

    /// Bytes held by live chunks.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.layout.read().in_use
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.layout.read().by_id.len()
    }

    fn locate(&self, offset: u32, len: usize) -> Result<(Arc<Chunk>, usize), DmaError> {
        let oob = DmaError::OutOfBounds { offset, len };
        let layout = self.layout.read();
        let (_, chunk) = layout.by_base.range(..=offset).next_back().ok_or(oob.clone())?;
        let start = (offset - chunk.base) as usize;
        if start.checked_add(len).is_none_or(|end| end > chunk.len) {
            return Err(oob);
        }
        Ok((Arc::clone(chunk), start))
    }
}

impl Default for HeapDma {
    fn default() -> Self {
        Self::new(HeapDmaConfig::default())
    }
}

impl DmaMemory for HeapDma {
    fn alloc(&self, n_bytes: usize) -> Result<DmaChunk, DmaError> {
        if n_bytes == 0 {
            return Err(DmaError::ZeroLength);
        }
        let align = DMA_ALIGN as usize;
        let len = n_bytes
            .checked_next_multiple_of(align)
            .ok_or(DmaError::OffsetSpace)?;
        let mut layout = self.layout.write();
        if layout.in_use.saturating_add(len) > self.config.max_bytes {
            return Err(DmaError::Exhausted {
                requested: len,
                in_use: layout.in_use,
                budget: self.config.max_bytes,
            });
        }
        let end = layout.next_base + len as u64;
        if end > u64::from(u32::MAX) {
            return Err(DmaError::OffsetSpace);
        }
        let base = u32::try_from(layout.next_base).map_err(|_| DmaError::OffsetSpace)?;
        let id = ChunkId(layout.next_id);
        layout.next_id += 1;
        layout.next_base = end;
        layout.in_use += len;
        layout.by_id.insert(id, base);
        layout.by_base.insert(
            base,
            Arc::new(Chunk {
                base,
                len,
                bytes: Mutex::new(vec![0u8; len].into_boxed_slice()),
            }),
        );
        tracing::debug!(chunk = %id, offset = base, len, in_use = layout.in_use, "dma chunk allocated");
        Ok(DmaChunk { id, offset: base, len })
    }

    fn free(&self, id: ChunkId) -> Result<(), DmaError> {
        let mut layout = self.layout.write();
        let base = layout.by_id.remove(&id).ok_or(DmaError::UnknownChunk(id))?;
        if let Some(chunk) = layout.by_base.remove(&base) {
            layout.in_use -= chunk.len;
        }
        tracing::debug!(chunk = %id, offset = base, in_use = layout.in_use, "dma chunk freed");
        Ok(())
    }

    fn is_valid_offset(&self, offset: u32) -> bool {
        offset != 0 && self.locate(offset, 1).is_ok()
    }

    fn phys_address(&self, offset: u32) -> Option<u64> {
        self.is_valid_offset(offset)
            .then(|| self.config.phys_base + u64::from(offset))
    }

    fn read(&self, offset: u32, out: &mut [u8]) -> Result<(), DmaError> {
        let (chunk, start) = self.locate(offset, out.len())?;
        out.copy_from_slice(&chunk.bytes.lock()[start..start + out.len()]);
        Ok(())
    }

    fn write(&self, offset: u32, data: &[u8]) -> Result<(), DmaError> {
        let (chunk, start) = self.locate(offset, data.len())?;
        chunk.bytes.lock()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn fill(&self, offset: u32, len: usize, byte: u8) -> Result<(), DmaError> {
        let (chunk, start) = self.locate(offset, len)?;
        chunk.bytes.lock()[start..start + len].fill(byte);
        Ok(())
    }

    fn update(&self, offset: u32, len: usize, f: &mut dyn FnMut(&mut [u8])) -> Result<(), DmaError> {
        let (chunk, start) = self.locate(offset, len)?;
        f(&mut chunk.bytes.lock()[start..start + len]);
        Ok(())
    }
}
