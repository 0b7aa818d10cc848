//! Buffer pools: fixed-size DMA buffers with a free list.
//!
//! A pool grows by whole chunks from the registry's [`DmaMemory`]. Refs are
//! taken from and returned to the end of the free list, and a fresh chunk is
//! pushed so its lowest offsets are handed out first. One mutex per pool
//! serializes allocation and free; the DMA arena has its own locks.

use std::sync::Arc;

use parking_lot::Mutex;
use vnet_elog::StringRef;

use crate::dma::{ChunkId, DmaMemory};
use crate::error::{BufError, Result};
use crate::events::{PoolEvent, PoolEventKind};
use crate::header::{BUFFER_HEADER_BYTES, BufferHeader, BufferSave, read_next_ref, update_clone_count};
use crate::refs::{BufferFlags, Ref, RefHeader};
use crate::registry::Shared;
use crate::template::BufferTemplate;
use crate::trace::BufferState;

/// Buffers per chunk are rounded up to a multiple of this.
const ALLOC_ROUND: usize = 256;
/// Chunks are halved until they are no larger than this.
const MAX_CHUNK_BYTES: usize = 1 << 20;

#[derive(Default)]
struct PoolState {
    refs: Vec<Ref>,
    chunks: Vec<ChunkId>,
    dma_alloc_bytes: u64,
    /// Scratch for chained segments found while freeing.
    free_next: Vec<RefHeader>,
}

pub struct BufferPool {
    shared: Arc<Shared>,
    index: u32,
    name: Arc<str>,
    elog_name: StringRef,
    template: BufferTemplate,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub(crate) fn new(shared: Arc<Shared>, index: u32, name: &str, template: BufferTemplate) -> Self {
        let elog_name = shared.elog.set_string(name);
        Self {
            shared,
            index,
            name: Arc::from(name),
            elog_name,
            template,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot in the registry's pool table.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The pool name interned in the event log.
    #[must_use]
    pub fn elog_name(&self) -> StringRef {
        self.elog_name
    }

    #[must_use]
    pub fn template(&self) -> &BufferTemplate {
        &self.template
    }

    #[must_use]
    pub fn dma(&self) -> &dyn DmaMemory {
        self.shared.dma.as_ref()
    }

    /// Payload bytes per buffer.
    #[must_use]
    pub fn size(&self) -> usize {
        self.template.size()
    }

    #[must_use]
    pub fn size_including_overhead(&self) -> usize {
        self.template.size_including_overhead()
    }

    #[must_use]
    pub fn free_len(&self) -> usize {
        self.state.lock().refs.len()
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.size_including_overhead() as u64 * self.free_len() as u64
    }

    /// Bytes of DMA memory held by this pool.
    #[must_use]
    pub fn dma_alloc_bytes(&self) -> u64 {
        self.state.lock().dma_alloc_bytes
    }

    fn emit(&self, st: &PoolState, kind: PoolEventKind, n: usize) {
        let free = self.size_including_overhead() as u64 * st.refs.len() as u64;
        self.shared.elog.add(&PoolEvent::Pool {
            pool: self.elog_name,
            kind,
            n: u32::try_from(n).unwrap_or(u32::MAX),
            k_alloc: u32::try_from(st.dma_alloc_bytes / 1024).unwrap_or(u32::MAX),
            k_free: u32::try_from(free / 1024).unwrap_or(u32::MAX),
        });
    }

    /// Restore the buffer at `offset` to the template, keeping `save`.
    fn reset_buffer(&self, offset: u32, save: BufferSave) -> Result<()> {
        let dma = self.dma();
        BufferHeader {
            save,
            ..BufferHeader::default()
        }
        .write(dma, offset)?;
        let payload = self.size_including_overhead() - BUFFER_HEADER_BYTES;
        dma.fill(offset + BUFFER_HEADER_BYTES as u32, payload, 0)?;
        if !self.template.data.is_empty() {
            dma.write(self.template.ref_at(offset).data_start(), &self.template.data)?;
        }
        Ok(())
    }

    fn run_init_refs(&self, refs: &mut [Ref]) {
        if let Some(f) = &self.template.init_refs {
            f(self.dma(), refs);
        }
    }

    /// Carve `want - free` more buffers (rounded) out of new DMA chunks.
    fn grow(&self, st: &mut PoolState, want: usize) -> Result<()> {
        let b = self.size_including_overhead();
        while st.refs.len() < want {
            let mut n_alloc = (want - st.refs.len()).next_multiple_of(ALLOC_ROUND);
            while n_alloc > 1 && n_alloc * b > MAX_CHUNK_BYTES {
                n_alloc /= 2;
            }
            let nb = n_alloc * b;
            let chunk = self
                .shared
                .dma
                .alloc(nb)
                .map_err(|source| BufError::OutOfMemory {
                    pool: self.name.to_string(),
                    bytes: nb,
                    source,
                })?;
            st.chunks.push(chunk.id);
            st.dma_alloc_bytes += nb as u64;
            let start = st.refs.len();
            for i in (0..n_alloc).rev() {
                let offset = chunk.offset + (i * b) as u32;
                self.reset_buffer(offset, self.template.save)?;
                st.refs.push(self.template.ref_at(offset));
            }
            self.run_init_refs(&mut st.refs[start..]);
            tracing::debug!(pool = %self.name, buffers = n_alloc, bytes = nb, chunk = %chunk.id, "buffer pool grown");
            self.emit(st, PoolEventKind::Grow, n_alloc);
        }
        Ok(())
    }

    /// Allocate `out.len()` refs.
    pub fn alloc_refs(&self, out: &mut [Ref]) -> Result<()> {
        let want = out.len();
        self.alloc_refs_stride(out, want, 1)
    }

    /// Allocate `want` refs into `out[0]`, `out[stride]`, `out[2 * stride]`...
    ///
    /// On error no refs are handed out; buffers from chunks obtained before
    /// the failure stay on the free list.
    pub fn alloc_refs_stride(&self, out: &mut [Ref], want: usize, stride: usize) -> Result<()> {
        if want == 0 {
            return Ok(());
        }
        let stride = stride.max(1);
        let need = (want - 1) * stride + 1;
        if out.len() < need {
            return Err(BufError::ShortOutput {
                want,
                stride,
                need,
                len: out.len(),
            });
        }
        let mut st = self.state.lock();
        self.grow(&mut st, want)?;
        let got = st.refs.len();
        for (dst, src) in out.iter_mut().step_by(stride).zip(&st.refs[got - want..]) {
            *dst = *src;
        }
        st.refs.truncate(got - want);
        self.validate_set_state_refs(&out[..need], BufferState::KnownAllocated, stride);
        self.emit(&st, PoolEventKind::Alloc, want);
        Ok(())
    }

    /// Take the whole free list. The next allocation grows the pool.
    pub fn alloc_cached_refs(&self) -> Vec<Ref> {
        let refs = std::mem::take(&mut self.state.lock().refs);
        self.validate_set_state_refs(&refs, BufferState::KnownAllocated, 1);
        refs
    }

    /// Share `r`'s buffer with one more owner. Both refs are marked `CLONED`;
    /// the buffer goes back to the free list when the last owner frees it.
    pub fn clone_ref(&self, r: &mut Ref) -> Result<Ref> {
        update_clone_count(self.dma(), r.offset(), |n| n + 1)?;
        r.set_flags(BufferFlags::CLONED);
        Ok(*r)
    }

    /// Drop one owner of a cloned buffer. True while other owners remain.
    fn release_clone(&self, r: &RefHeader) -> Result<bool> {
        if !r.flags().contains(BufferFlags::CLONED) {
            return Ok(false);
        }
        let before = update_clone_count(self.dma(), r.offset(), |n| n.saturating_sub(1))?;
        Ok(before > 0)
    }

    /// Return one buffer to the free list. With `chain` set, segments linked
    /// after it are collected into `chain` before its header is reset.
    fn free_one(&self, st: &mut PoolState, r: &RefHeader, chain: Option<&mut Vec<RefHeader>>) -> Result<()> {
        if self.release_clone(r)? {
            return Ok(());
        }
        self.validate_set_state(r, BufferState::KnownFree);
        let dma = self.dma();
        let header = BufferHeader::read(dma, r.offset())?;
        match chain {
            Some(chain) if r.next_is_valid() => {
                let mut next = header.next_ref;
                loop {
                    chain.push(next);
                    if !next.next_is_valid() {
                        break;
                    }
                    next = read_next_ref(dma, next.offset())?;
                }
            }
            _ => {}
        }
        self.reset_buffer(r.offset(), header.save)?;
        st.refs.push(self.template.ref_at(r.offset()));
        Ok(())
    }

    /// Return `refs` to the pool, resetting each buffer to the template but
    /// keeping its save word. With `follow_next`, chained segments are freed
    /// too.
    pub fn free_refs(&self, refs: &[Ref], follow_next: bool) -> Result<()> {
        if refs.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let initial = st.refs.len();
        let mut next = std::mem::take(&mut st.free_next);
        next.clear();
        let mut result = Ok(());
        for r in refs {
            let chain = follow_next.then_some(&mut next);
            if let Err(e) = self.free_one(st, r, chain) {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            for r in &next {
                if let Err(e) = self.free_one(st, r, None) {
                    result = Err(e);
                    break;
                }
            }
        }
        st.free_next = next;
        if let Some(fresh) = st.refs.get_mut(initial..) {
            self.run_init_refs(fresh);
        }
        self.emit(st, PoolEventKind::Free, refs.len());
        result
    }

    /// Write `data` into `r`'s buffer, checking it fits this pool's buffers.
    pub fn set_data(&self, r: &mut RefHeader, data: &[u8]) -> Result<()> {
        let room = self.template.data_room(r);
        if data.len() > room {
            return Err(BufError::DataTooLong { len: data.len(), room });
        }
        r.write_data(self.dma(), data)?;
        Ok(())
    }

    /// Free every chunk and forget the free list. Outstanding refs dangle.
    pub(crate) fn release(&self) {
        let mut st = self.state.lock();
        for id in st.chunks.drain(..) {
            if let Err(e) = self.shared.dma.free(id) {
                tracing::warn!(pool = %self.name, chunk = %id, error = %e, "dma chunk free failed");
            }
        }
        st.dma_alloc_bytes = 0;
        for r in std::mem::take(&mut st.refs) {
            self.unset_state(r.offset());
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}
