//! Buffer templates: the size, initial ref and initial contents shared by
//! every buffer of a pool.

use std::fmt;
use std::sync::Arc;

use crate::dma::DmaMemory;
use crate::error::{BufError, Result};
use crate::header::{BufferSave, CACHE_LINE_BYTES, OVERHEAD_BYTES};
use crate::refs::{Ref, RefHeader};

/// Per-pool hook run over refs as they are created or returned to the free
/// list, e.g. to preset packet lengths.
pub type InitRefs = Arc<dyn Fn(&dyn DmaMemory, &mut [Ref]) + Send + Sync>;

pub const DEFAULT_BUFFER_SIZE: usize = 1 << 10;

/// Largest payload a `u16` data length can describe.
const MAX_SIZE: usize = u16::MAX as usize + 1 - OVERHEAD_BYTES;

#[derive(Clone)]
pub struct BufferTemplate {
    size: usize,
    size_including_overhead: usize,
    /// Copied into every new or freed ref; offset bits are ignored.
    pub ref_header: RefHeader,
    /// Initial save word of every buffer.
    pub save: BufferSave,
    /// Initial payload of every buffer.
    pub data: Vec<u8>,
    pub init_refs: Option<InitRefs>,
}

fn is_prime(n: usize) -> bool {
    n >= 2 && (2..).take_while(|j| j * j <= n).all(|j| n % j != 0)
}

/// Total bytes per buffer for a payload of `size` bytes: header, rewrite area
/// and payload rounded up to a prime number of cache lines.
#[must_use]
pub fn buffer_size(size: usize) -> usize {
    let payload = size.next_multiple_of(CACHE_LINE_BYTES);
    let mut lines = (OVERHEAD_BYTES + payload) / CACHE_LINE_BYTES;
    while !is_prime(lines) {
        lines += 1;
    }
    lines * CACHE_LINE_BYTES
}

impl BufferTemplate {
    /// Template for `size`-byte payloads with data starting right after the
    /// rewrite area.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            size_including_overhead: 0,
            ref_header: RefHeader::new(0, OVERHEAD_BYTES as u16, 0),
            save: BufferSave::default(),
            data: Vec::new(),
            init_refs: None,
        }
    }

    /// Initial contents for every buffer. The template data length follows.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    #[must_use]
    pub fn with_init_refs(mut self, f: impl Fn(&dyn DmaMemory, &mut [Ref]) + Send + Sync + 'static) -> Self {
        self.init_refs = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_save(mut self, save: BufferSave) -> Self {
        self.save = save;
        self
    }

    /// Payload bytes per buffer. After [`init`](Self::init) this is the
    /// rounded-up size actually available.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Zero until initialized.
    #[must_use]
    pub fn size_including_overhead(&self) -> usize {
        self.size_including_overhead
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.size_including_overhead != 0
    }

    /// Fix the buffer size. Idempotent.
    pub fn init(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.size > MAX_SIZE {
            return Err(BufError::SizeTooLarge(self.size));
        }
        let total = buffer_size(self.size);
        if total > usize::from(u16::MAX) + 1 {
            return Err(BufError::SizeTooLarge(self.size));
        }
        let data_offset = usize::from(self.ref_header.data_offset());
        let room = total.saturating_sub(data_offset);
        if data_offset < crate::header::BUFFER_HEADER_BYTES || self.data.len() > room {
            return Err(BufError::DataTooLong {
                len: self.data.len(),
                room,
            });
        }
        if !self.data.is_empty() {
            self.ref_header.set_data_len(self.data.len() as u16);
        }
        self.ref_header.set_offset(0);
        self.size_including_overhead = total;
        self.size = total - OVERHEAD_BYTES;
        Ok(())
    }

    /// Template ref for the buffer at `offset`.
    pub(crate) fn ref_at(&self, offset: u32) -> Ref {
        let mut r = self.ref_header;
        r.set_offset(offset);
        Ref::from(r)
    }

    /// Bytes available from the template data offset to the end of a buffer.
    #[must_use]
    pub fn data_room(&self, r: &RefHeader) -> usize {
        self.size_including_overhead
            .saturating_sub(usize::from(r.data_offset()))
    }
}

impl Default for BufferTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl fmt::Debug for BufferTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferTemplate")
            .field("size", &self.size)
            .field("size_including_overhead", &self.size_including_overhead)
            .field("ref_header", &self.ref_header)
            .field("save", &self.save)
            .field("data_len", &self.data.len())
            .field("init_refs", &self.init_refs.is_some())
            .finish()
    }
}
