//! Physical buffer layout and the header stored at the start of each buffer.
//!
//! ```text
//! offset 0     header line: next ref (8), clone count (4), save (4), opaque
//! offset 64    rewrite area, room to prepend headers
//! offset 128   payload
//! ```

use crate::dma::DmaMemory;
use crate::error::DmaError;
use crate::refs::RefHeader;

pub const CACHE_LINE_BYTES: usize = 64;
/// Cache aligned and sized space for the buffer header.
pub const BUFFER_HEADER_BYTES: usize = CACHE_LINE_BYTES;
/// Rewrite (prepend) area between the header and the payload.
pub const BUFFER_REWRITE_BYTES: usize = 64;
pub const OVERHEAD_BYTES: usize = BUFFER_HEADER_BYTES + BUFFER_REWRITE_BYTES;

const ENCODED_BYTES: usize = 16;
const CLONE_COUNT_AT: usize = 8;

/// User scratch word kept across free and reallocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferSave(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferHeader {
    /// Meaningful only when the ref pointing at this buffer has `NEXT_VALID`.
    pub next_ref: RefHeader,
    pub clone_count: u32,
    pub save: BufferSave,
}

impl BufferHeader {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ENCODED_BYTES] {
        let mut b = [0u8; ENCODED_BYTES];
        b[..8].copy_from_slice(&self.next_ref.to_bytes());
        b[8..12].copy_from_slice(&self.clone_count.to_le_bytes());
        b[12..16].copy_from_slice(&self.save.0.to_le_bytes());
        b
    }

    #[must_use]
    pub fn from_bytes(b: &[u8; ENCODED_BYTES]) -> Self {
        let mut next = [0u8; 8];
        next.copy_from_slice(&b[..8]);
        Self {
            next_ref: RefHeader::from_bytes(&next),
            clone_count: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            save: BufferSave(u32::from_le_bytes([b[12], b[13], b[14], b[15]])),
        }
    }

    /// Read the header of the buffer at `buffer`.
    pub fn read(dma: &dyn DmaMemory, buffer: u32) -> Result<Self, DmaError> {
        let mut b = [0u8; ENCODED_BYTES];
        dma.read(buffer, &mut b)?;
        Ok(Self::from_bytes(&b))
    }

    pub fn write(&self, dma: &dyn DmaMemory, buffer: u32) -> Result<(), DmaError> {
        dma.write(buffer, &self.to_bytes())
    }
}

pub(crate) fn read_next_ref(dma: &dyn DmaMemory, buffer: u32) -> Result<RefHeader, DmaError> {
    let mut b = [0u8; 8];
    dma.read(buffer, &mut b)?;
    Ok(RefHeader::from_bytes(&b))
}

pub(crate) fn write_next_ref(dma: &dyn DmaMemory, buffer: u32, next: &RefHeader) -> Result<(), DmaError> {
    dma.write(buffer, &next.to_bytes())
}

/// Apply `f` to the clone count of the buffer at `buffer` under the arena lock
/// and return the count it replaced.
pub(crate) fn update_clone_count(
    dma: &dyn DmaMemory,
    buffer: u32,
    f: impl Fn(u32) -> u32,
) -> Result<u32, DmaError> {
    let mut before = 0;
    dma.update(buffer + CLONE_COUNT_AT as u32, 4, &mut |b| {
        before = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        b.copy_from_slice(&f(before).to_le_bytes());
    })?;
    Ok(before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::BufferFlags;

    #[test]
    fn header_bytes_are_little_endian() {
        let mut next = RefHeader::new(0x1240, 128, 300);
        next.set_flags(BufferFlags::NEXT_VALID);
        let h = BufferHeader {
            next_ref: next,
            clone_count: 2,
            save: BufferSave(0xdead_beef),
        };
        let b = h.to_bytes();
        assert_eq!(&b[..4], &0x1241u32.to_le_bytes());
        assert_eq!(&b[4..6], &128u16.to_le_bytes());
        assert_eq!(&b[8..12], &2u32.to_le_bytes());
        assert_eq!(BufferHeader::from_bytes(&b), h);
    }

    #[test]
    fn overhead_is_two_cache_lines() {
        assert_eq!(OVERHEAD_BYTES, 2 * CACHE_LINE_BYTES);
    }
}
