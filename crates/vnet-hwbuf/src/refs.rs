//! Buffer references.
//!
//! A [`RefHeader`] names a buffer by DMA offset and a data window inside it.
//! The low four bits of the offset word hold [`BufferFlags`]. When
//! `NEXT_VALID` is set the next segment of the packet is the ref stored in the
//! header of *this* ref's buffer, so following a chain reads DMA memory.

use std::fmt;
use std::ops::{BitOr, BitOrAssign, Deref, DerefMut};

use crate::VALIDATE;
use crate::dma::DmaMemory;
use crate::error::DmaError;
use crate::header::{read_next_ref, write_next_ref};

const FLAG_MASK: u32 = 0xf;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    /// The buffer header holds the next segment.
    pub const NEXT_VALID: Self = Self(1 << 0);
    /// The buffer is shared with at least one other ref.
    pub const CLONED: Self = Self(1 << 1);

    const NAMES: [(Self, &'static str); 2] = [(Self::NEXT_VALID, "next-valid"), (Self::CLONED, "cloned")];

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & FLAG_MASK)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        let mut sep = "";
        for (flag, name) in Self::NAMES {
            if rest & flag.0 != 0 {
                write!(f, "{sep}{name}")?;
                rest &= !flag.0;
                sep = "|";
            }
        }
        if rest != 0 {
            write!(f, "{sep}{rest:#x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferFlags({self})")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RefHeader {
    offset_and_flags: u32,
    /// Start of data relative to the buffer offset.
    data_offset: u16,
    data_len: u16,
}

pub const REF_HEADER_BYTES: usize = 8;

impl RefHeader {
    /// `offset` must be 16-byte aligned; its low bits are dropped.
    #[must_use]
    pub const fn new(offset: u32, data_offset: u16, data_len: u16) -> Self {
        Self {
            offset_and_flags: offset & !FLAG_MASK,
            data_offset,
            data_len,
        }
    }

    /// DMA offset of the buffer (its header).
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset_and_flags & !FLAG_MASK
    }

    pub(crate) fn set_offset(&mut self, offset: u32) {
        self.offset_and_flags = (offset & !FLAG_MASK) | (self.offset_and_flags & FLAG_MASK);
    }

    #[must_use]
    pub const fn flags(&self) -> BufferFlags {
        BufferFlags::from_bits(self.offset_and_flags)
    }

    pub fn set_flags(&mut self, f: BufferFlags) {
        self.offset_and_flags |= f.bits();
    }

    pub fn clear_flags(&mut self, f: BufferFlags) {
        self.offset_and_flags &= !f.bits();
    }

    #[must_use]
    pub const fn next_is_valid(&self) -> bool {
        self.flags().contains(BufferFlags::NEXT_VALID)
    }

    #[must_use]
    pub const fn data_offset(&self) -> u16 {
        self.data_offset
    }

    #[must_use]
    pub const fn data_len(&self) -> u16 {
        self.data_len
    }

    pub fn set_data_len(&mut self, len: u16) {
        self.data_len = len;
    }

    /// DMA offset of the first data byte.
    #[must_use]
    pub fn data_start(&self) -> u32 {
        self.offset() + u32::from(self.data_offset)
    }

    /// Move the start of data by `i` bytes (negative moves into the rewrite
    /// area), shrinking or growing the length to match. Returns the previous
    /// data offset for [`restore`](Self::restore).
    pub fn advance(&mut self, i: i32) -> u16 {
        let old = self.data_offset;
        self.data_offset = (i32::from(old) + i) as u16;
        self.data_len = (i32::from(self.data_len) - i) as u16;
        old
    }

    /// Undo [`advance`](Self::advance).
    pub fn restore(&mut self, old_data_offset: u16) {
        let delta = i32::from(old_data_offset) - i32::from(self.data_offset);
        self.data_offset = old_data_offset;
        self.data_len = (i32::from(self.data_len) - delta) as u16;
    }

    /// Physical address of the first data byte.
    #[must_use]
    pub fn data_phys(&self, dma: &dyn DmaMemory) -> Option<u64> {
        dma.phys_address(self.data_start())
    }

    /// The next segment, read from this ref's buffer header.
    pub fn next_ref(&self, dma: &dyn DmaMemory) -> Result<Option<RefHeader>, DmaError> {
        if self.next_is_valid() {
            read_next_ref(dma, self.offset()).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Store `next` as the next segment and mark this ref `NEXT_VALID`.
    pub fn set_next_ref(&mut self, dma: &dyn DmaMemory, next: &RefHeader) -> Result<(), DmaError> {
        write_next_ref(dma, self.offset(), next)?;
        self.set_flags(BufferFlags::NEXT_VALID);
        Ok(())
    }

    /// Copy of this segment's data.
    pub fn data_slice(&self, dma: &dyn DmaMemory) -> Result<Vec<u8>, DmaError> {
        let mut b = vec![0u8; usize::from(self.data_len)];
        dma.read(self.data_start(), &mut b)?;
        Ok(b)
    }

    /// Write `data` at the start of data and set the length to match.
    pub fn write_data(&mut self, dma: &dyn DmaMemory, data: &[u8]) -> Result<(), DmaError> {
        let len = u16::try_from(data.len()).map_err(|_| DmaError::OutOfBounds {
            offset: self.data_start(),
            len: data.len(),
        })?;
        dma.write(self.data_start(), data)?;
        self.data_len = len;
        Ok(())
    }

    /// Total data bytes in this segment and every segment chained after it.
    pub fn chain_len(&self, dma: &dyn DmaMemory) -> Result<usize, DmaError> {
        let mut l = 0;
        let mut r = Some(*self);
        while let Some(seg) = r {
            l += usize::from(seg.data_len);
            r = seg.next_ref(dma)?;
        }
        Ok(l)
    }

    /// Number of segments in the chain starting here.
    pub fn chain_count(&self, dma: &dyn DmaMemory) -> Result<usize, DmaError> {
        let mut n = 0;
        let mut r = Some(*self);
        while let Some(seg) = r {
            n += 1;
            r = seg.next_ref(dma)?;
        }
        Ok(n)
    }

    /// Append the payload of the whole chain to `out` (cleared first).
    pub fn chain_bytes(&self, dma: &dyn DmaMemory, out: &mut Vec<u8>) -> Result<(), DmaError> {
        out.clear();
        let mut r = Some(*self);
        while let Some(seg) = r {
            let at = out.len();
            out.resize(at + usize::from(seg.data_len), 0);
            dma.read(seg.data_start(), &mut out[at..])?;
            r = seg.next_ref(dma)?;
        }
        Ok(())
    }

    /// Sum segment lengths, stopping early once the sum passes `want`.
    pub(crate) fn validate_total_len(&self, dma: &dyn DmaMemory, want: usize) -> Result<(usize, bool), DmaError> {
        let mut l = 0;
        let mut r = *self;
        loop {
            l += usize::from(r.data_len);
            match r.next_ref(dma)? {
                None => return Ok((l, true)),
                Some(next) if l <= want => r = next,
                Some(_) => return Ok((l, false)),
            }
        }
    }

    /// Check that every segment has a valid data offset and nonzero length.
    ///
    /// # Panics
    ///
    /// On the first bad segment, with the chain's display string. Does nothing
    /// unless allocation validation is compiled in.
    pub fn validate(&self, dma: &dyn DmaMemory) {
        if !VALIDATE {
            return;
        }
        let mut r = *self;
        loop {
            let err = if !dma.is_valid_offset(r.data_start()) {
                Some(format!("bad dma offset: {:#x}", r.data_start()))
            } else if r.data_len == 0 {
                Some("zero length".to_owned())
            } else {
                None
            };
            if let Some(err) = err {
                panic!("{} {err}", self.display(dma));
            }
            match r.next_ref(dma) {
                Ok(Some(next)) => r = next,
                Ok(None) => return,
                Err(e) => panic!("{} {e}", self.display(dma)),
            }
        }
    }

    /// Display the chain starting here, one `{...}` group per segment.
    #[must_use]
    pub fn display<'a>(&'a self, dma: &'a dyn DmaMemory) -> ChainDisplay<'a> {
        ChainDisplay { head: self, dma }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; REF_HEADER_BYTES] {
        let mut b = [0u8; REF_HEADER_BYTES];
        b[..4].copy_from_slice(&self.offset_and_flags.to_le_bytes());
        b[4..6].copy_from_slice(&self.data_offset.to_le_bytes());
        b[6..8].copy_from_slice(&self.data_len.to_le_bytes());
        b
    }

    #[must_use]
    pub fn from_bytes(b: &[u8; REF_HEADER_BYTES]) -> Self {
        Self {
            offset_and_flags: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            data_offset: u16::from_le_bytes([b[4], b[5]]),
            data_len: u16::from_le_bytes([b[6], b[7]]),
        }
    }

    fn fmt_segment(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:#x}+{}, {} bytes", self.offset(), self.data_offset, self.data_len)?;
        let flags = self.flags();
        if !flags.is_empty() {
            write!(f, ", {flags}")?;
        }
        Ok(())
    }
}

/// One segment: `{0x1240+128, 60 bytes, next-valid}`.
impl fmt::Display for RefHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_segment(f)?;
        f.write_str("}")
    }
}

pub struct ChainDisplay<'a> {
    head: &'a RefHeader,
    dma: &'a dyn DmaMemory,
}

impl fmt::Display for ChainDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut r = *self.head;
        let mut first = true;
        loop {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            r.fmt_segment(f)?;
            let ok = self.dma.is_valid_offset(r.data_start());
            if !ok {
                f.write_str(", bad-offset")?;
            }
            f.write_str("}")?;
            if !ok {
                return Ok(());
            }
            match r.next_ref(self.dma) {
                Ok(Some(next)) => r = next,
                _ => return Ok(()),
            }
        }
    }
}

#[must_use]
pub fn ref_flag1(f: BufferFlags, r0: &RefHeader) -> bool {
    r0.offset_and_flags & f.bits() != 0
}

#[must_use]
pub fn ref_flag2(f: BufferFlags, r0: &RefHeader, r1: &RefHeader) -> bool {
    (r0.offset_and_flags | r1.offset_and_flags) & f.bits() != 0
}

/// Any of four refs has a bit of `f` set.
#[must_use]
pub fn ref_flag4(f: BufferFlags, r0: &RefHeader, r1: &RefHeader, r2: &RefHeader, r3: &RefHeader) -> bool {
    (r0.offset_and_flags | r1.offset_and_flags | r2.offset_and_flags | r3.offset_and_flags) & f.bits() != 0
}

pub const REF_BYTES: usize = 16;
pub const REF_OPAQUE_BYTES: usize = REF_BYTES - REF_HEADER_BYTES;

/// A ref plus a user opaque area that travels with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Ref {
    pub header: RefHeader,
    pub opaque: [u8; REF_OPAQUE_BYTES],
}

impl From<RefHeader> for Ref {
    fn from(header: RefHeader) -> Self {
        Self {
            header,
            opaque: [0; REF_OPAQUE_BYTES],
        }
    }
}

impl Deref for Ref {
    type Target = RefHeader;
    fn deref(&self) -> &RefHeader {
        &self.header
    }
}

impl DerefMut for Ref {
    fn deref_mut(&mut self) -> &mut RefHeader {
        &mut self.header
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.header, f)
    }
}
