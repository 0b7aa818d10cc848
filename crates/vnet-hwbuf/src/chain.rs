//! Building multi-segment packets.

use crate::VALIDATE;
use crate::dma::DmaMemory;
use crate::error::DmaError;
use crate::header::{read_next_ref, write_next_ref};
use crate::refs::{BufferFlags, Ref, RefHeader};

/// Where a chain segment's ref is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Head,
    /// The header of the buffer at this offset.
    Next(u32),
}

/// Appends refs into one chain, tracking total length.
#[derive(Debug, Clone, Default)]
pub struct RefChain {
    len: usize,
    count: usize,
    head: Ref,
    /// Slot the next appended segment goes into.
    tail: Option<Slot>,
    /// Slot holding the current last segment.
    last: Option<Slot>,
}

impl RefChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn head(&self) -> &Ref {
        &self.head
    }

    /// Data bytes in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Segments in the chain.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn store(&mut self, dma: &dyn DmaMemory, slot: Slot, r: &RefHeader) -> Result<(), DmaError> {
        match slot {
            Slot::Head => {
                self.head.header = *r;
                Ok(())
            }
            Slot::Next(buffer) => write_next_ref(dma, buffer, r),
        }
    }

    fn mark_next_valid(&mut self, dma: &dyn DmaMemory, slot: Slot) -> Result<(), DmaError> {
        match slot {
            Slot::Head => {
                self.head.set_flags(BufferFlags::NEXT_VALID);
                Ok(())
            }
            Slot::Next(buffer) => {
                let mut r = read_next_ref(dma, buffer)?;
                r.set_flags(BufferFlags::NEXT_VALID);
                write_next_ref(dma, buffer, &r)
            }
        }
    }

    /// Append `r` and every segment already chained after it.
    pub fn append(&mut self, dma: &dyn DmaMemory, r: &RefHeader) -> Result<(), DmaError> {
        let slot = self.tail.unwrap_or(Slot::Head);
        self.store(dma, slot, r)?;
        if let Some(prev) = self.last {
            self.mark_next_valid(dma, prev)?;
        }
        let mut last = *r;
        let mut last_slot = slot;
        self.len += usize::from(last.data_len());
        self.count += 1;
        while let Some(next) = last.next_ref(dma)? {
            self.len += usize::from(next.data_len());
            self.count += 1;
            last_slot = Slot::Next(last.offset());
            last = next;
        }
        self.last = Some(last_slot);
        self.tail = Some(Slot::Next(last.offset()));
        Ok(())
    }

    /// Cross-check the tracked length against a walk of the chain, then
    /// validate every segment.
    ///
    /// # Panics
    ///
    /// On a mismatch. Does nothing unless allocation validation is compiled in.
    pub fn validate(&self, dma: &dyn DmaMemory) {
        if !VALIDATE || self.is_empty() {
            return;
        }
        let want = self.len;
        match self.head.validate_total_len(dma, want) {
            Ok((got, true)) if got == want => {}
            Ok((got, _)) => panic!("length mismatch; got {got} != want {want}"),
            Err(e) => panic!("{} {e}", self.head.display(dma)),
        }
        self.head.validate(dma);
    }
}

/// Link `b[i] -> c[i]` for each pair: store `c[i]` in `b[i]`'s buffer header.
///
/// Without `a`, `b[i]` itself is marked `NEXT_VALID`. With `a`, `b[i]` is the
/// segment already chained after `a[i]`, so the copy of it held in `a[i]`'s
/// buffer is marked instead, making `a[i] -> b[i] -> c[i]`.
pub fn link_refs(dma: &dyn DmaMemory, a: Option<&[Ref]>, b: &mut [Ref], c: &[Ref]) -> Result<(), DmaError> {
    match a {
        Some(a) => {
            for ((ra, rb), rc) in a.iter().zip(b.iter()).zip(c) {
                let mut held = read_next_ref(dma, ra.offset())?;
                held.set_flags(BufferFlags::NEXT_VALID);
                write_next_ref(dma, ra.offset(), &held)?;
                write_next_ref(dma, rb.offset(), rc)?;
            }
        }
        None => {
            for (rb, rc) in b.iter_mut().zip(c) {
                rb.set_flags(BufferFlags::NEXT_VALID);
                write_next_ref(dma, rb.offset(), rc)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::HeapDma;

    fn segments(dma: &HeapDma, lens: &[u16]) -> Vec<RefHeader> {
        let c = dma.alloc(lens.len() * 256).unwrap();
        lens.iter()
            .enumerate()
            .map(|(i, &l)| RefHeader::new(c.offset + i as u32 * 256, 128, l))
            .collect()
    }

    #[test]
    fn append_links_in_order() {
        let dma = HeapDma::default();
        let segs = segments(&dma, &[10, 20, 30]);
        let mut chain = RefChain::new();
        for s in &segs {
            chain.append(&dma, s).unwrap();
        }
        assert_eq!((chain.len(), chain.count()), (60, 3));
        let head = chain.head().header;
        assert_eq!(head.chain_len(&dma).unwrap(), 60);
        let mut seen = vec![head.offset()];
        let mut r = head;
        while let Some(n) = r.next_ref(&dma).unwrap() {
            seen.push(n.offset());
            r = n;
        }
        let want: Vec<u32> = segs.iter().map(RefHeader::offset).collect();
        assert_eq!(seen, want);
        chain.validate(&dma);
    }

    #[test]
    fn appending_a_chain_keeps_its_segments() {
        let dma = HeapDma::default();
        let segs = segments(&dma, &[1, 2, 3, 4]);
        let mut sub = RefChain::new();
        sub.append(&dma, &segs[1]).unwrap();
        sub.append(&dma, &segs[2]).unwrap();

        let mut chain = RefChain::new();
        chain.append(&dma, &segs[0]).unwrap();
        chain.append(&dma, sub.head()).unwrap();
        chain.append(&dma, &segs[3]).unwrap();
        assert_eq!((chain.len(), chain.count()), (10, 4));
        assert_eq!(chain.head().chain_len(&dma).unwrap(), 10);
        assert_eq!(chain.head().chain_count(&dma).unwrap(), 4);
        chain.validate(&dma);
    }

    #[test]
    fn link_refs_builds_two_and_three_level_chains() {
        let dma = HeapDma::default();
        let segs = segments(&dma, &[5, 6, 7]);
        let (a, mut b, c) = (vec![Ref::from(segs[0])], vec![Ref::from(segs[1])], vec![Ref::from(segs[2])]);

        let mut a2 = a.clone();
        link_refs(&dma, None, &mut a2, &b).unwrap();
        assert!(a2[0].next_is_valid());
        assert_eq!(a2[0].chain_len(&dma).unwrap(), 11);

        link_refs(&dma, Some(&a2), &mut b, &c).unwrap();
        assert!(!b[0].next_is_valid());
        assert_eq!(a2[0].chain_len(&dma).unwrap(), 18);
        assert_eq!(a2[0].chain_count(&dma).unwrap(), 3);
    }
}
