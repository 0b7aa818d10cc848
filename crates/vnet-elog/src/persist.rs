//! View save/restore.
//!
//! File layout (integers little-endian, `varint` is LEB128):
//!
//! | field | encoding |
//! |-------|----------|
//! | magic | `b"ELV1"` |
//! | version, flags | `u16`, `u16` |
//! | name | varint length + UTF-8 |
//! | start time | `u64` ns since the Unix epoch |
//! | strings | varint count, then varint length + UTF-8 each (index 0 implied) |
//! | callers | varint count, then name, file, varint line, varint format each (index 0 implied) |
//! | events | varint count, varint window start/end, then `u64` timestamp, varint caller, `u8` flags, varint data length each |
//! | data | concatenated event data |
//! | checksum | blake3 of everything above (32 bytes) |
//!
//! Forward compatibility is not a goal: readers reject any other version.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::buffer::EventHeader;
use crate::caller::{CallerIndex, CallerInfo, CallerRegistry};
use crate::encode::{read_varint, write_varint};
use crate::error::{ElogError, Result};
use crate::strings::{StringRef, StringTable};
use crate::view::{Events, View, ViewEvent};

const MAGIC: [u8; 4] = *b"ELV1";
const VERSION: u16 = 1;
const CHECKSUM_BYTES: usize = 32;

fn put_str(out: &mut Vec<u8>, s: &str) {
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or(ElogError::Truncated { what })?;
        let b = &self.data[self.pos..end];
        self.pos = end;
        Ok(b)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.bytes(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64> {
        let b = self.bytes(8, what)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    fn varint(&mut self, what: &'static str) -> Result<u64> {
        read_varint(self.data, &mut self.pos).ok_or(ElogError::Truncated { what })
    }

    fn len(&mut self, what: &'static str) -> Result<usize> {
        let n = self.varint(what)?;
        let n = usize::try_from(n).map_err(|_| ElogError::Truncated { what })?;
        // Every counted item takes at least one byte.
        if n > self.data.len() - self.pos {
            return Err(ElogError::Truncated { what });
        }
        Ok(n)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32> {
        u32::try_from(self.varint(what)?).map_err(|_| ElogError::Truncated { what })
    }

    fn str(&mut self, what: &'static str) -> Result<&'a str> {
        let n = self.len(what)?;
        std::str::from_utf8(self.bytes(n, what)?).map_err(|_| ElogError::Utf8 { what })
    }
}

impl View {
    /// Serialize the whole view, including events outside the current window.
    pub fn save(&self, w: &mut dyn Write) -> Result<()> {
        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        put_str(&mut out, &self.name);
        out.extend_from_slice(&self.start_unix_ns.to_le_bytes());

        write_varint(&mut out, self.strings.len().saturating_sub(1) as u64);
        for s in self.strings.iter().skip(1) {
            put_str(&mut out, s);
        }

        write_varint(&mut out, self.callers.len().saturating_sub(1) as u64);
        for c in self.callers.iter().skip(1) {
            put_str(&mut out, &c.name);
            put_str(&mut out, &c.file);
            write_varint(&mut out, u64::from(c.line));
            write_varint(&mut out, u64::from(c.format.raw()));
        }

        let n = self.num_all_events();
        write_varint(&mut out, n as u64);
        write_varint(&mut out, self.current.start as u64);
        write_varint(&mut out, self.current.end as u64);
        let mut total = 0usize;
        for i in 0..n {
            let h = self.events.header(i);
            let len = self.events.data(i).len();
            out.extend_from_slice(&h.timestamp.to_le_bytes());
            write_varint(&mut out, u64::from(h.caller.raw()));
            out.push(h.flags);
            write_varint(&mut out, len as u64);
            total += len;
        }
        out.reserve(total + CHECKSUM_BYTES);
        for i in 0..n {
            out.extend_from_slice(self.events.data(i));
        }

        let sum = blake3::hash(&out);
        out.extend_from_slice(sum.as_bytes());
        w.write_all(&out)?;
        w.flush()?;
        Ok(())
    }

    /// Rebuild a view written by [`save`](Self::save). The result is in decoded form.
    pub fn restore(r: &mut dyn Read) -> Result<Self> {
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        Self::restore_bytes(&data)
    }

    pub fn restore_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC.len() {
            return Err(ElogError::Truncated { what: "magic" });
        }
        if data[..4] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&data[..4]);
            return Err(ElogError::BadMagic { found });
        }
        let mut rd = Reader { data, pos: 4 };
        let version = rd.u16("version")?;
        if version != VERSION {
            return Err(ElogError::UnsupportedVersion(version));
        }
        if data.len() < 8 + CHECKSUM_BYTES {
            return Err(ElogError::Truncated { what: "checksum" });
        }
        let (body, sum) = data.split_at(data.len() - CHECKSUM_BYTES);
        if blake3::hash(body).as_bytes() != sum {
            return Err(ElogError::ChecksumMismatch);
        }
        let mut rd = Reader { data: body, pos: 6 };
        let _flags = rd.u16("flags")?;
        let name = rd.str("name")?.to_owned();
        let start_unix_ns = rd.u64("start time")?;

        let strings = StringTable::new();
        for _ in 0..rd.len("string count")? {
            strings.push(rd.str("string")?);
        }

        let callers = CallerRegistry::new();
        for _ in 0..rd.len("caller count")? {
            let mut info = CallerInfo::new(rd.str("caller name")?, rd.str("caller file")?, rd.u32("caller line")?);
            let format = rd.u32("caller format")?;
            if format as usize >= strings.len() {
                return Err(ElogError::StringOutOfRange {
                    index: format,
                    len: strings.len(),
                });
            }
            info.format = StringRef::from_raw(format);
            callers.push(info);
        }

        let n = rd.len("event count")?;
        let cur_start = usize::try_from(rd.varint("window")?).unwrap_or(usize::MAX);
        let cur_end = usize::try_from(rd.varint("window")?).unwrap_or(usize::MAX);
        if cur_start > cur_end || cur_end > n {
            return Err(ElogError::EventOutOfRange {
                lo: cur_start as u64,
                hi: cur_end as u64,
                len: n,
            });
        }
        let mut all = Vec::with_capacity(n);
        let mut lo = 0usize;
        for _ in 0..n {
            let timestamp = rd.u64("event timestamp")?;
            let caller = rd.u32("event caller")?;
            if caller as usize >= callers.len() {
                return Err(ElogError::CallerOutOfRange {
                    index: caller,
                    len: callers.len(),
                });
            }
            let flags = rd.u8("event flags")?;
            let len = rd.len("event length")?;
            let hi = lo + len;
            all.push(ViewEvent {
                header: EventHeader {
                    timestamp,
                    caller: CallerIndex(caller),
                    len: u8::try_from(len).unwrap_or(u8::MAX),
                    flags,
                },
                lo: u32::try_from(lo).unwrap_or(u32::MAX),
                hi: u32::try_from(hi).unwrap_or(u32::MAX),
            });
            lo = hi;
        }
        let bytes = rd.bytes(lo, "event data")?.to_vec();
        if rd.pos != body.len() {
            return Err(ElogError::EventOutOfRange {
                lo: lo as u64,
                hi: body.len() as u64,
                len: rd.pos,
            });
        }

        Ok(Self::from_parts(
            name,
            Events::Decoded { all, bytes },
            cur_start..cur_end,
            strings,
            callers,
            start_unix_ns,
        ))
    }

    pub fn save_file(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.save(&mut w)
    }

    pub fn restore_file(path: &Path) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::restore(&mut r)
    }
}
