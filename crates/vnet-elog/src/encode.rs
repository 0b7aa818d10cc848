//! Event argument encoding.
//!
//! An event's data area holds one or more records. Each record is a LEB128
//! format [`StringRef`] followed by `(kind, value)` argument pairs and a
//! terminating [`Kind::End`] byte:
//!
//! | kind | value |
//! |------|-------|
//! | `Uint` | LEB128 `u64` |
//! | `Int` | zigzag LEB128 `i64` |
//! | `Str` | LEB128 length, UTF-8 bytes |
//! | `StrRef` | LEB128 string index |
//! | `Bool` | one byte |
//! | `F64` | 8 bytes, little-endian bits |
//!
//! Encoding never fails. When an argument does not fit, the record is cut
//! short at that argument and the encoder reports truncation.

use crate::strings::StringRef;

/// Inline data bytes per ring slot.
pub const EVENT_DATA_BYTES: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    End = 0,
    Uint = 1,
    Int = 2,
    Str = 3,
    StrRef = 4,
    Bool = 5,
    F64 = 6,
}

impl Kind {
    const fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::End,
            1 => Self::Uint,
            2 => Self::Int,
            3 => Self::Str,
            4 => Self::StrRef,
            5 => Self::Bool,
            6 => Self::F64,
            _ => return None,
        })
    }
}

/// One logged argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Uint(u64),
    Int(i64),
    Str(&'a str),
    Ref(StringRef),
    Bool(bool),
    Float(f64),
}

impl Arg<'_> {
    /// Type name used in formatter diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Uint(_) => "uint",
            Self::Int(_) => "int",
            Self::Str(_) | Self::Ref(_) => "string",
            Self::Bool(_) => "bool",
            Self::Float(_) => "float64",
        }
    }
}

macro_rules! arg_from {
    ($variant:ident as $wide:ty: $($t:ty),*) => {
        $(impl From<$t> for Arg<'_> {
            fn from(v: $t) -> Self {
                Self::$variant(v as $wide)
            }
        })*
    };
}

arg_from!(Uint as u64: u8, u16, u32, u64, usize);
arg_from!(Int as i64: i8, i16, i32, i64, isize);
arg_from!(Float as f64: f32, f64);

impl From<bool> for Arg<'_> {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<StringRef> for Arg<'_> {
    fn from(v: StringRef) -> Self {
        Self::Ref(v)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(v: &'a str) -> Self {
        Self::Str(v)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(v: &'a String) -> Self {
        Self::Str(v.as_str())
    }
}

#[inline]
fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

#[inline]
const fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
const fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Writes records into a fixed data area.
pub struct Encoder<'b> {
    buf: &'b mut [u8],
    pos: usize,
    truncated: bool,
    open: bool,
}

impl<'b> Encoder<'b> {
    pub(crate) fn new(buf: &'b mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            truncated: false,
            open: false,
        }
    }

    /// Start a record with the given format. Closes any open record.
    pub fn begin(&mut self, format: StringRef) {
        self.close();
        if self.truncated || !self.fits(varint_len(u64::from(format.raw()))) {
            self.truncated = true;
            return;
        }
        self.put_varint(u64::from(format.raw()));
        self.open = true;
    }

    pub fn u64(&mut self, v: u64) {
        if self.reserve(1 + varint_len(v)) {
            self.put(Kind::Uint as u8);
            self.put_varint(v);
        }
    }

    pub fn i64(&mut self, v: i64) {
        let z = zigzag(v);
        if self.reserve(1 + varint_len(z)) {
            self.put(Kind::Int as u8);
            self.put_varint(z);
        }
    }

    /// Inline string. A string that does not fit is cut at a char boundary.
    pub fn str(&mut self, s: &str) {
        if !self.open || self.truncated {
            self.truncated = true;
            return;
        }
        let full = 1 + varint_len(s.len() as u64) + s.len();
        let take = if self.fits(full) {
            s.len()
        } else {
            // Room left after kind, a one-byte length, and the end marker.
            let room = self.buf.len().saturating_sub(self.pos + 3).min(0x7f);
            let mut n = room.min(s.len());
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.truncated = true;
            if n == 0 {
                return;
            }
            n
        };
        self.put(Kind::Str as u8);
        self.put_varint(take as u64);
        self.buf[self.pos..self.pos + take].copy_from_slice(&s.as_bytes()[..take]);
        self.pos += take;
    }

    pub fn string_ref(&mut self, r: StringRef) {
        let v = u64::from(r.raw());
        if self.reserve(1 + varint_len(v)) {
            self.put(Kind::StrRef as u8);
            self.put_varint(v);
        }
    }

    pub fn bool(&mut self, v: bool) {
        if self.reserve(2) {
            self.put(Kind::Bool as u8);
            self.put(u8::from(v));
        }
    }

    pub fn f64(&mut self, v: f64) {
        if self.reserve(9) {
            self.put(Kind::F64 as u8);
            self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_bits().to_le_bytes());
            self.pos += 8;
        }
    }

    pub fn arg(&mut self, a: &Arg<'_>) {
        match *a {
            Arg::Uint(v) => self.u64(v),
            Arg::Int(v) => self.i64(v),
            Arg::Str(s) => self.str(s),
            Arg::Ref(r) => self.string_ref(r),
            Arg::Bool(v) => self.bool(v),
            Arg::Float(v) => self.f64(v),
        }
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Close the open record; returns bytes used and whether anything was dropped.
    pub(crate) fn finish(mut self) -> (usize, bool) {
        self.close();
        (self.pos, self.truncated)
    }

    fn close(&mut self) {
        if self.open {
            // Always fits: every write reserves a byte for the end marker.
            self.put(Kind::End as u8);
            self.open = false;
        }
    }

    #[inline]
    fn fits(&self, n: usize) -> bool {
        self.pos + n < self.buf.len()
    }

    #[inline]
    fn reserve(&mut self, n: usize) -> bool {
        if self.open && !self.truncated && self.fits(n) {
            return true;
        }
        self.truncated = true;
        false
    }

    #[inline]
    fn put(&mut self, b: u8) {
        self.buf[self.pos] = b;
        self.pos += 1;
    }

    #[inline]
    fn put_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.put((v as u8) | 0x80);
            v >>= 7;
        }
        self.put(v as u8);
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    pub format: StringRef,
    pub args: Vec<Arg<'a>>,
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub(crate) fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let b = *data.get(*pos)?;
        *pos += 1;
        if shift >= 64 {
            return None;
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some(v);
        }
        shift += 7;
    }
}

fn read_arg<'a>(data: &'a [u8], pos: &mut usize, kind: Kind) -> Option<Arg<'a>> {
    Some(match kind {
        Kind::End => return None,
        Kind::Uint => Arg::Uint(read_varint(data, pos)?),
        Kind::Int => Arg::Int(unzigzag(read_varint(data, pos)?)),
        Kind::Str => {
            let n = usize::try_from(read_varint(data, pos)?).ok()?;
            let bytes = data.get(*pos..pos.checked_add(n)?)?;
            *pos += n;
            Arg::Str(std::str::from_utf8(bytes).ok()?)
        }
        Kind::StrRef => Arg::Ref(StringRef::from_raw(
            u32::try_from(read_varint(data, pos)?).ok()?,
        )),
        Kind::Bool => {
            let b = *data.get(*pos)?;
            *pos += 1;
            Arg::Bool(b != 0)
        }
        Kind::F64 => {
            let bytes: [u8; 8] = data.get(*pos..*pos + 8)?.try_into().ok()?;
            *pos += 8;
            Arg::Float(f64::from_bits(u64::from_le_bytes(bytes)))
        }
    })
}

/// Decode every record in `data`.
///
/// Stops at the first malformed byte; the second value reports whether that
/// happened. Records decoded so far are kept.
#[must_use]
pub fn decode(data: &[u8]) -> (Vec<Record<'_>>, bool) {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some(format) = read_varint(data, &mut pos).and_then(|v| u32::try_from(v).ok()) else {
            return (records, false);
        };
        let mut rec = Record {
            format: StringRef::from_raw(format),
            args: Vec::new(),
        };
        loop {
            let Some(kind) = data.get(pos).copied().and_then(Kind::from_u8) else {
                // Cut short without an end marker.
                let ok = pos >= data.len();
                records.push(rec);
                return (records, ok);
            };
            pos += 1;
            if kind == Kind::End {
                break;
            }
            match read_arg(data, &mut pos, kind) {
                Some(a) => rec.args.push(a),
                None => {
                    records.push(rec);
                    return (records, false);
                }
            }
        }
        records.push(rec);
    }
    (records, true)
}
