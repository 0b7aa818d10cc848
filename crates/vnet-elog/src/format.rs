//! printf-style rendering of decoded event arguments.
//!
//! Supports flags `-+ 0#`, width, precision and the verbs
//! `d i u x X o b c q s v f F e E g G t`, plus `%%`. Verb/argument mismatches
//! render inline as `%!verb(type=value)`, a missing argument as
//! `%!verb(MISSING)` and leftovers as `%!(EXTRA type=value, ...)`.

use std::fmt::Write as _;

use crate::encode::Arg;

#[derive(Debug, Default, Clone, Copy)]
struct Directive {
    minus: bool,
    plus: bool,
    space: bool,
    zero: bool,
    sharp: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Render `format` against `args`.
///
/// `Arg::Ref` values are printed as their raw reference; resolve them to
/// `Arg::Str` first for the string content.
#[must_use]
pub fn sprintf(format: &str, args: &[Arg<'_>]) -> String {
    let mut out = String::with_capacity(format.len() + 16);
    let mut args = args.iter();
    let b = format.as_bytes();
    let mut i = 0;
    let mut lit = 0;
    while i < b.len() {
        if b[i] != b'%' {
            i += 1;
            continue;
        }
        out.push_str(&format[lit..i]);
        i += 1;
        if b.get(i) == Some(&b'%') {
            out.push('%');
            i += 1;
            lit = i;
            continue;
        }
        let mut dir = Directive::default();
        while let Some(&c) = b.get(i) {
            match c {
                b'-' => dir.minus = true,
                b'+' => dir.plus = true,
                b' ' => dir.space = true,
                b'0' => dir.zero = true,
                b'#' => dir.sharp = true,
                _ => break,
            }
            i += 1;
        }
        dir.width = parse_num(b, &mut i);
        if b.get(i) == Some(&b'.') {
            i += 1;
            dir.precision = Some(parse_num(b, &mut i).unwrap_or(0));
        }
        let Some(verb) = format[i..].chars().next() else {
            out.push_str("%!(NOVERB)");
            lit = i;
            break;
        };
        i += verb.len_utf8();
        lit = i;
        match args.next() {
            Some(a) => dir.render(verb, a, &mut out),
            None => {
                let _ = write!(out, "%!{verb}(MISSING)");
            }
        }
    }
    out.push_str(&format[lit..]);
    let mut extra = args.peekable();
    if extra.peek().is_some() {
        out.push_str("%!(EXTRA ");
        for (n, a) in extra.enumerate() {
            if n > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}=", a.type_name());
            plain(a, &mut out);
        }
        out.push(')');
    }
    out
}

fn parse_num(b: &[u8], i: &mut usize) -> Option<usize> {
    let start = *i;
    let mut n = 0usize;
    while let Some(d) = b.get(*i).filter(|c| c.is_ascii_digit()) {
        n = n.saturating_mul(10).saturating_add(usize::from(d - b'0'));
        *i += 1;
    }
    (*i > start).then_some(n)
}

fn plain(a: &Arg<'_>, out: &mut String) {
    let _ = match a {
        Arg::Uint(v) => write!(out, "{v}"),
        Arg::Int(v) => write!(out, "{v}"),
        Arg::Str(s) => write!(out, "{s}"),
        Arg::Ref(r) => write!(out, "{r}"),
        Arg::Bool(v) => write!(out, "{v}"),
        Arg::Float(v) => write!(out, "{v}"),
    };
}

impl Directive {
    fn render(&self, verb: char, a: &Arg<'_>, out: &mut String) {
        match (verb, a) {
            ('d' | 'i' | 'u', Arg::Uint(v)) => self.integer(false, *v, 10, false, out),
            ('d' | 'i' | 'u', Arg::Int(v)) => self.integer(*v < 0, v.unsigned_abs(), 10, false, out),
            ('x' | 'X' | 'o' | 'b', Arg::Uint(v)) => self.radix(verb, false, *v, out),
            ('x' | 'X' | 'o' | 'b', Arg::Int(v)) => self.radix(verb, *v < 0, v.unsigned_abs(), out),
            ('x' | 'X', Arg::Str(s)) => {
                let mut hex = String::with_capacity(s.len() * 2);
                for byte in s.bytes() {
                    let _ = if verb == 'x' {
                        write!(hex, "{byte:02x}")
                    } else {
                        write!(hex, "{byte:02X}")
                    };
                }
                self.pad(&hex, out);
            }
            ('c', Arg::Uint(v)) => self.pad_char(u32::try_from(*v).ok(), out),
            ('c', Arg::Int(v)) => self.pad_char(u32::try_from(*v).ok(), out),
            ('q', Arg::Str(s)) => self.pad(&format!("{s:?}"), out),
            ('q', Arg::Uint(v)) => {
                let c = u32::try_from(*v).ok().and_then(char::from_u32).unwrap_or('\u{fffd}');
                self.pad(&format!("{c:?}"), out);
            }
            ('f' | 'F' | 'e' | 'E' | 'g' | 'G', Arg::Float(v)) => self.float(verb, *v, out),
            ('f' | 'F' | 'e' | 'E' | 'g' | 'G', Arg::Uint(v)) => self.float(verb, *v as f64, out),
            ('f' | 'F' | 'e' | 'E' | 'g' | 'G', Arg::Int(v)) => self.float(verb, *v as f64, out),
            ('t' | 'v' | 's', Arg::Bool(v)) => self.pad(if *v { "true" } else { "false" }, out),
            ('s' | 'v', Arg::Str(s)) => match self.precision {
                Some(p) => {
                    let cut = s.char_indices().nth(p).map_or(s.len(), |(i, _)| i);
                    self.pad(&s[..cut], out);
                }
                None => self.pad(s, out),
            },
            ('v', Arg::Uint(v)) => self.integer(false, *v, 10, false, out),
            ('v', Arg::Int(v)) => self.integer(*v < 0, v.unsigned_abs(), 10, false, out),
            ('v', Arg::Float(v)) => self.float('g', *v, out),
            ('s' | 'v', _) => {
                let mut s = String::new();
                plain(a, &mut s);
                self.pad(&s, out);
            }
            _ => {
                let _ = write!(out, "%!{verb}({}=", a.type_name());
                plain(a, out);
                out.push(')');
            }
        }
    }

    fn radix(&self, verb: char, neg: bool, mag: u64, out: &mut String) {
        let (base, upper) = match verb {
            'x' => (16, false),
            'X' => (16, true),
            'o' => (8, false),
            _ => (2, false),
        };
        self.integer(neg, mag, base, upper, out);
    }

    fn integer(&self, neg: bool, mag: u64, base: u32, upper: bool, out: &mut String) {
        let mut digits = match (base, upper) {
            (16, false) => format!("{mag:x}"),
            (16, true) => format!("{mag:X}"),
            (8, _) => format!("{mag:o}"),
            (2, _) => format!("{mag:b}"),
            _ => mag.to_string(),
        };
        if let Some(p) = self.precision {
            if p == 0 && mag == 0 {
                digits.clear();
            } else if digits.len() < p {
                digits.insert_str(0, &"0".repeat(p - digits.len()));
            }
        }
        let mut prefix = String::new();
        if neg {
            prefix.push('-');
        } else if self.plus {
            prefix.push('+');
        } else if self.space {
            prefix.push(' ');
        }
        if self.sharp {
            match (base, upper) {
                (16, false) => prefix.push_str("0x"),
                (16, true) => prefix.push_str("0X"),
                (8, _) if !digits.starts_with('0') => prefix.push('0'),
                (2, _) => prefix.push_str("0b"),
                _ => {}
            }
        }
        let zero_pad = self.zero && !self.minus && self.precision.is_none();
        self.pad_numeric(&prefix, &digits, zero_pad, out);
    }

    fn float(&self, verb: char, v: f64, out: &mut String) {
        let mut body = match verb {
            'f' | 'F' => format!("{:.*}", self.precision.unwrap_or(6), v),
            'e' | 'E' => c_exponent(&format!("{:.*e}", self.precision.unwrap_or(6), v)),
            _ => match self.precision {
                None => format!("{v}"),
                Some(p) => general(v, p.max(1)),
            },
        };
        if verb.is_ascii_uppercase() {
            body = body.to_ascii_uppercase();
        }
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None if self.plus => ("+", body.as_str()),
            None if self.space => (" ", body.as_str()),
            None => ("", body.as_str()),
        };
        let zero_pad = self.zero && !self.minus && v.is_finite();
        self.pad_numeric(sign, digits, zero_pad, out);
    }

    fn pad_char(&self, c: Option<u32>, out: &mut String) {
        let c = c.and_then(char::from_u32).unwrap_or('\u{fffd}');
        let mut buf = [0u8; 4];
        self.pad(c.encode_utf8(&mut buf), out);
    }

    fn pad_numeric(&self, prefix: &str, digits: &str, zero_pad: bool, out: &mut String) {
        let len = prefix.chars().count() + digits.chars().count();
        match self.width {
            Some(w) if w > len && zero_pad => {
                out.push_str(prefix);
                out.extend(std::iter::repeat_n('0', w - len));
                out.push_str(digits);
            }
            _ => {
                let mut s = String::with_capacity(len);
                s.push_str(prefix);
                s.push_str(digits);
                self.pad(&s, out);
            }
        }
    }

    fn pad(&self, s: &str, out: &mut String) {
        let len = s.chars().count();
        let fill = self.width.map_or(0, |w| w.saturating_sub(len));
        if self.minus {
            out.push_str(s);
            out.extend(std::iter::repeat_n(' ', fill));
        } else {
            out.extend(std::iter::repeat_n(' ', fill));
            out.push_str(s);
        }
    }
}

/// Rewrite Rust's `1.5e3` exponent form as C's `1.5e+03`.
fn c_exponent(s: &str) -> String {
    let Some((mant, exp)) = s.split_once('e') else {
        return s.to_owned();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return s.to_owned();
    };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mant}e{sign}{:02}", exp.unsigned_abs())
}

/// `%g` with explicit precision: shortest of `%e`/`%f` with trailing zeros removed.
fn general(v: f64, p: usize) -> String {
    if !v.is_finite() {
        return format!("{v}");
    }
    let e = format!("{:.*e}", p - 1, v);
    let exp = e
        .split_once('e')
        .and_then(|(_, x)| x.parse::<i32>().ok())
        .unwrap_or(0);
    let p = i32::try_from(p).unwrap_or(i32::MAX);
    if exp < -4 || exp >= p {
        let (mant, _) = e.split_once('e').unwrap_or((&e, ""));
        c_exponent(&format!("{}e{exp}", trim_zeros(mant)))
    } else {
        let decimals = usize::try_from(p - 1 - exp).unwrap_or(0);
        trim_zeros(&format!("{v:.decimals$}")).to_owned()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_verbs() {
        assert_eq!(
            sprintf("%s %d %d %t", &[Arg::Str("red"), Arg::Uint(5), Arg::Int(-3), Arg::Bool(true)]),
            "red 5 -3 true"
        );
        assert_eq!(sprintf("100%%", &[]), "100%");
        assert_eq!(sprintf("no verbs", &[]), "no verbs");
    }

    #[test]
    fn width_and_flags() {
        assert_eq!(sprintf("[%5d]", &[Arg::Uint(42)]), "[   42]");
        assert_eq!(sprintf("[%-5d]", &[Arg::Uint(42)]), "[42   ]");
        assert_eq!(sprintf("[%05d]", &[Arg::Int(-42)]), "[-0042]");
        assert_eq!(sprintf("[%+d]", &[Arg::Uint(7)]), "[+7]");
        assert_eq!(sprintf("[%.3d]", &[Arg::Uint(7)]), "[007]");
        assert_eq!(sprintf("[%6s]", &[Arg::Str("ab")]), "[    ab]");
        assert_eq!(sprintf("[%.2s]", &[Arg::Str("abcdef")]), "[ab]");
    }

    #[test]
    fn radix_verbs() {
        assert_eq!(sprintf("%x", &[Arg::Uint(255)]), "ff");
        assert_eq!(sprintf("%#X", &[Arg::Uint(255)]), "0XFF");
        assert_eq!(sprintf("%#x", &[Arg::Uint(0x1000)]), "0x1000");
        assert_eq!(sprintf("%o %#o", &[Arg::Uint(8), Arg::Uint(8)]), "10 010");
        assert_eq!(sprintf("%b", &[Arg::Uint(5)]), "101");
        assert_eq!(sprintf("%08x", &[Arg::Uint(0xbeef)]), "0000beef");
        assert_eq!(sprintf("%x", &[Arg::Str("hi")]), "6869");
        assert_eq!(sprintf("%x", &[Arg::Int(-255)]), "-ff");
    }

    #[test]
    fn float_verbs() {
        assert_eq!(sprintf("%f", &[Arg::Float(1.5)]), "1.500000");
        assert_eq!(sprintf("%.2f", &[Arg::Float(3.14159)]), "3.14");
        assert_eq!(sprintf("%8.3f", &[Arg::Float(-2.0)]), "  -2.000");
        assert_eq!(sprintf("%e", &[Arg::Float(1234.5)]), "1.234500e+03");
        assert_eq!(sprintf("%.1E", &[Arg::Float(0.00012)]), "1.2E-04");
        assert_eq!(sprintf("%g", &[Arg::Float(0.25)]), "0.25");
        assert_eq!(sprintf("%.3g", &[Arg::Float(1234.5)]), "1.23e+03");
        assert_eq!(sprintf("%.3g", &[Arg::Float(12.5)]), "12.5");
        assert_eq!(sprintf("%.2f", &[Arg::Uint(2)]), "2.00");
    }

    #[test]
    fn char_and_quote() {
        assert_eq!(sprintf("%c%c", &[Arg::Uint(0x68), Arg::Int(0x69)]), "hi");
        assert_eq!(sprintf("%q", &[Arg::Str("a\"b")]), "\"a\\\"b\"");
        assert_eq!(sprintf("%q", &[Arg::Uint(u64::from('x'))]), "'x'");
    }

    #[test]
    fn mismatches_are_inline() {
        assert_eq!(sprintf("%d", &[Arg::Str("x")]), "%!d(string=x)");
        assert_eq!(sprintf("%d %d", &[Arg::Uint(1)]), "1 %!d(MISSING)");
        assert_eq!(sprintf("%d", &[Arg::Uint(1), Arg::Uint(2)]), "1%!(EXTRA uint=2)");
        assert_eq!(sprintf("tail %", &[]), "tail %!(NOVERB)");
    }

    #[test]
    fn v_and_s_accept_anything() {
        assert_eq!(sprintf("%v %v %s", &[Arg::Uint(3), Arg::Bool(false), Arg::Int(-1)]), "3 false -1");
    }
}
