use bytes::Bytes;
use indexmap::IndexMap;

use super::{CborError, Result};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;
const SIMPLE_UNDEFINED: u8 = 23;
const AI_HALF: u8 = 25;
const AI_SINGLE: u8 = 26;
const AI_DOUBLE: u8 = 27;
const AI_INDEFINITE: u8 = 31;

const BREAK: u8 = 0xff;

/// Decoded initial byte plus its length/value argument.
#[derive(Clone, Copy)]
struct Head {
    major: u8,
    ai: u8,
    /// Argument value. Meaningless when `indefinite` is set; carries the
    /// raw simple value or float bits for major 7.
    value: u64,
    indefinite: bool,
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *buf
        .get(*pos)
        .ok_or_else(|| CborError::invalid("unexpected end of input"))?;
    *pos += 1;
    Ok(byte)
}

fn read_be(buf: &[u8], pos: &mut usize, width: usize) -> Result<u64> {
    let end = pos
        .checked_add(width)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| CborError::invalid("unexpected end of input"))?;
    let mut value = 0u64;
    for byte in &buf[*pos..end] {
        value = (value << 8) | u64::from(*byte);
    }
    *pos = end;
    Ok(value)
}

fn read_head(buf: &[u8], pos: &mut usize) -> Result<Head> {
    let initial = read_u8(buf, pos)?;
    let major = initial >> 5;
    let ai = initial & 0x1f;
    let (value, indefinite) = match ai {
        0..=23 => (u64::from(ai), false),
        24 => (u64::from(read_u8(buf, pos)?), false),
        25 => (read_be(buf, pos, 2)?, false),
        26 => (read_be(buf, pos, 4)?, false),
        27 => (read_be(buf, pos, 8)?, false),
        28..=30 => {
            return Err(CborError::invalid(
                "reserved additional-information value in initial byte",
            ));
        }
        _ => (0, true),
    };
    Ok(Head {
        major,
        ai,
        value,
        indefinite,
    })
}

fn peek_head(buf: &[u8], pos: usize) -> Result<(Head, usize)> {
    let mut cursor = pos;
    let head = read_head(buf, &mut cursor)?;
    Ok((head, cursor))
}

fn check_definite_len(buf: &[u8], pos: usize, len: u64) -> Result<usize> {
    let len = usize::try_from(len)
        .ok()
        .filter(|len| pos.checked_add(*len).is_some_and(|end| end <= buf.len()))
        .ok_or_else(|| CborError::invalid("length runs past end of input"))?;
    Ok(pos + len)
}

/// Validates one data item and advances `pos` past it. This is the single
/// structural walk: [`Reader::new`] runs it over the whole buffer, and the
/// slice accessors reuse it to hop over child items.
fn check_item(buf: &[u8], pos: &mut usize) -> Result<()> {
    let head = read_head(buf, pos)?;
    match head.major {
        MAJOR_UNSIGNED => {
            if head.value > i64::MAX as u64 {
                return Err(CborError::invalid("unsigned integer exceeds 2^63-1"));
            }
            Ok(())
        }
        MAJOR_NEGATIVE => {
            if head.value > i64::MAX as u64 {
                return Err(CborError::invalid("negative integer precedes -2^63"));
            }
            Ok(())
        }
        MAJOR_BYTES | MAJOR_TEXT => check_string(buf, pos, head),
        MAJOR_ARRAY => {
            if head.indefinite {
                while !take_break(buf, pos)? {
                    check_item(buf, pos)?;
                }
            } else {
                for _ in 0..head.value {
                    check_item(buf, pos)?;
                }
            }
            Ok(())
        }
        MAJOR_MAP => {
            if head.indefinite {
                while !take_break(buf, pos)? {
                    check_map_key(buf, pos)?;
                    check_item(buf, pos)?;
                }
            } else {
                for _ in 0..head.value {
                    check_map_key(buf, pos)?;
                    check_item(buf, pos)?;
                }
            }
            Ok(())
        }
        MAJOR_TAG => {
            if head.indefinite {
                return Err(CborError::invalid("tag with indefinite argument"));
            }
            check_item(buf, pos)
        }
        _ => match head.ai {
            SIMPLE_FALSE | SIMPLE_TRUE | SIMPLE_NULL | AI_DOUBLE => Ok(()),
            SIMPLE_UNDEFINED => Err(CborError::invalid("undefined is not supported")),
            AI_HALF => Err(CborError::invalid("half-precision floats are not supported")),
            AI_SINGLE => Err(CborError::invalid(
                "single-precision floats are not supported",
            )),
            AI_INDEFINITE => Err(CborError::invalid("break outside indefinite-length item")),
            _ => Err(CborError::invalid("unassigned simple value")),
        },
    }
}

fn take_break(buf: &[u8], pos: &mut usize) -> Result<bool> {
    let byte = *buf
        .get(*pos)
        .ok_or_else(|| CborError::invalid("unterminated indefinite-length item"))?;
    if byte == BREAK {
        *pos += 1;
        Ok(true)
    } else {
        Ok(false)
    }
}

fn check_string(buf: &[u8], pos: &mut usize, head: Head) -> Result<()> {
    if !head.indefinite {
        return check_chunk(buf, pos, head);
    }
    // Indefinite strings concatenate definite chunks of the same major.
    while !take_break(buf, pos)? {
        let chunk = read_head(buf, pos)?;
        if chunk.major != head.major {
            return Err(CborError::invalid(
                "indefinite-length string chunk of a different major type",
            ));
        }
        if chunk.indefinite {
            return Err(CborError::invalid(
                "nested indefinite-length string chunk",
            ));
        }
        check_chunk(buf, pos, chunk)?;
    }
    Ok(())
}

fn check_chunk(buf: &[u8], pos: &mut usize, head: Head) -> Result<()> {
    let end = check_definite_len(buf, *pos, head.value)?;
    if head.major == MAJOR_TEXT && std::str::from_utf8(&buf[*pos..end]).is_err() {
        return Err(CborError::invalid("text string is not valid UTF-8"));
    }
    *pos = end;
    Ok(())
}

fn check_map_key(buf: &[u8], pos: &mut usize) -> Result<()> {
    let (head, _) = peek_head(buf, *pos)?;
    if head.major != MAJOR_TEXT {
        return Err(CborError::invalid("map key is not a UTF-8 string"));
    }
    check_item(buf, pos)
}

/// Validated CBOR object over a shared immutable buffer.
///
/// Construction walks the entire top-level item once and fails on anything
/// outside the supported subset, or on trailing bytes past the item. All
/// [`Slice`] accessors may therefore assume structural well-formedness.
#[derive(Debug)]
pub struct Reader {
    buf: Bytes,
}

impl Reader {
    pub fn new(buf: impl Into<Bytes>) -> Result<Self> {
        let buf = buf.into();
        let mut pos = 0;
        check_item(&buf, &mut pos)?;
        if pos != buf.len() {
            return Err(CborError::invalid("trailing bytes after top-level item"));
        }
        Ok(Self { buf })
    }

    /// Slice covering the whole top-level item.
    pub fn root(&self) -> Slice<'_> {
        Slice {
            buf: self.buf.as_ref(),
            pos: 0,
        }
    }
}

/// View of one data item inside a [`Reader`] buffer.
///
/// Slices are cheap to copy and borrow the reader's buffer; child slices
/// returned by [`Slice::as_array`] and [`Slice::as_map`] share it.
#[derive(Clone, Copy)]
pub struct Slice<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Reader-facing classification of an item, used in mismatch messages.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Array,
    Map,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "boolean",
            Kind::Int => "integer",
            Kind::Float => "float",
            Kind::String => "UTF-8 string",
            Kind::Bytes => "byte string",
            Kind::Array => "array",
            Kind::Map => "map",
        }
    }
}

impl<'a> Slice<'a> {
    /// Position of the effective head, with any semantic tags skipped.
    fn effective(&self) -> Result<(Head, usize)> {
        let mut pos = self.pos;
        loop {
            let (head, after) = peek_head(self.buf, pos)?;
            if head.major == MAJOR_TAG {
                pos = after;
            } else {
                return Ok((head, pos));
            }
        }
    }

    fn classify(&self) -> Result<Kind> {
        let (head, _) = self.effective()?;
        Ok(match head.major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE => Kind::Int,
            MAJOR_BYTES => Kind::Bytes,
            MAJOR_TEXT => Kind::String,
            MAJOR_ARRAY => Kind::Array,
            MAJOR_MAP => Kind::Map,
            _ => match head.ai {
                SIMPLE_FALSE | SIMPLE_TRUE => Kind::Bool,
                SIMPLE_NULL => Kind::Null,
                _ => Kind::Float,
            },
        })
    }

    fn expect(&self, expected: Kind) -> Result<(Head, usize)> {
        let found = self.classify()?;
        if found != expected {
            return Err(CborError::Unexpected {
                expected: expected.name(),
                found: found.name(),
            });
        }
        self.effective()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Null))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Bool))
    }

    pub fn is_int(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Int))
    }

    pub fn is_float(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Float))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.classify(), Ok(Kind::String))
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Bytes))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Array))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.classify(), Ok(Kind::Map))
    }

    pub fn as_bool(&self) -> Result<bool> {
        let (head, _) = self.expect(Kind::Bool)?;
        Ok(head.ai == SIMPLE_TRUE)
    }

    pub fn as_int(&self) -> Result<i64> {
        let (head, _) = self.expect(Kind::Int)?;
        if head.major == MAJOR_UNSIGNED {
            Ok(head.value as i64)
        } else {
            Ok(-1 - head.value as i64)
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        let (head, _) = self.expect(Kind::Float)?;
        Ok(f64::from_bits(head.value))
    }

    pub fn as_string(&self) -> Result<String> {
        let (head, pos) = self.expect(Kind::String)?;
        let bytes = collect_chunks(self.buf, pos, head)?;
        String::from_utf8(bytes)
            .map_err(|_| CborError::invalid("text string is not valid UTF-8"))
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let (head, pos) = self.expect(Kind::Bytes)?;
        collect_chunks(self.buf, pos, head)
    }

    /// Child slices of an array, in order.
    pub fn as_array(&self) -> Result<Vec<Slice<'a>>> {
        let (head, start) = self.expect(Kind::Array)?;
        let mut pos = start;
        read_head(self.buf, &mut pos)?;
        let mut children = Vec::new();
        if head.indefinite {
            while !take_break(self.buf, &mut pos)? {
                children.push(Slice { buf: self.buf, pos });
                check_item(self.buf, &mut pos)?;
            }
        } else {
            for _ in 0..head.value {
                children.push(Slice { buf: self.buf, pos });
                check_item(self.buf, &mut pos)?;
            }
        }
        Ok(children)
    }

    /// Map entries in document order with keyed lookup.
    ///
    /// Duplicate keys resolve to the last occurrence; earlier entries are
    /// dropped silently.
    pub fn as_map(&self) -> Result<IndexMap<String, Slice<'a>>> {
        let (head, start) = self.expect(Kind::Map)?;
        let mut pos = start;
        read_head(self.buf, &mut pos)?;
        let mut entries = IndexMap::new();
        let mut read_pair = |pos: &mut usize| -> Result<()> {
            let key = Slice {
                buf: self.buf,
                pos: *pos,
            };
            let key = key.as_string()?;
            check_item(self.buf, pos)?;
            let value = Slice {
                buf: self.buf,
                pos: *pos,
            };
            check_item(self.buf, pos)?;
            entries.insert(key, value);
            Ok(())
        };
        if head.indefinite {
            while !take_break(self.buf, &mut pos)? {
                read_pair(&mut pos)?;
            }
        } else {
            for _ in 0..head.value {
                read_pair(&mut pos)?;
            }
        }
        Ok(entries)
    }
}

fn collect_chunks(buf: &[u8], start: usize, head: Head) -> Result<Vec<u8>> {
    let mut pos = start;
    read_head(buf, &mut pos)?;
    if !head.indefinite {
        let end = check_definite_len(buf, pos, head.value)?;
        return Ok(buf[pos..end].to_vec());
    }
    let mut out = Vec::new();
    while !take_break(buf, &mut pos)? {
        let chunk = read_head(buf, &mut pos)?;
        let end = check_definite_len(buf, pos, chunk.value)?;
        out.extend_from_slice(&buf[pos..end]);
        pos = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(bytes: &[u8]) -> Result<Reader> {
        Reader::new(bytes.to_vec())
    }

    #[test]
    fn scalars() {
        assert!(read(&[0xf6]).unwrap().root().is_null());
        assert!(!read(&[0xf4]).unwrap().root().as_bool().unwrap());
        assert!(read(&[0xf5]).unwrap().root().as_bool().unwrap());
        assert_eq!(read(&[0x18, 0x2a]).unwrap().root().as_int().unwrap(), 42);
        assert_eq!(read(&[0x38, 0x29]).unwrap().root().as_int().unwrap(), -42);
    }

    #[test]
    fn tags_are_transparent() {
        // 1("hi")
        let reader = read(&[0xc1, 0x62, b'h', b'i']).unwrap();
        assert_eq!(reader.root().as_string().unwrap(), "hi");
    }

    #[test]
    fn rejects_unsupported_encodings() {
        // undefined
        assert!(read(&[0xf7]).is_err());
        // half and single precision
        assert!(read(&[0xf9, 0x3c, 0x00]).is_err());
        assert!(read(&[0xfa, 0x3f, 0x80, 0x00, 0x00]).is_err());
        // stray break
        assert!(read(&[0xff]).is_err());
        // reserved additional info
        assert!(read(&[0x1c]).is_err());
        // unassigned simple value
        assert!(read(&[0xf8, 0x20]).is_err());
        // 2^63 does not fit a signed 64-bit integer
        assert!(read(&[0x1b, 0x80, 0, 0, 0, 0, 0, 0, 0]).is_err());
        // trailing garbage
        assert!(read(&[0xf6, 0x00]).is_err());
    }

    #[test]
    fn rejects_mixed_indefinite_chunks() {
        // indefinite text string with a byte-string chunk
        assert!(read(&[0x7f, 0x41, 0x61, 0xff]).is_err());
    }

    #[test]
    fn rejects_non_string_map_keys() {
        // {1: 2}
        assert!(read(&[0xa1, 0x01, 0x02]).is_err());
    }

    #[test]
    fn indefinite_string_concatenates() {
        // (_ "he", "llo")
        let reader = read(&[0x7f, 0x62, b'h', b'e', 0x63, b'l', b'l', b'o', 0xff]).unwrap();
        assert_eq!(reader.root().as_string().unwrap(), "hello");
    }

    #[test]
    fn mismatch_message_names_both_kinds() {
        let reader = read(&[0x01]).unwrap();
        let err = reader.root().as_string().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected CBOR structure: expected UTF-8 string but found integer"
        );
    }

    #[test]
    fn duplicate_map_keys_last_wins() {
        // {"a": 1, "a": 2}
        let reader = read(&[0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02]).unwrap();
        let map = reader.root().as_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"].as_int().unwrap(), 2);
    }
}
