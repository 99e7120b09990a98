use std::cell::RefCell;
use std::rc::Rc;

use super::{CborError, Result};

const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;

const ARRAY_INDEFINITE: u8 = 0x9f;
const MAP_INDEFINITE: u8 = 0xbf;
const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;
const DOUBLE: u8 = 0xfb;
const BREAK: u8 = 0xff;

struct State {
    buf: Vec<u8>,
    /// Ids of open writers, innermost last. Only the top of the stack may
    /// emit; this is what turns interleaved writes into hard errors.
    stack: Vec<u64>,
    next_id: u64,
}

impl State {
    fn put_head(&mut self, major: u8, value: u64) {
        let major = major << 5;
        if value < 24 {
            self.buf.push(major | value as u8);
        } else if value <= u8::MAX as u64 {
            self.buf.push(major | 24);
            self.buf.push(value as u8);
        } else if value <= u16::MAX as u64 {
            self.buf.push(major | 25);
            self.buf.extend_from_slice(&(value as u16).to_be_bytes());
        } else if value <= u32::MAX as u64 {
            self.buf.push(major | 26);
            self.buf.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buf.push(major | 27);
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn put_int(&mut self, value: i64) {
        if value >= 0 {
            self.put_head(0, value as u64);
        } else {
            self.put_head(MAJOR_NEGATIVE, !(value as u64));
        }
    }

    fn put_str(&mut self, value: &str) {
        self.put_head(MAJOR_TEXT, value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn put_bytes(&mut self, value: &[u8]) {
        self.put_head(MAJOR_BYTES, value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    fn ensure_active(&self, id: u64) -> Result<()> {
        if self.stack.last() == Some(&id) {
            Ok(())
        } else {
            Err(CborError::InactiveWriter)
        }
    }

    fn open(&mut self, head: u8) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.stack.push(id);
        self.buf.push(head);
        id
    }
}

/// Streaming CBOR writer. Containers are always emitted indefinite-length
/// and closed with a break byte; integers use the shortest head encoding,
/// matching what the paired [`super::Reader`] accepts.
///
/// [`Writer::start`] opens the top-level map. Child writers obtained from a
/// parent stack on top of it; writing through anything but the innermost
/// open writer fails with [`CborError::InactiveWriter`].
pub struct Writer {
    state: Rc<RefCell<State>>,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                buf: Vec::new(),
                stack: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Opens the top-level map writer.
    pub fn start(&mut self) -> MapWriter {
        let id = self.state.borrow_mut().open(MAP_INDEFINITE);
        MapWriter {
            state: self.state.clone(),
            id,
        }
    }

    /// Consumes the writer and returns the encoded bytes. Fails if any
    /// writer in the hierarchy was left open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let state = self.state.borrow();
        if !state.stack.is_empty() {
            return Err(CborError::UnclosedWriter);
        }
        Ok(state.buf.clone())
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer for the entries of one map.
pub struct MapWriter {
    state: Rc<RefCell<State>>,
    id: u64,
}

impl MapWriter {
    fn key(&self, key: &str) -> Result<std::cell::RefMut<'_, State>> {
        let mut state = self.state.borrow_mut();
        state.ensure_active(self.id)?;
        state.put_str(key);
        Ok(state)
    }

    pub fn write_null(&mut self, key: &str) -> Result<()> {
        self.key(key)?.buf.push(NULL);
        Ok(())
    }

    pub fn write_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.key(key)?.buf.push(if value { TRUE } else { FALSE });
        Ok(())
    }

    pub fn write_int(&mut self, key: &str, value: i64) -> Result<()> {
        self.key(key)?.put_int(value);
        Ok(())
    }

    pub fn write_float(&mut self, key: &str, value: f64) -> Result<()> {
        let mut state = self.key(key)?;
        state.buf.push(DOUBLE);
        state.buf.extend_from_slice(&value.to_bits().to_be_bytes());
        Ok(())
    }

    pub fn write_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.key(key)?.put_str(value);
        Ok(())
    }

    pub fn write_bytes(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.key(key)?.put_bytes(value);
        Ok(())
    }

    pub fn start_array(&mut self, key: &str) -> Result<ArrayWriter> {
        let mut state = self.key(key)?;
        let id = state.open(ARRAY_INDEFINITE);
        drop(state);
        Ok(ArrayWriter {
            state: self.state.clone(),
            id,
        })
    }

    pub fn start_map(&mut self, key: &str) -> Result<MapWriter> {
        let mut state = self.key(key)?;
        let id = state.open(MAP_INDEFINITE);
        drop(state);
        Ok(MapWriter {
            state: self.state.clone(),
            id,
        })
    }

    /// Emits the break byte and reactivates the parent writer.
    pub fn close(self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.ensure_active(self.id)?;
        state.stack.pop();
        state.buf.push(BREAK);
        Ok(())
    }
}

/// Writer for the elements of one array.
pub struct ArrayWriter {
    state: Rc<RefCell<State>>,
    id: u64,
}

impl ArrayWriter {
    fn active(&self) -> Result<std::cell::RefMut<'_, State>> {
        let state = self.state.borrow_mut();
        state.ensure_active(self.id)?;
        Ok(state)
    }

    pub fn write_null(&mut self) -> Result<()> {
        self.active()?.buf.push(NULL);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.active()?.buf.push(if value { TRUE } else { FALSE });
        Ok(())
    }

    pub fn write_int(&mut self, value: i64) -> Result<()> {
        self.active()?.put_int(value);
        Ok(())
    }

    pub fn write_float(&mut self, value: f64) -> Result<()> {
        let mut state = self.active()?;
        state.buf.push(DOUBLE);
        state.buf.extend_from_slice(&value.to_bits().to_be_bytes());
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.active()?.put_str(value);
        Ok(())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.active()?.put_bytes(value);
        Ok(())
    }

    pub fn start_array(&mut self) -> Result<ArrayWriter> {
        let mut state = self.active()?;
        let id = state.open(ARRAY_INDEFINITE);
        drop(state);
        Ok(ArrayWriter {
            state: self.state.clone(),
            id,
        })
    }

    pub fn start_map(&mut self) -> Result<MapWriter> {
        let mut state = self.active()?;
        let id = state.open(MAP_INDEFINITE);
        drop(state);
        Ok(MapWriter {
            state: self.state.clone(),
            id,
        })
    }

    pub fn close(self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.ensure_active(self.id)?;
        state.stack.pop();
        state.buf.push(BREAK);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_integer_heads() {
        let mut writer = Writer::new();
        let mut map = writer.start();
        let mut items = map.start_array("i").unwrap();
        for value in [0, 23, 24, 255, 256, 65536, -1, -25] {
            items.write_int(value).unwrap();
        }
        items.close().unwrap();
        map.close().unwrap();
        let bytes = writer.into_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![
                0xbf, 0x61, b'i', 0x9f, // {"i": [_
                0x00, 0x17, 0x18, 0x18, 0x18, 0xff, 0x19, 0x01, 0x00, // 0 23 24 255 256
                0x1a, 0x00, 0x01, 0x00, 0x00, // 65536
                0x20, 0x38, 0x18, // -1 -25
                0xff, 0xff,
            ]
        );
    }

    #[test]
    fn unclosed_writer_is_an_error() {
        let mut writer = Writer::new();
        let _map = writer.start();
        assert!(matches!(
            writer.into_bytes(),
            Err(CborError::UnclosedWriter)
        ));
    }

    #[test]
    fn interleaved_writes_fail() {
        let mut writer = Writer::new();
        let mut map = writer.start();
        let mut inner = map.start_array("xs").unwrap();
        assert!(matches!(
            map.write_null("y"),
            Err(CborError::InactiveWriter)
        ));
        inner.write_int(1).unwrap();
        inner.close().unwrap();
        map.write_null("y").unwrap();
        map.close().unwrap();
        let bytes = writer.into_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![0xbf, 0x62, b'x', b's', 0x9f, 0x01, 0xff, 0x61, b'y', 0xf6, 0xff]
        );
    }

    #[test]
    fn closing_twice_is_impossible_and_parent_reactivates() {
        let mut writer = Writer::new();
        let mut map = writer.start();
        let inner = map.start_map("m").unwrap();
        inner.close().unwrap();
        map.write_bool("b", true).unwrap();
        map.close().unwrap();
        let bytes = writer.into_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![0xbf, 0x61, b'm', 0xbf, 0xff, 0x61, b'b', 0xf5, 0xff]
        );
    }
}
