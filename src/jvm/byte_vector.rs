use crate::jvm::{modified_utf8, Error};
use std::io;

/// Largest number of bytes a `CONSTANT_Utf8` entry can hold
pub const MAX_UTF8_LENGTH: usize = 65535;

/// Growable big-endian byte buffer used to assemble class files and method bodies
///
/// Besides appending, the buffer supports patching bytes that were already written (jump offsets
/// of forward references, string lengths).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ByteVector {
    data: Vec<u8>,
}

impl ByteVector {
    pub fn new() -> ByteVector {
        ByteVector::with_capacity(64)
    }

    pub fn with_capacity(initial_size: usize) -> ByteVector {
        ByteVector {
            data: Vec::with_capacity(initial_size),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Make room for `size` more bytes, at least doubling the capacity
    fn enlarge(&mut self, size: usize) {
        let needed = self.data.len() + size;
        if needed > self.data.capacity() {
            let new_capacity = needed.max(2 * self.data.capacity());
            self.data.reserve_exact(new_capacity - self.data.len());
        }
    }

    pub fn put_byte(&mut self, b: u8) -> &mut Self {
        self.enlarge(1);
        self.data.push(b);
        self
    }

    /// Two bytes, most commonly an opcode followed by a 1-byte operand
    pub fn put11(&mut self, b1: u8, b2: u8) -> &mut Self {
        self.enlarge(2);
        self.data.push(b1);
        self.data.push(b2);
        self
    }

    pub fn put_short(&mut self, s: u16) -> &mut Self {
        self.put_bytes(&s.to_be_bytes())
    }

    /// A byte followed by a short, most commonly an opcode with a constant pool index
    pub fn put12(&mut self, b: u8, s: u16) -> &mut Self {
        self.enlarge(3);
        self.data.push(b);
        self.data.extend_from_slice(&s.to_be_bytes());
        self
    }

    pub fn put_int(&mut self, i: i32) -> &mut Self {
        self.put_bytes(&i.to_be_bytes())
    }

    pub fn put_long(&mut self, l: i64) -> &mut Self {
        self.put_bytes(&l.to_be_bytes())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.enlarge(bytes.len());
        self.data.extend_from_slice(bytes);
        self
    }

    /// Put a string as a `u16` length followed by its modified UTF-8 encoding
    ///
    /// Strings made of characters in `1..=0x7F` are copied in one pass. As soon as some other
    /// character shows up, the rest of the string is encoded in a second pass and the length that
    /// was speculatively written is patched.
    pub fn put_utf8(&mut self, string: &str) -> Result<&mut Self, Error> {
        let start = self.data.len();
        if string.len() > MAX_UTF8_LENGTH {
            let encoded_length = modified_utf8::encoded_len(string);
            if encoded_length > MAX_UTF8_LENGTH {
                return Err(Error::StringTooLong { encoded_length });
            }
        }

        self.enlarge(2 + string.len());
        self.data.extend_from_slice(&(string.len() as u16).to_be_bytes());

        let bytes = string.as_bytes();
        let ascii_prefix = bytes
            .iter()
            .position(|&b| b == 0 || b >= 0x80)
            .unwrap_or(bytes.len());
        self.data.extend_from_slice(&bytes[..ascii_prefix]);

        if ascii_prefix < bytes.len() {
            modified_utf8::encode_into(&string[ascii_prefix..], &mut self.data);
            let encoded_length = self.data.len() - start - 2;
            if encoded_length > MAX_UTF8_LENGTH {
                self.data.truncate(start);
                return Err(Error::StringTooLong { encoded_length });
            }
            self.set_short(start, encoded_length as u16);
        }

        Ok(self)
    }

    pub fn put_byte_array(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_bytes(bytes)
    }

    pub fn put_byte_vector(&mut self, other: &ByteVector) -> &mut Self {
        self.put_bytes(&other.data)
    }

    /// Pad with zeroes until the length is a multiple of 4
    ///
    /// Switch instructions need their operand tables to start at an aligned offset.
    pub fn round_up_length(&mut self) -> &mut Self {
        let padding = (4 - self.data.len() % 4) % 4;
        self.enlarge(padding);
        self.data.resize(self.data.len() + padding, 0);
        self
    }

    pub fn set_short(&mut self, position: usize, s: u16) {
        self.data[position..position + 2].copy_from_slice(&s.to_be_bytes());
    }

    pub fn set_int(&mut self, position: usize, i: i32) {
        self.data[position..position + 4].copy_from_slice(&i.to_be_bytes());
    }

    pub fn byte_at(&self, position: usize) -> u8 {
        self.data[position]
    }
}

/// Lets `Serialize` implementors write straight into a byte vector
impl io::Write for ByteVector {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.put_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
