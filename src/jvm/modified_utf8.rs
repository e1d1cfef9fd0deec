//! Java's "modified UTF-8" string encoding
//!
//! It differs from standard UTF-8 in two ways: `\u{0000}` is written with the 2-byte form, and
//! supplementary characters are written as a UTF-16 surrogate pair with each half using the
//! 3-byte form.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4.7

/// Number of bytes needed to encode a UTF-16 code unit
fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Length in bytes of the modified UTF-8 encoding of a string
pub fn encoded_len(string: &str) -> usize {
    string.encode_utf16().map(unit_len).sum()
}

/// Append the modified UTF-8 encoding of a string to a buffer
pub fn encode_into(string: &str, buffer: &mut Vec<u8>) {
    for unit in string.encode_utf16() {
        let unit = unit as u32;
        match unit_len(unit as u16) {
            1 => buffer.push(unit as u8),
            2 => {
                buffer.push(0xC0 | (unit >> 6 & 0x1F) as u8);
                buffer.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                buffer.push(0xE0 | (unit >> 12 & 0x0F) as u8);
                buffer.push(0x80 | (unit >> 6 & 0x3F) as u8);
                buffer.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

pub fn encode(string: &str) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(string.len());
    encode_into(string, &mut buffer);
    buffer
}

/// Decode modified UTF-8 bytes
///
/// Decoding is lenient in the same way the JVM's own decoder is: malformed continuation bytes are
/// folded in rather than rejected, and unpaired surrogates become `U+FFFD`.
pub fn decode(bytes: &[u8], units: &mut Vec<u16>) -> String {
    units.clear();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i] as u16;
        i += 1;
        if b < 0x80 {
            units.push(b);
        } else if (0xC0..0xE0).contains(&b) {
            let b2 = bytes.get(i).copied().unwrap_or(0) as u16;
            i += 1;
            units.push((b & 0x1F) << 6 | (b2 & 0x3F));
        } else {
            let b2 = bytes.get(i).copied().unwrap_or(0) as u16;
            let b3 = bytes.get(i + 1).copied().unwrap_or(0) as u16;
            i += 2;
            units.push((b & 0x0F) << 12 | (b2 & 0x3F) << 6 | (b3 & 0x3F));
        }
    }
    char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
