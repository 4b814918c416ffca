//! AMF0 encoder and decoder
//!
//! AMF0 is the original Action Message Format used in Flash/RTMP.
//! Only the markers RTMP signaling actually uses are supported:
//!
//! ```text
//! 0x00 - Number (IEEE 754 double, 8 bytes big-endian)
//! 0x01 - Boolean (1 byte)
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x09 - Object End (0x000009 sequence)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! ```
//!
//! Reads take a byte slice and return `(value, bytes_consumed)`; they fail
//! with [`AmfError::TooShort`] when the buffer is smaller than the declared
//! field and [`AmfError::InvalidType`] when the marker does not match the
//! requested primitive. The input slice is never modified.

use bytes::{BufMut, BytesMut};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

pub const MARKER_NUMBER: u8 = 0x00;
pub const MARKER_BOOLEAN: u8 = 0x01;
pub const MARKER_STRING: u8 = 0x02;
pub const MARKER_OBJECT: u8 = 0x03;
pub const MARKER_NULL: u8 = 0x05;
pub const MARKER_OBJECT_END: u8 = 0x09;
pub const MARKER_LONG_STRING: u8 = 0x0C;

/// The 3-byte object terminator: empty key + object-end marker
pub const OBJECT_END_BYTES: [u8; 3] = [0x00, 0x00, MARKER_OBJECT_END];

// ============================================================================
// Writers
// ============================================================================

/// Write a number (marker + 8-byte big-endian double)
pub fn write_number(buf: &mut BytesMut, val: f64) {
    buf.put_u8(MARKER_NUMBER);
    buf.put_f64(val);
}

/// Write a string; strings of 65536 bytes or more use the long-string form
pub fn write_string(buf: &mut BytesMut, val: &str) {
    if val.len() < 65536 {
        buf.put_u8(MARKER_STRING);
        buf.put_u16(val.len() as u16);
    } else {
        buf.put_u8(MARKER_LONG_STRING);
        buf.put_u32(val.len() as u32);
    }
    buf.put_slice(val.as_bytes());
}

/// Write a boolean
pub fn write_boolean(buf: &mut BytesMut, val: bool) {
    buf.put_u8(MARKER_BOOLEAN);
    buf.put_u8(val as u8);
}

/// Write a null
pub fn write_null(buf: &mut BytesMut) {
    buf.put_u8(MARKER_NULL);
}

/// Write an object: pairs in insertion order, then the end sentinel
pub fn write_object(buf: &mut BytesMut, obj: &AmfObject) {
    buf.put_u8(MARKER_OBJECT);
    for (key, value) in &obj.0 {
        buf.put_u16(key.len() as u16);
        buf.put_slice(key.as_bytes());
        write_value(buf, value);
    }
    buf.put_slice(&OBJECT_END_BYTES);
}

/// Write any supported value
pub fn write_value(buf: &mut BytesMut, value: &AmfValue) {
    match value {
        AmfValue::Null => write_null(buf),
        AmfValue::Boolean(b) => write_boolean(buf, *b),
        AmfValue::Number(n) => write_number(buf, *n),
        AmfValue::String(s) => write_string(buf, s),
        AmfValue::Object(o) => write_object(buf, o),
    }
}

// ============================================================================
// Readers
// ============================================================================

/// Read a 16-bit-length-prefixed UTF-8 string with no type marker
pub fn read_string_without_type(b: &[u8]) -> Result<(String, usize), AmfError> {
    if b.len() < 2 {
        return Err(AmfError::TooShort);
    }
    let len = u16::from_be_bytes([b[0], b[1]]) as usize;
    if b.len() < 2 + len {
        return Err(AmfError::TooShort);
    }
    let s = std::str::from_utf8(&b[2..2 + len]).map_err(|_| AmfError::InvalidUtf8)?;
    Ok((s.to_string(), 2 + len))
}

/// Read a 32-bit-length-prefixed UTF-8 string with no type marker
pub fn read_long_string_without_type(b: &[u8]) -> Result<(String, usize), AmfError> {
    if b.len() < 4 {
        return Err(AmfError::TooShort);
    }
    let len = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
    if b.len() < 4 + len {
        return Err(AmfError::TooShort);
    }
    let s = std::str::from_utf8(&b[4..4 + len]).map_err(|_| AmfError::InvalidUtf8)?;
    Ok((s.to_string(), 4 + len))
}

/// Read a typed string (short or long form)
pub fn read_string(b: &[u8]) -> Result<(String, usize), AmfError> {
    if b.is_empty() {
        return Err(AmfError::TooShort);
    }
    match b[0] {
        MARKER_STRING => {
            let (s, n) = read_string_without_type(&b[1..])?;
            Ok((s, n + 1))
        }
        MARKER_LONG_STRING => {
            let (s, n) = read_long_string_without_type(&b[1..])?;
            Ok((s, n + 1))
        }
        m => Err(AmfError::InvalidType(m)),
    }
}

/// Read a typed number
pub fn read_number(b: &[u8]) -> Result<(f64, usize), AmfError> {
    if b.len() < 9 {
        return Err(AmfError::TooShort);
    }
    if b[0] != MARKER_NUMBER {
        return Err(AmfError::InvalidType(b[0]));
    }
    let val = f64::from_be_bytes([b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8]]);
    Ok((val, 9))
}

/// Read a typed boolean
pub fn read_boolean(b: &[u8]) -> Result<(bool, usize), AmfError> {
    if b.len() < 2 {
        return Err(AmfError::TooShort);
    }
    if b[0] != MARKER_BOOLEAN {
        return Err(AmfError::InvalidType(b[0]));
    }
    Ok((b[1] != 0, 2))
}

/// Read a typed null, returning bytes consumed
pub fn read_null(b: &[u8]) -> Result<usize, AmfError> {
    if b.is_empty() {
        return Err(AmfError::TooShort);
    }
    if b[0] != MARKER_NULL {
        return Err(AmfError::InvalidType(b[0]));
    }
    Ok(1)
}

/// Read a typed object
///
/// Values inside the object must themselves be number, boolean, string or
/// a nested object.
pub fn read_object(b: &[u8]) -> Result<(AmfObject, usize), AmfError> {
    if b.is_empty() {
        return Err(AmfError::TooShort);
    }
    if b[0] != MARKER_OBJECT {
        return Err(AmfError::InvalidType(b[0]));
    }

    let mut index = 1;
    let mut obj = AmfObject::new();
    loop {
        if b.len() - index >= 3 && b[index..index + 3] == OBJECT_END_BYTES {
            return Ok((obj, index + 3));
        }

        let (key, n) = read_string_without_type(&b[index..])?;
        index += n;
        if b.len() <= index {
            return Err(AmfError::TooShort);
        }

        let (value, n) = match b[index] {
            MARKER_NUMBER => {
                let (v, n) = read_number(&b[index..])?;
                (AmfValue::Number(v), n)
            }
            MARKER_BOOLEAN => {
                let (v, n) = read_boolean(&b[index..])?;
                (AmfValue::Boolean(v), n)
            }
            MARKER_STRING | MARKER_LONG_STRING => {
                let (v, n) = read_string(&b[index..])?;
                (AmfValue::String(v), n)
            }
            MARKER_NULL => (AmfValue::Null, read_null(&b[index..])?),
            MARKER_OBJECT => {
                let (v, n) = read_object(&b[index..])?;
                (AmfValue::Object(v), n)
            }
            m => return Err(AmfError::InvalidType(m)),
        };
        obj.insert(key, value);
        index += n;
    }
}

/// Read any supported value
pub fn read_value(b: &[u8]) -> Result<(AmfValue, usize), AmfError> {
    if b.is_empty() {
        return Err(AmfError::TooShort);
    }
    match b[0] {
        MARKER_NUMBER => read_number(b).map(|(v, n)| (AmfValue::Number(v), n)),
        MARKER_BOOLEAN => read_boolean(b).map(|(v, n)| (AmfValue::Boolean(v), n)),
        MARKER_STRING | MARKER_LONG_STRING => read_string(b).map(|(v, n)| (AmfValue::String(v), n)),
        MARKER_NULL => read_null(b).map(|n| (AmfValue::Null, n)),
        MARKER_OBJECT => read_object(b).map(|(v, n)| (AmfValue::Object(v), n)),
        m => Err(AmfError::InvalidType(m)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &AmfValue) -> BytesMut {
        let mut buf = BytesMut::new();
        write_value(&mut buf, value);
        buf
    }

    #[test]
    fn test_number_roundtrip() {
        let buf = encode(&AmfValue::Number(42.5));
        let (val, consumed) = read_number(&buf).unwrap();
        assert_eq!(val, 42.5);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_string_roundtrip() {
        let buf = encode(&AmfValue::String("hello world".into()));
        let (val, consumed) = read_string(&buf).unwrap();
        assert_eq!(val, "hello world");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_boolean_roundtrip() {
        for b in [true, false] {
            let buf = encode(&AmfValue::Boolean(b));
            let (val, consumed) = read_boolean(&buf).unwrap();
            assert_eq!(val, b);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_null_roundtrip() {
        let buf = encode(&AmfValue::Null);
        assert_eq!(read_null(&buf).unwrap(), buf.len());
    }

    #[test]
    fn test_object_roundtrip() {
        let mut obj = AmfObject::new();
        obj.insert("app", "live");
        obj.insert("capabilities", 15.0);
        obj.insert("fpad", false);

        let buf = encode(&AmfValue::Object(obj.clone()));
        let (decoded, consumed) = read_object(&buf).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_nested_object_roundtrip() {
        let mut inner = AmfObject::new();
        inner.insert("code", "NetConnection.Connect.Success");
        let mut obj = AmfObject::new();
        obj.insert("info", inner);

        let buf = encode(&AmfValue::Object(obj.clone()));
        let (decoded, consumed) = read_object(&buf).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_long_string() {
        let long = "x".repeat(70000);
        let buf = encode(&AmfValue::String(long.clone()));
        assert_eq!(buf[0], MARKER_LONG_STRING);
        let (val, consumed) = read_string(&buf).unwrap();
        assert_eq!(val, long);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_too_short() {
        assert_eq!(read_number(&[MARKER_NUMBER, 0, 0]), Err(AmfError::TooShort));
        assert_eq!(
            read_string(&[MARKER_STRING, 0x00, 0x05, b'a']),
            Err(AmfError::TooShort)
        );
        assert_eq!(read_boolean(&[MARKER_BOOLEAN]), Err(AmfError::TooShort));
    }

    #[test]
    fn test_invalid_type() {
        assert_eq!(
            read_number(&[MARKER_STRING, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(AmfError::InvalidType(MARKER_STRING))
        );
        assert!(matches!(read_null(&[0x07]), Err(AmfError::InvalidType(0x07))));
    }
}
