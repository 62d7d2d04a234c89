//! OPC UA binary encoding primitives.
//!
//! Integers are little-endian. Strings and byte strings carry an `i32`
//! length prefix where -1 encodes null, distinct from empty.

use crate::domain::CodecError;
use bytes::{Buf, BufMut, BytesMut};

/// Values with a binary encoding.
pub trait BinaryEncode {
    /// Append the encoding to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }
}

/// Values decodable from the binary encoding.
pub trait BinaryDecode: Sized {
    /// Decode from `reader`, advancing it.
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError>;

    /// Decode from a complete buffer, ignoring trailing bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::decode(&mut Reader::new(bytes))
    }
}

/// Bounds-checked cursor over an input buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// The unconsumed tail.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn need(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.len() < needed {
            return Err(CodecError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Read a byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Read an `i64`.
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    /// Read exactly `len` raw bytes.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    fn read_length(&mut self) -> Result<Option<usize>, CodecError> {
        match self.read_i32()? {
            -1 => Ok(None),
            n if n < 0 => Err(CodecError::InvalidLength(n)),
            n => {
                let len = n as usize;
                self.need(len)?;
                Ok(Some(len))
            }
        }
    }

    /// Read a length-prefixed byte string; `None` for null.
    pub fn read_byte_string(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        match self.read_length()? {
            Some(len) => Ok(Some(self.read_slice(len)?.to_vec())),
            None => Ok(None),
        }
    }

    /// Read a length-prefixed UTF-8 string; `None` for null.
    pub fn read_string(&mut self) -> Result<Option<String>, CodecError> {
        match self.read_length()? {
            Some(len) => {
                let bytes = self.read_slice(len)?;
                String::from_utf8(bytes.to_vec())
                    .map(Some)
                    .map_err(|_| CodecError::InvalidUtf8)
            }
            None => Ok(None),
        }
    }

    /// Read an array length prefix; `None` for null.
    pub fn read_array_length(&mut self) -> Result<Option<usize>, CodecError> {
        match self.read_i32()? {
            -1 => Ok(None),
            n if n < 0 => Err(CodecError::InvalidLength(n)),
            // Every element takes at least one byte.
            n if n as usize > self.remaining() => Err(CodecError::InvalidLength(n)),
            n => Ok(Some(n as usize)),
        }
    }
}

fn put_length(buf: &mut BytesMut, len: Option<usize>) {
    match len {
        Some(len) => buf.put_i32_le(i32::try_from(len).unwrap_or(i32::MAX)),
        None => buf.put_i32_le(-1),
    }
}

/// Write a length-prefixed byte string; `None` encodes null.
pub fn put_byte_string(buf: &mut BytesMut, value: Option<&[u8]>) {
    put_length(buf, value.map(<[u8]>::len));
    if let Some(value) = value {
        buf.put_slice(value);
    }
}

/// Write a length-prefixed UTF-8 string; `None` encodes null.
pub fn put_string(buf: &mut BytesMut, value: Option<&str>) {
    put_byte_string(buf, value.map(str::as_bytes));
}

/// Encoded size of a length-prefixed value.
pub fn byte_string_len(value: Option<&[u8]>) -> usize {
    4 + value.map_or(0, <[u8]>::len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_empty_are_distinct() {
        let mut buf = BytesMut::new();
        put_byte_string(&mut buf, None);
        put_byte_string(&mut buf, Some(&[]));
        assert_eq!(&buf[..], &[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_byte_string().unwrap(), None);
        assert_eq!(reader.read_byte_string().unwrap(), Some(vec![]));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, Some("opc.tcp://localhost:4840"));

        assert_eq!(buf[..4], 24i32.to_le_bytes());
        let mut reader = Reader::new(&buf);
        assert_eq!(
            reader.read_string().unwrap().as_deref(),
            Some("opc.tcp://localhost:4840")
        );
    }

    #[test]
    fn test_truncated_integer() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32().unwrap_err(),
            CodecError::Truncated {
                needed: 4,
                remaining: 3
            }
        );
    }

    #[test]
    fn test_length_beyond_input_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(100);
        buf.put_slice(b"short");

        assert!(matches!(
            Reader::new(&buf).read_byte_string(),
            Err(CodecError::Truncated { needed: 100, .. })
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-2);
        assert_eq!(
            Reader::new(&buf).read_string().unwrap_err(),
            CodecError::InvalidLength(-2)
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = BytesMut::new();
        put_byte_string(&mut buf, Some(&[0xC3, 0x28]));
        assert_eq!(
            Reader::new(&buf).read_string().unwrap_err(),
            CodecError::InvalidUtf8
        );
    }
}
