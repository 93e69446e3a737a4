//! Binary reading and writing utilities for the arena protocol.
//!
//! All values are little-endian. Strings are null-terminated UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// A reader for parsing binary protocol messages.
///
/// Every getter is fallible: client input is untrusted and a short packet
/// must surface as [`ProtocolError::UnexpectedEof`] instead of a panic.
#[derive(Debug)]
pub struct BinaryReader {
    buf: Bytes,
}

impl BinaryReader {
    /// Create a new reader from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    fn ensure(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() >= n {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedEof)
        }
    }

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    #[inline]
    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    #[inline]
    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    #[inline]
    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    /// Read a null-terminated UTF-8 string.
    ///
    /// A missing terminator or invalid UTF-8 is rejected.
    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnexpectedEof)?;
        let raw = self.buf.split_to(end);
        self.buf.advance(1);
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidString)
    }
}

/// A writer for building binary protocol messages.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    /// Write a null-terminated UTF-8 string.
    ///
    /// Interior nulls would end the string early on the reading side, so
    /// they are stripped.
    pub fn put_string(&mut self, s: &str) {
        for b in s.bytes().filter(|&b| b != 0) {
            self.buf.put_u8(b);
        }
        self.buf.put_u8(0);
    }

    /// Consume the writer and return the built buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Get current buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_mixed() {
        let mut w = BinaryWriter::new();
        w.put_u32(0xDEADBEEF);
        w.put_string("hello");
        w.put_u64(10_000_000_000);
        let mut r = BinaryReader::new(w.finish());
        assert_eq!(r.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.get_string().unwrap(), "hello");
        assert_eq!(r.get_u64().unwrap(), 10_000_000_000);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut r = BinaryReader::new(vec![1u8, 2, 3]);
        assert!(matches!(r.get_u32(), Err(ProtocolError::UnexpectedEof)));
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let mut r = BinaryReader::new(b"abc".to_vec());
        assert!(matches!(r.get_string(), Err(ProtocolError::UnexpectedEof)));
    }

    #[test]
    fn test_interior_null_is_stripped() {
        let mut w = BinaryWriter::new();
        w.put_string("a\0b");
        let mut r = BinaryReader::new(w.finish());
        assert_eq!(r.get_string().unwrap(), "ab");
    }
}
