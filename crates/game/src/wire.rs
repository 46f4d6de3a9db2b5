//! Little-endian byte codec shared by every game message.
//!
//! Strings are written as a `u32` byte length followed by UTF-8 bytes.

use glam::IVec2;
use uuid::Uuid;

pub const MAX_STRING_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("unknown entity kind {0}")]
    UnknownKind(u8),
    #[error("string of {0} bytes exceeds limit")]
    StringTooLong(usize),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("negative entity count {0}")]
    NegativeCount(i32),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_id(&mut self, id: Uuid) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    pub fn write_ivec2(&mut self, value: IVec2) {
        self.write_i32(value.x);
        self.write_i32(value.y);
    }

    /// Strings longer than [`MAX_STRING_LEN`] are cut at the last char
    /// boundary that fits so the reader never rejects our own output.
    pub fn write_str(&mut self, value: &str) {
        let mut end = value.len().min(MAX_STRING_LEN);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &value.as_bytes()[..end];
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }
}

#[derive(Debug)]
pub struct WireReader<'a> {
    inp: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(inp: &'a [u8]) -> Self {
        Self { inp }
    }

    pub fn remaining(&self) -> usize {
        self.inp.len()
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        if self.inp.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.inp.len()))
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.inp.len() < n {
            return Err(DecodeError::UnexpectedEof {
                needed: n,
                remaining: self.inp.len(),
            });
        }
        let (head, tail) = self.inp.split_at(n);
        self.inp = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_id(&mut self) -> Result<Uuid, DecodeError> {
        Ok(Uuid::from_bytes(self.take_array()?))
    }

    pub fn read_ivec2(&mut self) -> Result<IVec2, DecodeError> {
        let x = self.read_i32()?;
        let y = self.read_i32()?;
        Ok(IVec2::new(x, y))
    }

    /// Consumes everything left in the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.inp)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(DecodeError::StringTooLong(len));
        }
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_reports_sizes() {
        let mut reader = WireReader::new(&[1, 2]);
        assert_eq!(
            reader.read_u32(),
            Err(DecodeError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_values_are_little_endian() {
        let mut writer = WireWriter::new();
        writer.write_i32(-2);
        writer.write_u32(0x0102_0304);
        assert_eq!(
            writer.into_bytes(),
            vec![0xFE, 0xFF, 0xFF, 0xFF, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_oversized_string_rejected_on_read() {
        let mut writer = WireWriter::new();
        writer.write_u32((MAX_STRING_LEN + 1) as u32);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(
            reader.read_string(),
            Err(DecodeError::StringTooLong(MAX_STRING_LEN + 1))
        );
    }

    #[test]
    fn test_long_string_truncated_on_char_boundary() {
        let text = "é".repeat(MAX_STRING_LEN);
        let mut writer = WireWriter::new();
        writer.write_str(&text);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        let decoded = reader.read_string().unwrap();
        assert!(decoded.len() <= MAX_STRING_LEN);
        assert!(decoded.chars().all(|c| c == 'é'));
        reader.finish().unwrap();
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut writer = WireWriter::new();
        writer.write_u32(2);
        writer.write_u8(0xC3);
        writer.write_u8(0x28);
        let bytes = writer.into_bytes();
        assert_eq!(
            WireReader::new(&bytes).read_string(),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let reader = WireReader::new(&[0]);
        assert_eq!(reader.finish(), Err(DecodeError::TrailingBytes(1)));
    }
}
