//! Little-endian cursor helpers for PTP data sets.
//!
//! PTP strings are a u8 character count (including the trailing NUL)
//! followed by UTF-16LE code units. Arrays are a u32 element count followed
//! by the elements.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Unknown packet kind: 0x{0:08X}")]
    UnknownPacketKind(u32),
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Invalid packet length: {0}")]
    InvalidLength(u32),
    #[error("Unknown data type: 0x{0:04X}")]
    UnknownDataType(u16),
    #[error("Invalid UTF-16 string")]
    InvalidString,
}

/// Bounds-checked reader over a PTP payload.
pub struct PtpReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

macro_rules! read_fixed {
    ($name:ident, $ty:ty, $size:expr, $read:ident) => {
        pub fn $name(&mut self) -> Result<$ty, DecodeError> {
            self.require($size)?;
            self.cursor
                .$read::<LittleEndian>()
                .map_err(|e| DecodeError::MalformedPayload(e.to_string()))
        }
    };
}

impl<'a> PtpReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Reader positioned at `offset` inside `data`.
    pub fn at(data: &'a [u8], offset: usize) -> Result<Self, DecodeError> {
        if offset > data.len() {
            return Err(DecodeError::MalformedPayload(format!(
                "offset {} beyond {} byte payload",
                offset,
                data.len()
            )));
        }
        let mut reader = Self::new(data);
        reader.cursor.set_position(offset as u64);
        Ok(reader)
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    fn require(&self, n: usize) -> Result<(), DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::MalformedPayload(format!(
                "need {} bytes at offset {}, {} left",
                n,
                self.position(),
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.require(1)?;
        self.cursor
            .read_u8()
            .map_err(|e| DecodeError::MalformedPayload(e.to_string()))
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        self.require(1)?;
        self.cursor
            .read_i8()
            .map_err(|e| DecodeError::MalformedPayload(e.to_string()))
    }

    read_fixed!(u16, u16, 2, read_u16);
    read_fixed!(i16, i16, 2, read_i16);
    read_fixed!(u32, u32, 4, read_u32);
    read_fixed!(i32, i32, 4, read_i32);
    read_fixed!(u64, u64, 8, read_u64);
    read_fixed!(i64, i64, 8, read_i64);
    read_fixed!(u128, u128, 16, read_u128);
    read_fixed!(i128, i128, 16, read_i128);

    /// Take `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.require(n)?;
        let start = self.position();
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }

    /// Everything left in the payload.
    pub fn rest(&mut self) -> &'a [u8] {
        let start = self.position().min(self.cursor.get_ref().len());
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position(data.len() as u64);
        &data[start..]
    }

    /// Count-prefixed PTP string.
    pub fn string(&mut self) -> Result<String, DecodeError> {
        let count = self.u8()? as usize;
        if count == 0 {
            return Ok(String::new());
        }
        self.require(count * 2)?;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(self.u16()?);
        }
        if units.last() == Some(&0) {
            units.pop();
        }
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidString)
    }

    /// NUL-terminated UTF-16LE string, as used in init packets.
    pub fn wide_cstring(&mut self) -> Result<String, DecodeError> {
        let mut units = Vec::new();
        loop {
            let unit = self.u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidString)
    }

    /// u32-count-prefixed array of u16.
    pub fn u16_array(&mut self) -> Result<Vec<u16>, DecodeError> {
        let count = self.u32()? as usize;
        self.require(count.saturating_mul(2))?;
        (0..count).map(|_| self.u16()).collect()
    }
}

/// Little-endian writers for PTP data sets.
pub trait PtpWrite {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    fn put_string(&mut self, s: &str);
    fn put_wide_cstring(&mut self, s: &str);
    fn put_u16_array(&mut self, values: &[u16]);
}

impl PtpWrite for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_string(&mut self, s: &str) {
        if s.is_empty() {
            self.put_u8(0);
            return;
        }
        // Count is a u8 and includes the NUL, so cap at 254 units.
        let units: Vec<u16> = s.encode_utf16().take(254).collect();
        self.put_u8((units.len() + 1) as u8);
        for unit in units {
            self.put_u16(unit);
        }
        self.put_u16(0);
    }

    fn put_wide_cstring(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.put_u16(unit);
        }
        self.put_u16(0);
    }

    fn put_u16_array(&mut self, values: &[u16]) {
        self.put_u32(values.len() as u32);
        for &v in values {
            self.put_u16(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let mut buf = Vec::new();
        buf.put_string("ILCE-7M3");
        assert_eq!(buf[0], 9);
        let mut reader = PtpReader::new(&buf);
        assert_eq!(reader.string().unwrap(), "ILCE-7M3");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_empty_string_is_single_zero() {
        let mut buf = Vec::new();
        buf.put_string("");
        assert_eq!(buf, vec![0]);
        assert_eq!(PtpReader::new(&buf).string().unwrap(), "");
    }

    #[test]
    fn test_short_read_is_malformed() {
        let mut reader = PtpReader::new(&[0x01, 0x02, 0x03]);
        assert!(matches!(
            reader.u32(),
            Err(DecodeError::MalformedPayload(_))
        ));
        // Failed read does not move the cursor.
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_array_count_larger_than_payload() {
        let mut buf = Vec::new();
        buf.put_u32(1000);
        buf.put_u16(1);
        assert!(PtpReader::new(&buf).u16_array().is_err());
    }
}
