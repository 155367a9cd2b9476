//! Byte-level read and write primitives.
//!
//! Integers that describe sizes, ids and counts use unsigned LEB128 varints;
//! signed payload integers are zigzag-encoded first. Fixed-width values are
//! little endian.

use crate::error::{CodecError, Result};

/// Growable output buffer for one encode pass.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        WriteBuffer {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn write_i8(&mut self, b: i8) {
        self.bytes.push(b as u8);
    }

    pub fn write_u32_le(&mut self, n: u32) {
        self.bytes.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_f64(&mut self, f: f64) {
        self.bytes.extend_from_slice(&f.to_le_bytes());
    }

    pub fn write_var_u32(&mut self, n: u32) {
        self.write_var_u64(u64::from(n));
    }

    pub fn write_var_u64(&mut self, mut n: u64) {
        while n >= 0x80 {
            self.bytes.push((n as u8) | 0x80);
            n >>= 7;
        }
        self.bytes.push(n as u8);
    }

    /// Writes a signed integer as a zigzag varint.
    pub fn write_var_i64(&mut self, n: i64) {
        self.write_var_u64(((n << 1) ^ (n >> 63)) as u64);
    }

    /// Writes a varint length prefix followed by the raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_var_u64(data.len() as u64);
        self.bytes.extend_from_slice(data);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over an encoded stream.
#[derive(Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ReadBuffer { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(arr))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(arr))
    }

    pub fn read_var_u32(&mut self) -> Result<u32> {
        let n = self.read_var_u64()?;
        u32::try_from(n).map_err(|_| CodecError::protocol(format!("varint {n} overflows u32")))
    }

    pub fn read_var_u64(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(CodecError::protocol("varint overflows u64"));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        let n = self.read_var_u64()?;
        Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_var_u64()?;
        let len = usize::try_from(len).map_err(|_| CodecError::UnexpectedEof)?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_str(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }
}
