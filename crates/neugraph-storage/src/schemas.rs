//! Binary schema definitions and utilities

use crate::error::{Result, StorageError};

/// Validate magic number for a binary format
pub fn validate_magic(data: &[u8], expected: [u8; 4]) -> Result<()> {
    if data.len() < 4 {
        return Err(StorageError::InvalidFormat {
            reason: "Data too short for magic number".to_string(),
        });
    }

    let found = [data[0], data[1], data[2], data[3]];
    if found != expected {
        return Err(StorageError::InvalidMagic { expected, found });
    }

    Ok(())
}

/// Calculate CRC32 checksum
pub fn calculate_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Validate checksum
pub fn validate_checksum(data: &[u8], expected: u32) -> Result<()> {
    let computed = calculate_checksum(data);
    if computed != expected {
        return Err(StorageError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Bounds-checked slice of `len` bytes at `offset`
pub fn byte_range(data: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let start = usize::try_from(offset)
        .map_err(|_| StorageError::invalid_format("offset does not fit in memory"))?;
    let len = usize::try_from(len)
        .map_err(|_| StorageError::invalid_format("length does not fit in memory"))?;
    let end = start
        .checked_add(len)
        .ok_or_else(|| StorageError::invalid_format("range overflows"))?;
    data.get(start..end).ok_or(StorageError::OutOfBounds {
        index: end,
        max: data.len(),
    })
}

/// Little-endian cursor over a byte slice
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Take the next `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(StorageError::invalid_format(format!(
                "unexpected end of data: need {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    /// Read a `u8`
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a little-endian `u16`
    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `u32`
    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `u64`
    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `f64`
    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Read a `u16`-length-prefixed UTF-8 string
    pub fn short_str(&mut self) -> Result<&'a str> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| StorageError::invalid_format(format!("invalid UTF-8 string: {}", e)))
    }
}

/// Append a `u16`-length-prefixed UTF-8 string
pub fn put_short_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        StorageError::invalid_format(format!("string too long ({} bytes)", s.len()))
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}
