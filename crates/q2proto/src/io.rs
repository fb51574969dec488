// io.rs -- byte source/sink traits and the SizeBuf message buffer
//
// All multi-byte values are little-endian. Strings are NUL terminated on the
// wire; bytes map 1:1 onto chars (Latin-1), so high-bit Quake text survives
// a read/write cycle unchanged.

use crate::error::{Error, Result};

// ============================================================
// Reading
// ============================================================

/// A source of message bytes.
pub trait MsgRead {
    /// Consume exactly `len` bytes. Fails with `NoMoreInput` if fewer are available.
    fn read_raw(&mut self, len: usize) -> Result<&[u8]>;

    /// Number of bytes left to read.
    fn remaining(&self) -> usize;

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_raw(1)?[0])
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_raw(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_raw(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_raw(8)?;
        let mut v = [0u8; 8];
        v.copy_from_slice(b);
        Ok(u64::from_le_bytes(v))
    }

    fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_string(&mut self) -> Result<String> {
        let mut s = String::new();
        loop {
            let c = match self.read_u8() {
                Ok(c) => c,
                // unterminated string
                Err(Error::NoMoreInput) => return Err(Error::BadData),
                Err(e) => return Err(e),
            };
            if c == 0 {
                return Ok(s);
            }
            s.push(c as char);
        }
    }

    fn read_data(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.read_raw(len)?.to_vec())
    }

    /// Q2PRO variable length coordinate: 15 bits (as a difference) or 23 bits (absolute).
    /// Returns the value and whether it is a difference to the previous value.
    fn read_q2pro_i23(&mut self) -> Result<(i32, bool)> {
        let mut c = self.read_i16()? as i32;
        let is_diff = c & 1 == 0;
        if c & 1 != 0 {
            let b = self.read_i8()? as i32;
            c = (c & 0xffff) | (b << 16);
        }
        Ok((c >> 1, is_diff))
    }

    fn read_var_u64(&mut self) -> Result<u64> {
        let mut shift = 0;
        let mut v = 0u64;
        loop {
            let b = self.read_u8()?;
            if shift < 64 {
                v |= ((b & 0x7f) as u64) << shift;
            }
            shift += 7;
            if b & 0x80 == 0 {
                return Ok(v);
            }
        }
    }
}

// ============================================================
// Writing
// ============================================================

/// A sink for message bytes.
pub trait MsgWrite {
    /// Append `data`. Fails with `NotEnoughPacketSpace` if it doesn't fit.
    fn write_raw(&mut self, data: &[u8]) -> Result<()>;

    /// Conservative number of bytes that can still be written.
    fn available(&self) -> usize;

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_raw(&[v])
    }

    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }

    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_raw(&v.to_le_bytes())
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_raw(&v.to_le_bytes())
    }

    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_raw(&v.to_le_bytes())
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_raw(&v.to_le_bytes())
    }

    fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_raw(&v.to_le_bytes())
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.write_u32(v.to_bits())
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        let mut bytes: Vec<u8> = s.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect();
        bytes.push(0);
        self.write_raw(&bytes)
    }

    /// Q2PRO variable length coordinate, as a difference to `prev` when small enough.
    fn write_q2pro_i23(&mut self, x: i32, prev: i32) -> Result<()> {
        let delta = x.wrapping_sub(prev);
        if (-0x4000..0x4000).contains(&delta) {
            self.write_u16((delta as u16) << 1)
        } else {
            let v = ((x << 1) | 1) as u32;
            self.write_raw(&[v as u8, (v >> 8) as u8, (v >> 16) as u8])
        }
    }

    fn write_var_u64(&mut self, mut x: u64) -> Result<()> {
        loop {
            let mut b = (x & 0x7f) as u8;
            x >>= 7;
            if x != 0 {
                b |= 0x80;
            }
            self.write_u8(b)?;
            if x == 0 {
                return Ok(());
            }
        }
    }
}

impl MsgWrite for Vec<u8> {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn available(&self) -> usize {
        usize::MAX - self.len()
    }
}

// ============================================================
// SizeBuf -- bounded message buffer
// ============================================================

/// A bounded buffer that messages are written into and read back from.
#[derive(Debug, Clone, Default)]
pub struct SizeBuf {
    pub overflowed: bool,
    pub data: Vec<u8>,
    pub maxsize: usize,
    pub readcount: usize,
}

impl SizeBuf {
    pub fn new(maxsize: usize) -> Self {
        Self {
            overflowed: false,
            data: Vec::with_capacity(maxsize.min(0x10000)),
            maxsize,
            readcount: 0,
        }
    }

    /// A buffer holding `bytes`, ready for reading.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            overflowed: false,
            data: bytes.to_vec(),
            maxsize: bytes.len(),
            readcount: 0,
        }
    }

    pub fn cursize(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.readcount = 0;
        self.overflowed = false;
    }

    pub fn begin_reading(&mut self) {
        self.readcount = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not read yet.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.readcount.min(self.data.len())..]
    }
}

impl MsgRead for SizeBuf {
    fn read_raw(&mut self, len: usize) -> Result<&[u8]> {
        if self.remaining() < len {
            self.readcount = self.data.len();
            return Err(Error::NoMoreInput);
        }
        let start = self.readcount;
        self.readcount += len;
        Ok(&self.data[start..start + len])
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.readcount)
    }
}

impl MsgWrite for SizeBuf {
    fn write_raw(&mut self, src: &[u8]) -> Result<()> {
        if self.data.len() + src.len() > self.maxsize {
            self.overflowed = true;
            return Err(Error::NotEnoughPacketSpace);
        }
        self.data.extend_from_slice(src);
        Ok(())
    }

    fn available(&self) -> usize {
        self.maxsize.saturating_sub(self.data.len())
    }
}

/// Reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MsgReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl MsgRead for MsgReader<'_> {
    fn read_raw(&mut self, len: usize) -> Result<&[u8]> {
        if self.data.len() - self.pos < len {
            self.pos = self.data.len();
            return Err(Error::NoMoreInput);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
