// bits.rs -- bit-granular reading and writing on top of a byte stream
//
// Used by the Q2PRO batched move encoding. Bits are packed LSB first.

use crate::error::{Error, Result};
use crate::io::{MsgRead, MsgWrite};

fn sign_extend(v: u32, bits: u32) -> i32 {
    ((v << (32 - bits)) as i32) >> (32 - bits)
}

pub struct BitWriter<'a> {
    io: &'a mut dyn MsgWrite,
    buf: u32,
    left: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(io: &'a mut dyn MsgWrite) -> Self {
        Self { io, buf: 0, left: 32 }
    }

    /// Write the low `bits` bits of `value`. A negative `bits` marks a
    /// signed value; the encoding is the same.
    pub fn write(&mut self, value: i32, bits: i32) -> Result<()> {
        if bits == 0 || !(-31..=31).contains(&bits) {
            return Err(Error::BadData);
        }
        let bits = bits.unsigned_abs();
        let v = (value as u32) & ((1u32 << bits) - 1);

        self.buf |= v << (32 - self.left);
        if bits >= self.left {
            self.io.write_u32(self.buf)?;
            self.buf = v >> self.left;
            self.left += 32;
        }
        self.left -= bits;
        Ok(())
    }

    /// Write out any partially filled bytes.
    pub fn flush(&mut self) -> Result<()> {
        while self.left < 32 {
            self.io.write_u8((self.buf & 255) as u8)?;
            self.buf >>= 8;
            self.left += 8;
        }
        self.buf = 0;
        self.left = 32;
        Ok(())
    }
}

pub struct BitReader<'a> {
    io: &'a mut dyn MsgRead,
    buf: u32,
    left: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(io: &'a mut dyn MsgRead) -> Self {
        Self { io, buf: 0, left: 0 }
    }

    /// Read `bits` bits. Positive `bits` reads unsigned, negative reads signed.
    pub fn read(&mut self, bits: i32) -> Result<i32> {
        if bits == 0 || !(-25..=25).contains(&bits) {
            return Err(Error::BadData);
        }
        let signed = bits < 0;
        let bits = bits.unsigned_abs();

        while bits > self.left {
            let byte = self.io.read_u8()? as u32;
            self.buf |= byte << self.left;
            self.left += 8;
        }

        let v = self.buf & ((1u32 << bits) - 1);
        self.buf >>= bits;
        self.left -= bits;

        Ok(if signed { sign_extend(v, bits) } else { v as i32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MsgReader;
    use rand::Rng;

    #[test]
    fn test_bits_pack_lsb_first() {
        let mut out = Vec::new();
        let mut w = BitWriter::new(&mut out);
        w.write(1, 1).unwrap();
        w.write(0, 1).unwrap();
        w.write(3, 2).unwrap();
        w.flush().unwrap();
        assert_eq!(out, vec![0b1101]);
    }

    #[test]
    fn test_word_boundary() {
        let mut out = Vec::new();
        let mut w = BitWriter::new(&mut out);
        w.write(0x7fff_ffff, 31).unwrap();
        w.write(0x3, 2).unwrap();
        w.flush().unwrap();
        assert_eq!(out.len(), 5);

        let mut r = MsgReader::new(&out);
        let mut br = BitReader::new(&mut r);
        assert_eq!(br.read(16).unwrap(), 0xffff);
        assert_eq!(br.read(15).unwrap(), 0x7fff);
        assert_eq!(br.read(2).unwrap(), 3);
    }

    #[test]
    fn test_bad_widths() {
        let mut out = Vec::new();
        let mut w = BitWriter::new(&mut out);
        assert_eq!(w.write(1, 0), Err(Error::BadData));
        assert_eq!(w.write(1, 32), Err(Error::BadData));
        let data = [0u8; 8];
        let mut r = MsgReader::new(&data);
        let mut br = BitReader::new(&mut r);
        assert_eq!(br.read(26), Err(Error::BadData));
        assert_eq!(br.read(-26), Err(Error::BadData));
    }

    #[test]
    fn test_reader_inverts_writer() {
        let mut rng = rand::thread_rng();
        let fields: Vec<(i32, i32)> = (0..200)
            .map(|_| {
                let bits: i32 = rng.gen_range(1..=25);
                let signed = rng.gen_bool(0.5);
                if signed {
                    let half = 1i32 << (bits - 1);
                    (rng.gen_range(-half..half), -bits)
                } else {
                    (rng.gen_range(0..(1i32 << bits)), bits)
                }
            })
            .collect();

        let mut out = Vec::new();
        let mut w = BitWriter::new(&mut out);
        for &(v, bits) in &fields {
            w.write(v, bits).unwrap();
        }
        w.flush().unwrap();

        let mut r = MsgReader::new(&out);
        let mut br = BitReader::new(&mut r);
        for &(v, bits) in &fields {
            assert_eq!(br.read(bits).unwrap(), v);
        }
    }

    #[test]
    fn test_short_input() {
        let data = [0xffu8];
        let mut r = MsgReader::new(&data);
        let mut br = BitReader::new(&mut r);
        assert_eq!(br.read(4).unwrap(), 0xf);
        assert_eq!(br.read(8), Err(Error::NoMoreInput));
    }
}
