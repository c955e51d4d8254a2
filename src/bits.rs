//! Bit-level codec: pack and unpack values of arbitrary width at an arbitrary bit cursor.
//!
//! Values are written MSB-first in network byte order. Sub-byte fields are packed
//! contiguously with no padding; a value may straddle any number of byte boundaries.
//! Byte strings may only be read or written when the cursor is byte-aligned.

use crate::error::Error;

/// Decoding cursor: current byte index plus the bits still unread in that byte (1..=8).
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
    bits_left: u8, // 8 means "at a byte boundary"
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BitReader {
            buf,
            pos: 0,
            bits_left: 8,
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.bits_left == 8
    }

    /// True when no unread bit remains.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Index of the byte holding the next unread bit.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes touched so far, counting a partially consumed byte.
    pub fn consumed(&self) -> usize {
        if self.is_aligned() {
            self.pos
        } else {
            self.pos + 1
        }
    }

    pub fn bit_position(&self) -> usize {
        self.pos * 8 + (8 - self.bits_left as usize)
    }

    pub fn remaining_bytes(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Read `width` bits (at most 64). If the buffer runs out first, the missing
    /// low-order bits read as zero.
    pub fn read(&mut self, width: u32) -> u64 {
        let mut value = 0u64;
        let mut remaining = width;
        while remaining > 0 && self.pos < self.buf.len() {
            let take = remaining.min(self.bits_left as u32) as u8;
            let shift = self.bits_left - take;
            let chunk = (self.buf[self.pos] >> shift) & low_mask(take);
            value = (value << take) | chunk as u64;
            remaining -= take as u32;
            self.bits_left -= take;
            if self.bits_left == 0 {
                self.pos += 1;
                self.bits_left = 8;
            }
        }
        if remaining > 0 {
            value = value.checked_shl(remaining).unwrap_or(0);
        }
        value
    }

    /// Read up to `n` whole bytes; fewer are returned when the buffer is short.
    pub fn read_bytes(&mut self, name: &str, n: usize) -> Result<&'a [u8], Error> {
        if !self.is_aligned() {
            return Err(Error::FieldAlignment(name.to_string()));
        }
        let end = self.pos.saturating_add(n).min(self.buf.len());
        let out = &self.buf[self.pos.min(end)..end];
        self.pos = end;
        Ok(out)
    }

    /// Read every remaining byte.
    pub fn read_rest(&mut self, name: &str) -> Result<&'a [u8], Error> {
        let n = self.remaining_bytes();
        self.read_bytes(name, n)
    }
}

/// Encoding accumulator: completed bytes plus the partial byte under construction.
#[derive(Debug, Clone)]
pub struct BitWriter {
    out: Vec<u8>,
    cur: u8,
    bits_left: u8, // 8 means "at a byte boundary"
}

impl Default for BitWriter {
    fn default() -> Self {
        BitWriter {
            out: Vec::new(),
            cur: 0,
            bits_left: 8,
        }
    }
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aligned(&self) -> bool {
        self.bits_left == 8
    }

    pub fn bit_len(&self) -> usize {
        self.out.len() * 8 + (8 - self.bits_left as usize)
    }

    /// Append the low `width` bits of `value`, most significant bit first.
    pub fn write(&mut self, value: u64, width: u32) {
        let mut remaining = width;
        while remaining > 0 {
            let take = remaining.min(self.bits_left as u32) as u8;
            let chunk = ((value >> (remaining - take as u32)) as u8) & low_mask(take);
            self.cur |= chunk << (self.bits_left - take);
            remaining -= take as u32;
            self.bits_left -= take;
            if self.bits_left == 0 {
                self.out.push(self.cur);
                self.cur = 0;
                self.bits_left = 8;
            }
        }
    }

    pub fn write_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        if !self.is_aligned() {
            return Err(Error::FieldAlignment(name.to_string()));
        }
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    /// Completed bytes; a trailing partial byte is zero-padded.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.is_aligned() {
            self.out.push(self.cur);
        }
        self.out
    }
}

fn low_mask(bits: u8) -> u8 {
    ((1u16 << bits) - 1) as u8
}

/// Largest value representable in `width` bits.
pub fn max_value(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles_share_a_byte() {
        let mut w = BitWriter::new();
        w.write(4, 4);
        w.write(5, 4);
        assert_eq!(w.finish(), vec![0x45]);

        let mut r = BitReader::new(&[0x45]);
        assert_eq!(r.read(4), 4);
        assert!(!r.is_aligned());
        assert_eq!(r.read(4), 5);
        assert!(r.is_exhausted());
    }

    #[test]
    fn fields_straddle_byte_boundaries() {
        // flags(3) = 0b010, offset(13) = 0x1234 & 0x1fff
        let mut w = BitWriter::new();
        w.write(0b010, 3);
        w.write(0x1234, 13);
        let bytes = w.finish();
        assert_eq!(bytes, vec![0x52, 0x34]);

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(3), 0b010);
        assert_eq!(r.read(13), 0x1234);
        assert_eq!(r.bit_position(), 16);
    }

    #[test]
    fn odd_widths_pack_without_padding() {
        let mut w = BitWriter::new();
        w.write(1, 1);
        w.write(0x3f, 6);
        w.write(0x1ff, 9);
        w.write(0xdead_beef_cafe, 48);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 8);

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(1), 1);
        assert_eq!(r.read(6), 0x3f);
        assert_eq!(r.read(9), 0x1ff);
        assert_eq!(r.read(48), 0xdead_beef_cafe);
    }

    #[test]
    fn full_width_values() {
        let mut w = BitWriter::new();
        w.write(3, 2);
        w.write(u64::MAX, 64);
        w.write(0, 6);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(2), 3);
        assert_eq!(r.read(64), u64::MAX);
    }

    #[test]
    fn bytes_require_alignment() {
        let mut w = BitWriter::new();
        w.write(1, 3);
        assert!(matches!(w.write_bytes("s", b"ab"), Err(Error::FieldAlignment(_))));

        let mut r = BitReader::new(b"abc");
        r.read(1);
        assert!(matches!(r.read_bytes("s", 1), Err(Error::FieldAlignment(_))));
    }

    #[test]
    fn truncated_input_reads_missing_bits_as_zero() {
        let mut r = BitReader::new(&[0xab]);
        assert_eq!(r.read(16), 0xab00);
        assert!(r.is_exhausted());

        let mut r = BitReader::new(b"xy");
        assert_eq!(r.read_bytes("s", 6).unwrap(), b"xy");
    }

    #[test]
    fn trailing_partial_byte_is_padded() {
        let mut w = BitWriter::new();
        w.write(0b101, 3);
        assert_eq!(w.bit_len(), 3);
        assert_eq!(w.finish(), vec![0b1010_0000]);
    }
}
