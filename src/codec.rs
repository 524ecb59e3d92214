//! Varint primitives for the binary value and record encoding
//!
//! Integers are written as base-128 varints: each byte carries 7 data bits,
//! least significant group first, and the high bit marks that more bytes
//! follow. Signed integers are zig-zag mapped first so small magnitudes stay
//! short.
//!
//! ```text
//!   300 = 0b1_0010_1100
//!        -> [1010_1100] [0000_0010]
//!            ^ more      ^ last
//! ```

use crate::error::CodecError;

/// Append `value` as a varint
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80; // More bytes follow
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Read a varint from the start of `data`, returning the value and bytes consumed
pub fn read_varint(data: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        let group = (byte & 0x7F) as u64;
        // The tenth byte may only contribute the single remaining bit
        if shift == 63 && group > 1 {
            return Err(CodecError::VarintOverflow(i));
        }
        result |= group << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err(CodecError::VarintOverflow(i));
        }
    }

    Err(CodecError::Truncated {
        offset: data.len(),
        needed: 1,
    })
}

/// Number of bytes `value` occupies as a varint
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Map a signed integer onto an unsigned one with small magnitudes first
pub fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode`]
pub fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}

// ============================================================================
// Reader
// ============================================================================

/// Cursor over an encoded buffer
///
/// Tracks the absolute offset so decode errors can point at the failing byte.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether all input has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a single byte
    pub fn byte(&mut self) -> Result<u8, CodecError> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::Truncated {
            offset: self.pos,
            needed: 1,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a varint
    pub fn varint(&mut self) -> Result<u64, CodecError> {
        match read_varint(&self.data[self.pos..]) {
            Ok((value, used)) => {
                self.pos += used;
                Ok(value)
            },
            Err(CodecError::VarintOverflow(at)) => Err(CodecError::VarintOverflow(self.pos + at)),
            Err(CodecError::Truncated { needed, .. }) => Err(CodecError::Truncated {
                offset: self.data.len(),
                needed,
            }),
            Err(e) => Err(e),
        }
    }

    /// Read a varint used as a length and check it fits the remaining input
    pub fn length(&mut self) -> Result<usize, CodecError> {
        let len = self.varint()?;
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: usize::try_from(len).unwrap_or(usize::MAX) - remaining,
            });
        }
        Ok(len as usize)
    }

    /// Read exactly `len` bytes
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Fail if input remains
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_known_encodings() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0);
        assert_eq!(buf, [0x00]);

        buf.clear();
        write_varint(&mut buf, 127);
        assert_eq!(buf, [0x7F]);

        buf.clear();
        write_varint(&mut buf, 300);
        assert_eq!(buf, [0xAC, 0x02]);

        buf.clear();
        write_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), 10);
        assert_eq!(read_varint(&buf).unwrap(), (u64::MAX, 10));
    }

    #[test]
    fn test_varint_len_matches_encoding() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(varint_len(value), buf.len(), "value {}", value);
        }
    }

    #[test]
    fn test_varint_truncated() {
        assert!(matches!(
            read_varint(&[0x80, 0x80]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(read_varint(&[]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_varint_overflow() {
        let too_long = [0xFFu8; 11];
        assert!(matches!(
            read_varint(&too_long),
            Err(CodecError::VarintOverflow(_))
        ));

        // Ten bytes whose last group exceeds the 64th bit
        let mut wide = vec![0xFFu8; 9];
        wide.push(0x02);
        assert!(matches!(read_varint(&wide), Err(CodecError::VarintOverflow(9))));
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for n in [i64::MIN, -12345, 0, 98765, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(n)), n);
        }
    }

    #[test]
    fn test_reader_tracks_offsets() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        buf.extend_from_slice(b"abc");

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.varint().unwrap(), 300);
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.bytes(3).unwrap(), b"abc");
        assert!(reader.finish().is_ok());
        assert!(matches!(reader.byte(), Err(CodecError::Truncated { offset: 5, .. })));
    }

    #[test]
    fn test_reader_length_bounds() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 10);
        buf.extend_from_slice(b"short");
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.length(),
            Err(CodecError::Truncated { needed: 5, .. })
        ));
    }
}
