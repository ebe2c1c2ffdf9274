//! Raw (`R64`) payload unpacking.
//!
//! Raw frames are streams of big-endian 64-bit words. Counters sit in the
//! word from its least significant end, so after splitting a word into
//! counters in stream order the counters of each word appear reversed.
//! The permutation table restores pixel order by flipping every group of
//! counters that shares a word: 64 for 1-bit, 8 for 6-bit (one byte per
//! counter) and 4 for 12-bit (two bytes per counter) data.

use crate::{Error, Result};
use ricom_core::signal::FrameData;

/// Pixel permutation and unpacking for one raw bit depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLayout {
    depth: u8,
    pixels: usize,
    order: Vec<usize>,
}

impl RawLayout {
    /// Builds the permutation table for `pixels` counters of `depth` bits.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDepth`] for depths other than 1, 6 and 12.
    pub fn new(depth: u8, pixels: usize) -> Result<Self> {
        let group = Self::group_size(depth)?;
        let order = (0..pixels)
            .map(|p| {
                let base = p - p % group;
                let flipped = base + (group - 1 - p % group);
                // A trailing partial group keeps its order
                if flipped < pixels {
                    flipped
                } else {
                    p
                }
            })
            .collect();
        Ok(Self {
            depth,
            pixels,
            order,
        })
    }

    /// Counters per 64-bit word.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDepth`] for depths other than 1, 6 and 12.
    pub fn group_size(depth: u8) -> Result<usize> {
        // Merlin R64 readout pads 6-bit counters to 8-bit slots and 12-bit
        // counters to 16-bit slots, so a 64-bit word holds 8 or 4 of them.
        match depth {
            1 => Ok(64),
            6 => Ok(8),
            12 => Ok(4),
            other => Err(Error::UnsupportedDepth(other)),
        }
    }

    /// Configured bit depth.
    #[must_use]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Source index of every output pixel.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Converts a raw payload into pixel values in raster order.
    ///
    /// `payload` must hold the packed bytes at its start; it is used as
    /// scratch space for 1-bit unpacking.
    ///
    /// # Errors
    /// Returns [`Error::PrematureEnd`] when the payload is too short.
    pub fn decode(&self, payload: &mut Vec<u8>) -> Result<FrameData> {
        match self.depth {
            1 => {
                let packed = self.pixels.div_ceil(8);
                check_len(payload, packed)?;
                unpack_bits(payload, packed);
                Ok(FrameData::U8(self.permute(&payload[..self.pixels])))
            }
            6 => {
                check_len(payload, self.pixels)?;
                Ok(FrameData::U8(self.permute(&payload[..self.pixels])))
            }
            _ => {
                check_len(payload, self.pixels * 2)?;
                let counters: Vec<u16> = payload[..self.pixels * 2]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]) & 0x0FFF)
                    .collect();
                Ok(FrameData::U16(self.permute(&counters)))
            }
        }
    }

    fn permute<T: Copy>(&self, src: &[T]) -> Vec<T> {
        self.order.iter().map(|&i| src[i]).collect()
    }
}

fn check_len(payload: &[u8], needed: usize) -> Result<()> {
    if payload.len() < needed {
        return Err(Error::PrematureEnd {
            expected: needed,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Expands `packed` bytes at the start of `buf` into one 0/1 byte per bit,
/// most significant bit first.
///
/// Works in place from the last byte backwards so no unread source byte is
/// overwritten.
pub fn unpack_bits(buf: &mut Vec<u8>, packed: usize) {
    if buf.len() < packed * 8 {
        buf.resize(packed * 8, 0);
    }
    for i in (0..packed).rev() {
        let byte = buf[i];
        for bit in 0..8 {
            buf[i * 8 + bit] = (byte >> (7 - bit)) & 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_in_place() {
        let mut buf = vec![0b1000_0001, 0b0100_0000];
        unpack_bits(&mut buf, 2);
        assert_eq!(buf, vec![1, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_group_flip() {
        let layout = RawLayout::new(12, 8).unwrap();
        assert_eq!(layout.order(), &[3, 2, 1, 0, 7, 6, 5, 4]);
        let layout = RawLayout::new(6, 10).unwrap();
        assert_eq!(&layout.order()[..8], &[7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(&layout.order()[8..], &[8, 9]);
        assert!(RawLayout::new(4, 8).is_err());
    }

    #[test]
    fn test_one_bit_word_is_little_end_first() {
        // Pixel 0 set: least significant bit of the word, last byte on the wire
        let layout = RawLayout::new(1, 64).unwrap();
        let mut payload = vec![0u8; 8];
        payload[7] = 0x01;
        let FrameData::U8(pixels) = layout.decode(&mut payload).unwrap() else {
            panic!("expected 8-bit pixels");
        };
        assert_eq!(pixels[0], 1);
        assert_eq!(pixels.iter().map(|&v| u32::from(v)).sum::<u32>(), 1);
    }

    #[test]
    fn test_twelve_bit_counters() {
        let layout = RawLayout::new(12, 4).unwrap();
        // Word holds counters 3, 2, 1, 0 in stream order
        let mut payload = vec![0x00, 0x04, 0x00, 0x03, 0x00, 0x02, 0x0F, 0xFF];
        let data = layout.decode(&mut payload).unwrap();
        assert_eq!(data, FrameData::U16(vec![0x0FFF, 2, 3, 4]));
    }
}
