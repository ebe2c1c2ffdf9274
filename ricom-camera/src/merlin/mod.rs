//! Frame-based Merlin decoder.
//!
//! Reads `.mib` recordings and live Merlin TCP streams. Over a socket the
//! stream opens with an `MPX,<len>,` prefix and an acquisition metadata
//! block, and every frame is preceded by its own `MPX,<len>,` prefix.

mod header;
mod raw;

pub use header::{
    parse_socket_prefix, read_leading_fields, MerlinHeader, PixelType, FRAME_ID, HEADER_FIELDS,
    SOCKET_PREFIX_LEN,
};
pub use raw::{unpack_bits, RawLayout};

use crate::stream::{discard, read_full, read_record};
use crate::{CameraFamily, Decoder, Error, Result};
use ricom_core::signal::{Frame, FrameData, Record};
use std::io::Read;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Merlin decoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MerlinConfig {
    /// Counter depth of `R64` payloads (1, 6 or 12).
    pub raw_depth: u8,
    /// Multi-byte counters are big-endian on the wire.
    pub big_endian: bool,
    /// Expect `MPX` socket framing.
    pub socket_framing: bool,
}

impl Default for MerlinConfig {
    fn default() -> Self {
        Self {
            raw_depth: 1,
            big_endian: true,
            socket_framing: false,
        }
    }
}

impl MerlinConfig {
    /// Set the raw counter depth.
    #[must_use]
    pub fn with_raw_depth(mut self, depth: u8) -> Self {
        self.raw_depth = depth;
        self
    }

    /// Set the raw counter depth, rejecting unsupported values.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDepth`] for depths other than 1, 6 and 12.
    pub fn try_with_raw_depth(self, depth: u8) -> Result<Self> {
        RawLayout::group_size(depth)?;
        Ok(self.with_raw_depth(depth))
    }

    /// Set the counter byte order.
    #[must_use]
    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Enable or disable socket framing.
    #[must_use]
    pub fn with_socket_framing(mut self, enabled: bool) -> Self {
        self.socket_framing = enabled;
        self
    }
}

/// Sequential decoder of Merlin frames.
pub struct MerlinDecoder<R> {
    reader: R,
    config: MerlinConfig,
    header: Option<MerlinHeader>,
    raw: Option<RawLayout>,
    header_buf: Vec<u8>,
    payload: Vec<u8>,
    acquisition_opened: bool,
    next_position: usize,
    frames_read: u64,
}

impl<R: Read> MerlinDecoder<R> {
    /// Creates a decoder over a byte stream.
    ///
    /// # Errors
    /// Returns an error if the raw depth is unsupported.
    pub fn new(reader: R, config: MerlinConfig) -> Result<Self> {
        RawLayout::group_size(config.raw_depth)?;
        Ok(Self {
            reader,
            config,
            header: None,
            raw: None,
            header_buf: Vec::new(),
            payload: Vec::new(),
            acquisition_opened: false,
            next_position: 0,
            frames_read: 0,
        })
    }

    /// Header of the first frame, once read.
    #[must_use]
    pub fn header(&self) -> Option<&MerlinHeader> {
        self.header.as_ref()
    }

    /// Frames read so far, skipped frames included.
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Consumes the acquisition prefix and metadata block.
    ///
    /// Returns false on a clean end of stream.
    fn open_acquisition(&mut self) -> Result<bool> {
        let mut prefix = [0u8; SOCKET_PREFIX_LEN];
        if !read_record(&mut self.reader, &mut prefix)? {
            return Ok(false);
        }
        let len = parse_socket_prefix(&prefix)?;
        let mut metadata = vec![0u8; len];
        read_full(&mut self.reader, &mut metadata)?;
        let text = String::from_utf8_lossy(&metadata);
        log::info!(
            "merlin acquisition header ({} bytes): {}",
            len,
            text.lines().next().unwrap_or_default()
        );
        log::debug!("merlin acquisition metadata: {}", text);
        Ok(true)
    }

    /// Reads one frame header; `None` on a clean end of stream.
    fn read_header(&mut self) -> Result<Option<MerlinHeader>> {
        if let Some(first) = self.header {
            self.header_buf.resize(first.header_len, 0);
            if !read_record(&mut self.reader, &mut self.header_buf)? {
                return Ok(None);
            }
            let header = MerlinHeader::parse(&self.header_buf)?;
            if header.size() != first.size() || header.dtype != first.dtype {
                return Err(Error::GeometryChanged {
                    expected: first.size(),
                    actual: header.size(),
                });
            }
            return Ok(Some(header));
        }

        let Some(leading) = read_leading_fields(&mut self.reader)? else {
            return Ok(None);
        };
        let header = MerlinHeader::parse(&leading)?;
        if header.header_len < leading.len() {
            return Err(Error::InvalidHeader {
                field: "header_len",
                value: header.header_len.to_string(),
            });
        }
        discard(&mut self.reader, header.header_len - leading.len())?;
        log::info!(
            "merlin frames: {}x{} {:?}, {} chip(s), header {} bytes",
            header.width,
            header.height,
            header.dtype,
            header.chips,
            header.header_len
        );
        if header.dtype == PixelType::Raw {
            self.raw = Some(RawLayout::new(
                self.config.raw_depth,
                header.width * header.height,
            )?);
        }
        self.header = Some(header);
        Ok(Some(header))
    }

    /// Reads one frame; `None` on a clean end of stream.
    fn read_frame(&mut self, keep: bool) -> Result<Option<Frame>> {
        if self.config.socket_framing {
            if !self.acquisition_opened {
                if !self.open_acquisition()? {
                    return Ok(None);
                }
                self.acquisition_opened = true;
            }
            let mut prefix = [0u8; SOCKET_PREFIX_LEN];
            if !read_record(&mut self.reader, &mut prefix)? {
                return Ok(None);
            }
            let announced = parse_socket_prefix(&prefix)?;
            if let Some(first) = self.header {
                let expected = first.header_len
                    + first
                        .dtype
                        .payload_len(first.width, first.height, self.config.raw_depth)?;
                if announced != expected {
                    return Err(Error::InvalidFraming(format!(
                        "frame announced {announced} bytes, expected {expected}"
                    )));
                }
            }
        }

        let Some(header) = self.read_header()? else {
            return Ok(None);
        };
        let len = header
            .dtype
            .payload_len(header.width, header.height, self.config.raw_depth)?;
        self.frames_read += 1;
        log::trace!("merlin frame {}", header.frame_number);

        if !keep {
            discard(&mut self.reader, len)?;
            return Ok(None);
        }

        self.payload.resize(len, 0);
        read_full(&mut self.reader, &mut self.payload)?;
        let data = match header.dtype {
            PixelType::U8 => FrameData::U8(self.payload.clone()),
            PixelType::U16 => FrameData::u16_from_bytes(&self.payload, self.config.big_endian),
            PixelType::U32 => FrameData::u32_from_bytes(&self.payload, self.config.big_endian),
            PixelType::Raw => match &self.raw {
                Some(layout) => layout.decode(&mut self.payload)?,
                None => return Err(Error::UnsupportedDtype("R64".to_string())),
            },
        };
        Ok(Some(Frame::new(header.width, header.height, data)?))
    }
}

impl<R: Read + Send> Decoder for MerlinDecoder<R> {
    fn family(&self) -> CameraFamily {
        CameraFamily::Merlin
    }

    fn decode_next(&mut self) -> Result<Option<Record>> {
        let Some(frame) = self.read_frame(true)? else {
            return Ok(None);
        };
        let record = Record::frame(self.next_position, frame);
        self.next_position += 1;
        Ok(Some(record))
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        for skipped in 0..n {
            let before = self.frames_read;
            self.read_frame(false)?;
            if self.frames_read == before {
                log::debug!("stream ended after {skipped} of {n} flyback frames");
                break;
            }
        }
        Ok(())
    }

    fn camera_size(&self) -> Option<(usize, usize)> {
        self.header.map(|h| h.size())
    }
}
