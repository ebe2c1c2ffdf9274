//! Merlin frame header and socket framing.
//!
//! A frame header is ASCII, comma separated, padded to the length given in
//! its own third field:
//!
//! ```text
//! MQ1,000001,00384,01,0256,0256,U16,   1x1,01,2024-01-01 ...
//! ```
//!
//! Only the first seven fields (id, frame number, header length, chip
//! count, width, height, pixel type) are interpreted.

use crate::stream::{read_full, read_record};
use crate::{Error, Result};
use std::io::Read;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier that opens every frame header.
pub const FRAME_ID: &str = "MQ1";

/// Length of the `MPX,<10 digits>,` socket prefix.
pub const SOCKET_PREFIX_LEN: usize = 15;

/// Number of leading header fields the decoder interprets.
pub const HEADER_FIELDS: usize = 7;

/// Largest frame accepted, in pixels.
pub const MAX_FRAME_PIXELS: usize = 1 << 24;

/// Largest header length accepted, in bytes.
pub const MAX_HEADER_LEN: usize = 1 << 16;

/// Largest block a socket prefix may announce.
pub const MAX_SOCKET_BLOCK: usize = MAX_HEADER_LEN + 4 * MAX_FRAME_PIXELS;

const MAX_LEADING_BYTES: usize = 1024;

/// Pixel encoding announced by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PixelType {
    /// 8-bit counters.
    U8,
    /// 16-bit counters.
    U16,
    /// 32-bit counters.
    U32,
    /// Bit-packed raw counters in 64-bit words; the depth is configured externally.
    Raw,
}

impl PixelType {
    /// Parses a header pixel-type tag.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] for unknown tags.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "U08" | "U8" => Ok(PixelType::U8),
            "U16" => Ok(PixelType::U16),
            "U32" => Ok(PixelType::U32),
            "R64" => Ok(PixelType::Raw),
            other => Err(Error::UnsupportedDtype(other.to_string())),
        }
    }

    /// Payload size in bytes of a `width x height` frame.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDepth`] for a raw depth other than 1, 6 or 12,
    /// and [`Error::InvalidHeader`] for a frame above [`MAX_FRAME_PIXELS`].
    pub fn payload_len(self, width: usize, height: usize, raw_depth: u8) -> Result<usize> {
        let pixels = frame_pixels(width, height)?;
        Ok(match self {
            PixelType::U8 => pixels,
            PixelType::U16 => pixels * 2,
            PixelType::U32 => pixels * 4,
            PixelType::Raw => match raw_depth {
                1 => pixels.div_ceil(8),
                6 => pixels,
                12 => pixels * 2,
                other => return Err(Error::UnsupportedDepth(other)),
            },
        })
    }
}

/// Interpreted fields of one frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MerlinHeader {
    /// Running frame number.
    pub frame_number: u64,
    /// Total header length in bytes, padding included.
    pub header_len: usize,
    /// Number of chips.
    pub chips: u32,
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Pixel encoding.
    pub dtype: PixelType,
}

impl MerlinHeader {
    /// Parses the leading fields of a header.
    ///
    /// Parsing stops after the seventh field or at the end of the line.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeader`] when a field is missing, not a number
    /// or out of range, and [`Error::UnsupportedDtype`] for an unknown pixel
    /// type.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        let line = text.split(['\n', '\r']).next().unwrap_or_default();
        let fields: Vec<&str> = line
            .split(',')
            .take(HEADER_FIELDS)
            .map(|f| f.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
            .collect();

        let id = field_text(&fields, 0, "id")?;
        if id != FRAME_ID {
            return Err(Error::InvalidHeader {
                field: "id",
                value: id.to_string(),
            });
        }

        let header = Self {
            frame_number: parse_field(&fields, 1, "frame_number")?,
            header_len: parse_field(&fields, 2, "header_len")?,
            chips: parse_field(&fields, 3, "chips")?,
            width: parse_field(&fields, 4, "width")?,
            height: parse_field(&fields, 5, "height")?,
            dtype: PixelType::parse(field_text(&fields, 6, "dtype")?)?,
        };
        if header.width == 0 || header.height == 0 {
            return Err(Error::InvalidHeader {
                field: "width",
                value: format!("{}x{}", header.width, header.height),
            });
        }
        frame_pixels(header.width, header.height)?;
        if header.header_len > MAX_HEADER_LEN {
            return Err(Error::InvalidHeader {
                field: "header_len",
                value: header.header_len.to_string(),
            });
        }
        Ok(header)
    }

    /// Frame geometry `(width, height)`.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

fn frame_pixels(width: usize, height: usize) -> Result<usize> {
    width
        .checked_mul(height)
        .filter(|&pixels| pixels <= MAX_FRAME_PIXELS)
        .ok_or_else(|| Error::InvalidHeader {
            field: "width",
            value: format!("{width}x{height}"),
        })
}

fn field_text<'a>(fields: &[&'a str], idx: usize, name: &'static str) -> Result<&'a str> {
    fields.get(idx).copied().ok_or(Error::InvalidHeader {
        field: name,
        value: String::from("<missing>"),
    })
}

fn parse_field<T: FromStr>(fields: &[&str], idx: usize, name: &'static str) -> Result<T> {
    let text = field_text(fields, idx, name)?;
    text.parse().map_err(|_| Error::InvalidHeader {
        field: name,
        value: text.to_string(),
    })
}

/// Reads the leading fields of the first header one byte at a time.
///
/// Stops after the seventh comma. Returns `Ok(None)` on a clean end of
/// stream before the first byte.
///
/// # Errors
/// Returns an error if the stream ends inside the header or no separator
/// shows up within a sane length.
pub fn read_leading_fields<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut byte = [0u8; 1];
    if !read_record(reader, &mut byte)? {
        return Ok(None);
    }
    let mut out = vec![byte[0]];
    let mut commas = usize::from(byte[0] == b',');
    while commas < HEADER_FIELDS {
        if out.len() >= MAX_LEADING_BYTES {
            return Err(Error::InvalidHeader {
                field: "dtype",
                value: String::from_utf8_lossy(&out).into_owned(),
            });
        }
        read_full(reader, &mut byte)?;
        out.push(byte[0]);
        match byte[0] {
            b',' => commas += 1,
            b'\n' => break,
            _ => {}
        }
    }
    Ok(Some(out))
}

/// Parses a 15-byte `MPX,<length>,` socket prefix and returns the length.
///
/// # Errors
/// Returns [`Error::InvalidFraming`] if the prefix is malformed or announces
/// more than [`MAX_SOCKET_BLOCK`] bytes.
pub fn parse_socket_prefix(prefix: &[u8]) -> Result<usize> {
    if prefix.len() != SOCKET_PREFIX_LEN || &prefix[..4] != b"MPX," || prefix[14] != b',' {
        return Err(Error::InvalidFraming(format!(
            "expected MPX prefix, got {:?}",
            String::from_utf8_lossy(prefix)
        )));
    }
    let digits = String::from_utf8_lossy(&prefix[4..14]);
    let len: usize = digits.trim().parse().map_err(|_| {
        Error::InvalidFraming(format!("prefix length {digits:?} is not a number"))
    })?;
    if len > MAX_SOCKET_BLOCK {
        return Err(Error::InvalidFraming(format!(
            "prefix announces {len} bytes, limit is {MAX_SOCKET_BLOCK}"
        )));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "MQ1,000042,00384,01,0256,0128,U16,   1x1,01,2024-01-01";

    #[test]
    fn test_parse_fields() {
        let header = MerlinHeader::parse(HEADER.as_bytes()).unwrap();
        assert_eq!(header.frame_number, 42);
        assert_eq!(header.header_len, 384);
        assert_eq!(header.chips, 1);
        assert_eq!(header.size(), (256, 128));
        assert_eq!(header.dtype, PixelType::U16);
    }

    #[test]
    fn test_bad_geometry_is_an_error() {
        let err = MerlinHeader::parse(b"MQ1,000001,00384,01,02x6,0256,U08,").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { field: "width", .. }));
        let err = MerlinHeader::parse(b"MQ1,000001,00384,01,0256").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { field: "height", .. }));
        let err = MerlinHeader::parse(b"XX1,000001,00384,01,0256,0256,U08,").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { field: "id", .. }));
    }

    #[test]
    fn test_unknown_dtype() {
        let err = MerlinHeader::parse(b"MQ1,000001,00384,01,0256,0256,F32,").unwrap_err();
        assert!(matches!(err, Error::UnsupportedDtype(ref t) if t == "F32"));
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(PixelType::U16.payload_len(4, 4, 1).unwrap(), 32);
        assert_eq!(PixelType::Raw.payload_len(256, 256, 1).unwrap(), 8192);
        assert_eq!(PixelType::Raw.payload_len(256, 256, 12).unwrap(), 131_072);
        assert!(PixelType::Raw.payload_len(256, 256, 4).is_err());
        assert!(matches!(
            PixelType::U32.payload_len(usize::MAX / 2, 3, 1),
            Err(Error::InvalidHeader { field: "width", .. })
        ));
    }

    #[test]
    fn test_oversized_geometry_rejected() {
        let err = MerlinHeader::parse(b"MQ1,000001,00384,01,99999999999,99999999999,U32,")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { field: "width", .. }));
        let err = MerlinHeader::parse(b"MQ1,000001,99999999,01,0256,0256,U16,").unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { field: "header_len", .. }));
    }

    #[test]
    fn test_read_leading_fields_stops_after_dtype() {
        let mut cursor = Cursor::new(HEADER.as_bytes().to_vec());
        let leading = read_leading_fields(&mut cursor).unwrap().unwrap();
        assert_eq!(leading, b"MQ1,000042,00384,01,0256,0128,U16,");
        assert!(read_leading_fields(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_socket_prefix() {
        assert_eq!(parse_socket_prefix(b"MPX,0000000384,").unwrap(), 384);
        assert!(parse_socket_prefix(b"MQX,0000000384,").is_err());
        assert!(parse_socket_prefix(b"MPX,00000003a4,").is_err());
        assert!(matches!(
            parse_socket_prefix(b"MPX,9999999999,"),
            Err(Error::InvalidFraming(_))
        ));
    }
}
