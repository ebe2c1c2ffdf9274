//! Detector signals and the records decoders hand to the integration step.

use crate::geometry::ProbePosition;
use crate::{Error, Result};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Intensity-weighted centroid of one detector reading, in camera pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComVector {
    /// Column coordinate.
    pub x: f32,
    /// Row coordinate.
    pub y: f32,
}

impl ComVector {
    /// Creates a COM vector.
    #[inline]
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns this vector relative to `center`.
    #[inline]
    #[must_use]
    pub fn offset_by(&self, center: (f32, f32)) -> Self {
        Self {
            x: self.x - center.0,
            y: self.y - center.1,
        }
    }
}

/// Pixel payload of one detector frame, already converted to native byte order.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// 8-bit counters (also used for unpacked 1-bit and 6-bit raw data).
    U8(Vec<u8>),
    /// 16-bit counters (also used for 12-bit raw data).
    U16(Vec<u16>),
    /// 32-bit counters.
    U32(Vec<u32>),
}

impl FrameData {
    /// Number of pixels in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            FrameData::U8(v) => v.len(),
            FrameData::U16(v) => v.len(),
            FrameData::U32(v) => v.len(),
        }
    }

    /// Returns true if the payload holds no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the pixels at the given flat indices.
    ///
    /// Indices outside the payload are ignored.
    #[must_use]
    pub fn sum_at(&self, indices: &[usize]) -> f64 {
        fn sum<T: Copy + Into<f64>>(values: &[T], indices: &[usize]) -> f64 {
            indices
                .iter()
                .filter_map(|&i| values.get(i))
                .map(|&v| v.into())
                .sum()
        }
        match self {
            FrameData::U8(v) => sum(v, indices),
            FrameData::U16(v) => sum(v, indices),
            FrameData::U32(v) => sum(v, indices),
        }
    }

    /// Decodes 16-bit pixels from raw bytes with the given byte order.
    #[must_use]
    pub fn u16_from_bytes(bytes: &[u8], big_endian: bool) -> Self {
        let values = bytes
            .chunks_exact(2)
            .map(|c| {
                let b = [c[0], c[1]];
                if big_endian {
                    u16::from_be_bytes(b)
                } else {
                    u16::from_le_bytes(b)
                }
            })
            .collect();
        FrameData::U16(values)
    }

    /// Decodes 32-bit pixels from raw bytes with the given byte order.
    #[must_use]
    pub fn u32_from_bytes(bytes: &[u8], big_endian: bool) -> Self {
        let values = bytes
            .chunks_exact(4)
            .map(|c| {
                let b = [c[0], c[1], c[2], c[3]];
                if big_endian {
                    u32::from_be_bytes(b)
                } else {
                    u32::from_le_bytes(b)
                }
            })
            .collect();
        FrameData::U32(values)
    }
}

/// A full 2D detector frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Camera width in pixels.
    pub width: usize,
    /// Camera height in pixels.
    pub height: usize,
    /// Row-major pixel payload.
    pub data: FrameData,
}

impl Frame {
    /// Creates a frame, checking that the payload matches the declared size.
    ///
    /// # Errors
    /// Returns an error if `data` does not hold `width * height` pixels.
    pub fn new(width: usize, height: usize, data: FrameData) -> Result<Self> {
        let expected = checked_pixels(width, height)?;
        if data.len() != expected {
            return Err(Error::FrameSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Number of camera pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Incremental accumulators of an event-based reading for one probe position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventSignal {
    /// Number of detected events.
    pub dose: u32,
    /// Sum of event column coordinates.
    pub sum_x: u64,
    /// Sum of event row coordinates.
    pub sum_y: u64,
    /// Events that fell inside the virtual detector mask.
    pub vstem: u32,
}

impl EventSignal {
    /// Adds one event at camera pixel `(x, y)`.
    #[inline]
    pub fn add_event(&mut self, x: u32, y: u32, in_mask: bool) {
        self.dose += 1;
        self.sum_x += u64::from(x);
        self.sum_y += u64::from(y);
        if in_mask {
            self.vstem += 1;
        }
    }

    /// Folds another accumulator into this one.
    pub fn merge(&mut self, other: &EventSignal) {
        self.dose += other.dose;
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.vstem += other.vstem;
    }

    /// Centroid of the accumulated events, `None` when no event was seen.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn com(&self) -> Option<ComVector> {
        if self.dose == 0 {
            return None;
        }
        let dose = f64::from(self.dose);
        Some(ComVector {
            x: (self.sum_x as f64 / dose) as f32,
            y: (self.sum_y as f64 / dose) as f32,
        })
    }
}

/// Shared per camera-pixel membership table of the virtual detector.
///
/// Event decoders use it to count in-mask events while accumulating.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskLookup {
    width: usize,
    height: usize,
    inside: Arc<[bool]>,
}

impl MaskLookup {
    /// Wraps a row-major membership table for a `width x height` camera.
    ///
    /// # Errors
    /// Returns an error if the table does not hold `width * height` entries.
    pub fn new(width: usize, height: usize, inside: Vec<bool>) -> Result<Self> {
        let expected = checked_pixels(width, height)?;
        if inside.len() != expected {
            return Err(Error::FrameSizeMismatch {
                expected,
                actual: inside.len(),
            });
        }
        Ok(Self {
            width,
            height,
            inside: inside.into(),
        })
    }

    /// Returns true when camera pixel `(x, y)` is inside the detector.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (x, y) = (x as usize, y as usize);
        x < self.width && y < self.height && self.inside[y * self.width + x]
    }
}

/// The detector signal attributed to one probe position.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorSignal {
    /// Full frame from a frame-based camera.
    Frame(Frame),
    /// Accumulated events from an event-based camera.
    Events(EventSignal),
}

/// A decoded `(probe position, signal)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Probe position the signal belongs to.
    pub position: ProbePosition,
    /// Decoded signal.
    pub signal: DetectorSignal,
}

impl Record {
    /// Creates a record for a full frame.
    #[must_use]
    pub fn frame(position: usize, frame: Frame) -> Self {
        Self {
            position: ProbePosition(position),
            signal: DetectorSignal::Frame(frame),
        }
    }

    /// Creates a record for accumulated events.
    #[must_use]
    pub fn events(position: usize, events: EventSignal) -> Self {
        Self {
            position: ProbePosition(position),
            signal: DetectorSignal::Events(events),
        }
    }
}

fn checked_pixels(width: usize, height: usize) -> Result<usize> {
    width
        .checked_mul(height)
        .ok_or_else(|| Error::InvalidGeometry(format!("{width}x{height} pixels overflow")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_event_signal_com() {
        let mut signal = EventSignal::default();
        assert!(signal.com().is_none());
        signal.add_event(10, 20, false);
        signal.add_event(12, 22, true);
        let com = signal.com().unwrap();
        assert_relative_eq!(com.x, 11.0);
        assert_relative_eq!(com.y, 21.0);
        assert_eq!(signal.vstem, 1);
    }

    #[test]
    fn test_mask_lookup_bounds() {
        let mask = MaskLookup::new(2, 2, vec![false, true, false, false]).unwrap();
        assert!(mask.contains(1, 0));
        assert!(!mask.contains(0, 1));
        assert!(!mask.contains(5, 0));
        assert!(MaskLookup::new(2, 2, vec![true]).is_err());
    }

    #[test]
    fn test_frame_size_checked() {
        assert!(Frame::new(2, 2, FrameData::U8(vec![0; 4])).is_ok());
        assert!(Frame::new(2, 2, FrameData::U8(vec![0; 3])).is_err());
        assert!(matches!(
            Frame::new(usize::MAX, 2, FrameData::U8(vec![0; 4])),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_u16_byte_order() {
        let bytes = [0x01, 0x02];
        assert_eq!(FrameData::u16_from_bytes(&bytes, true), FrameData::U16(vec![0x0102]));
        assert_eq!(FrameData::u16_from_bytes(&bytes, false), FrameData::U16(vec![0x0201]));
    }

    #[test]
    fn test_sum_at_ignores_out_of_range() {
        let data = FrameData::U16(vec![1, 2, 3, 4]);
        assert_relative_eq!(data.sum_at(&[0, 3, 10]), 5.0);
    }
}
