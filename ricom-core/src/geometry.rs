//! Scan raster geometry and probe positions.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scan raster dimensions and flyback compensation.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanGeometry {
    /// Scan pixels per row.
    pub nx: usize,
    /// Scan rows per image.
    pub ny: usize,
    /// Number of times the full raster is repeated.
    pub repetitions: usize,
    /// Frames discarded at the end of every row (row flyback).
    pub skip_row: usize,
    /// Frames discarded at the end of every image (image flyback).
    pub skip_img: usize,
}

impl Default for ScanGeometry {
    fn default() -> Self {
        Self {
            nx: 257,
            ny: 256,
            repetitions: 1,
            skip_row: 1,
            skip_img: 0,
        }
    }
}

impl ScanGeometry {
    /// Creates a geometry without flyback and a single repetition.
    #[must_use]
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            repetitions: 1,
            skip_row: 0,
            skip_img: 0,
        }
    }

    /// Set the number of repetitions.
    #[must_use]
    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    /// Set the row and image flyback skip counts.
    #[must_use]
    pub fn with_flyback(mut self, skip_row: usize, skip_img: usize) -> Self {
        self.skip_row = skip_row;
        self.skip_img = skip_img;
        self
    }

    /// Checks that the raster is non-empty and its size fits in memory indices.
    ///
    /// # Errors
    /// Returns an error if any dimension is zero or the total overflows.
    pub fn validate(&self) -> Result<()> {
        if self.nx == 0 || self.ny == 0 {
            return Err(Error::InvalidGeometry(format!(
                "scan dimensions must be non-zero (nx={}, ny={})",
                self.nx, self.ny
            )));
        }
        if self.repetitions == 0 {
            return Err(Error::InvalidGeometry(
                "repetitions must be at least 1".to_string(),
            ));
        }
        self.nx
            .checked_mul(self.ny)
            .and_then(|n| n.checked_mul(self.repetitions))
            .ok_or_else(|| {
                Error::InvalidGeometry(format!(
                    "scan size {}x{}x{} overflows",
                    self.nx, self.ny, self.repetitions
                ))
            })?;
        Ok(())
    }

    /// Number of scan pixels in one image.
    #[inline]
    #[must_use]
    pub fn image_len(&self) -> usize {
        self.nx * self.ny
    }

    /// Number of probe positions over all repetitions.
    #[inline]
    #[must_use]
    pub fn total_positions(&self) -> usize {
        self.image_len() * self.repetitions
    }

    /// Number of detector frames the camera delivers for the whole run,
    /// including the frames recorded during flyback.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        let per_image = (self.nx + self.skip_row) * self.ny + self.skip_img;
        per_image * self.repetitions
    }

    /// Maps a probe position onto its scan pixel.
    #[inline]
    #[must_use]
    pub fn pixel_of(&self, position: ProbePosition) -> ScanPixel {
        let flat = position.0 % self.image_len();
        ScanPixel {
            x: flat % self.nx,
            y: flat / self.nx,
        }
    }

    /// Repetition index a probe position belongs to.
    #[inline]
    #[must_use]
    pub fn repetition_of(&self, position: ProbePosition) -> usize {
        position.0 / self.image_len()
    }
}

/// Raster index of a probe position in `[0, nx * ny * repetitions)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbePosition(pub usize);

impl ProbePosition {
    /// Creates a probe position.
    #[inline]
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw raster index.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Scan pixel coordinate inside one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanPixel {
    /// Column.
    pub x: usize,
    /// Row.
    pub y: usize,
}

impl ScanPixel {
    /// Flat index of this pixel in a row-major `nx`-wide image.
    #[inline]
    #[must_use]
    pub fn flat(&self, nx: usize) -> usize {
        self.y * nx + self.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_of_wraps_repetitions() {
        let scan = ScanGeometry::new(4, 3).with_repetitions(2);
        assert_eq!(scan.total_positions(), 24);
        assert_eq!(scan.pixel_of(ProbePosition(5)), ScanPixel { x: 1, y: 1 });
        assert_eq!(scan.pixel_of(ProbePosition(17)), ScanPixel { x: 1, y: 1 });
        assert_eq!(scan.repetition_of(ProbePosition(17)), 1);
    }

    #[test]
    fn test_total_frames_includes_flyback() {
        let scan = ScanGeometry::new(4, 3).with_flyback(1, 2).with_repetitions(2);
        // (4 + 1) * 3 + 2 = 17 per image
        assert_eq!(scan.total_frames(), 34);
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(ScanGeometry::new(0, 3).validate().is_err());
        assert!(ScanGeometry::new(3, 3).validate().is_ok());
        let mut scan = ScanGeometry::new(3, 3);
        scan.repetitions = 0;
        assert!(scan.validate().is_err());
    }
}
