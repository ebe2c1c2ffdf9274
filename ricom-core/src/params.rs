//! Kernel and detector run parameters.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Band of radial frequencies kept by the kernel filter, `(low, high]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrequencyBand {
    /// Lower radius (exclusive), in frequency-grid cells.
    pub low: f32,
    /// Upper radius (inclusive), in frequency-grid cells.
    pub high: f32,
}

impl FrequencyBand {
    /// Creates a band.
    #[must_use]
    pub fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    /// Returns true when a squared radial frequency lies inside the band.
    #[inline]
    #[must_use]
    pub fn contains_squared(&self, r2: f32) -> bool {
        r2 > self.low * self.low && r2 <= self.high * self.high
    }
}

/// Parameters of the riCOM integration kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KernelConfig {
    /// Kernel radius `k`; the kernel grid is `(2k+1)^2`.
    pub kernel_size: usize,
    /// Rotation between scan and detector axes, in degrees.
    pub rotation_deg: f32,
    /// Optional band-pass filter applied in the frequency domain.
    pub filter: Option<FrequencyBand>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel_size: 5,
            rotation_deg: 0.0,
            filter: None,
        }
    }
}

impl KernelConfig {
    /// Set the kernel radius.
    #[must_use]
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Set the rotation in degrees.
    #[must_use]
    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation_deg = degrees;
        self
    }

    /// Enable the band-pass filter.
    #[must_use]
    pub fn with_filter(mut self, band: FrequencyBand) -> Self {
        self.filter = Some(band);
        self
    }

    /// Side length of the kernel grid.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        2 * self.kernel_size + 1
    }

    /// Checks the filter band.
    ///
    /// # Errors
    /// Returns an error if the band is inverted or negative.
    pub fn validate(&self) -> Result<()> {
        if let Some(band) = self.filter {
            if band.low < 0.0 || band.high < band.low {
                return Err(Error::InvalidKernel(format!(
                    "filter band ({}, {}] is empty or negative",
                    band.low, band.high
                )));
            }
        }
        Ok(())
    }
}

/// Camera geometry and the virtual annular detector.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorConfig {
    /// Camera width in pixels.
    pub width: usize,
    /// Camera height in pixels.
    pub height: usize,
    /// Detector center `(x, y)` in camera pixels; also the COM offset.
    pub center: (f32, f32),
    /// Inner radius of the annulus (exclusive).
    pub inner_radius: f32,
    /// Outer radius of the annulus (inclusive).
    pub outer_radius: f32,
    /// Track the running average COM as detector center.
    pub auto_center: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            center: (127.5, 127.5),
            inner_radius: 0.0,
            outer_radius: 64.0,
            auto_center: false,
        }
    }
}

impl DetectorConfig {
    /// Creates a configuration centered on a `width x height` camera.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn for_camera(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            center: ((width as f32 - 1.0) / 2.0, (height as f32 - 1.0) / 2.0),
            ..Self::default()
        }
    }

    /// Set the detector center.
    #[must_use]
    pub fn with_center(mut self, x: f32, y: f32) -> Self {
        self.center = (x, y);
        self
    }

    /// Set the annulus radii.
    #[must_use]
    pub fn with_radii(mut self, inner: f32, outer: f32) -> Self {
        self.inner_radius = inner;
        self.outer_radius = outer;
        self
    }

    /// Enable or disable automatic centering.
    #[must_use]
    pub fn with_auto_center(mut self, enabled: bool) -> Self {
        self.auto_center = enabled;
        self
    }

    /// Number of camera pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Checks the camera size and radii.
    ///
    /// # Errors
    /// Returns an error for an empty camera or inverted radii.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDetector(format!(
                "camera size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.inner_radius < 0.0 || self.outer_radius < self.inner_radius {
            return Err(Error::InvalidDetector(format!(
                "radii ({}, {}] are empty or negative",
                self.inner_radius, self.outer_radius
            )));
        }
        Ok(())
    }
}
