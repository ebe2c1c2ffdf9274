//! Reconstruction image buffers.
//!
//! Buffers are written only by the integration step and read by
//! collaborators through snapshots. Every buffer is guarded by its own
//! mutex inside [`RunImages`].

use crate::geometry::ScanGeometry;
use parking_lot::Mutex;

/// Flat `ny x nx` float image with an incrementally tracked value range.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    nx: usize,
    ny: usize,
    data: Vec<f32>,
    min: f32,
    max: f32,
}

impl ImageBuffer {
    /// Creates a zeroed image.
    #[must_use]
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            data: vec![0.0; nx * ny],
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    /// Image width.
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Image height.
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Read-only view of the pixel data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Smallest value written so far, `None` before the first write.
    #[must_use]
    pub fn min(&self) -> Option<f32> {
        self.min.is_finite().then_some(self.min)
    }

    /// Largest value written so far, `None` before the first write.
    #[must_use]
    pub fn max(&self) -> Option<f32> {
        self.max.is_finite().then_some(self.max)
    }

    /// Adds `value` to the pixel at `idx`.
    ///
    /// Returns true when the tracked range widened.
    #[inline]
    pub fn add(&mut self, idx: usize, value: f32) -> bool {
        let pixel = &mut self.data[idx];
        *pixel += value;
        let v = *pixel;
        self.track(v)
    }

    /// Overwrites the pixel at `idx`.
    ///
    /// Returns true when the tracked range widened.
    #[inline]
    pub fn set(&mut self, idx: usize, value: f32) -> bool {
        self.data[idx] = value;
        self.track(value)
    }

    #[inline]
    fn track(&mut self, v: f32) -> bool {
        let mut changed = false;
        if v < self.min {
            self.min = v;
            changed = true;
        }
        if v > self.max {
            self.max = v;
            changed = true;
        }
        changed
    }

    /// Zeroes the image and forgets the tracked range.
    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
        self.min = f32::INFINITY;
        self.max = f32::NEG_INFINITY;
    }

    /// Copy of the pixel data.
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Copy of the pixel data shaped `(ny, nx)`.
    #[cfg(feature = "ndarray")]
    #[must_use]
    pub fn to_array(&self) -> ndarray::Array2<f32> {
        ndarray::Array2::from_shape_vec((self.ny, self.nx), self.data.clone())
            .unwrap_or_else(|_| ndarray::Array2::zeros((self.ny, self.nx)))
    }
}

/// Per scan pixel COM components.
#[derive(Debug, Clone, PartialEq)]
pub struct ComMap {
    nx: usize,
    ny: usize,
    /// COM column components, row-major.
    pub x: Vec<f32>,
    /// COM row components, row-major.
    pub y: Vec<f32>,
}

impl ComMap {
    /// Creates a zeroed map.
    #[must_use]
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            x: vec![0.0; nx * ny],
            y: vec![0.0; nx * ny],
        }
    }

    /// Map shape as `(ny, nx)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    /// Stores the COM of scan pixel `idx`.
    #[inline]
    pub fn set(&mut self, idx: usize, com_x: f32, com_y: f32) {
        self.x[idx] = com_x;
        self.y[idx] = com_y;
    }

    /// Zeroes both components.
    pub fn reset(&mut self) {
        self.x.iter_mut().for_each(|v| *v = 0.0);
        self.y.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// All buffers produced by one run, each behind a dedicated lock.
#[derive(Debug)]
pub struct RunImages {
    /// Integrated riCOM image.
    pub ricom: Mutex<ImageBuffer>,
    /// Virtual annular detector image.
    pub vstem: Mutex<ImageBuffer>,
    /// COM maps.
    pub com: Mutex<ComMap>,
}

impl RunImages {
    /// Allocates zeroed buffers for a scan.
    #[must_use]
    pub fn new(scan: &ScanGeometry) -> Self {
        Self {
            ricom: Mutex::new(ImageBuffer::new(scan.nx, scan.ny)),
            vstem: Mutex::new(ImageBuffer::new(scan.nx, scan.ny)),
            com: Mutex::new(ComMap::new(scan.nx, scan.ny)),
        }
    }

    /// Zeroes every buffer.
    pub fn reset(&self) {
        self.ricom.lock().reset();
        self.vstem.lock().reset();
        self.com.lock().reset();
    }

    /// Copy of the riCOM image.
    #[must_use]
    pub fn ricom_snapshot(&self) -> Vec<f32> {
        self.ricom.lock().snapshot()
    }

    /// Copy of the vSTEM image.
    #[must_use]
    pub fn vstem_snapshot(&self) -> Vec<f32> {
        self.vstem.lock().snapshot()
    }
}
