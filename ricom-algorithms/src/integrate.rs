//! COM, vSTEM and icom integration of decoded records.
//!
//! An [`IntegrationContext`] is an immutable snapshot of everything one
//! record needs: scan raster, kernel, update offsets, detector mask and
//! the detector center. The orchestrator swaps in a fresh snapshot when
//! parameters change, so integration workers never observe a half-built
//! kernel.

use crate::com::frame_com;
use crate::kernel::Kernel;
use crate::mask::DetectorMask;
use crate::offsets::UpdateOffsets;
use parking_lot::Mutex;
use ricom_core::control::ControlBlock;
use ricom_core::geometry::{ScanGeometry, ScanPixel};
use ricom_core::image::RunImages;
use ricom_core::params::{DetectorConfig, KernelConfig};
use ricom_core::signal::{ComVector, DetectorSignal, MaskLookup, Record};
use ricom_core::Result;

/// Result of integrating one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelContribution {
    /// Scan pixel the record belongs to.
    pub pixel: ScanPixel,
    /// COM in camera pixels, `None` when the reading carried no dose.
    pub com: Option<ComVector>,
    /// vSTEM value added to the pixel.
    pub vstem: f64,
}

/// Parameter snapshot used by the integration step.
#[derive(Debug, Clone)]
pub struct IntegrationContext {
    scan: ScanGeometry,
    kernel: Kernel,
    offsets: UpdateOffsets,
    detector: DetectorConfig,
    mask: DetectorMask,
}

impl IntegrationContext {
    /// Builds kernel, offsets and mask for a run.
    ///
    /// # Errors
    /// Returns an error if the scan, kernel or detector parameters are invalid.
    pub fn new(scan: ScanGeometry, kernel: KernelConfig, detector: DetectorConfig) -> Result<Self> {
        scan.validate()?;
        let kernel = Kernel::new(kernel)?;
        let offsets = UpdateOffsets::new(&kernel, &scan);
        let mask = DetectorMask::new(&detector)?;
        Ok(Self {
            scan,
            kernel,
            offsets,
            detector,
            mask,
        })
    }

    /// Returns a copy with a regenerated kernel and offset table.
    ///
    /// # Errors
    /// Returns an error if the kernel parameters are invalid.
    pub fn with_kernel(&self, config: KernelConfig) -> Result<Self> {
        let kernel = Kernel::new(config)?;
        let offsets = UpdateOffsets::new(&kernel, &self.scan);
        Ok(Self {
            kernel,
            offsets,
            ..self.clone()
        })
    }

    /// Returns a copy with a rebuilt detector mask.
    ///
    /// # Errors
    /// Returns an error if the detector parameters are invalid.
    pub fn with_detector(&self, config: DetectorConfig) -> Result<Self> {
        let mask = DetectorMask::new(&config)?;
        Ok(Self {
            detector: config,
            mask,
            ..self.clone()
        })
    }

    /// Returns a copy with a moved detector center.
    ///
    /// The mask is rebuilt around the new center.
    ///
    /// # Errors
    /// Returns an error if the resulting detector is invalid.
    pub fn with_center(&self, center: (f32, f32)) -> Result<Self> {
        self.with_detector(DetectorConfig {
            center,
            ..self.detector
        })
    }

    /// Scan raster.
    #[must_use]
    pub fn scan(&self) -> &ScanGeometry {
        &self.scan
    }

    /// Current kernel.
    #[must_use]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Current update-offset table.
    #[must_use]
    pub fn offsets(&self) -> &UpdateOffsets {
        &self.offsets
    }

    /// Current detector parameters.
    #[must_use]
    pub fn detector(&self) -> &DetectorConfig {
        &self.detector
    }

    /// Current detector mask.
    #[must_use]
    pub fn mask(&self) -> &DetectorMask {
        &self.mask
    }

    /// Membership table for event decoders.
    #[must_use]
    pub fn mask_lookup(&self) -> MaskLookup {
        self.mask.lookup()
    }

    /// Computes COM and vSTEM of a record without touching any image.
    #[must_use]
    pub fn evaluate(&self, record: &Record) -> PixelContribution {
        let pixel = self.scan.pixel_of(record.position);
        let (com, vstem) = match &record.signal {
            DetectorSignal::Frame(frame) => {
                (frame_com(frame), frame.data.sum_at(self.mask.indices()))
            }
            DetectorSignal::Events(events) => (events.com(), f64::from(events.vstem)),
        };
        PixelContribution { pixel, com, vstem }
    }

    /// Writes a contribution into the run images.
    ///
    /// The riCOM lock is held for the whole kernel scatter. Range changes
    /// raise the matching rescale flag on `control`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply(&self, contribution: &PixelContribution, images: &RunImages, control: &ControlBlock) {
        let ScanPixel { x, y } = contribution.pixel;
        let idx = contribution.pixel.flat(self.scan.nx);

        if let Some(com) = contribution.com {
            images.com.lock().set(idx, com.x, com.y);

            let rel = com.offset_by(self.detector.center);
            let kx = self.kernel.kx();
            let ky = self.kernel.ky();
            let mut widened = false;
            {
                let mut ricom = images.ricom.lock();
                self.offsets.for_each_target(x, y, |target, cell| {
                    widened |= ricom.add(target, rel.x * kx[cell] + rel.y * ky[cell]);
                });
            }
            if widened {
                control.raise_ricom_rescale();
            }
        }

        if images.vstem.lock().add(idx, contribution.vstem as f32) {
            control.raise_vstem_rescale();
        }
    }

    /// Evaluates a record and writes it into the run images.
    pub fn integrate(&self, record: &Record, images: &RunImages, control: &ControlBlock) -> PixelContribution {
        let contribution = self.evaluate(record);
        self.apply(&contribution, images, control);
        contribution
    }
}

/// Running average of COM vectors between two redraw intervals.
#[derive(Debug, Default)]
pub struct ComAverage {
    inner: Mutex<(f64, f64, u64)>,
}

impl ComAverage {
    /// Creates an empty average.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one COM vector.
    pub fn add(&self, com: ComVector) {
        let mut acc = self.inner.lock();
        acc.0 += f64::from(com.x);
        acc.1 += f64::from(com.y);
        acc.2 += 1;
    }

    /// Number of vectors since the last reset.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.inner.lock().2
    }

    /// Returns the average and resets, `None` if nothing was added.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn take(&self) -> Option<(f32, f32)> {
        let mut acc = self.inner.lock();
        let (sx, sy, n) = std::mem::take(&mut *acc);
        if n == 0 {
            return None;
        }
        let n = n as f64;
        Some(((sx / n) as f32, (sy / n) as f32))
    }
}
