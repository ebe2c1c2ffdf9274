//! Flat-index offsets from a scan pixel to the image cells its kernel touches.

use crate::kernel::Kernel;
use ricom_core::geometry::ScanGeometry;

/// One kernel cell expressed as an image offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOffset {
    /// Column offset from the scan pixel.
    pub dx: isize,
    /// Row offset from the scan pixel.
    pub dy: isize,
    /// Flat offset `dy * nx + dx`.
    pub delta: isize,
    /// Index into the kernel planes.
    pub cell: usize,
}

/// Offsets of every kernel cell for one scan width.
///
/// Validity of a target depends on the scan pixel being integrated, so it
/// is checked per use by [`UpdateOffsets::for_each_target`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOffsets {
    nx: usize,
    ny: usize,
    offsets: Vec<KernelOffset>,
}

impl UpdateOffsets {
    /// Builds the table for `kernel` over a scan raster.
    #[allow(clippy::cast_possible_wrap)]
    #[must_use]
    pub fn new(kernel: &Kernel, scan: &ScanGeometry) -> Self {
        let width = kernel.width();
        let k = kernel.kernel_size() as isize;
        let nx = scan.nx as isize;
        let mut offsets = Vec::with_capacity(width * width);
        for iy in 0..width {
            for ix in 0..width {
                let dx = ix as isize - k;
                let dy = iy as isize - k;
                offsets.push(KernelOffset {
                    dx,
                    dy,
                    delta: dy * nx + dx,
                    cell: iy * width + ix,
                });
            }
        }
        Self {
            nx: scan.nx,
            ny: scan.ny,
            offsets,
        }
    }

    /// Scan width the table was built for.
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Scan height the table was built for.
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// All offsets, row-major over the kernel.
    #[must_use]
    pub fn offsets(&self) -> &[KernelOffset] {
        &self.offsets
    }

    /// Returns true if the table still matches a kernel and scan raster.
    #[must_use]
    pub fn matches(&self, kernel: &Kernel, scan: &ScanGeometry) -> bool {
        self.nx == scan.nx && self.ny == scan.ny && self.offsets.len() == kernel.width().pow(2)
    }

    /// Calls `f(target_index, kernel_cell)` for every kernel cell whose
    /// target lies inside the image when centered on `(ix, iy)`.
    ///
    /// Targets that would wrap across a row boundary or fall past an image
    /// edge are skipped.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    #[inline]
    pub fn for_each_target<F>(&self, ix: usize, iy: usize, mut f: F)
    where
        F: FnMut(usize, usize),
    {
        let nx = self.nx as isize;
        let ny = self.ny as isize;
        let ix = ix as isize;
        let iy = iy as isize;
        let idc = iy * nx + ix;
        for off in &self.offsets {
            let x = ix + off.dx;
            let y = iy + off.dy;
            if x < 0 || x >= nx || y < 0 || y >= ny {
                continue;
            }
            let target = idc + off.delta;
            debug_assert_eq!(target, y * nx + x);
            f(target as usize, off.cell);
        }
    }
}
