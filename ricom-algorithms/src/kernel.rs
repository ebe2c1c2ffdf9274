//! riCOM integration kernel.
//!
//! For a kernel radius `k` the kernel is a `(2k+1)^2` grid of 2D vectors.
//! A cell at offset `(dx, dy)` from the center holds
//! `(dx, dy) / (dx^2 + dy^2)` rotated by the configured angle; the center
//! cell is the zero vector. An optional band-pass keeps only the radial
//! frequencies in `(low, high]`.

use crate::fft::Fft2d;
use num_complex::Complex;
use rayon::prelude::*;
use ricom_core::params::{FrequencyBand, KernelConfig};
use ricom_core::Result;

/// Vector kernel stored as two row-major planes.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    config: KernelConfig,
    kx: Vec<f32>,
    ky: Vec<f32>,
}

impl Kernel {
    /// Builds the kernel described by `config`.
    ///
    /// # Errors
    /// Returns an error if the filter band is invalid.
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let (mut kx, mut ky) = build_planes(config.kernel_size, config.rotation_deg);
        if let Some(band) = config.filter {
            band_pass(&mut kx, config.kernel_size, band);
            band_pass(&mut ky, config.kernel_size, band);
            // Odd planes stay odd under a radial filter; pin the center exactly
            let center = center_index(config.kernel_size);
            kx[center] = 0.0;
            ky[center] = 0.0;
        }
        log::debug!(
            "built kernel k={} rotation={} filter={:?}",
            config.kernel_size,
            config.rotation_deg,
            config.filter
        );
        Ok(Self { config, kx, ky })
    }

    /// Parameters the kernel was built from.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Kernel radius `k`.
    #[must_use]
    pub fn kernel_size(&self) -> usize {
        self.config.kernel_size
    }

    /// Side length `2k+1`.
    #[must_use]
    pub fn width(&self) -> usize {
        self.config.width()
    }

    /// Column components, row-major.
    #[must_use]
    pub fn kx(&self) -> &[f32] {
        &self.kx
    }

    /// Row components, row-major.
    #[must_use]
    pub fn ky(&self) -> &[f32] {
        &self.ky
    }

    /// Vector at offset `(dx, dy)` from the center.
    ///
    /// Returns `None` when the offset lies outside the kernel.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    #[must_use]
    pub fn at(&self, dx: isize, dy: isize) -> Option<(f32, f32)> {
        let k = self.config.kernel_size as isize;
        if dx.abs() > k || dy.abs() > k {
            return None;
        }
        let idx = ((dy + k) as usize) * self.width() + (dx + k) as usize;
        Some((self.kx[idx], self.ky[idx]))
    }
}

fn center_index(k: usize) -> usize {
    let width = 2 * k + 1;
    k * width + k
}

#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]
fn build_planes(k: usize, rotation_deg: f32) -> (Vec<f32>, Vec<f32>) {
    let width = 2 * k + 1;
    let theta = f64::from(rotation_deg).to_radians();
    let (sin, cos) = theta.sin_cos();
    let ks = k as isize;

    let mut kx = vec![0.0f32; width * width];
    let mut ky = vec![0.0f32; width * width];
    kx.par_chunks_mut(width)
        .zip(ky.par_chunks_mut(width))
        .enumerate()
        .for_each(|(iy, (row_x, row_y))| {
            let dy = iy as isize - ks;
            for ix in 0..width {
                let dx = ix as isize - ks;
                let d2 = dx * dx + dy * dy;
                if d2 == 0 {
                    continue;
                }
                let d2 = d2 as f64;
                let x = dx as f64 / d2;
                let y = dy as f64 / d2;
                row_x[ix] = (cos * x - sin * y) as f32;
                row_y[ix] = (sin * x + cos * y) as f32;
            }
        });
    (kx, ky)
}

#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]
fn band_pass(plane: &mut [f32], k: usize, band: FrequencyBand) {
    let width = 2 * k + 1;
    let fft = Fft2d::new(width);
    let mut spectrum: Vec<Complex<f64>> = plane
        .iter()
        .map(|&v| Complex::new(f64::from(v), 0.0))
        .collect();
    fft.forward(&mut spectrum);

    let ks = k as isize;
    for iy in 0..width {
        let fy = iy as isize - ks;
        for ix in 0..width {
            let fx = ix as isize - ks;
            let r2 = (fx * fx + fy * fy) as f32;
            if !band.contains_squared(r2) {
                spectrum[iy * width + ix] = Complex::new(0.0, 0.0);
            }
        }
    }

    fft.inverse(&mut spectrum);
    for (dst, c) in plane.iter_mut().zip(spectrum.iter()) {
        *dst = c.re as f32;
    }
}
