//! Centered, normalized 2D Fourier transform of square planes.
//!
//! The forward transform applies `ifftshift -> FFT -> fftshift` and scales
//! by `1/N` (N = number of cells); the inverse applies the same shift
//! ordering without scaling, so a forward + inverse round trip returns the
//! input. Any side length is supported.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Planned forward and inverse transforms for `n x n` planes.
#[derive(Clone)]
pub struct Fft2d {
    n: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Fft2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft2d").field("n", &self.n).finish()
    }
}

impl Fft2d {
    /// Plans transforms for planes of side `n`.
    #[must_use]
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n,
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        }
    }

    /// Side length of the planes this transform accepts.
    #[must_use]
    pub fn side(&self) -> usize {
        self.n
    }

    /// Forward transform in place; the zero frequency ends up in the center cell.
    ///
    /// # Panics
    /// Panics if `plane` does not hold `n * n` cells.
    #[allow(clippy::cast_precision_loss)]
    pub fn forward(&self, plane: &mut [Complex<f64>]) {
        assert_eq!(plane.len(), self.n * self.n, "plane size mismatch");
        ifftshift(plane, self.n);
        self.transform(plane, &self.forward);
        fftshift(plane, self.n);
        let scale = 1.0 / plane.len() as f64;
        plane.iter_mut().for_each(|c| *c *= scale);
    }

    /// Inverse transform in place, undoing [`Fft2d::forward`].
    ///
    /// # Panics
    /// Panics if `plane` does not hold `n * n` cells.
    pub fn inverse(&self, plane: &mut [Complex<f64>]) {
        assert_eq!(plane.len(), self.n * self.n, "plane size mismatch");
        ifftshift(plane, self.n);
        self.transform(plane, &self.inverse);
        fftshift(plane, self.n);
    }

    fn transform(&self, plane: &mut [Complex<f64>], fft: &Arc<dyn Fft<f64>>) {
        if self.n == 0 {
            return;
        }
        // Rows are contiguous chunks of length n
        fft.process(plane);
        transpose(plane, self.n);
        fft.process(plane);
        transpose(plane, self.n);
    }
}

fn transpose(plane: &mut [Complex<f64>], n: usize) {
    for y in 0..n {
        for x in (y + 1)..n {
            plane.swap(y * n + x, x * n + y);
        }
    }
}

fn roll(plane: &mut [Complex<f64>], n: usize, shift: usize) {
    if n == 0 {
        return;
    }
    let src = plane.to_vec();
    for y in 0..n {
        let ty = (y + shift) % n;
        for x in 0..n {
            let tx = (x + shift) % n;
            plane[ty * n + tx] = src[y * n + x];
        }
    }
}

/// Moves the zero-frequency cell to the center (rolls by `n/2`).
pub fn fftshift(plane: &mut [Complex<f64>], n: usize) {
    roll(plane, n, n / 2);
}

/// Inverse of [`fftshift`] (rolls by `-(n/2)`), exact for odd `n`.
pub fn ifftshift(plane: &mut [Complex<f64>], n: usize) {
    if n == 0 {
        return;
    }
    roll(plane, n, n - n / 2);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shift_round_trip_odd() {
        let n = 5;
        let original: Vec<Complex<f64>> = (0..n * n).map(|i| Complex::new(i as f64, 0.0)).collect();
        let mut plane = original.clone();
        fftshift(&mut plane, n);
        ifftshift(&mut plane, n);
        assert_eq!(plane, original);
    }

    #[test]
    fn test_constant_plane_has_only_dc() {
        let n = 7;
        let fft = Fft2d::new(n);
        let mut plane = vec![Complex::new(2.0, 0.0); n * n];
        fft.forward(&mut plane);
        let center = (n / 2) * n + n / 2;
        assert_relative_eq!(plane[center].re, 2.0, epsilon = 1e-12);
        for (i, c) in plane.iter().enumerate() {
            if i != center {
                assert!(c.norm() < 1e-12, "cell {i} not zero: {c}");
            }
        }
    }
}
