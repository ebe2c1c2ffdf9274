//! Virtual annular detector mask.

use ricom_core::params::DetectorConfig;
use ricom_core::signal::MaskLookup;
use ricom_core::Result;

/// Camera pixels whose squared distance from the center lies in
/// `(inner^2, outer^2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorMask {
    indices: Vec<usize>,
    lookup: MaskLookup,
}

impl DetectorMask {
    /// Builds the mask for a detector configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        let (cx, cy) = (f64::from(config.center.0), f64::from(config.center.1));
        let inner2 = f64::from(config.inner_radius).powi(2);
        let outer2 = f64::from(config.outer_radius).powi(2);

        let mut indices = Vec::new();
        let mut lookup = vec![false; config.pixel_count()];
        for y in 0..config.height {
            let dy = y as f64 - cy;
            for x in 0..config.width {
                let dx = x as f64 - cx;
                let d2 = dx * dx + dy * dy;
                if d2 > inner2 && d2 <= outer2 {
                    let idx = y * config.width + x;
                    indices.push(idx);
                    lookup[idx] = true;
                }
            }
        }
        log::debug!(
            "detector mask: {} pixels in ({}, {}] around {:?}",
            indices.len(),
            config.inner_radius,
            config.outer_radius,
            config.center
        );
        Ok(Self {
            indices,
            lookup: MaskLookup::new(config.width, config.height, lookup)?,
        })
    }

    /// Flat camera-pixel indices inside the annulus, ascending.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of pixels inside the annulus.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if no pixel is inside the annulus.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Shareable membership table for event decoders.
    #[must_use]
    pub fn lookup(&self) -> MaskLookup {
        self.lookup.clone()
    }

    /// Returns true when camera pixel `(x, y)` is inside the annulus.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.lookup.contains(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annulus_boundaries() {
        let config = DetectorConfig::for_camera(5, 5)
            .with_center(2.0, 2.0)
            .with_radii(0.0, 1.0);
        let mask = DetectorMask::new(&config).unwrap();
        // Four direct neighbors at distance 1; the center (d2 = 0) is excluded
        assert_eq!(mask.len(), 4);
        assert!(!mask.contains(2, 2));
        assert!(mask.contains(3, 2));
        assert!(!mask.contains(3, 3));
        assert!(!mask.contains(10, 2));
        assert!(mask.lookup().contains(2, 3));
    }

    #[test]
    fn test_inner_radius_excluded() {
        let config = DetectorConfig::for_camera(5, 5)
            .with_center(2.0, 2.0)
            .with_radii(1.0, 2.0);
        let mask = DetectorMask::new(&config).unwrap();
        // d2 in (1, 4]: 4 diagonals (2) + 4 at distance 2 (4)
        assert_eq!(mask.len(), 8);
    }
}
