//! ricom-algorithms: reconstruction math for riCOM.
//!
//! - **Kernel** - inverse-distance vector kernel with rotation and an
//!   optional frequency band-pass
//! - **Update offsets** - boundary-safe scatter indexing
//! - **Detector mask** - annular virtual detector for vSTEM
//! - **COM / icom / vSTEM** - per-frame centroid and scatter integration
//!
#![warn(missing_docs)]

mod com;
pub mod fft;
mod integrate;
mod kernel;
mod mask;
mod offsets;

pub use com::{event_com, frame_com, FrameMoments};
pub use fft::Fft2d;
pub use integrate::{ComAverage, IntegrationContext, PixelContribution};
pub use kernel::Kernel;
pub use mask::DetectorMask;
pub use offsets::{KernelOffset, UpdateOffsets};

// Re-export core parameter types
pub use ricom_core::params::{DetectorConfig, FrequencyBand, KernelConfig};
