//! Error types for ricom-core.

use thiserror::Error;

/// Result type alias for ricom operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for ricom operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Scan geometry with a zero dimension or an impossible size.
    #[error("invalid scan geometry: {0}")]
    InvalidGeometry(String),

    /// Kernel parameters that cannot produce a kernel.
    #[error("invalid kernel parameters: {0}")]
    InvalidKernel(String),

    /// Detector geometry that cannot produce a mask.
    #[error("invalid detector parameters: {0}")]
    InvalidDetector(String),

    /// More frames were reported than the run declared.
    #[error("progress overflow: frame {processed} exceeds declared total {total}")]
    ProgressOverflow { processed: usize, total: usize },

    /// A frame whose pixel count disagrees with its declared size.
    #[error("frame size mismatch: expected {expected} pixels, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },
}
