//! I/O and orchestration error types.

use thiserror::Error;

/// Result type for I/O and orchestration.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O and orchestration error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoder error.
    #[error("camera error: {0}")]
    CameraError(#[from] ricom_camera::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] ricom_core::Error),

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// One or more worker tasks panicked.
    #[error("{0} worker task(s) panicked")]
    TaskPanicked(usize),

    /// The reader thread stopped abnormally.
    #[error("reader thread failed: {0}")]
    ReaderFailed(String),
}
