//! Decoder error types.

use thiserror::Error;

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Decoder error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A frame header field could not be parsed.
    #[error("invalid frame header field `{field}`: {value:?}")]
    InvalidHeader {
        /// Field name.
        field: &'static str,
        /// Raw field text.
        value: String,
    },

    /// The header announced a pixel type this decoder does not handle.
    #[error("unsupported pixel type: {0}")]
    UnsupportedDtype(String),

    /// Raw (bit-packed) mode with a bit depth other than 1, 6 or 12.
    #[error("unsupported raw bit depth: {0}")]
    UnsupportedDepth(u8),

    /// A frame changed geometry in the middle of an acquisition.
    #[error("frame geometry changed from {expected:?} to {actual:?}")]
    GeometryChanged {
        /// Geometry of the first frame.
        expected: (usize, usize),
        /// Geometry of the offending frame.
        actual: (usize, usize),
    },

    /// The socket pre-header or frame prefix was malformed.
    #[error("invalid stream framing: {0}")]
    InvalidFraming(String),

    /// The stream ended inside a record.
    #[error("premature end of stream: needed {expected} bytes, got {actual}")]
    PrematureEnd {
        /// Bytes required to complete the record.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// Invalid decoder configuration.
    #[error("invalid camera configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] ricom_core::Error),
}
