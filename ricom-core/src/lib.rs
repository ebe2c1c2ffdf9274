//! ricom-core: Core types for real-time riCOM reconstruction.
//!
//! This crate provides the data model shared by the decoders, the
//! reconstruction algorithms and the orchestrator: scan geometry,
//! probe positions, detector signals, image buffers, the run control
//! block and the rate/progress monitor.
//!

pub mod control;
pub mod error;
pub mod geometry;
pub mod image;
pub mod params;
pub mod progress;
pub mod signal;

pub use control::{ControlBlock, RunState};
pub use error::{Error, Result};
pub use geometry::{ProbePosition, ScanGeometry, ScanPixel};
pub use image::{ComMap, ImageBuffer, RunImages};
pub use params::{DetectorConfig, FrequencyBand, KernelConfig};
pub use progress::{ProgressMonitor, ProgressReport};
pub use signal::{
    ComVector, DetectorSignal, EventSignal, Frame, FrameData, MaskLookup, Record,
};
