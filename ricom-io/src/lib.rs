//! ricom-io: byte sources, worker pool and run orchestration for ricom.
//!
//! This crate moves camera bytes from memory-mapped recordings or live
//! TCP streams into the decoders, spreads frame integration over a
//! bounded worker pool, and drives a whole acquisition through the
//! [`Orchestrator`] state machine.
//!

mod config;
mod error;
pub mod orchestrator;
pub mod pool;
pub mod ring;
pub mod source;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use orchestrator::{CameraSettings, Orchestrator, RunSummary};
pub use pool::WorkerPool;
pub use ring::{ReadGate, ReaderHandle, RingReader};
pub use source::{accept_camera, ByteSource, MappedFile, OpenedSource};
