//! Run control block shared between the orchestrator and its collaborators.
//!
//! The orchestrator owns the block; a display or settings layer holds an
//! `Arc<ControlBlock>` handle to cancel the run, push new kernel or
//! detector parameters, and consume the rescale flags.

use crate::params::{DetectorConfig, KernelConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// No run in progress.
    Idle = 0,
    /// Acquiring, decoding and integrating scan pixels.
    Running = 1,
    /// Discarding frames recorded during row flyback.
    RowFlyback = 2,
    /// Discarding frames recorded during image flyback.
    ImageFlyback = 3,
    /// Cancellation observed; outstanding work is draining.
    Cancelling = 4,
    /// Run finished.
    Done = 5,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::RowFlyback,
            3 => RunState::ImageFlyback,
            4 => RunState::Cancelling,
            5 => RunState::Done,
            _ => RunState::Idle,
        }
    }
}

/// Cross-cutting run flags and pending parameter changes.
#[derive(Debug)]
pub struct ControlBlock {
    cancel: AtomicBool,
    recompute_kernel: AtomicBool,
    recompute_detector: AtomicBool,
    rescale_ricom: AtomicBool,
    rescale_vstem: AtomicBool,
    state: AtomicU8,
    pending_kernel: Mutex<Option<KernelConfig>>,
    pending_detector: Mutex<Option<DetectorConfig>>,
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBlock {
    /// Creates a block in the idle state with every flag cleared.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            recompute_kernel: AtomicBool::new(false),
            recompute_detector: AtomicBool::new(false),
            rescale_ricom: AtomicBool::new(false),
            rescale_vstem: AtomicBool::new(false),
            state: AtomicU8::new(RunState::Idle as u8),
            pending_kernel: Mutex::new(None),
            pending_detector: Mutex::new(None),
        }
    }

    /// Requests cooperative cancellation of the current run.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Clears the cancellation flag before a new run.
    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Current orchestrator state.
    #[must_use]
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Publishes a new orchestrator state.
    pub fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queues new kernel parameters; applied at the next redraw interval.
    pub fn request_kernel(&self, config: KernelConfig) {
        *self.pending_kernel.lock() = Some(config);
        self.recompute_kernel.store(true, Ordering::Release);
    }

    /// Queues new detector parameters; applied at the next redraw interval.
    pub fn request_detector(&self, config: DetectorConfig) {
        *self.pending_detector.lock() = Some(config);
        self.recompute_detector.store(true, Ordering::Release);
    }

    /// Consumes the kernel recompute flag and the queued parameters.
    pub fn take_kernel_request(&self) -> Option<KernelConfig> {
        if self.recompute_kernel.swap(false, Ordering::AcqRel) {
            self.pending_kernel.lock().take()
        } else {
            None
        }
    }

    /// Consumes the detector recompute flag and the queued parameters.
    pub fn take_detector_request(&self) -> Option<DetectorConfig> {
        if self.recompute_detector.swap(false, Ordering::AcqRel) {
            self.pending_detector.lock().take()
        } else {
            None
        }
    }

    /// Raises the riCOM rescale flag.
    pub fn raise_ricom_rescale(&self) {
        self.rescale_ricom.store(true, Ordering::Release);
    }

    /// Raises the vSTEM rescale flag.
    pub fn raise_vstem_rescale(&self) {
        self.rescale_vstem.store(true, Ordering::Release);
    }

    /// Returns true when the riCOM range changed since the last reset.
    #[must_use]
    pub fn ricom_rescale_pending(&self) -> bool {
        self.rescale_ricom.load(Ordering::Acquire)
    }

    /// Returns true when the vSTEM range changed since the last reset.
    #[must_use]
    pub fn vstem_rescale_pending(&self) -> bool {
        self.rescale_vstem.load(Ordering::Acquire)
    }

    /// Clears both rescale flags.
    pub fn reset_rescale(&self) {
        self.rescale_ricom.store(false, Ordering::Release);
        self.rescale_vstem.store(false, Ordering::Release);
    }
}
