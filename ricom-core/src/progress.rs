//! Frame-rate and progress monitor.
//!
//! Counts completed frames and raises a "report ready" flag once per
//! redraw interval. The flag, not a timer, gates redraw and rescale work
//! in collaborating layers, so the redraw cadence is independent of the
//! camera frame rate.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Snapshot produced at the end of a redraw interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    /// Frames processed so far.
    pub frames: usize,
    /// Frames declared for the whole run.
    pub total: usize,
    /// Frame rate over the last interval (Hz).
    pub rate_hz: f64,
    /// Running average of the interval rates (Hz).
    pub average_rate_hz: f64,
}

impl ProgressReport {
    /// Completed fraction in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.frames as f64 / self.total as f64).min(1.0)
    }
}

#[derive(Debug)]
struct Timing {
    last_report: Instant,
    average_rate_hz: f64,
    reports: usize,
}

/// Atomic frame counter with interval-based reporting.
#[derive(Debug)]
pub struct ProgressMonitor {
    total: usize,
    interval: Duration,
    frames: AtomicUsize,
    interval_frames: AtomicUsize,
    report_ready: AtomicBool,
    timing: Mutex<Timing>,
}

impl ProgressMonitor {
    /// Creates a monitor for `total` frames reporting every `interval_ms`.
    #[must_use]
    pub fn new(total: usize, interval_ms: u64) -> Self {
        Self {
            total,
            interval: Duration::from_millis(interval_ms),
            frames: AtomicUsize::new(0),
            interval_frames: AtomicUsize::new(0),
            report_ready: AtomicBool::new(false),
            timing: Mutex::new(Timing {
                last_report: Instant::now(),
                average_rate_hz: 0.0,
                reports: 0,
            }),
        }
    }

    /// Frames declared for the run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Frames processed so far.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::Acquire)
    }

    /// Running average frame rate (Hz).
    #[must_use]
    pub fn average_rate_hz(&self) -> f64 {
        self.timing.lock().average_rate_hz
    }

    /// Records one completed frame.
    ///
    /// Returns a report when the redraw interval elapsed or the final
    /// frame was reached, `None` otherwise.
    ///
    /// # Errors
    /// Returns [`Error::ProgressOverflow`] when more frames were recorded
    /// than declared. The caller should skip the display update and carry on.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_frame(&self) -> Result<Option<ProgressReport>> {
        let processed = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        self.interval_frames.fetch_add(1, Ordering::AcqRel);
        if processed > self.total {
            return Err(Error::ProgressOverflow {
                processed,
                total: self.total,
            });
        }

        let mut timing = self.timing.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(timing.last_report);
        if elapsed < self.interval && processed != self.total {
            return Ok(None);
        }

        let interval_frames = self.interval_frames.swap(0, Ordering::AcqRel);
        let secs = elapsed.as_secs_f64().max(1e-9);
        let rate_hz = interval_frames as f64 / secs;
        let n = timing.reports as f64;
        timing.average_rate_hz = (timing.average_rate_hz * n + rate_hz) / (n + 1.0);
        timing.reports += 1;
        timing.last_report = now;
        self.report_ready.store(true, Ordering::Release);

        Ok(Some(ProgressReport {
            frames: processed,
            total: self.total,
            rate_hz,
            average_rate_hz: timing.average_rate_hz,
        }))
    }

    /// Returns true if a report is pending.
    #[must_use]
    pub fn report_ready(&self) -> bool {
        self.report_ready.load(Ordering::Acquire)
    }

    /// Consumes the pending report flag.
    pub fn take_report_ready(&self) -> bool {
        self.report_ready.swap(false, Ordering::AcqRel)
    }

    /// Resets the counters for a new run.
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Release);
        self.interval_frames.store(0, Ordering::Release);
        self.report_ready.store(false, Ordering::Release);
        let mut timing = self.timing.lock();
        timing.last_report = Instant::now();
        timing.average_rate_hz = 0.0;
        timing.reports = 0;
    }
}
