//! Pipeline configuration.

use crate::{Error, Result};
use sysinfo::System;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;

/// Threading, buffering and pacing parameters for a run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// Integration worker threads; 1 integrates on the orchestrator thread.
    pub worker_threads: usize,
    /// Bounded task queue depth of the worker pool.
    pub queue_depth: usize,
    /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit memory budget override (bytes). If set, `memory_fraction` is ignored.
    pub memory_budget_bytes: Option<usize>,
    /// Bytes requested from the byte source per read.
    pub chunk_size: usize,
    /// Number of buffers in the reader ring.
    pub ring_depth: usize,
    /// Redraw interval of the progress monitor in milliseconds.
    pub redraw_interval_ms: u64,
    /// File read-ahead limit in scan lines; `None` uses half an image.
    pub max_lines_ahead: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            queue_depth: 64,
            memory_fraction: 0.25,
            memory_budget_bytes: None,
            chunk_size: 1 << 20,
            ring_depth: 4,
            redraw_interval_ms: 100,
            max_lines_ahead: None,
        }
    }
}

impl PipelineConfig {
    /// Set the number of integration worker threads.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_worker_threads`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Set the bounded queue depth of the worker pool.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_queue_depth`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Set the fraction of available system memory to target.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Set the reader chunk size in bytes (at least 1).
    #[must_use]
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    /// Set the number of reader ring buffers (at least 1).
    #[must_use]
    pub fn with_ring_depth(mut self, depth: usize) -> Self {
        self.ring_depth = depth.max(1);
        self
    }

    /// Set the redraw interval in milliseconds.
    #[must_use]
    pub fn with_redraw_interval_ms(mut self, ms: u64) -> Self {
        self.redraw_interval_ms = ms;
        self
    }

    /// Set the file read-ahead limit in scan lines.
    #[must_use]
    pub fn with_max_lines_ahead(mut self, lines: usize) -> Self {
        self.max_lines_ahead = Some(lines.max(1));
        self
    }

    /// Fallible variant of [`Self::with_worker_threads`].
    ///
    /// # Errors
    /// Returns an error if `threads` is 0.
    pub fn try_with_worker_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        self.worker_threads = threads;
        Ok(self)
    }

    /// Fallible variant of [`Self::with_queue_depth`].
    ///
    /// # Errors
    /// Returns an error if `depth` is 0.
    pub fn try_with_queue_depth(mut self, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(Error::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        self.queue_depth = depth;
        Ok(self)
    }

    /// Returns true when integration runs on a worker pool.
    #[must_use]
    pub fn use_worker_pool(&self) -> bool {
        self.worker_threads > 1
    }

    /// Read-ahead limit in scan lines for a raster with `ny` rows.
    #[must_use]
    pub fn effective_lines_ahead(&self, ny: usize) -> usize {
        self.max_lines_ahead.unwrap_or(ny / 2).max(1)
    }

    /// Resolve the target memory budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidConfig(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidConfig(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }

    /// Queue depth clamped so that the queued frames fit the memory budget.
    ///
    /// # Errors
    /// Returns an error if the memory budget cannot be resolved.
    pub fn effective_queue_depth(&self, frame_bytes: usize) -> Result<usize> {
        let depth = self.queue_depth.max(1);
        let budget = self.resolve_budget_bytes()?;
        let fit = max_tasks_for_budget(budget, frame_bytes);
        if fit < depth {
            log::warn!(
                "queue depth {depth} clamped to {fit} to fit a {budget} byte budget ({frame_bytes} bytes per frame)"
            );
            return Ok(fit);
        }
        Ok(depth)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn max_tasks_for_budget(budget: usize, frame_bytes: usize) -> usize {
    if frame_bytes == 0 {
        return usize::MAX;
    }
    let per_task = (frame_bytes as f64 * MEMORY_OVERHEAD_FACTOR).ceil() as usize;
    (budget / per_task.max(1)).max(1)
}
