//! Run orchestration.
//!
//! The [`Orchestrator`] drives one acquisition: it pulls records from a
//! decoder, hands frames to the worker pool (or integrates them inline),
//! discards flyback frames, and at every redraw interval applies pending
//! parameter changes, clears the rescale flags and re-centers the
//! detector. Event streams are always decoded and integrated on the
//! orchestrator thread, in stream order.

use crate::config::PipelineConfig;
use crate::pool::WorkerPool;
use crate::ring::{ReadGate, RingReader};
use crate::source::{ByteSource, OpenedSource};
use crate::{Error, Result};
use ricom_algorithms::{ComAverage, IntegrationContext};
use ricom_camera::{
    CameraFamily, CheetahConfig, CheetahDecoder, Decoder, MerlinConfig, MerlinDecoder,
    TimepixConfig, TimepixDecoder,
};
use ricom_core::control::{ControlBlock, RunState};
use ricom_core::geometry::ScanGeometry;
use ricom_core::image::RunImages;
use ricom_core::params::{DetectorConfig, KernelConfig};
use ricom_core::progress::ProgressMonitor;
use ricom_core::signal::Record;
use std::io::Read;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Camera family and its decoder settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CameraSettings {
    /// Frame-based Merlin camera.
    Merlin(MerlinConfig),
    /// Timer-synchronized Timepix event camera.
    Timepix(TimepixConfig),
    /// TDC-synchronized Cheetah event camera.
    Cheetah(CheetahConfig),
}

impl CameraSettings {
    /// Camera family of these settings.
    #[must_use]
    pub fn family(&self) -> CameraFamily {
        match self {
            CameraSettings::Merlin(_) => CameraFamily::Merlin,
            CameraSettings::Timepix(_) => CameraFamily::Timepix,
            CameraSettings::Cheetah(_) => CameraFamily::Cheetah,
        }
    }

    /// Builds the decoder for this family over `reader`.
    ///
    /// # Errors
    /// Returns an error if the decoder settings are invalid.
    pub fn decoder<R>(&self, reader: R, scan: &ScanGeometry) -> Result<Box<dyn Decoder>>
    where
        R: Read + Send + 'static,
    {
        let decoder: Box<dyn Decoder> = match *self {
            CameraSettings::Merlin(config) => Box::new(MerlinDecoder::new(reader, config)?),
            CameraSettings::Timepix(config) => {
                Box::new(TimepixDecoder::new(reader, config, scan)?)
            }
            CameraSettings::Cheetah(config) => {
                Box::new(CheetahDecoder::new(reader, config, scan)?)
            }
        };
        Ok(decoder)
    }
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunSummary {
    /// Records decoded and integrated.
    pub records: usize,
    /// State at the end of the run.
    pub state: RunState,
    /// True when the run stopped on a cancellation request.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Running average record rate (Hz).
    pub average_rate_hz: f64,
    /// Failure that aborted the run.
    pub error: Option<Error>,
}

impl RunSummary {
    /// Returns true when the run finished without an error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Completed,
    Ended,
    Cancelled,
}

/// Handles shared with integration tasks.
#[derive(Clone)]
struct Shared {
    images: Arc<RunImages>,
    control: Arc<ControlBlock>,
    progress: Arc<ProgressMonitor>,
    com_average: Arc<ComAverage>,
    overflow_reported: Arc<AtomicBool>,
}

impl Shared {
    fn integrate(&self, context: &IntegrationContext, record: &Record) {
        let contribution = context.integrate(record, &self.images, &self.control);
        if let Some(com) = contribution.com {
            self.com_average.add(com);
        }
        if let Err(err) = self.progress.record_frame() {
            if self.overflow_reported.swap(true, Ordering::Relaxed) {
                log::trace!("{err}");
            } else {
                log::warn!("{err}; further overflows in this run are not reported");
            }
        }
    }
}

/// Drives acquisition, decoding and integration of one scan at a time.
pub struct Orchestrator {
    scan: ScanGeometry,
    config: PipelineConfig,
    context: Arc<IntegrationContext>,
    shared: Shared,
}

impl Orchestrator {
    /// Builds kernel, offsets and detector mask and allocates the run images.
    ///
    /// # Errors
    /// Returns an error if the scan, kernel or detector parameters are invalid.
    pub fn new(
        scan: ScanGeometry,
        kernel: KernelConfig,
        detector: DetectorConfig,
        config: PipelineConfig,
    ) -> Result<Self> {
        let context = IntegrationContext::new(scan, kernel, detector)?;
        let shared = Shared {
            images: Arc::new(RunImages::new(&scan)),
            control: Arc::new(ControlBlock::new()),
            progress: Arc::new(ProgressMonitor::new(
                scan.total_positions(),
                config.redraw_interval_ms,
            )),
            com_average: Arc::new(ComAverage::new()),
            overflow_reported: Arc::new(AtomicBool::new(false)),
        };
        Ok(Self {
            scan,
            config,
            context: Arc::new(context),
            shared,
        })
    }

    /// Scan raster.
    #[must_use]
    pub fn scan(&self) -> &ScanGeometry {
        &self.scan
    }

    /// Pipeline settings.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current parameter snapshot.
    #[must_use]
    pub fn context(&self) -> Arc<IntegrationContext> {
        Arc::clone(&self.context)
    }

    /// Run images, readable while a run is in progress.
    #[must_use]
    pub fn images(&self) -> Arc<RunImages> {
        Arc::clone(&self.shared.images)
    }

    /// Control block handle for cancellation, parameter changes and rescale flags.
    #[must_use]
    pub fn control(&self) -> Arc<ControlBlock> {
        Arc::clone(&self.shared.control)
    }

    /// Progress monitor of the current run.
    #[must_use]
    pub fn progress(&self) -> Arc<ProgressMonitor> {
        Arc::clone(&self.shared.progress)
    }

    /// Current orchestrator state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.shared.control.state()
    }

    /// Opens `source` and runs one acquisition from it.
    ///
    /// Failures to open the source are reported in the summary.
    pub fn run(&mut self, source: &ByteSource, camera: &CameraSettings) -> RunSummary {
        let started = Instant::now();
        match source.open() {
            Ok(opened) => self.run_opened(opened, camera),
            Err(err) => {
                log::error!("cannot open {source:?}: {err}");
                self.failed_before_start(started, err)
            }
        }
    }

    /// Runs one acquisition from an already opened source.
    ///
    /// The source is read on a dedicated reader thread through a ring of
    /// recycled buffers; file sources are additionally gated by scan-line
    /// progress.
    pub fn run_opened(&mut self, opened: OpenedSource, camera: &CameraSettings) -> RunSummary {
        let started = Instant::now();
        let gate = opened
            .is_file
            .then(|| Arc::new(ReadGate::new(self.config.effective_lines_ahead(self.scan.ny))));
        let spawned = RingReader::spawn(
            opened.reader,
            self.config.chunk_size,
            self.config.ring_depth,
            gate,
            opened.socket,
        );
        let (ring, handle) = match spawned {
            Ok(spawned) => spawned,
            Err(err) => return self.failed_before_start(started, err),
        };
        let mut decoder = match camera.decoder(ring, &self.scan) {
            Ok(decoder) => decoder,
            Err(err) => return self.failed_before_start(started, err),
        };

        let gate = handle.gate().cloned();
        let mut summary = self.execute(decoder.as_mut(), gate.as_deref());
        drop(decoder);
        match handle.join() {
            Ok(bytes) => log::debug!("reader finished after {bytes} bytes"),
            Err(err) => {
                log::error!("{err}");
                if summary.error.is_none() {
                    summary.error = Some(err);
                }
            }
        }
        summary
    }

    /// Runs one acquisition from a decoder the caller constructed.
    pub fn run_decoder(&mut self, decoder: &mut dyn Decoder) -> RunSummary {
        self.execute(decoder, None)
    }

    fn failed_before_start(&self, started: Instant, err: Error) -> RunSummary {
        self.shared.control.set_state(RunState::Done);
        self.shared.control.clear_cancel();
        RunSummary {
            records: 0,
            state: RunState::Done,
            cancelled: false,
            elapsed: started.elapsed(),
            average_rate_hz: 0.0,
            error: Some(err),
        }
    }

    fn execute(&mut self, decoder: &mut dyn Decoder, gate: Option<&ReadGate>) -> RunSummary {
        let started = Instant::now();
        let shared = self.shared.clone();
        shared.images.reset();
        shared.progress.reset();
        shared.com_average.take();
        shared.overflow_reported.store(false, Ordering::Relaxed);
        shared.control.set_state(RunState::Running);
        log::info!(
            "run started: {:?} camera, {}x{} scan, {} repetition(s), {} worker thread(s)",
            decoder.family(),
            self.scan.nx,
            self.scan.ny,
            self.scan.repetitions,
            self.config.worker_threads
        );

        let mut records = 0usize;
        let outcome = if decoder.family().is_frame_based() {
            self.run_frames(decoder, gate, &mut records)
        } else {
            self.run_events(decoder, gate, &mut records)
        };

        let (cancelled, error) = match outcome {
            Ok(Flow::Cancelled) => (true, None),
            Ok(Flow::Completed) => (false, None),
            Ok(Flow::Ended) => {
                if decoder.family().is_frame_based() {
                    log::warn!(
                        "stream ended after {records} of {} frames",
                        self.scan.total_positions()
                    );
                }
                (false, None)
            }
            Err(err) => {
                log::error!("acquisition aborted after {records} records: {err}");
                (false, Some(err))
            }
        };

        shared.control.set_state(RunState::Done);
        // A cancel sent before this run started applied to it
        shared.control.clear_cancel();
        let summary = RunSummary {
            records,
            state: RunState::Done,
            cancelled,
            elapsed: started.elapsed(),
            average_rate_hz: shared.progress.average_rate_hz(),
            error,
        };
        log::info!(
            "run finished: {} records in {:.3} s ({:.1} Hz){}",
            summary.records,
            summary.elapsed.as_secs_f64(),
            summary.average_rate_hz,
            if summary.cancelled { ", cancelled" } else { "" }
        );
        summary
    }

    fn run_frames(
        &mut self,
        decoder: &mut dyn Decoder,
        gate: Option<&ReadGate>,
        records: &mut usize,
    ) -> Result<Flow> {
        let pool = if self.config.use_worker_pool() {
            let frame_bytes = self.context.detector().pixel_count() * size_of::<u32>();
            let depth = self.config.effective_queue_depth(frame_bytes)?;
            Some(WorkerPool::new(self.config.worker_threads, depth)?)
        } else {
            None
        };

        let outcome = self.frame_loop(decoder, gate, pool.as_ref(), records);

        match pool {
            Some(pool) => {
                pool.drain();
                let shutdown = pool.shutdown();
                let flow = outcome?;
                shutdown?;
                Ok(flow)
            }
            None => outcome,
        }
    }

    fn frame_loop(
        &mut self,
        decoder: &mut dyn Decoder,
        gate: Option<&ReadGate>,
        pool: Option<&WorkerPool>,
        records: &mut usize,
    ) -> Result<Flow> {
        let scan = self.scan;
        let control = Arc::clone(&self.shared.control);
        for repetition in 0..scan.repetitions {
            for row in 0..scan.ny {
                control.set_state(RunState::Running);
                for _ in 0..scan.nx {
                    if control.is_cancelled() {
                        control.set_state(RunState::Cancelling);
                        return Ok(Flow::Cancelled);
                    }
                    let Some(record) = decoder.decode_next()? else {
                        return Ok(Flow::Ended);
                    };
                    if *records == 0 {
                        self.match_camera(decoder)?;
                    }
                    *records += 1;
                    self.dispatch(record, pool)?;
                    self.on_interval(decoder)?;
                }
                if let Some(gate) = gate {
                    gate.publish_lines(repetition * scan.ny + row + 1);
                }
                if scan.skip_row > 0 {
                    control.set_state(RunState::RowFlyback);
                    decoder.skip(scan.skip_row)?;
                }
            }
            if scan.skip_img > 0 {
                control.set_state(RunState::ImageFlyback);
                decoder.skip(scan.skip_img)?;
            }
            log::debug!("repetition {} of {} done", repetition + 1, scan.repetitions);
        }
        Ok(Flow::Completed)
    }

    fn dispatch(&self, record: Record, pool: Option<&WorkerPool>) -> Result<()> {
        match pool {
            Some(pool) => {
                let context = Arc::clone(&self.context);
                let shared = self.shared.clone();
                pool.submit(move || shared.integrate(&context, &record))
            }
            None => {
                self.shared.integrate(&self.context, &record);
                Ok(())
            }
        }
    }

    fn run_events(
        &mut self,
        decoder: &mut dyn Decoder,
        gate: Option<&ReadGate>,
        records: &mut usize,
    ) -> Result<Flow> {
        self.match_camera(decoder)?;
        decoder.set_mask(Some(self.context.mask_lookup()));

        let nx = self.scan.nx;
        let control = Arc::clone(&self.shared.control);
        let mut lines = 0usize;
        loop {
            if control.is_cancelled() {
                control.set_state(RunState::Cancelling);
                return Ok(Flow::Cancelled);
            }
            let Some(record) = decoder.decode_next()? else {
                return Ok(Flow::Ended);
            };
            *records += 1;
            let line = record.position.index() / nx;
            self.shared.integrate(&self.context, &record);
            if let Some(gate) = gate {
                if line + 1 > lines {
                    lines = line + 1;
                    gate.publish_lines(lines);
                }
            }
            self.on_interval(decoder)?;
        }
    }

    /// Rebuilds the detector mask when the camera reports a different size.
    fn match_camera(&mut self, decoder: &dyn Decoder) -> Result<()> {
        let Some((width, height)) = decoder.camera_size() else {
            return Ok(());
        };
        let detector = *self.context.detector();
        if detector.width == width && detector.height == height {
            return Ok(());
        }
        log::info!(
            "camera reports {width}x{height} pixels, rebuilding the {}x{} detector mask",
            detector.width,
            detector.height
        );
        let adapted = DetectorConfig {
            width,
            height,
            ..detector
        };
        self.context = Arc::new(self.context.with_detector(adapted)?);
        Ok(())
    }

    /// Redraw-interval actions, run once per progress report.
    fn on_interval(&mut self, decoder: &mut dyn Decoder) -> Result<()> {
        if !self.shared.progress.take_report_ready() {
            return Ok(());
        }
        let control = Arc::clone(&self.shared.control);
        let mut next: Option<IntegrationContext> = None;

        if let Some(kernel) = control.take_kernel_request() {
            let current = next.as_ref().unwrap_or(self.context.as_ref());
            match current.with_kernel(kernel) {
                Ok(updated) => {
                    log::info!(
                        "kernel rebuilt: size {}, rotation {} deg",
                        kernel.kernel_size,
                        kernel.rotation_deg
                    );
                    next = Some(updated);
                }
                Err(err) => log::warn!("kernel change rejected: {err}"),
            }
        }

        if let Some(requested) = control.take_detector_request() {
            let current = next.as_ref().unwrap_or(self.context.as_ref());
            let camera = current.detector();
            let detector = DetectorConfig {
                width: camera.width,
                height: camera.height,
                ..requested
            };
            match current.with_detector(detector) {
                Ok(updated) => {
                    log::info!("detector mask rebuilt: {} pixels", updated.mask().len());
                    next = Some(updated);
                }
                Err(err) => log::warn!("detector change rejected: {err}"),
            }
        }

        control.reset_rescale();

        let average = self.shared.com_average.take();
        let current = next.as_ref().unwrap_or(self.context.as_ref());
        if current.detector().auto_center {
            if let Some(center) = average {
                if center != current.detector().center {
                    log::debug!("detector center moved to ({:.2}, {:.2})", center.0, center.1);
                    next = Some(current.with_center(center)?);
                }
            }
        }

        if let Some(next) = next {
            self.context = Arc::new(next);
            if !decoder.family().is_frame_based() {
                decoder.set_mask(Some(self.context.mask_lookup()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ricom_core::params::FrequencyBand;
    use ricom_core::signal::{EventSignal, Frame, FrameData};

    /// Frames with a single lit pixel, cycling through camera pixels.
    struct SyntheticFrames {
        next: usize,
        limit: usize,
        skipped: usize,
    }

    impl Decoder for SyntheticFrames {
        fn family(&self) -> CameraFamily {
            CameraFamily::Merlin
        }

        fn decode_next(&mut self) -> ricom_camera::Result<Option<Record>> {
            if self.next == self.limit {
                return Ok(None);
            }
            let mut data = vec![0u8; 16];
            data[self.next % 16] = 1;
            let frame = Frame::new(4, 4, FrameData::U8(data))?;
            let record = Record::frame(self.next, frame);
            self.next += 1;
            Ok(Some(record))
        }

        fn skip(&mut self, n: usize) -> ricom_camera::Result<()> {
            self.skipped += n;
            Ok(())
        }

        fn camera_size(&self) -> Option<(usize, usize)> {
            Some((4, 4))
        }
    }

    fn orchestrator(scan: ScanGeometry, config: PipelineConfig) -> Orchestrator {
        Orchestrator::new(
            scan,
            KernelConfig::default().with_kernel_size(1),
            DetectorConfig::for_camera(4, 4).with_radii(0.0, 1.0),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_flyback_frames_are_skipped() {
        let scan = ScanGeometry::new(3, 2).with_flyback(2, 5).with_repetitions(2);
        let mut orch = orchestrator(scan, PipelineConfig::default());
        let mut decoder = SyntheticFrames {
            next: 0,
            limit: usize::MAX,
            skipped: 0,
        };
        let summary = orch.run_decoder(&mut decoder);
        assert!(summary.is_ok());
        assert_eq!(summary.records, 12);
        assert_eq!(decoder.skipped, 2 * (2 * 2 + 5));
        assert_eq!(summary.state, RunState::Done);
        assert_eq!(orch.state(), RunState::Done);
        assert_eq!(orch.progress().frames(), 12);
    }

    #[test]
    fn test_early_end_is_not_an_error() {
        let mut orch = orchestrator(ScanGeometry::new(4, 4), PipelineConfig::default());
        let mut decoder = SyntheticFrames {
            next: 0,
            limit: 5,
            skipped: 0,
        };
        let summary = orch.run_decoder(&mut decoder);
        assert!(summary.is_ok());
        assert!(!summary.cancelled);
        assert_eq!(summary.records, 5);
    }

    #[test]
    fn test_camera_size_rebuilds_mask() {
        let mut orch = Orchestrator::new(
            ScanGeometry::new(2, 2),
            KernelConfig::default().with_kernel_size(1),
            DetectorConfig::for_camera(8, 8).with_radii(0.0, 1.0),
            PipelineConfig::default(),
        )
        .unwrap();
        let mut decoder = SyntheticFrames {
            next: 0,
            limit: 4,
            skipped: 0,
        };
        let summary = orch.run_decoder(&mut decoder);
        assert!(summary.is_ok());
        let detector = *orch.context().detector();
        assert_eq!((detector.width, detector.height), (4, 4));
    }

    #[test]
    fn test_kernel_request_applied_at_interval() {
        let config = PipelineConfig::default().with_redraw_interval_ms(0);
        let mut orch = orchestrator(ScanGeometry::new(4, 4), config);
        orch.control()
            .request_kernel(KernelConfig::default().with_kernel_size(2));
        let mut decoder = SyntheticFrames {
            next: 0,
            limit: usize::MAX,
            skipped: 0,
        };
        let summary = orch.run_decoder(&mut decoder);
        assert!(summary.is_ok());
        assert_eq!(orch.context().kernel().kernel_size(), 2);
    }

    #[test]
    fn test_invalid_kernel_request_keeps_old_kernel() {
        let config = PipelineConfig::default().with_redraw_interval_ms(0);
        let mut orch = orchestrator(ScanGeometry::new(2, 2), config);
        let inverted = FrequencyBand::new(5.0, 1.0);
        orch.control()
            .request_kernel(KernelConfig::default().with_kernel_size(1).with_filter(inverted));
        let mut decoder = SyntheticFrames {
            next: 0,
            limit: usize::MAX,
            skipped: 0,
        };
        assert!(orch.run_decoder(&mut decoder).is_ok());
        assert!(orch.context().kernel().config().filter.is_none());
    }

    #[test]
    fn test_cancel_before_run_applies_to_it() {
        let mut orch = orchestrator(ScanGeometry::new(4, 4), PipelineConfig::default());
        orch.control().cancel();
        let mut decoder = SyntheticFrames {
            next: 0,
            limit: usize::MAX,
            skipped: 0,
        };
        let summary = orch.run_decoder(&mut decoder);
        assert!(summary.cancelled);
        assert_eq!(summary.records, 0);
        assert!(!orch.control().is_cancelled());

        let summary = orch.run_decoder(&mut decoder);
        assert!(!summary.cancelled);
        assert_eq!(summary.records, 16);
    }

    /// One in-mask event per record, positions wrapping every `total`.
    struct WrappingEvents {
        next: usize,
        limit: usize,
        total: usize,
    }

    impl Decoder for WrappingEvents {
        fn family(&self) -> CameraFamily {
            CameraFamily::Cheetah
        }

        fn decode_next(&mut self) -> ricom_camera::Result<Option<Record>> {
            if self.next == self.limit {
                return Ok(None);
            }
            let mut signal = EventSignal::default();
            signal.add_event(1, 1, true);
            let record = Record::events(self.next % self.total, signal);
            self.next += 1;
            Ok(Some(record))
        }

        fn camera_size(&self) -> Option<(usize, usize)> {
            Some((4, 4))
        }
    }

    #[test]
    fn test_wrapping_positions_flag_overflow_once_per_run() {
        let mut orch = orchestrator(ScanGeometry::new(2, 2), PipelineConfig::default());
        let mut decoder = WrappingEvents {
            next: 0,
            limit: 12,
            total: 4,
        };
        let summary = orch.run_decoder(&mut decoder);
        assert!(summary.is_ok());
        assert_eq!(summary.records, 12);
        assert_eq!(orch.progress().frames(), 12);
        assert!(orch.shared.overflow_reported.load(Ordering::Relaxed));

        let mut short = WrappingEvents {
            next: 0,
            limit: 4,
            total: 4,
        };
        assert!(orch.run_decoder(&mut short).is_ok());
        assert!(!orch.shared.overflow_reported.load(Ordering::Relaxed));
    }
}
