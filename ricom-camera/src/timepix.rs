//! Timer-synchronized event decoder for `.t3p` streams.
//!
//! A stream is a headerless concatenation of 16-byte little-endian records:
//!
//! | bytes  | field    |
//! |--------|----------|
//! | 0..4   | pixel index (u32) |
//! | 4..12  | time of arrival in clock ticks (u64) |
//! | 12     | overflow (u8) |
//! | 13     | fine time of arrival (u8) |
//! | 14..16 | time over threshold (u16) |
//!
//! Events are attributed to probe position
//! `floor(toa * tick_ns / dwell_ns) mod total_positions`. Arrival order is
//! only approximately monotonic, so a position is handed out once an event
//! at least two positions later has been seen.

use crate::stream::read_record;
use crate::{CameraFamily, Decoder, Error, Result};
use ricom_core::geometry::ScanGeometry;
use ricom_core::signal::{EventSignal, MaskLookup, Record};
use std::collections::{BTreeMap, VecDeque};
use std::io::Read;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Size of one `.t3p` record in bytes.
pub const EVENT_SIZE: usize = 16;

/// Positions an accumulator stays open behind the newest event.
pub const LOOKBACK: u64 = 2;

/// One decoded `.t3p` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimepixEvent {
    /// Flat camera pixel index.
    pub index: u32,
    /// Time of arrival in clock ticks.
    pub toa: u64,
    /// Overflow flag.
    pub overflow: u8,
    /// Fine time of arrival.
    pub ftoa: u8,
    /// Time over threshold.
    pub tot: u16,
}

impl TimepixEvent {
    /// Parses one record from its wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; EVENT_SIZE]) -> Self {
        Self {
            index: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            toa: u64::from_le_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
            ]),
            overflow: bytes[12],
            ftoa: bytes[13],
            tot: u16::from_le_bytes([bytes[14], bytes[15]]),
        }
    }

    /// Encodes the record in wire format.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut out = [0u8; EVENT_SIZE];
        out[0..4].copy_from_slice(&self.index.to_le_bytes());
        out[4..12].copy_from_slice(&self.toa.to_le_bytes());
        out[12] = self.overflow;
        out[13] = self.ftoa;
        out[14..16].copy_from_slice(&self.tot.to_le_bytes());
        out
    }

    /// Camera pixel `(x, y)` for a camera `width` pixels wide.
    #[inline]
    #[must_use]
    pub fn pixel(&self, width: u32) -> (u32, u32) {
        (self.index % width, self.index / width)
    }
}

/// Timepix decoder settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimepixConfig {
    /// Camera width in pixels.
    pub camera_width: u32,
    /// Camera height in pixels.
    pub camera_height: u32,
    /// Duration of one time-of-arrival tick (ns).
    pub tick_ns: f64,
    /// Probe dwell time per scan position (ns).
    pub dwell_ns: f64,
}

impl Default for TimepixConfig {
    fn default() -> Self {
        Self {
            camera_width: 256,
            camera_height: 256,
            tick_ns: 25.0,
            dwell_ns: 1000.0,
        }
    }
}

impl TimepixConfig {
    /// Set the camera size.
    #[must_use]
    pub fn with_camera(mut self, width: u32, height: u32) -> Self {
        self.camera_width = width;
        self.camera_height = height;
        self
    }

    /// Set the tick duration.
    #[must_use]
    pub fn with_tick_ns(mut self, tick_ns: f64) -> Self {
        self.tick_ns = tick_ns;
        self
    }

    /// Set the dwell time.
    #[must_use]
    pub fn with_dwell_ns(mut self, dwell_ns: f64) -> Self {
        self.dwell_ns = dwell_ns;
        self
    }

    /// Checks the timing and camera parameters.
    ///
    /// # Errors
    /// Returns an error for a zero-sized camera or non-positive timing.
    pub fn validate(&self) -> Result<()> {
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(Error::InvalidConfig("camera size must be non-zero".into()));
        }
        if !(self.tick_ns > 0.0 && self.dwell_ns > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tick ({} ns) and dwell ({} ns) must be positive",
                self.tick_ns, self.dwell_ns
            )));
        }
        Ok(())
    }

    /// Unwrapped probe position of a time of arrival.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    #[inline]
    #[must_use]
    pub fn raw_position(&self, toa: u64) -> u64 {
        (toa as f64 * self.tick_ns / self.dwell_ns).floor() as u64
    }
}

/// Sequential `.t3p` decoder with a two-position lookback window.
pub struct TimepixDecoder<R> {
    reader: R,
    config: TimepixConfig,
    total_positions: u64,
    mask: Option<MaskLookup>,
    open: BTreeMap<u64, EventSignal>,
    ready: VecDeque<Record>,
    newest: Option<u64>,
    last_final: Option<u64>,
    events: u64,
    late_events: u64,
    eof: bool,
}

impl<R: Read> TimepixDecoder<R> {
    /// Creates a decoder for a scan raster.
    ///
    /// # Errors
    /// Returns an error if the configuration or the scan is invalid.
    pub fn new(reader: R, config: TimepixConfig, scan: &ScanGeometry) -> Result<Self> {
        config.validate()?;
        scan.validate()?;
        Ok(Self {
            reader,
            config,
            total_positions: scan.total_positions() as u64,
            mask: None,
            open: BTreeMap::new(),
            ready: VecDeque::new(),
            newest: None,
            last_final: None,
            events: 0,
            late_events: 0,
            eof: false,
        })
    }

    /// Events read so far.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Events dropped because their position was already handed out.
    #[must_use]
    pub fn late_events(&self) -> u64 {
        self.late_events
    }

    /// Adds one event to the accumulator of its position.
    pub fn push_event(&mut self, event: &TimepixEvent) {
        self.events += 1;
        let pos = self.config.raw_position(event.toa);
        if self.last_final.is_some_and(|done| pos <= done) {
            self.late_events += 1;
            log::debug!(
                "dropping late event at position {} (handed out up to {:?})",
                pos,
                self.last_final
            );
            return;
        }

        let (x, y) = event.pixel(self.config.camera_width);
        let in_mask = self.mask.as_ref().is_some_and(|m| m.contains(x, y));
        self.open.entry(pos).or_default().add_event(x, y, in_mask);

        if self.newest.map_or(true, |n| pos > n) {
            self.newest = Some(pos);
            self.finalize_before(pos.saturating_sub(LOOKBACK - 1));
        }
    }

    /// Hands out every open position below `limit`.
    fn finalize_before(&mut self, limit: u64) {
        let keep = self.open.split_off(&limit);
        let done = std::mem::replace(&mut self.open, keep);
        for (pos, signal) in done {
            self.emit(pos, signal);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit(&mut self, pos: u64, signal: EventSignal) {
        self.last_final = Some(pos);
        let wrapped = (pos % self.total_positions) as usize;
        self.ready.push_back(Record::events(wrapped, signal));
    }

    fn flush(&mut self) {
        let done = std::mem::take(&mut self.open);
        for (pos, signal) in done {
            self.emit(pos, signal);
        }
    }
}

impl<R: Read + Send> Decoder for TimepixDecoder<R> {
    fn family(&self) -> CameraFamily {
        CameraFamily::Timepix
    }

    fn decode_next(&mut self) -> Result<Option<Record>> {
        let mut buf = [0u8; EVENT_SIZE];
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if self.eof {
                return Ok(None);
            }
            if read_record(&mut self.reader, &mut buf)? {
                let event = TimepixEvent::from_bytes(&buf);
                self.push_event(&event);
            } else {
                self.eof = true;
                self.flush();
                if self.late_events > 0 {
                    log::warn!(
                        "{} of {} events arrived outside the lookback window",
                        self.late_events,
                        self.events
                    );
                }
            }
        }
    }

    fn set_mask(&mut self, mask: Option<MaskLookup>) {
        self.mask = mask;
    }

    fn camera_size(&self) -> Option<(usize, usize)> {
        Some((
            self.config.camera_width as usize,
            self.config.camera_height as usize,
        ))
    }
}
