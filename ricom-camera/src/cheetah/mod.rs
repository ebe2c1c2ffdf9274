//! TDC-synchronized decoder for Cheetah `.tpx3` streams.
//!
//! The stream interleaves per-chip sections, each opened by a header
//! packet naming the chip. Every scan line is framed by a rising and a
//! falling TDC edge on each chip; the falling edge closes the line and
//! fixes the dwell time used to place hits of the following line.
//!
//! Hits are only accepted once their chip has seen a rising edge and
//! closed at least one line, so data recorded before synchronization is
//! discarded. A line is handed out once every active chip has closed it,
//! however far apart the chips run within the open-line capacity.

mod lines;
mod packet;

pub use lines::{CompletedLine, LineRing};
pub use packet::{time_delta, Tpx3Packet, TIME_BITS, TIME_MASK};

use crate::stream::read_record;
use crate::{CameraFamily, Decoder, Error, Result};
use ricom_core::geometry::ScanGeometry;
use ricom_core::signal::{MaskLookup, Record};
use std::collections::VecDeque;
use std::io::Read;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of chips of a quad sensor.
pub const CHIP_COUNT: usize = 4;

/// Lower bound on the default open-line capacity.
pub const MIN_OPEN_LINES: usize = 64;

/// Placement of one chip on the quad sensor.
///
/// `global = bias + multiplier * local` on both axes; a multiplier of -1
/// turns the chip by 180 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChipPlacement {
    /// Address multiplier, +1 or -1.
    pub multiplier: i32,
    /// Column bias.
    pub bias_x: i32,
    /// Row bias.
    pub bias_y: i32,
}

impl ChipPlacement {
    /// Creates a placement.
    #[must_use]
    pub fn new(multiplier: i32, bias_x: i32, bias_y: i32) -> Self {
        Self {
            multiplier,
            bias_x,
            bias_y,
        }
    }

    /// Default quad layout for chips of side `chip_size`.
    #[must_use]
    pub fn quad(chip_size: u16) -> [Self; CHIP_COUNT] {
        let s = i32::from(chip_size);
        [
            Self::new(1, s, 0),
            Self::new(-1, 2 * s - 1, 2 * s - 1),
            Self::new(-1, s - 1, 2 * s - 1),
            Self::new(1, 0, 0),
        ]
    }

    /// Maps local chip coordinates onto the sensor.
    ///
    /// Assumes the placement passed [`ChipPlacement::validate_bounds`].
    #[allow(clippy::cast_sign_loss)]
    #[inline]
    #[must_use]
    pub fn apply(&self, x: u16, y: u16) -> (u32, u32) {
        let gx = self.bias_x + self.multiplier * i32::from(x);
        let gy = self.bias_y + self.multiplier * i32::from(y);
        (gx as u32, gy as u32)
    }

    /// Checks that every local pixel lands on a `sensor x sensor` camera.
    ///
    /// The map is affine, so checking the corners of the chip suffices.
    ///
    /// # Errors
    /// Returns a description of the first corner that falls outside.
    pub fn validate_bounds(&self, chip_size: u16, sensor: u32) -> std::result::Result<(), String> {
        if self.multiplier.abs() != 1 {
            return Err(format!("multiplier {} must be +1 or -1", self.multiplier));
        }
        let max = i32::from(chip_size.saturating_sub(1));
        let limit = i64::from(sensor);
        for (x, y) in [(0, 0), (max, 0), (0, max), (max, max)] {
            let gx = i64::from(self.bias_x + self.multiplier * x);
            let gy = i64::from(self.bias_y + self.multiplier * y);
            if gx < 0 || gx >= limit || gy < 0 || gy >= limit {
                return Err(format!(
                    "local ({x}, {y}) maps to ({gx}, {gy}), outside [0, {sensor})"
                ));
            }
        }
        Ok(())
    }
}

/// TDC input carrying the line trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TdcChannel {
    /// TDC1 (rising `0xF`, falling `0xA`).
    #[default]
    Tdc1,
    /// TDC2 (rising `0xE`, falling `0xB`).
    Tdc2,
}

impl TdcChannel {
    /// Packet subtype of a rising edge.
    #[must_use]
    pub fn rising_subtype(self) -> u8 {
        match self {
            TdcChannel::Tdc1 => 0xF,
            TdcChannel::Tdc2 => 0xE,
        }
    }

    /// Packet subtype of a falling edge.
    #[must_use]
    pub fn falling_subtype(self) -> u8 {
        match self {
            TdcChannel::Tdc1 => 0xA,
            TdcChannel::Tdc2 => 0xB,
        }
    }
}

/// Cheetah decoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CheetahConfig {
    /// Chip side length in pixels.
    pub chip_size: u16,
    /// Placement of chips 0..4 on the sensor.
    pub placements: [ChipPlacement; CHIP_COUNT],
    /// TDC input carrying the line trigger.
    pub tdc_channel: TdcChannel,
    /// Span of scan lines that may be open at once; `None` holds one scan
    /// image (at least [`MIN_OPEN_LINES`]).
    pub max_open_lines: Option<usize>,
}

impl Default for CheetahConfig {
    fn default() -> Self {
        Self {
            chip_size: 256,
            placements: ChipPlacement::quad(256),
            tdc_channel: TdcChannel::Tdc1,
            max_open_lines: None,
        }
    }
}

impl CheetahConfig {
    /// Set the chip size and the matching default quad layout.
    #[must_use]
    pub fn with_chip_size(mut self, chip_size: u16) -> Self {
        self.chip_size = chip_size;
        self.placements = ChipPlacement::quad(chip_size);
        self
    }

    /// Set custom chip placements.
    #[must_use]
    pub fn with_placements(mut self, placements: [ChipPlacement; CHIP_COUNT]) -> Self {
        self.placements = placements;
        self
    }

    /// Set custom chip placements, rejecting layouts that leave the sensor.
    ///
    /// # Errors
    /// Returns an error naming the first invalid chip.
    pub fn try_with_placements(self, placements: [ChipPlacement; CHIP_COUNT]) -> Result<Self> {
        let config = self.with_placements(placements);
        config.validate()?;
        Ok(config)
    }

    /// Set the TDC channel.
    #[must_use]
    pub fn with_tdc_channel(mut self, channel: TdcChannel) -> Self {
        self.tdc_channel = channel;
        self
    }

    /// Set the open-line capacity.
    #[must_use]
    pub fn with_max_open_lines(mut self, lines: usize) -> Self {
        self.max_open_lines = Some(lines);
        self
    }

    /// Open-line capacity for a scan `ny` lines high.
    #[must_use]
    pub fn open_line_capacity(&self, ny: usize) -> usize {
        self.max_open_lines.unwrap_or_else(|| ny.max(MIN_OPEN_LINES))
    }

    /// Sensor side length (two chips).
    #[must_use]
    pub fn sensor_size(&self) -> u32 {
        2 * u32::from(self.chip_size)
    }

    /// Validates placements and the open-line capacity.
    ///
    /// # Errors
    /// Returns an error for a placement leaving the sensor or a zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.chip_size == 0 {
            return Err(Error::InvalidConfig("chip size must be non-zero".into()));
        }
        if self.max_open_lines == Some(0) {
            return Err(Error::InvalidConfig("open-line capacity must be at least 1".into()));
        }
        for (chip, placement) in self.placements.iter().enumerate() {
            placement
                .validate_bounds(self.chip_size, self.sensor_size())
                .map_err(|e| Error::InvalidConfig(format!("chip {chip} placement invalid: {e}")))?;
        }
        Ok(())
    }
}

/// Line synchronization state of one chip.
#[derive(Debug, Clone, Copy, Default)]
struct ChipSync {
    rising: Option<u64>,
    lines: usize,
    dwell: Option<f64>,
}

impl ChipSync {
    fn is_active(&self) -> bool {
        self.rising.is_some()
    }
}

/// Sequential `.tpx3` decoder.
pub struct CheetahDecoder<R> {
    reader: R,
    config: CheetahConfig,
    nx: usize,
    total_positions: usize,
    chips: [ChipSync; CHIP_COUNT],
    current_chip: Option<usize>,
    ring: LineRing,
    completed: Vec<CompletedLine>,
    ready: VecDeque<Record>,
    mask: Option<MaskLookup>,
    packets: u64,
    unknown: u64,
    rejected_hits: u64,
    eof: bool,
}

impl<R: Read> CheetahDecoder<R> {
    /// Creates a decoder for a scan raster.
    ///
    /// # Errors
    /// Returns an error if the configuration or the scan is invalid.
    pub fn new(reader: R, config: CheetahConfig, scan: &ScanGeometry) -> Result<Self> {
        config.validate()?;
        scan.validate()?;
        Ok(Self {
            reader,
            config,
            nx: scan.nx,
            total_positions: scan.total_positions(),
            chips: [ChipSync::default(); CHIP_COUNT],
            current_chip: None,
            ring: LineRing::new(scan.nx, config.open_line_capacity(scan.ny)),
            completed: Vec::new(),
            ready: VecDeque::new(),
            mask: None,
            packets: 0,
            unknown: 0,
            rejected_hits: 0,
            eof: false,
        })
    }

    /// Lines closed by each chip.
    #[must_use]
    pub fn line_counts(&self) -> [usize; CHIP_COUNT] {
        self.chips.map(|c| c.lines)
    }

    /// Hits discarded before synchronization, outside the line or for a
    /// line already handed out.
    #[must_use]
    pub fn rejected_hits(&self) -> u64 {
        self.rejected_hits
    }

    /// Lines handed out before every active chip closed them.
    #[must_use]
    pub fn forced_lines(&self) -> usize {
        self.ring.forced()
    }

    /// Packets of an unknown type.
    #[must_use]
    pub fn unknown_packets(&self) -> u64 {
        self.unknown
    }

    /// Processes one raw packet.
    pub fn push_packet(&mut self, raw: u64) {
        self.packets += 1;
        let packet = Tpx3Packet::new(raw);
        if packet.is_header() {
            let chip = usize::from(packet.chip_id());
            self.current_chip = (chip < CHIP_COUNT).then_some(chip);
            if self.current_chip.is_none() {
                log::debug!("ignoring section of unknown chip {chip}");
            }
        } else if packet.is_tdc() {
            self.push_tdc(packet);
        } else if packet.is_hit() {
            self.push_hit(packet);
        } else {
            self.unknown += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn push_tdc(&mut self, packet: Tpx3Packet) {
        let Some(chip) = self.current_chip else {
            return;
        };
        let subtype = packet.tdc_subtype();
        let time = packet.tdc_time();
        let sync = &mut self.chips[chip];
        if subtype == self.config.tdc_channel.rising_subtype() {
            sync.rising = Some(time);
        } else if subtype == self.config.tdc_channel.falling_subtype() {
            let Some(rising) = sync.rising else {
                return;
            };
            let duration = time_delta(rising, time);
            sync.dwell = Some(duration as f64 / self.nx as f64);
            sync.lines += 1;
            log::trace!("chip {chip} closed line {} ({duration} ticks)", sync.lines - 1);
            self.flush_closed_lines();
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn push_hit(&mut self, packet: Tpx3Packet) {
        let Some(chip) = self.current_chip else {
            self.rejected_hits += 1;
            return;
        };
        let sync = self.chips[chip];
        let (Some(rising), Some(dwell)) = (sync.rising, sync.dwell) else {
            self.rejected_hits += 1;
            return;
        };
        if sync.lines == 0 || dwell <= 0.0 {
            self.rejected_hits += 1;
            return;
        }

        let delta = time_delta(rising, packet.hit_time());
        let column = (delta as f64 / dwell) as usize;
        if column >= self.nx {
            self.rejected_hits += 1;
            return;
        }

        let (lx, ly) = packet.pixel_coordinates();
        let (x, y) = self.config.placements[chip].apply(lx, ly);
        let in_mask = self.mask.as_ref().is_some_and(|m| m.contains(x, y));
        if !self.ring.add(sync.lines, column, x, y, in_mask) {
            self.rejected_hits += 1;
            return;
        }
        self.ring.enforce_capacity(sync.lines, &mut self.completed);
        self.emit_completed();
    }

    fn flush_closed_lines(&mut self) {
        let closed = self
            .chips
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.lines)
            .min()
            .unwrap_or(0);
        self.ring.flush_closed(closed, &mut self.completed);
        let newest = self.chips.iter().map(|c| c.lines).max().unwrap_or(0);
        self.ring.enforce_capacity(newest, &mut self.completed);
        self.emit_completed();
    }

    fn emit_completed(&mut self) {
        for done in self.completed.drain(..) {
            let base = done.line * self.nx;
            for (column, signal) in done.pixels.into_iter().enumerate() {
                let position = (base + column) % self.total_positions;
                self.ready.push_back(Record::events(position, signal));
            }
        }
    }

    fn finish(&mut self) {
        let newest = self.chips.iter().map(|c| c.lines).max().unwrap_or(0);
        self.ring.drain(newest, &mut self.completed);
        self.emit_completed();
        log::info!(
            "cheetah stream ended: {} packets, {} unknown, {} hits rejected, {} lines forced",
            self.packets,
            self.unknown,
            self.rejected_hits,
            self.ring.forced()
        );
    }
}

impl<R: Read + Send> Decoder for CheetahDecoder<R> {
    fn family(&self) -> CameraFamily {
        CameraFamily::Cheetah
    }

    fn decode_next(&mut self) -> Result<Option<Record>> {
        let mut buf = [0u8; 8];
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if self.eof {
                return Ok(None);
            }
            if read_record(&mut self.reader, &mut buf)? {
                self.push_packet(u64::from_le_bytes(buf));
            } else {
                self.eof = true;
                self.finish();
            }
        }
    }

    fn set_mask(&mut self, mask: Option<MaskLookup>) {
        self.mask = mask;
    }

    fn camera_size(&self) -> Option<(usize, usize)> {
        let side = self.config.sensor_size() as usize;
        Some((side, side))
    }
}
