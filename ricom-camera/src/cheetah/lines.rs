//! Open scan lines awaiting the chip barrier.
//!
//! Hits are accumulated per scan line until every active chip has closed
//! that line; only then is the line handed out. Chips may run several lines
//! apart, so the ring holds as many lines as needed up to `capacity`. Only a
//! chip running a whole `capacity` ahead of the oldest open line forces that
//! line out.

use ricom_core::signal::EventSignal;
use std::collections::BTreeMap;

/// A scan line ready for integration.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedLine {
    /// Unwrapped line index since the start of the stream.
    pub line: usize,
    /// One accumulator per scan column.
    pub pixels: Vec<EventSignal>,
}

/// Open scan lines, oldest first.
#[derive(Debug, Clone)]
pub struct LineRing {
    nx: usize,
    capacity: usize,
    next_flush: usize,
    lines: BTreeMap<usize, Vec<EventSignal>>,
    forced: usize,
}

impl LineRing {
    /// Creates a ring for lines of `nx` pixels spanning at most `capacity`
    /// lines between the oldest open line and the newest.
    #[must_use]
    pub fn new(nx: usize, capacity: usize) -> Self {
        Self {
            nx,
            capacity: capacity.max(1),
            next_flush: 0,
            lines: BTreeMap::new(),
            forced: 0,
        }
    }

    /// Oldest line not yet handed out.
    #[must_use]
    pub fn next_flush(&self) -> usize {
        self.next_flush
    }

    /// Maximum span of open lines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines handed out before every chip closed them.
    #[must_use]
    pub fn forced(&self) -> usize {
        self.forced
    }

    /// Number of lines currently holding hits.
    #[must_use]
    pub fn open_lines(&self) -> usize {
        self.lines.len()
    }

    /// Adds one hit at column `column` of `line`.
    ///
    /// Returns false when the line was already handed out.
    pub fn add(&mut self, line: usize, column: usize, x: u32, y: u32, in_mask: bool) -> bool {
        if line < self.next_flush || column >= self.nx {
            return false;
        }
        let nx = self.nx;
        self.lines
            .entry(line)
            .or_insert_with(|| vec![EventSignal::default(); nx])[column]
            .add_event(x, y, in_mask);
        true
    }

    /// Hands out every line below `closed`, the lowest line count over
    /// active chips.
    pub fn flush_closed(&mut self, closed: usize, out: &mut Vec<CompletedLine>) {
        while self.next_flush < closed {
            self.pop_oldest(out);
        }
    }

    /// Forces out old lines while `newest` lies `capacity` or more lines
    /// past the oldest open line.
    pub fn enforce_capacity(&mut self, newest: usize, out: &mut Vec<CompletedLine>) {
        while newest >= self.next_flush + self.capacity {
            log::warn!(
                "forcing out scan line {} before all chips closed it (newest line {}, capacity {})",
                self.next_flush,
                newest,
                self.capacity
            );
            self.forced += 1;
            self.pop_oldest(out);
        }
    }

    /// Hands out every line below `end` and any later line holding hits.
    pub fn drain(&mut self, end: usize, out: &mut Vec<CompletedLine>) {
        let last_open = self.lines.keys().next_back().map_or(0, |&l| l + 1);
        let end = end.max(last_open);
        while self.next_flush < end {
            self.pop_oldest(out);
        }
    }

    fn pop_oldest(&mut self, out: &mut Vec<CompletedLine>) {
        let line = self.next_flush;
        let pixels = self
            .lines
            .remove(&line)
            .unwrap_or_else(|| vec![EventSignal::default(); self.nx]);
        out.push(CompletedLine { line, pixels });
        self.next_flush += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_in_order() {
        let mut ring = LineRing::new(4, 2);
        assert!(ring.add(1, 2, 10, 10, false));
        let mut out = Vec::new();
        ring.flush_closed(2, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].line, 0);
        assert_eq!(out[1].pixels[2].dose, 1);
        // Line 1 is gone
        assert!(!ring.add(1, 0, 0, 0, false));
        assert_eq!(ring.open_lines(), 0);
    }

    #[test]
    fn test_lines_within_capacity_stay_open() {
        let mut ring = LineRing::new(2, 8);
        let mut out = Vec::new();
        for line in 0..6 {
            assert!(ring.add(line, 1, 0, 0, false));
        }
        ring.enforce_capacity(7, &mut out);
        assert!(out.is_empty());
        // A late hit for the oldest line is still accepted
        assert!(ring.add(0, 0, 0, 0, false));
        ring.flush_closed(1, &mut out);
        assert_eq!(out[0].pixels[0].dose + out[0].pixels[1].dose, 2);
        assert_eq!(ring.forced(), 0);
    }

    #[test]
    fn test_capacity_forces_oldest() {
        let mut ring = LineRing::new(2, 2);
        let mut out = Vec::new();
        ring.enforce_capacity(1, &mut out);
        assert!(out.is_empty());
        ring.enforce_capacity(3, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(ring.forced(), 2);
        assert_eq!(ring.next_flush(), 2);
    }

    #[test]
    fn test_drain_covers_open_lines() {
        let mut ring = LineRing::new(2, 8);
        ring.add(4, 0, 0, 0, false);
        let mut out = Vec::new();
        ring.drain(2, &mut out);
        assert_eq!(out.len(), 5);
        assert_eq!(out[4].pixels[0].dose, 1);
    }
}
