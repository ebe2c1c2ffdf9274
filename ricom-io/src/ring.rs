//! Reader thread feeding a ring of recycled buffers.
//!
//! The reader thread fills buffers taken from a free list and hands them
//! to the processing side over a bounded channel; consumed buffers travel
//! back to the free list. With `depth` buffers in circulation the reader
//! can never be more than `depth` chunks ahead of the processor.
//!
//! File sources are additionally held back by a [`ReadGate`], which keeps
//! the reader within a fixed number of scan lines of the processor's
//! published progress.

use crate::{Error, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const GATE_POLL: Duration = Duration::from_millis(50);

enum Chunk {
    Data { buf: Vec<u8>, len: usize },
    Eof,
    Failed(io::Error),
}

#[derive(Debug, Default)]
struct GateState {
    bytes_read: u64,
    bytes_consumed: u64,
    calibration_bytes: u64,
    lines_done: u64,
    closed: bool,
}

/// Read-ahead limiter between a file reader and the processor.
///
/// The processor publishes completed scan lines; the gate estimates the
/// bytes per line from the bytes it had consumed at that point and blocks
/// the reader while it is `max_lines_ahead` lines ahead. Until the first
/// line is published the reader stays at most one chunk ahead.
#[derive(Debug)]
pub struct ReadGate {
    state: Mutex<GateState>,
    changed: Condvar,
    max_lines_ahead: u64,
}

impl ReadGate {
    /// Creates a gate allowing `max_lines_ahead` lines of read-ahead.
    #[must_use]
    pub fn new(max_lines_ahead: usize) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            max_lines_ahead: max_lines_ahead.max(1) as u64,
        }
    }

    /// Publishes the number of scan lines the processor has completed.
    pub fn publish_lines(&self, lines: usize) {
        let mut state = self.state.lock();
        let lines = lines as u64;
        if lines > state.lines_done {
            state.lines_done = lines;
            state.calibration_bytes = state.bytes_consumed;
            self.changed.notify_all();
        }
    }

    /// Estimated bytes per scan line, once calibrated.
    #[must_use]
    pub fn bytes_per_line(&self) -> Option<u64> {
        let state = self.state.lock();
        Self::calibrated(&state)
    }

    /// Whole scan lines the reader is ahead of the processor.
    #[must_use]
    pub fn lines_ahead(&self) -> Option<u64> {
        let state = self.state.lock();
        let per_line = Self::calibrated(&state)?;
        Some(state.bytes_read.saturating_sub(state.bytes_consumed) / per_line)
    }

    /// Stops gating; wakes a waiting reader.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    fn calibrated(state: &GateState) -> Option<u64> {
        if state.lines_done == 0 || state.calibration_bytes == 0 {
            return None;
        }
        Some((state.calibration_bytes / state.lines_done).max(1))
    }

    /// Blocks until the reader may read; returns false once closed.
    fn wait_for_room(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            let ahead = state.bytes_read.saturating_sub(state.bytes_consumed);
            let limit =
                Self::calibrated(&state).map_or(1, |per_line| per_line * self.max_lines_ahead);
            if ahead < limit {
                return true;
            }
            self.changed.wait_for(&mut state, GATE_POLL);
        }
    }

    fn record_read(&self, bytes: usize) {
        self.state.lock().bytes_read += bytes as u64;
    }

    fn record_consumed(&self, bytes: usize) {
        self.state.lock().bytes_consumed += bytes as u64;
        self.changed.notify_all();
    }
}

/// Processing-side end of the ring; implements [`Read`].
pub struct RingReader {
    filled: Receiver<Chunk>,
    free: Sender<Vec<u8>>,
    current: Vec<u8>,
    len: usize,
    offset: usize,
    finished: bool,
    failure: Option<io::ErrorKind>,
    gate: Option<Arc<ReadGate>>,
}

/// Reader-thread handle, joined after the processor is done.
pub struct ReaderHandle {
    thread: Option<JoinHandle<u64>>,
    gate: Option<Arc<ReadGate>>,
    socket: Option<TcpStream>,
}

impl RingReader {
    /// Spawns the reader thread over `source`.
    ///
    /// `socket` is a clone of the underlying stream for network sources; it
    /// is shut down when the handle is joined so a blocked read returns.
    ///
    /// # Errors
    /// Returns an error if a size is 0 or the thread cannot be spawned.
    pub fn spawn<R>(
        mut source: R,
        chunk_size: usize,
        depth: usize,
        gate: Option<Arc<ReadGate>>,
        socket: Option<TcpStream>,
    ) -> Result<(Self, ReaderHandle)>
    where
        R: Read + Send + 'static,
    {
        if chunk_size == 0 || depth == 0 {
            return Err(Error::InvalidConfig(format!(
                "reader ring needs non-zero sizes (chunk_size={chunk_size}, depth={depth})"
            )));
        }
        let (filled_tx, filled_rx) = bounded::<Chunk>(depth);
        let (free_tx, free_rx) = bounded::<Vec<u8>>(depth);
        for _ in 0..depth {
            // Capacity equals depth, so this never blocks
            let _ = free_tx.send(vec![0u8; chunk_size]);
        }

        let thread_gate = gate.clone();
        let thread = thread::Builder::new()
            .name("ricom-reader".to_string())
            .spawn(move || fill_loop(&mut source, &free_rx, &filled_tx, thread_gate.as_deref()))?;

        Ok((
            Self {
                filled: filled_rx,
                free: free_tx,
                current: Vec::new(),
                len: 0,
                offset: 0,
                finished: false,
                failure: None,
                gate: gate.clone(),
            },
            ReaderHandle {
                thread: Some(thread),
                gate,
                socket,
            },
        ))
    }

    fn next_chunk(&mut self) -> io::Result<bool> {
        if !self.current.is_empty() {
            let buf = std::mem::take(&mut self.current);
            // The reader may already be gone
            let _ = self.free.send(buf);
        }
        match self.filled.recv() {
            Ok(Chunk::Data { buf, len }) => {
                self.current = buf;
                self.len = len;
                self.offset = 0;
                Ok(true)
            }
            Ok(Chunk::Eof) => {
                self.finished = true;
                Ok(false)
            }
            Ok(Chunk::Failed(err)) => {
                self.failure = Some(err.kind());
                Err(err)
            }
            Err(_) => {
                self.failure = Some(io::ErrorKind::BrokenPipe);
                Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "reader thread stopped without end-of-stream marker",
                ))
            }
        }
    }
}

impl Read for RingReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if let Some(kind) = self.failure {
            return Err(io::Error::new(kind, "byte source failed earlier"));
        }
        while self.offset == self.len {
            if self.finished || !self.next_chunk()? {
                return Ok(0);
            }
        }
        let n = out.len().min(self.len - self.offset);
        out[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        if let Some(gate) = &self.gate {
            gate.record_consumed(n);
        }
        Ok(n)
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }
}

impl ReaderHandle {
    /// Read-ahead gate of a file source.
    #[must_use]
    pub fn gate(&self) -> Option<&Arc<ReadGate>> {
        self.gate.as_ref()
    }

    /// Stops the reader and waits for its thread.
    ///
    /// Returns the number of bytes read from the source. Call after the
    /// [`RingReader`] has been dropped.
    ///
    /// # Errors
    /// Returns [`Error::ReaderFailed`] if the reader thread panicked.
    pub fn join(mut self) -> Result<u64> {
        self.stop();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::ReaderFailed("reader thread panicked".to_string())),
            None => Ok(0),
        }
    }

    fn stop(&mut self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
        if let Some(socket) = self.socket.take() {
            // Unblocks a reader waiting on a silent peer
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fill_loop<R: Read>(
    source: &mut R,
    free: &Receiver<Vec<u8>>,
    filled: &Sender<Chunk>,
    gate: Option<&ReadGate>,
) -> u64 {
    let mut total = 0u64;
    loop {
        if let Some(gate) = gate {
            if !gate.wait_for_room() {
                log::debug!("reader stopped by gate after {total} bytes");
                return total;
            }
        }
        let Ok(mut buf) = free.recv() else {
            return total;
        };
        let len = loop {
            match source.read(&mut buf) {
                Ok(n) => break Ok(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        match len {
            Ok(0) => {
                log::debug!("byte source ended after {total} bytes");
                let _ = filled.send(Chunk::Eof);
                return total;
            }
            Ok(len) => {
                total += len as u64;
                if let Some(gate) = gate {
                    gate.record_read(len);
                }
                if filled.send(Chunk::Data { buf, len }).is_err() {
                    return total;
                }
            }
            Err(err) => {
                log::error!("byte source failed after {total} bytes: {err}");
                let _ = filled.send(Chunk::Failed(err));
                return total;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Failing {
        served: bool,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
            }
            self.served = true;
            buf[..3].copy_from_slice(b"abc");
            Ok(3)
        }
    }

    #[test]
    fn test_ring_preserves_bytes() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (mut reader, handle) =
            RingReader::spawn(Cursor::new(data.clone()), 64, 3, None, None).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        drop(reader);
        assert_eq!(handle.join().unwrap(), 10_000);
    }

    #[test]
    fn test_failure_reaches_processor() {
        let (mut reader, handle) =
            RingReader::spawn(Failing { served: false }, 16, 2, None, None).unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        // Stays failed
        assert!(reader.read(&mut buf).is_err());
        drop(reader);
        handle.join().unwrap();
    }

    #[test]
    fn test_gate_holds_reader_back() {
        let gate = Arc::new(ReadGate::new(2));
        let data = vec![7u8; 100 * 10];
        let (mut reader, handle) =
            RingReader::spawn(Cursor::new(data), 10, 64, Some(Arc::clone(&gate)), None).unwrap();

        // One line is 10 bytes
        let mut line = [0u8; 10];
        reader.read_exact(&mut line).unwrap();
        gate.publish_lines(1);
        assert_eq!(gate.bytes_per_line(), Some(10));

        thread::sleep(Duration::from_millis(150));
        let ahead = gate.lines_ahead().unwrap();
        assert!(ahead <= 2, "reader ran {ahead} lines ahead");

        // Consuming the rest releases the reader
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 990);
        drop(reader);
        assert_eq!(handle.join().unwrap(), 1000);
    }

    #[test]
    fn test_dropping_reader_stops_thread() {
        let data = vec![0u8; 1 << 16];
        let (reader, handle) = RingReader::spawn(Cursor::new(data), 16, 2, None, None).unwrap();
        drop(reader);
        assert!(handle.join().unwrap() <= 1 << 16);
    }
}
