//! Blocking read helpers shared by the decoders.
//!
//! Live sockets deliver records in arbitrary pieces; these helpers retry
//! short reads until a whole record is available.

use crate::{Error, Result};
use std::io::{ErrorKind, Read};

/// Fills `buf` completely.
///
/// # Errors
/// Returns [`Error::PrematureEnd`] if the stream ends first.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let filled = fill(reader, buf)?;
    if filled < buf.len() {
        return Err(Error::PrematureEnd {
            expected: buf.len(),
            actual: filled,
        });
    }
    Ok(())
}

/// Fills `buf` completely, or reports a clean end of stream.
///
/// Returns `Ok(false)` when the stream ended before the first byte.
///
/// # Errors
/// Returns [`Error::PrematureEnd`] if the stream ends inside the record.
pub fn read_record<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let filled = fill(reader, buf)?;
    if filled == 0 && !buf.is_empty() {
        return Ok(false);
    }
    if filled < buf.len() {
        return Err(Error::PrematureEnd {
            expected: buf.len(),
            actual: filled,
        });
    }
    Ok(true)
}

/// Reads and discards `n` bytes.
///
/// # Errors
/// Returns [`Error::PrematureEnd`] if the stream ends first.
pub fn discard<R: Read + ?Sized>(reader: &mut R, n: usize) -> Result<()> {
    let mut scratch = [0u8; 4096];
    let mut remaining = n;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        read_full(reader, &mut scratch[..chunk]).map_err(|e| match e {
            Error::PrematureEnd { actual, .. } => Error::PrematureEnd {
                expected: n,
                actual: n - remaining + actual,
            },
            other => other,
        })?;
        remaining -= chunk;
    }
    Ok(())
}

fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_short_reads_are_retried() {
        let mut reader = Trickle {
            data: (0..20).collect(),
            pos: 0,
            step: 3,
        };
        let mut buf = [0u8; 16];
        read_full(&mut reader, &mut buf).unwrap();
        assert_eq!(buf[15], 15);
    }

    #[test]
    fn test_clean_and_premature_end() {
        let mut reader = Cursor::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 2];
        assert!(read_record(&mut reader, &mut buf).unwrap());
        let err = read_record(&mut reader, &mut buf).unwrap_err();
        assert!(matches!(err, Error::PrematureEnd { expected: 2, actual: 1 }));
        assert!(!read_record(&mut reader, &mut buf).unwrap());
    }

    #[test]
    fn test_discard_reports_total() {
        let mut reader = Cursor::new(vec![0u8; 5000]);
        let err = discard(&mut reader, 6000).unwrap_err();
        assert!(matches!(err, Error::PrematureEnd { expected: 6000, actual: 5000 }));
    }
}
