#![allow(clippy::cast_possible_truncation)]
use ricom_camera::{CheetahConfig, CheetahDecoder, Decoder, Record, Tpx3Packet};
use ricom_core::geometry::ScanGeometry;
use ricom_core::signal::DetectorSignal;
use std::io::Cursor;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const NX: usize = 4;
const LINE_PERIOD: u64 = 1024;
const LINE_LENGTH: u64 = 640;

fn make_header(chip_id: u8) -> u64 {
    Tpx3Packet::TPX3_HEADER_MAGIC | (u64::from(chip_id) << 32)
}

fn make_tdc(subtype: u64, time: u64) -> u64 {
    0x6000_0000_0000_0000 | (subtype << 56) | ((time >> 1) << 9)
}

fn make_hit(x: u16, y: u16, time: u64) -> u64 {
    let dcol = u64::from(x & !1);
    let spix = u64::from(y & !3);
    let pix = u64::from(((x & 1) << 2) | (y & 3));
    let coarse = time >> 4;
    0xB000_0000_0000_0000
        | (dcol << 52)
        | (spix << 45)
        | (pix << 44)
        | ((coarse & 0x3FFF) << 30)
        | ((coarse >> 14) & 0xFFFF)
}

/// One chip section covering `line`, with one hit per column.
fn section(chip: u8, line: u64) -> Vec<u64> {
    let start = line * LINE_PERIOD;
    let dwell = LINE_LENGTH / NX as u64;
    let mut packets = vec![make_header(chip), make_tdc(0xF, start)];
    for column in 0..NX as u64 {
        let local = (column as u16, line as u16);
        packets.push(make_hit(local.0, local.1, start + column * dwell + 16));
    }
    packets.push(make_tdc(0xA, start + LINE_LENGTH));
    packets
}

fn to_bytes(packets: &[u64]) -> Vec<u8> {
    packets.iter().flat_map(|p| p.to_le_bytes()).collect()
}

#[test]
fn test_two_chip_stream() {
    init_logging();
    let scan = ScanGeometry::new(NX, 3);
    let mut packets = Vec::new();
    // Chip 3 closes every line before chip 0 does
    for line in 0..3 {
        packets.extend(section(3, line));
        packets.extend(section(0, line));
    }

    let mut decoder =
        CheetahDecoder::new(Cursor::new(to_bytes(&packets)), CheetahConfig::default(), &scan).unwrap();
    let mut records = Vec::new();
    while let Some(record) = decoder.decode_next().unwrap() {
        records.push(record);
    }

    assert_eq!(records.len(), 3 * NX);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.position.index(), i);
        let DetectorSignal::Events(signal) = record.signal else {
            panic!("expected events");
        };
        let line = i / NX;
        if line == 0 {
            // Calibration line carries no accepted hits
            assert_eq!(signal.dose, 0);
        } else {
            // One hit from each chip per column
            assert_eq!(signal.dose, 2, "position {}", i);
        }
    }
    assert_eq!(decoder.line_counts(), [3, 0, 0, 3]);
}

/// Every chip calibrates on line 0, then each chip delivers `chunk` lines
/// at a time before the next chip gets its turn.
fn skewed_stream(chips: &[u8], lines: u64, chunk: u64) -> Vec<u64> {
    let mut packets = Vec::new();
    for &chip in chips {
        packets.extend(section(chip, 0));
    }
    let mut first = 1;
    while first < lines {
        let last = (first + chunk).min(lines);
        for &chip in chips {
            for line in first..last {
                packets.extend(section(chip, line));
            }
        }
        first = last;
    }
    packets
}

fn decode_all(decoder: &mut CheetahDecoder<Cursor<Vec<u8>>>) -> Vec<Record> {
    let mut records = Vec::new();
    while let Some(record) = decoder.decode_next().unwrap() {
        records.push(record);
    }
    records
}

fn dose(record: &Record) -> u64 {
    let DetectorSignal::Events(signal) = record.signal else {
        panic!("expected events");
    };
    u64::from(signal.dose)
}

#[test]
fn test_chip_running_lines_ahead_keeps_every_hit() {
    init_logging();
    let scan = ScanGeometry::new(NX, 4);
    let mut packets = Vec::new();
    packets.extend(section(0, 0));
    packets.extend(section(3, 0));
    // Chip 0 closes lines 1..=3 before chip 3 starts them
    for chip in [0, 3] {
        for line in 1..4 {
            packets.extend(section(chip, line));
        }
    }

    let mut decoder =
        CheetahDecoder::new(Cursor::new(to_bytes(&packets)), CheetahConfig::default(), &scan).unwrap();
    let records = decode_all(&mut decoder);

    assert_eq!(records.len(), 4 * NX);
    let total: u64 = records.iter().map(dose).sum();
    assert_eq!(total, 2 * 3 * NX as u64);
    // Only the calibration line is rejected
    assert_eq!(decoder.rejected_hits(), 2 * NX as u64);
    assert_eq!(decoder.forced_lines(), 0);
}

#[test]
fn test_interleaved_chunks_keep_dose() {
    init_logging();
    const LINES: u64 = 10;
    let chips = [0u8, 1, 2, 3];
    let scan = ScanGeometry::new(NX, LINES as usize);
    let packets = skewed_stream(&chips, LINES, 3);

    let mut decoder =
        CheetahDecoder::new(Cursor::new(to_bytes(&packets)), CheetahConfig::default(), &scan).unwrap();
    let records = decode_all(&mut decoder);

    assert_eq!(records.len(), LINES as usize * NX);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.position.index(), i);
        let expected = if i < NX { 0 } else { chips.len() as u64 };
        assert_eq!(dose(record), expected, "position {i}");
    }
    assert_eq!(decoder.line_counts(), [LINES as usize; 4]);
    assert_eq!(decoder.forced_lines(), 0);
}

#[test]
fn test_chip_beyond_capacity_forces_lines() {
    init_logging();
    let scan = ScanGeometry::new(NX, 8);
    let mut packets = Vec::new();
    packets.extend(section(0, 0));
    for line in 0..6 {
        packets.extend(section(3, line));
    }
    let config = CheetahConfig::default().with_max_open_lines(2);
    let mut decoder = CheetahDecoder::new(Cursor::new(to_bytes(&packets)), config, &scan).unwrap();
    let records = decode_all(&mut decoder);
    // Chip 0 stalled after line 0, so lines are forced out to bound memory
    assert_eq!(records.len(), 6 * NX);
    assert!(decoder.forced_lines() > 0);
    let total: u64 = records.iter().map(dose).sum();
    assert_eq!(total, 5 * NX as u64);
}

#[test]
fn test_zero_capacity_rejected() {
    let config = CheetahConfig::default().with_max_open_lines(0);
    assert!(config.validate().is_err());
    assert_eq!(CheetahConfig::default().open_line_capacity(512), 512);
    assert_eq!(CheetahConfig::default().open_line_capacity(8), 64);
}
