#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
use ricom_camera::{Decoder, TimepixConfig, TimepixDecoder, TimepixEvent};
use ricom_core::geometry::ScanGeometry;
use ricom_core::signal::{DetectorSignal, EventSignal};
use std::collections::BTreeMap;
use std::io::Cursor;

/// Deterministic pseudo-random sequence.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}

const DWELL: f64 = 10.0;

fn config() -> TimepixConfig {
    TimepixConfig::default()
        .with_camera(16, 16)
        .with_tick_ns(1.0)
        .with_dwell_ns(DWELL)
}

fn sorted_events(rng: &mut Lcg, count: usize) -> Vec<TimepixEvent> {
    let mut events: Vec<TimepixEvent> = (0..count)
        .map(|_| TimepixEvent {
            index: (rng.next() % 256) as u32,
            toa: rng.next() % 600,
            ..TimepixEvent::default()
        })
        .collect();
    events.sort_by_key(|e| e.toa);
    events
}

/// Swaps disjoint neighbors whose positions differ by at most one.
fn jitter(rng: &mut Lcg, mut events: Vec<TimepixEvent>) -> (Vec<TimepixEvent>, usize) {
    let pos = |e: &TimepixEvent| (e.toa as f64 / DWELL).floor() as u64;
    let mut swaps = 0;
    let mut i = 0;
    while i + 1 < events.len() {
        if pos(&events[i + 1]) - pos(&events[i]) <= 1 && rng.next() % 2 == 0 {
            events.swap(i, i + 1);
            swaps += 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    (events, swaps)
}

fn decode(events: &[TimepixEvent], scan: &ScanGeometry) -> (BTreeMap<usize, EventSignal>, u64) {
    let bytes: Vec<u8> = events.iter().flat_map(TimepixEvent::to_bytes).collect();
    let mut decoder = TimepixDecoder::new(Cursor::new(bytes), config(), scan).unwrap();
    let mut out: BTreeMap<usize, EventSignal> = BTreeMap::new();
    while let Some(record) = decoder.decode_next().unwrap() {
        let DetectorSignal::Events(signal) = record.signal else {
            panic!("timepix produced a frame");
        };
        out.entry(record.position.index()).or_default().merge(&signal);
    }
    (out, decoder.late_events())
}

#[test]
fn test_jittered_stream_matches_sorted() {
    let scan = ScanGeometry::new(8, 4);
    let mut rng = Lcg(0x5EED);
    let sorted = sorted_events(&mut rng, 2000);
    let (jittered, swaps) = jitter(&mut rng, sorted.clone());
    assert!(swaps > 100, "jitter too weak: {}", swaps);

    let (expected, late_sorted) = decode(&sorted, &scan);
    let (actual, late_jittered) = decode(&jittered, &scan);
    assert_eq!(late_sorted, 0);
    assert_eq!(late_jittered, 0);
    assert_eq!(expected, actual);

    let total_dose: u32 = actual.values().map(|s| s.dose).sum();
    assert_eq!(total_dose as usize, sorted.len());
}

#[test]
fn test_sorted_stream_matches_direct_sums() {
    let scan = ScanGeometry::new(8, 8);
    let mut rng = Lcg(42);
    let sorted = sorted_events(&mut rng, 500);

    let mut direct: BTreeMap<usize, EventSignal> = BTreeMap::new();
    for e in &sorted {
        let pos = ((e.toa as f64 / DWELL).floor() as usize) % scan.total_positions();
        let (x, y) = e.pixel(16);
        direct.entry(pos).or_default().add_event(x, y, false);
    }

    let (decoded, _) = decode(&sorted, &scan);
    assert_eq!(decoded, direct);
}
