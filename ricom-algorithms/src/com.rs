//! Center of mass of detector readings.

use ricom_core::signal::{ComVector, EventSignal, Frame, FrameData};

/// First moments of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameMoments {
    /// Total intensity.
    pub dose: f64,
    /// Sum of `column_sum[x] * x`.
    pub sum_x: f64,
    /// Sum of `row_sum[y] * y`.
    pub sum_y: f64,
}

impl FrameMoments {
    /// Accumulates row and column sums of a frame.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn of(frame: &Frame) -> Self {
        fn moments<T: Copy + Into<f64>>(values: &[T], width: usize) -> FrameMoments {
            let mut col_sum = vec![0.0f64; width];
            let mut dose = 0.0;
            let mut sum_y = 0.0;
            for (y, row) in values.chunks_exact(width).enumerate() {
                let mut row_sum = 0.0;
                for (c, &v) in col_sum.iter_mut().zip(row) {
                    let v: f64 = v.into();
                    row_sum += v;
                    *c += v;
                }
                dose += row_sum;
                sum_y += row_sum * y as f64;
            }
            let sum_x = col_sum
                .iter()
                .enumerate()
                .map(|(x, &c)| c * x as f64)
                .sum();
            FrameMoments { dose, sum_x, sum_y }
        }

        if frame.width == 0 {
            return Self::default();
        }
        match &frame.data {
            FrameData::U8(v) => moments(v, frame.width),
            FrameData::U16(v) => moments(v, frame.width),
            FrameData::U32(v) => moments(v, frame.width),
        }
    }

    /// Centroid, `None` for an empty frame.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn com(&self) -> Option<ComVector> {
        if self.dose <= 0.0 {
            return None;
        }
        Some(ComVector::new(
            (self.sum_x / self.dose) as f32,
            (self.sum_y / self.dose) as f32,
        ))
    }
}

/// COM of a full frame, `None` when the frame has no dose.
#[must_use]
pub fn frame_com(frame: &Frame) -> Option<ComVector> {
    FrameMoments::of(frame).com()
}

/// COM of accumulated events, `None` when no event was seen.
#[must_use]
pub fn event_com(events: &EventSignal) -> Option<ComVector> {
    events.com()
}
