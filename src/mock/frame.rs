//! Mock camera frame source (§4.7).
//!
//! Stands in for an external frame grabber: yields a scripted or synthetic
//! sequence of [`CameraFrame`]s on demand, with injectable fault flags so
//! [`crate::frame::run_grab_loop`]'s timing-invariant checks can be exercised
//! without real hardware. Mirrors [`super::timetag::MockTimeTagDevice`]'s
//! replay/synthetic split.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreResult, DaqCoreError};
use crate::frame::{CameraFrame, FrameSource};

/// A frame grabber stand-in that advances through a scripted list of frame
/// timestamps, optionally raising one of the fault conditions
/// [`FrameSource`] exposes on a chosen step.
pub struct MockFrameSource {
    timestamps_ns: Vec<u64>,
    cursor: usize,
    frame_size: usize,
    trigger_pulse_count: u64,
    missed_trigger_at: Option<usize>,
    dropped_at: Option<usize>,
    exhausted_is_stall: bool,
}

impl MockFrameSource {
    /// Build a source that yields frames at the given timestamps (ns) in
    /// order, each carrying `frame_size` zeroed bytes of payload.
    pub fn new(timestamps_ns: Vec<u64>, frame_size: usize) -> Self {
        MockFrameSource {
            timestamps_ns,
            cursor: 0,
            frame_size,
            trigger_pulse_count: 0,
            missed_trigger_at: None,
            dropped_at: None,
            exhausted_is_stall: true,
        }
    }

    /// Build a synthetic source yielding `count` frames spaced exactly
    /// `period` apart, with no injected faults.
    pub fn synthetic(count: usize, period: Duration, frame_size: usize) -> Self {
        let period_ns = period.as_nanos() as u64;
        let timestamps = (0..count as u64).map(|i| i * period_ns).collect();
        MockFrameSource::new(timestamps, frame_size)
    }

    /// Report a missed-trigger fault the next time `grab_next` is called
    /// for the frame at `index` (0-based), instead of returning that frame.
    pub fn fail_missed_trigger_at(mut self, index: usize) -> Self {
        self.missed_trigger_at = Some(index);
        self
    }

    /// Report a dropped-frame fault alongside the frame at `index`.
    pub fn fail_dropped_at(mut self, index: usize) -> Self {
        self.dropped_at = Some(index);
        self
    }

    /// Set the trigger pulse counter observed by a pre-arm idle check.
    pub fn with_trigger_pulse_count(mut self, count: u64) -> Self {
        self.trigger_pulse_count = count;
        self
    }
}

impl FrameSource for MockFrameSource {
    fn grab_next(&mut self, _timeout: Duration) -> CoreResult<CameraFrame> {
        if self.missed_trigger_at == Some(self.cursor) {
            self.cursor += 1;
            return Err(DaqCoreError::Stall("mock frame source: missed trigger".into()));
        }

        let timestamp_ns = match self.timestamps_ns.get(self.cursor) {
            Some(ts) => *ts,
            None => {
                return Err(DaqCoreError::Stall(
                    "mock frame source exhausted before next frame arrived".into(),
                ))
            }
        };
        self.cursor += 1;

        Ok(CameraFrame {
            data: Arc::from(vec![0u8; self.frame_size]),
            size: self.frame_size,
            timestamp_ns,
            exposure_us: 0,
        })
    }

    fn missed_trigger(&self) -> bool {
        self.missed_trigger_at == Some(self.cursor.wrapping_sub(1))
    }

    fn dropped_since_last(&self) -> bool {
        self.dropped_at == Some(self.cursor.wrapping_sub(1))
    }

    fn trigger_pulse_count(&self) -> u64 {
        self.trigger_pulse_count
    }
}
