//! Binned time-window driver (C5).
//!
//! Drives a [`crate::tagdecode::TagDecoder`] over a stream of raw 32-bit
//! time-tag records delivered through a [`crate::ringbuf::RingBuffer`] of
//! [`RecordBuffer`] slots, producing a per-channel, continuity-checked
//! macro/micro timestamp stream bounded to one bin window.

use std::time::{Duration, Instant};

use crate::error::{CoreResult, DaqCoreError};
use crate::ringbuf::RingBuffer;
use crate::tagdecode::TagDecoder;

/// One producer-filled slot of raw time-tag records (the ring buffer's
/// `Item` type for this pipeline).
pub struct RecordBuffer {
    pub occupancy: usize,
    pub data: Vec<u32>,
}

impl RecordBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        RecordBuffer {
            occupancy: 0,
            data: vec![0u32; capacity],
        }
    }
}

/// Per-channel timestamp stream, reused (cleared without deallocating)
/// across bin windows.
#[derive(Debug, Clone, Default)]
pub struct ChannelTimestampStream {
    pub span: (u64, u64),
    pub macro_times_ps: Vec<u64>,
    pub micro_times_ps: Vec<u64>,
}

impl ChannelTimestampStream {
    fn clear_for_span(&mut self, from: u64, until: u64) {
        self.macro_times_ps.clear();
        self.micro_times_ps.clear();
        self.span = (from, until);
    }
}

/// Destination for a window's extracted timestamps: an O(1) channel-number
/// lookup (channel numbers are bounded to 0..16) plus the set of channels
/// that should receive markers.
pub struct WindowDest {
    pub timestamps: [Option<ChannelTimestampStream>; 16],
    pub marker_channels: [bool; 16],
}

impl Default for WindowDest {
    fn default() -> Self {
        WindowDest {
            timestamps: Default::default(),
            marker_channels: [false; 16],
        }
    }
}

impl WindowDest {
    pub fn enable_channel(&mut self, channel: u8) {
        self.timestamps[channel as usize] = Some(ChannelTimestampStream::default());
    }
}

/// Excess-delay multiplier applied to the stall budget; `M`-family devices
/// batch more aggressively in their FIFO, so they get twice the slack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayFactor {
    Standard,
    Multi,
}

impl DelayFactor {
    fn multiplier(self) -> u32 {
        match self {
            DelayFactor::Standard => 1,
            DelayFactor::Multi => 2,
        }
    }
}

pub struct WindowDriver<'a> {
    decoder: TagDecoder,
    ring: &'a RingBuffer<RecordBuffer>,
    current_slot: Option<&'a RecordBuffer>,
    cursor_in_slot: usize,
    delay_factor: DelayFactor,
}

const SLEEP_WHEN_EMPTY: Duration = Duration::from_millis(50);

impl<'a> WindowDriver<'a> {
    pub fn new(decoder: TagDecoder, ring: &'a RingBuffer<RecordBuffer>, delay_factor: DelayFactor) -> Self {
        WindowDriver {
            decoder,
            ring,
            current_slot: None,
            cursor_in_slot: 0,
            delay_factor,
        }
    }

    fn next_raw_record(&mut self, waited: &mut Duration) -> Option<u32> {
        loop {
            if let Some(slot) = self.current_slot {
                if self.cursor_in_slot < slot.occupancy {
                    let word = slot.data[self.cursor_in_slot];
                    self.cursor_in_slot += 1;
                    return Some(word);
                }
            }
            match self.ring.advance_read() {
                Some(slot) => {
                    self.current_slot = Some(slot);
                    self.cursor_in_slot = 0;
                }
                None => {
                    std::thread::sleep(SLEEP_WHEN_EMPTY);
                    *waited += SLEEP_WHEN_EMPTY;
                    return None;
                }
            }
        }
    }

    /// Run one bin window `[begin_bin_idx, end_bin_idx)` of width
    /// `bin_size_ps`, filling `dest`'s enabled channel streams.
    pub fn run_window(
        &mut self,
        begin_bin_idx: u64,
        end_bin_idx: u64,
        bin_size_ps: u64,
        dest: &mut WindowDest,
    ) -> CoreResult<()> {
        let from = bin_size_ps * begin_bin_idx;
        let until = bin_size_ps * end_bin_idx;

        for stream in dest.timestamps.iter_mut().flatten() {
            stream.clear_for_span(from, until);
        }

        let budget = Duration::from_nanos((until - from) / 1000)
            + Duration::from_millis(500) * self.delay_factor.multiplier();
        let start = Instant::now();
        let mut waited = Duration::ZERO;
        let mut first_timestamp_seen = false;

        loop {
            if let Some(ts) = self.decoder.take_stashed_timestamp() {
                if !first_timestamp_seen {
                    first_timestamp_seen = true;
                    if ts.macro_time_ps < from {
                        return Err(DaqCoreError::OutOfRange(format!(
                            "first timestamp {} precedes window start {from}; producer skipped data",
                            ts.macro_time_ps
                        )));
                    }
                }
                if let Some(stream) = dest.timestamps[ts.channel as usize].as_mut() {
                    stream.macro_times_ps.push(ts.macro_time_ps);
                    stream.micro_times_ps.push(ts.micro_time_ps);
                }
                if ts.macro_time_ps >= until {
                    return Ok(());
                }
                continue;
            }

            if let Some(markers) = self.decoder.take_stashed_markers() {
                for ch in 0..16u8 {
                    if dest.marker_channels[ch as usize] && (markers.channel_bits & (1 << ch)) != 0 {
                        if let Some(stream) = dest.timestamps[ch as usize].as_mut() {
                            stream.macro_times_ps.push(markers.macro_time_ps);
                            stream.micro_times_ps.push(0);
                        }
                    }
                }
                continue;
            }

            if start.elapsed() + waited > budget {
                return Err(DaqCoreError::Stall(format!(
                    "window [{from},{until}) exceeded stall budget of {budget:?}"
                )));
            }

            match self.next_raw_record(&mut waited) {
                Some(raw) => self.decoder.consume_record(raw)?,
                None => continue,
            }
        }
    }
}
