//! Mock time-tag device (§4.10).
//!
//! Stands in for a HydraHarp/PicoHarp/MultiHarp FIFO: either replays a
//! recorded [`super::ptu::PtuFile`] verbatim or synthesizes a monotonic
//! T2/T3 record stream at a configurable rate. Either way it fills
//! [`crate::window::RecordBuffer`] slots the same shape a live FIFO reader
//! thread would, so [`crate::window::WindowDriver`] cannot tell them apart.

use crate::tagdecode::{DeviceFamily, RecordMode};
use crate::window::RecordBuffer;

use super::ptu::{rec_type, PtuFile};

fn family_mode_for_rec_type(rt: u32) -> Option<(DeviceFamily, RecordMode)> {
    match rt {
        rec_type::PICO_T2 => Some((DeviceFamily::P, RecordMode::T2)),
        rec_type::PICO_T3 => Some((DeviceFamily::P, RecordMode::T3)),
        rec_type::HYDRA_T2 => Some((DeviceFamily::H, RecordMode::T2)),
        rec_type::HYDRA_T3 => Some((DeviceFamily::H, RecordMode::T3)),
        rec_type::MULTI_T2 => Some((DeviceFamily::M, RecordMode::T2)),
        rec_type::MULTI_T3 => Some((DeviceFamily::M, RecordMode::T3)),
        _ => None,
    }
}

/// Source feeding a [`MockTimeTagDevice`]: either a pre-recorded file or a
/// synthetic generator.
enum Source {
    Replay { records: Vec<u32>, cursor: usize },
    Synthetic { channel_count: u8, next_channel: u8, next_macro_tick: u32, step: u32 },
}

/// Replays or synthesizes a T2/T3 record stream, yielding it in
/// [`RecordBuffer`]-sized chunks the way a FIFO-reader thread would.
pub struct MockTimeTagDevice {
    pub family: DeviceFamily,
    pub mode: RecordMode,
    source: Source,
}

impl MockTimeTagDevice {
    /// Replay a parsed PTU file's raw record stream under its own recorded
    /// device family/mode.
    pub fn from_ptu(ptu: PtuFile) -> Option<Self> {
        let (family, mode) = family_mode_for_rec_type(ptu.header.rec_type)?;
        Some(MockTimeTagDevice {
            family,
            mode,
            source: Source::Replay { records: ptu.records, cursor: 0 },
        })
    }

    /// Synthesize a monotonic P/T2 stream cycling through `channel_count`
    /// channels, advancing the macro-time field by `step` ticks per record.
    pub fn synthetic(channel_count: u8, step: u32) -> Self {
        MockTimeTagDevice {
            family: DeviceFamily::P,
            mode: RecordMode::T2,
            source: Source::Synthetic {
                channel_count,
                next_channel: 0,
                next_macro_tick: 0,
                step,
            },
        }
    }

    fn next_record(&mut self) -> Option<u32> {
        match &mut self.source {
            Source::Replay { records, cursor } => {
                let word = records.get(*cursor).copied();
                if word.is_some() {
                    *cursor += 1;
                }
                word
            }
            Source::Synthetic { channel_count, next_channel, next_macro_tick, step } => {
                let channel = *next_channel;
                let time = *next_macro_tick;
                let raw = ((channel as u32) << 28) | (time & 0x0FFF_FFFF);
                *next_channel = (*next_channel + 1) % *channel_count;
                *next_macro_tick = next_macro_tick.wrapping_add(*step);
                Some(raw)
            }
        }
    }

    /// Fill `buffer` with up to `buffer.data.len()` records, returning the
    /// number written. Returns 0 (without writing) once a replay source is
    /// exhausted; a synthetic source never runs dry.
    pub fn fill(&mut self, buffer: &mut RecordBuffer) -> usize {
        let capacity = buffer.data.len();
        let mut n = 0;
        while n < capacity {
            match self.next_record() {
                Some(word) => {
                    buffer.data[n] = word;
                    n += 1;
                }
                None => break,
            }
        }
        buffer.occupancy = n;
        n
    }
}
