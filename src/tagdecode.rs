//! Time-tag decoder state machine (C4).
//!
//! Three device families (`P`, `H`, `M`) each define T2 and T3 record
//! layouts packed into one 32-bit word; all six share the same outer state
//! machine (overflow accumulation, monotonicity check, stash-until-consumed
//! protocol), differing only in field widths and macro/micro time scaling.
//! Rather than a base-class hierarchy with per-subclass overrides (the
//! original's shape), field widths and scale factors are captured once per
//! `(DeviceFamily, RecordMode)` pair in [`TagDecoder::new`] and every record
//! is decoded through the same `consume_record`.

use crate::error::{CoreResult, DaqCoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// PicoHarp-style layout.
    P,
    /// HydraHarp-style layout.
    H,
    /// MultiHarp-style layout (wider normal-channel range, device-read tick scale).
    M,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    T2,
    T3,
}

/// A decoded, not-yet-consumed timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StashedTimestamp {
    pub channel: u8,
    pub macro_time_ps: u64,
    pub micro_time_ps: u64,
}

/// A decoded, not-yet-consumed marker event. `channel_bits` is a bitmask
/// over the (up to 4) marker lines that fired simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StashedMarkers {
    pub macro_time_ps: u64,
    pub channel_bits: u8,
}

struct FieldLayout {
    /// Overflow period, in raw ticks of the macro-time-bearing field,
    /// contributed by one overflow record (i.e. `1 << field_width`, the
    /// natural wraparound of that field).
    wrap_period: u64,
    /// Upper bound (exclusive) on a channel number considered "normal" for
    /// this family.
    normal_channel_limit: u8,
}

fn layout_for(family: DeviceFamily, mode: RecordMode) -> FieldLayout {
    match (family, mode) {
        (DeviceFamily::P, RecordMode::T2) => FieldLayout { wrap_period: 1 << 28, normal_channel_limit: 15 },
        (DeviceFamily::H, RecordMode::T2) => FieldLayout { wrap_period: 1 << 25, normal_channel_limit: 8 },
        (DeviceFamily::M, RecordMode::T2) => FieldLayout { wrap_period: 1 << 25, normal_channel_limit: 16 },
        (DeviceFamily::P, RecordMode::T3) => FieldLayout { wrap_period: 1 << 16, normal_channel_limit: 15 },
        (DeviceFamily::H, RecordMode::T3) => FieldLayout { wrap_period: 1 << 10, normal_channel_limit: 8 },
        (DeviceFamily::M, RecordMode::T3) => FieldLayout { wrap_period: 1 << 10, normal_channel_limit: 16 },
    }
}

enum DecodedRecord {
    /// `count` overflow periods elapsed: `1` for `P` (a fixed-step overflow
    /// record), or the record's embedded `timetag`/`nsync` field for `H`/`M`,
    /// which can report more than one skipped wraparound in a single record.
    Overflow { count: u64 },
    Marker { channel_bits: u8, macro_ticks: u64 },
    Normal { channel: u8, macro_ticks: u64, micro_ticks: u64 },
}

fn split_record(family: DeviceFamily, mode: RecordMode, raw: u32) -> DecodedRecord {
    match (family, mode) {
        (DeviceFamily::P, RecordMode::T2) => {
            let channel = ((raw >> 28) & 0xF) as u8;
            let time = raw & 0x0FFF_FFFF;
            if channel == 0xF {
                if time & 0xF == 0 {
                    DecodedRecord::Overflow { count: 1 }
                } else {
                    DecodedRecord::Marker { channel_bits: (time & 0xF) as u8, macro_ticks: (time & !0xFu32) as u64 }
                }
            } else {
                DecodedRecord::Normal { channel, macro_ticks: time as u64, micro_ticks: 0 }
            }
        }
        (DeviceFamily::H, RecordMode::T2) | (DeviceFamily::M, RecordMode::T2) => {
            let special = (raw >> 31) & 0x1;
            let channel = ((raw >> 25) & 0x3F) as u8;
            let timetag = (raw & 0x01FF_FFFF) as u64;
            if special == 1 && channel == 63 {
                DecodedRecord::Overflow { count: timetag }
            } else if special == 1 && (1..=15).contains(&channel) {
                DecodedRecord::Marker { channel_bits: channel, macro_ticks: timetag }
            } else {
                DecodedRecord::Normal { channel, macro_ticks: timetag, micro_ticks: 0 }
            }
        }
        (DeviceFamily::P, RecordMode::T3) => {
            let channel = ((raw >> 28) & 0xF) as u8;
            let dtime = ((raw >> 16) & 0x0FFF) as u64;
            let nsync = (raw & 0xFFFF) as u64;
            if channel == 0xF {
                if dtime & 0xF == 0 {
                    DecodedRecord::Overflow { count: 1 }
                } else {
                    DecodedRecord::Marker { channel_bits: (dtime & 0xF) as u8, macro_ticks: nsync }
                }
            } else {
                DecodedRecord::Normal { channel, macro_ticks: nsync, micro_ticks: dtime }
            }
        }
        (DeviceFamily::H, RecordMode::T3) | (DeviceFamily::M, RecordMode::T3) => {
            let special = (raw >> 31) & 0x1;
            let channel = ((raw >> 25) & 0x3F) as u8;
            let dtime = ((raw >> 10) & 0x7FFF) as u64;
            let nsync = (raw & 0x3FF) as u64;
            if special == 1 && channel == 63 {
                DecodedRecord::Overflow { count: nsync }
            } else if special == 1 && (1..=15).contains(&channel) {
                DecodedRecord::Marker { channel_bits: channel, macro_ticks: nsync }
            } else {
                DecodedRecord::Normal { channel, macro_ticks: nsync, micro_ticks: dtime }
            }
        }
    }
}

/// Per-instance decoder state (§4.4). One instance per acquisition channel
/// set / device; the window driver (C5) owns it and calls `consume_record`
/// once per raw 32-bit record.
pub struct TagDecoder {
    family: DeviceFamily,
    mode: RecordMode,
    layout: FieldLayout,
    /// ps per macro-time tick: 1 for `H`, device-read for `M`, and
    /// `laser_sync_period_ps` for T3 `P` (folded in at construction).
    macro_tick_ps: u64,
    /// ps per micro-time (dtime) tick.
    micro_tick_ps: u64,

    overflow_state: u64,
    last_channel: Option<u8>,
    last_timestamp_macro_time: u64,
    last_marker_macro_time: u64,
    last_micro_time: u64,
    stashed_timestamp: Option<StashedTimestamp>,
    stashed_markers: Option<StashedMarkers>,
}

impl TagDecoder {
    pub fn new(family: DeviceFamily, mode: RecordMode, macro_tick_ps: u64, micro_tick_ps: u64) -> Self {
        TagDecoder {
            family,
            mode,
            layout: layout_for(family, mode),
            macro_tick_ps,
            micro_tick_ps,
            overflow_state: 0,
            last_channel: None,
            last_timestamp_macro_time: 0,
            last_marker_macro_time: 0,
            last_micro_time: 0,
            stashed_timestamp: None,
            stashed_markers: None,
        }
    }

    /// Decode one raw record, updating internal state and, for a normal tag
    /// or marker, stashing it for the caller to collect via
    /// [`Self::take_stashed_timestamp`] / [`Self::take_stashed_markers`].
    pub fn consume_record(&mut self, raw: u32) -> CoreResult<()> {
        match split_record(self.family, self.mode, raw) {
            DecodedRecord::Overflow { count } => {
                self.overflow_state += self.layout.wrap_period * count;
                Ok(())
            }
            DecodedRecord::Marker { channel_bits, macro_ticks } => {
                let macro_time_ps = (self.overflow_state + macro_ticks) * self.macro_tick_ps;
                if macro_time_ps < self.last_marker_macro_time {
                    return Err(DaqCoreError::Monotonicity {
                        channel: channel_bits as u32,
                        message: format!(
                            "marker macro time {macro_time_ps} < last {}",
                            self.last_marker_macro_time
                        ),
                    });
                }
                self.last_marker_macro_time = macro_time_ps;
                self.stashed_markers = Some(StashedMarkers { macro_time_ps, channel_bits });
                Ok(())
            }
            DecodedRecord::Normal { channel, macro_ticks, micro_ticks } => {
                if channel >= self.layout.normal_channel_limit {
                    return Err(DaqCoreError::Protocol(format!(
                        "channel {channel} outside normal range for this device variant"
                    )));
                }
                let macro_time_ps = (self.overflow_state + macro_ticks) * self.macro_tick_ps;
                if macro_time_ps < self.last_timestamp_macro_time {
                    return Err(DaqCoreError::Monotonicity {
                        channel: channel as u32,
                        message: format!(
                            "macro time {macro_time_ps} < last {}",
                            self.last_timestamp_macro_time
                        ),
                    });
                }
                let micro_time_ps = micro_ticks * self.micro_tick_ps;
                self.last_timestamp_macro_time = macro_time_ps;
                self.last_micro_time = micro_time_ps;
                self.last_channel = Some(channel);
                self.stashed_timestamp = Some(StashedTimestamp {
                    channel,
                    macro_time_ps,
                    micro_time_ps,
                });
                Ok(())
            }
        }
    }

    pub fn take_stashed_timestamp(&mut self) -> Option<StashedTimestamp> {
        self.stashed_timestamp.take()
    }

    pub fn take_stashed_markers(&mut self) -> Option<StashedMarkers> {
        self.stashed_markers.take()
    }

    pub fn last_timestamp_macro_time(&self) -> u64 {
        self.last_timestamp_macro_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p_t2_normal(channel: u8, time: u32) -> u32 {
        ((channel as u32) << 28) | (time & 0x0FFF_FFFF)
    }

    fn p_t2_overflow() -> u32 {
        0xF << 28
    }

    #[test]
    fn p_t2_normal_tag_is_monotonic() {
        let mut dec = TagDecoder::new(DeviceFamily::P, RecordMode::T2, 1, 1);
        dec.consume_record(p_t2_normal(3, 100)).unwrap();
        let ts = dec.take_stashed_timestamp().unwrap();
        assert_eq!(ts.channel, 3);
        assert_eq!(ts.macro_time_ps, 100);

        dec.consume_record(p_t2_normal(3, 50)).unwrap_err();
    }

    #[test]
    fn p_t2_overflow_advances_macro_time() {
        let mut dec = TagDecoder::new(DeviceFamily::P, RecordMode::T2, 1, 1);
        dec.consume_record(p_t2_overflow()).unwrap();
        dec.consume_record(p_t2_normal(0, 5)).unwrap();
        let ts = dec.take_stashed_timestamp().unwrap();
        assert_eq!(ts.macro_time_ps, (1u64 << 28) + 5);
    }

    #[test]
    fn p_t2_marker_decoded_from_low_nibble() {
        let mut dec = TagDecoder::new(DeviceFamily::P, RecordMode::T2, 1, 1);
        let raw = (0xFu32 << 28) | 0b0101;
        dec.consume_record(raw).unwrap();
        let marker = dec.take_stashed_markers().unwrap();
        assert_eq!(marker.channel_bits, 0b0101);
    }

    #[test]
    fn h_t3_micro_time_uses_dtime_scale() {
        let mut dec = TagDecoder::new(DeviceFamily::H, RecordMode::T3, 100, 1);
        // special=0, channel=2 (<8), dtime=7, nsync=1
        let raw = (2u32 << 25) | (7u32 << 10) | 1u32;
        dec.consume_record(raw).unwrap();
        let ts = dec.take_stashed_timestamp().unwrap();
        assert_eq!(ts.channel, 2);
        assert_eq!(ts.macro_time_ps, 100);
        assert_eq!(ts.micro_time_ps, 7);
    }

    #[test]
    fn channel_outside_family_range_is_protocol_error() {
        let mut dec = TagDecoder::new(DeviceFamily::H, RecordMode::T2, 1, 1);
        // special=0, channel=10 (>= normal_channel_limit 8 for H)
        let raw = 10u32 << 25;
        let err = dec.consume_record(raw).unwrap_err();
        assert_eq!(err.kind_name(), "Protocol");
    }

    fn h_t2_overflow(timetag: u32) -> u32 {
        (1u32 << 31) | (63u32 << 25) | (timetag & 0x01FF_FFFF)
    }

    fn h_t2_normal(channel: u8, timetag: u32) -> u32 {
        ((channel as u32) << 25) | (timetag & 0x01FF_FFFF)
    }

    #[test]
    fn h_t2_overflow_advances_by_timetag_multiple() {
        // HydraHarp/MultiHarp overflow records report how many wraparounds
        // elapsed in their timetag/nsync field; an overflow record carrying
        // timetag=3 must advance overflow_state by 3 wrap periods, not 1.
        let mut dec = TagDecoder::new(DeviceFamily::H, RecordMode::T2, 1, 1);
        dec.consume_record(h_t2_overflow(3)).unwrap();
        dec.consume_record(h_t2_normal(0, 5)).unwrap();
        let ts = dec.take_stashed_timestamp().unwrap();
        assert_eq!(ts.macro_time_ps, (1u64 << 25) * 3 + 5);
    }

    fn multi_t3_overflow(nsync: u32) -> u32 {
        (1u32 << 31) | (63u32 << 25) | (nsync & 0x3FF)
    }

    fn multi_t3_normal(channel: u8, nsync: u16, dtime: u16) -> u32 {
        ((channel as u32) << 25) | ((dtime as u32 & 0x7FFF) << 10) | (nsync as u32 & 0x3FF)
    }

    #[test]
    fn m_t3_overflow_advances_by_nsync_multiple() {
        let mut dec = TagDecoder::new(DeviceFamily::M, RecordMode::T3, 1, 1);
        dec.consume_record(multi_t3_overflow(4)).unwrap();
        dec.consume_record(multi_t3_normal(0, 2, 0)).unwrap();
        let ts = dec.take_stashed_timestamp().unwrap();
        assert_eq!(ts.macro_time_ps, (1u64 << 10) * 4 + 2);
    }
}
