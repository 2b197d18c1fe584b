//! Wire-stable constants and types: the sample frame layout (§6.1), the DMA
//! memory map (§6.2), UIO device resolution (§6.3), and publisher topic
//! strings (§6.6). The PTU mock-file format lives in [`crate::mock::ptu`]
//! since it is read only by the mock time-tag device.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

/// Magic values tagging the `type` field of a [`SampleRecord`] (§4.3 / §6.1).
pub mod magic {
    pub const DIGITAL: u32 = 0x5350_0000;
    pub const IMU: u32 = 0x5350_0001;
    pub const ANALOG: u32 = 0x5350_0002;
    pub const TRAFFIC_GEN: u32 = 0x5350_0003;
}

/// Analog sub-channel selector carried in `device_id` for analog samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogChannel {
    PulseOx,
    Hrm,
    RespBelt,
    PowerMeter,
}

impl AnalogChannel {
    pub fn from_device_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(AnalogChannel::PulseOx),
            1 => Some(AnalogChannel::Hrm),
            2 => Some(AnalogChannel::RespBelt),
            3 => Some(AnalogChannel::PowerMeter),
            _ => None,
        }
    }
}

/// Payload union for a [`SampleRecord`] (§6.1): 16 bytes regardless of kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePayload {
    Digital { direction: u16 },
    Imu {
        fsync: u16,
        gyro: [i16; 3],
        accel: [i16; 3],
    },
    Analog { value: u16 },
    TrafficGen,
}

/// One decoded FPGA sample box record. Packed little-endian on the wire:
/// `type:u32, size:u32, timestamp:u64 (10 ns ticks), device_id:u16, payload:16B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    pub kind: u32,
    pub size: u32,
    /// Raw hardware timestamp in 10 ns LSB ticks.
    pub timestamp_ticks: u64,
    pub device_id: u16,
    pub payload: SamplePayload,
}

/// Scale factor converting a raw sample timestamp tick to nanoseconds.
pub const TICKS_TO_NS: u64 = 10;

impl SampleRecord {
    pub const WIRE_SIZE: usize = 28;

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ticks.saturating_mul(TICKS_TO_NS)
    }

    /// Parse one wire-format record from `reader`. Payload interpretation is
    /// picked from `kind`; unrecognized magics are a protocol error.
    pub fn read_from(mut reader: impl Read) -> crate::error::CoreResult<Self> {
        let kind = reader.read_u32::<LittleEndian>().map_err(io_to_protocol)?;
        let size = reader.read_u32::<LittleEndian>().map_err(io_to_protocol)?;
        let timestamp_ticks = reader.read_u64::<LittleEndian>().map_err(io_to_protocol)?;
        let device_id = reader.read_u16::<LittleEndian>().map_err(io_to_protocol)?;

        let payload = match kind {
            magic::DIGITAL => {
                let direction = reader.read_u16::<LittleEndian>().map_err(io_to_protocol)?;
                let mut pad = [0u8; 14];
                reader.read_exact(&mut pad).map_err(io_to_protocol)?;
                SamplePayload::Digital { direction }
            }
            magic::IMU => {
                let fsync = reader.read_u16::<LittleEndian>().map_err(io_to_protocol)?;
                let mut gyro = [0i16; 3];
                for g in &mut gyro {
                    *g = reader.read_i16::<LittleEndian>().map_err(io_to_protocol)?;
                }
                let mut accel = [0i16; 3];
                for a in &mut accel {
                    *a = reader.read_i16::<LittleEndian>().map_err(io_to_protocol)?;
                }
                let mut pad = [0u8; 2];
                reader.read_exact(&mut pad).map_err(io_to_protocol)?;
                SamplePayload::Imu { fsync, gyro, accel }
            }
            magic::ANALOG => {
                let value = reader.read_u16::<LittleEndian>().map_err(io_to_protocol)?;
                let mut pad = [0u8; 14];
                reader.read_exact(&mut pad).map_err(io_to_protocol)?;
                SamplePayload::Analog { value }
            }
            magic::TRAFFIC_GEN => {
                let mut pad = [0u8; 16];
                reader.read_exact(&mut pad).map_err(io_to_protocol)?;
                SamplePayload::TrafficGen
            }
            other => {
                return Err(crate::error::DaqCoreError::Protocol(format!(
                    "unknown sample magic 0x{other:08x}"
                )))
            }
        };

        Ok(SampleRecord {
            kind,
            size,
            timestamp_ticks,
            device_id,
            payload,
        })
    }
}

fn io_to_protocol(err: io::Error) -> crate::error::DaqCoreError {
    crate::error::DaqCoreError::Protocol(format!("short sample record: {err}"))
}

/// DMA memory map constants (§6.2), compatibility-stable across hardware
/// revisions.
pub mod dma_map {
    pub const BASE_PHYS_ADDR: u64 = 0x1000_0000;
    pub const REGION_LEN: u64 = 0x10_0000;
    pub const DESCRIPTOR_COUNT: usize = 4096;
    pub const DESCRIPTOR_WORD_SIZE: u64 = 0x40;
    pub const DESCRIPTOR_TABLE_SIZE: u64 = DESCRIPTOR_WORD_SIZE * DESCRIPTOR_COUNT as u64;
    pub const DATA_BUFFER_OFFSET: u64 = DESCRIPTOR_TABLE_SIZE;

    /// Control register bit positions.
    pub mod control_bits {
        pub const RS: u32 = 0;
        pub const RESET: u32 = 2;
        pub const CYCLIC: u32 = 4;
        pub const IOC_IRQEN: u32 = 12;
        pub const ERR_IRQEN: u32 = 14;
        pub const IRQ_THRESH_SHIFT: u32 = 16;
        pub const IRQ_THRESH_WIDTH: u32 = 8;
        pub const IRQ_DELAY_SHIFT: u32 = 24;
    }

    /// Status register bit positions.
    pub mod status_bits {
        pub const HALTED: u32 = 0;
        pub const IDLE: u32 = 1;
        pub const SG_INCLD: u32 = 3;
        pub const ERROR_FIELD_SHIFT: u32 = 4;
        pub const ERROR_FIELD_WIDTH: u32 = 7;
        pub const IOC: u32 = 12;
        pub const DLY: u32 = 13;
        pub const ERR: u32 = 14;
    }
}

/// Resolve a UIO device node by its logical name (§6.3).
///
/// Walks `/sys/class/uio/uio<N>/name` for increasing `N` until one matches,
/// then reads `/sys/class/uio/uio<N>/maps/map0/size` (hex, `0x`-prefixed) for
/// the mappable region length. Returns `(device_path, region_len)`.
pub fn resolve_uio_device(logical_name: &str) -> crate::error::CoreResult<(std::path::PathBuf, u64)> {
    for n in 0..64 {
        let name_path = format!("/sys/class/uio/uio{n}/name");
        let Ok(name) = std::fs::read_to_string(&name_path) else {
            continue;
        };
        if name.trim() != logical_name {
            continue;
        }
        let size_path = format!("/sys/class/uio/uio{n}/maps/map0/size");
        let size_str = std::fs::read_to_string(&size_path).map_err(|e| {
            crate::error::DaqCoreError::HardwareFault(format!("reading {size_path}: {e}"))
        })?;
        let size_str = size_str.trim().trim_start_matches("0x");
        let size = u64::from_str_radix(size_str, 16).map_err(|e| {
            crate::error::DaqCoreError::Protocol(format!("bad uio map size {size_str:?}: {e}"))
        })?;
        return Ok((std::path::PathBuf::from(format!("/dev/uio{n}")), size));
    }
    Err(crate::error::DaqCoreError::HardwareFault(format!(
        "no uio device named {logical_name:?}"
    )))
}

/// Publisher topic strings used by the core (§6.6).
pub mod topics {
    pub const CAMERA_IMAGE: &str = "pando.camera_image";

    pub fn peripheral(name: &str) -> String {
        format!("pandoboxd.{name}")
    }

    pub const DIGITAL_IN: &str = "pandoboxd.digital_in";
    pub const IMU: &str = "pandoboxd.imu";
    pub const PULSE_OX: &str = "pandoboxd.pulse_ox";
    pub const HRM: &str = "pandoboxd.hrm";
    pub const RESP_BELT: &str = "pandoboxd.resp_belt";
    pub const POWER_METER: &str = "pandoboxd.power_meter";
    pub const TRAFFIC_GEN: &str = "pandoboxd.traffic_gen";

    /// Severity used when formatting the reporter topic, e.g. `prefix.warn`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Level {
        Trace,
        Debug,
        Info,
        Warn,
        Error,
        Critical,
    }

    impl Level {
        fn as_str(self) -> &'static str {
            match self {
                Level::Trace => "trace",
                Level::Debug => "debug",
                Level::Info => "info",
                Level::Warn => "warn",
                Level::Error => "error",
                Level::Critical => "critical",
            }
        }
    }

    pub fn reporter(prefix: &str, level: Level) -> String {
        format!("{prefix}.{}", level.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_traffic_gen_record() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&magic::TRAFFIC_GEN.to_le_bytes());
        bytes.extend_from_slice(&28u32.to_le_bytes());
        bytes.extend_from_slice(&123_456u64.to_le_bytes());
        bytes.extend_from_slice(&7u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);

        let record = SampleRecord::read_from(Cursor::new(bytes)).unwrap();
        assert_eq!(record.kind, magic::TRAFFIC_GEN);
        assert_eq!(record.device_id, 7);
        assert_eq!(record.timestamp_ns(), 1_234_560);
        assert_eq!(record.payload, SamplePayload::TrafficGen);
    }

    #[test]
    fn unknown_magic_is_protocol_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        bytes.extend_from_slice(&28u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);

        let err = SampleRecord::read_from(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind_name(), "Protocol");
    }

    #[test]
    fn dma_map_constants_match_spec() {
        assert_eq!(dma_map::DESCRIPTOR_TABLE_SIZE, 0x4_0000);
        assert_eq!(dma_map::DATA_BUFFER_OFFSET, 0x4_0000);
    }

    #[test]
    fn reporter_topic_formats_level() {
        assert_eq!(topics::reporter("pando", topics::Level::Critical), "pando.critical");
    }
}
