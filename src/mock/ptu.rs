//! PTU mock-file format reader (§6.4), read-only.
//!
//! Used by [`super::timetag::MockTimeTagDevice`] to replay a recorded
//! time-tag stream instead of a live device FIFO. Header: 8-byte magic
//! `PQTTTR\0\0`, 8-byte version, then 48-byte tag records
//! `{identifier[32], index:i32, type:u32, value:u64}` until a tag named
//! `Header_End`. A tag whose type's low 16 bits are `0xFFFF` (the published
//! PicoQuant convention for string/array/blob tags) carries its payload
//! length in `value` and is followed by that many extra bytes to skip;
//! every other tag's `value` is the scalar payload itself. After
//! `Header_End`, the rest of the file is raw little-endian 32-bit records.

use std::io::{self, Read};

use crate::error::{CoreResult, DaqCoreError};

pub const MAGIC: &[u8; 8] = b"PQTTTR\0\0";

/// Record-type magic values (§6.4), identifying which decoder variant
/// produced the replayed stream.
pub mod rec_type {
    pub const PICO_T2: u32 = 0x0001_0203;
    pub const PICO_T3: u32 = 0x0001_0303;
    pub const HYDRA_T2: u32 = 0x0101_0204;
    pub const HYDRA_T3: u32 = 0x0101_0304;
    pub const MULTI_T2: u32 = 0x0001_0207;
    pub const MULTI_T3: u32 = 0x0001_0307;
}

const VARIABLE_LENGTH_TYPE_MASK: u32 = 0x0000_FFFF;

#[derive(Debug, Clone)]
pub enum TagValue {
    Scalar(u64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct PtuHeader {
    pub rec_type: u32,
    pub num_records: u64,
    pub resolution_s: f64,
    pub global_resolution_s: f64,
}

/// A parsed PTU file: its required header fields plus the raw 32-bit record
/// stream that follows `Header_End`.
pub struct PtuFile {
    pub header: PtuHeader,
    pub records: Vec<u32>,
}

fn read_exact_or_protocol(mut reader: impl Read, buf: &mut [u8]) -> CoreResult<()> {
    reader
        .read_exact(buf)
        .map_err(|e| DaqCoreError::Protocol(format!("PTU: unexpected EOF: {e}")))
}

impl PtuFile {
    pub fn parse(mut reader: impl Read) -> CoreResult<Self> {
        let mut magic = [0u8; 8];
        read_exact_or_protocol(&mut reader, &mut magic)?;
        if &magic != MAGIC {
            return Err(DaqCoreError::Protocol("PTU: bad magic".into()));
        }
        let mut version = [0u8; 8];
        read_exact_or_protocol(&mut reader, &mut version)?;

        let mut rec_type = None;
        let mut num_records = None;
        let mut resolution_s = None;
        let mut global_resolution_s = None;

        loop {
            let mut identifier = [0u8; 32];
            read_exact_or_protocol(&mut reader, &mut identifier)?;
            let name = std::str::from_utf8(&identifier)
                .unwrap_or("")
                .trim_end_matches('\0')
                .to_string();

            let mut index_bytes = [0u8; 4];
            read_exact_or_protocol(&mut reader, &mut index_bytes)?;
            let mut type_bytes = [0u8; 4];
            read_exact_or_protocol(&mut reader, &mut type_bytes)?;
            let tag_type = u32::from_le_bytes(type_bytes);
            let mut value_bytes = [0u8; 8];
            read_exact_or_protocol(&mut reader, &mut value_bytes)?;
            let value = u64::from_le_bytes(value_bytes);

            let parsed_value = if tag_type & VARIABLE_LENGTH_TYPE_MASK == VARIABLE_LENGTH_TYPE_MASK {
                let mut payload = vec![0u8; value as usize];
                read_exact_or_protocol(&mut reader, &mut payload)?;
                TagValue::Bytes(payload)
            } else {
                TagValue::Scalar(value)
            };

            match name.as_str() {
                "TTResultFormat_TTTRRecType" => {
                    if let TagValue::Scalar(v) = &parsed_value {
                        rec_type = Some(*v as u32);
                    }
                }
                "TTResult_NumberOfRecords" => {
                    if let TagValue::Scalar(v) = &parsed_value {
                        num_records = Some(*v);
                    }
                }
                "MeasDesc_Resolution" => {
                    if let TagValue::Scalar(v) = &parsed_value {
                        resolution_s = Some(f64::from_bits(*v));
                    }
                }
                "MeasDesc_GlobalResolution" => {
                    if let TagValue::Scalar(v) = &parsed_value {
                        global_resolution_s = Some(f64::from_bits(*v));
                    }
                }
                "Header_End" => break,
                _ => {}
            }
        }

        let header = PtuHeader {
            rec_type: rec_type
                .ok_or_else(|| DaqCoreError::Protocol("PTU: missing TTResultFormat_TTTRRecType".into()))?,
            num_records: num_records
                .ok_or_else(|| DaqCoreError::Protocol("PTU: missing TTResult_NumberOfRecords".into()))?,
            resolution_s: resolution_s
                .ok_or_else(|| DaqCoreError::Protocol("PTU: missing MeasDesc_Resolution".into()))?,
            global_resolution_s: global_resolution_s
                .ok_or_else(|| DaqCoreError::Protocol("PTU: missing MeasDesc_GlobalResolution".into()))?,
        };

        let mut records = Vec::new();
        let mut word = [0u8; 4];
        loop {
            match reader.read_exact(&mut word) {
                Ok(()) => records.push(u32::from_le_bytes(word)),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(DaqCoreError::Protocol(format!("PTU: record read error: {e}"))),
            }
        }

        Ok(PtuFile { header, records })
    }
}

/// Build a minimal, well-formed PTU byte stream for tests: `tags` are
/// `(identifier, value)` scalar pairs written before the mandatory
/// `Header_End` marker, followed by `records`.
#[cfg(test)]
pub fn build_test_ptu(tags: &[(&str, u64)], records: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[0u8; 8]);

    let mut write_tag = |bytes: &mut Vec<u8>, name: &str, value: u64| {
        let mut identifier = [0u8; 32];
        identifier[..name.len()].copy_from_slice(name.as_bytes());
        bytes.extend_from_slice(&identifier);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // scalar tag type
        bytes.extend_from_slice(&value.to_le_bytes());
    };

    for (name, value) in tags {
        write_tag(&mut bytes, name, *value);
    }
    write_tag(&mut bytes, "Header_End", 0);

    for r in records {
        bytes.extend_from_slice(&r.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_minimal_well_formed_file() {
        let bytes = build_test_ptu(
            &[
                ("TTResultFormat_TTTRRecType", rec_type::MULTI_T3 as u64),
                ("TTResult_NumberOfRecords", 2),
                ("MeasDesc_Resolution", 1.0e-12f64.to_bits()),
                ("MeasDesc_GlobalResolution", 12.5e-9f64.to_bits()),
            ],
            &[0xAAAA_AAAA, 0xBBBB_BBBB],
        );
        let ptu = PtuFile::parse(Cursor::new(bytes)).unwrap();
        assert_eq!(ptu.header.rec_type, rec_type::MULTI_T3);
        assert_eq!(ptu.header.num_records, 2);
        assert_eq!(ptu.records, vec![0xAAAA_AAAA, 0xBBBB_BBBB]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_test_ptu(&[], &[]);
        bytes[0] = b'X';
        let err = PtuFile::parse(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind_name(), "Protocol");
    }

    #[test]
    fn missing_required_tag_is_protocol_error() {
        let bytes = build_test_ptu(&[("TTResult_NumberOfRecords", 1)], &[0]);
        let err = PtuFile::parse(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind_name(), "Protocol");
    }
}
