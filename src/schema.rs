//! Schema transcoder (C9): reflection-free mapping from message payloads to
//! compound-type field descriptors.
//!
//! The original builds this via generated-code reflection over message
//! prototypes; per the redesign note in original §9 that is replaced here
//! with a small trait exposing `(name, kind, reader)` triples
//! ([`PayloadMessage`]/[`FieldSpec`]) plus a closed dispatch enum over the
//! supported `(source, target)` scalar pairs, grounded in the teacher's
//! explicit `ToDomain`/`From` field-by-field conversion idiom in
//! `crates/daq-proto/src/convert.rs` (no per-pair macros, one match arm per
//! supported combination).

use std::collections::HashMap;

use crate::error::{CoreResult, DaqCoreError};

/// The scalar type a message field is declared as, before any narrowing
/// override is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceScalarType {
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    /// Protobuf-style enum, carried on the wire as `i32`.
    Enum,
}

/// The compound-field element type actually written into a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    fn native_for(source: SourceScalarType) -> ElementType {
        match source {
            SourceScalarType::I32 => ElementType::I32,
            SourceScalarType::I64 => ElementType::I64,
            SourceScalarType::U32 => ElementType::U32,
            SourceScalarType::U64 => ElementType::U64,
            SourceScalarType::F32 => ElementType::F32,
            SourceScalarType::F64 => ElementType::F64,
            SourceScalarType::Enum => ElementType::I32,
        }
    }

    /// True for exactly the `{i32->i8|i16|i32, i64->i64, u32->u8|u16|u32,
    /// u64->u64, f32->f32, f64->f64, enum->i32}` table in original §4.9.
    fn is_supported_narrowing(source: SourceScalarType, target: ElementType) -> bool {
        use ElementType as E;
        use SourceScalarType as S;
        matches!(
            (source, target),
            (S::I32, E::I8) | (S::I32, E::I16) | (S::I32, E::I32)
                | (S::I64, E::I64)
                | (S::U32, E::U8) | (S::U32, E::U16) | (S::U32, E::U32)
                | (S::U64, E::U64)
                | (S::F32, E::F32)
                | (S::F64, E::F64)
                | (S::Enum, E::I32)
        )
    }
}

/// One field of a message payload, in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub source_type: SourceScalarType,
    pub repeated: bool,
}

/// A single scalar value read back from a message field by reflection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    /// Write this value into `dst` as `target`, narrowing if necessary.
    /// `dst.len()` must equal `target.size()`.
    fn write_narrowed(self, target: ElementType, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), target.size());
        match (self, target) {
            (ScalarValue::I32(v), ElementType::I32) => dst.copy_from_slice(&v.to_le_bytes()),
            (ScalarValue::I32(v), ElementType::I16) => dst.copy_from_slice(&(v as i16).to_le_bytes()),
            (ScalarValue::I32(v), ElementType::I8) => dst[0] = v as i8 as u8,
            (ScalarValue::I64(v), ElementType::I64) => dst.copy_from_slice(&v.to_le_bytes()),
            (ScalarValue::U32(v), ElementType::U32) => dst.copy_from_slice(&v.to_le_bytes()),
            (ScalarValue::U32(v), ElementType::U16) => dst.copy_from_slice(&(v as u16).to_le_bytes()),
            (ScalarValue::U32(v), ElementType::U8) => dst[0] = v as u8,
            (ScalarValue::U64(v), ElementType::U64) => dst.copy_from_slice(&v.to_le_bytes()),
            (ScalarValue::F32(v), ElementType::F32) => dst.copy_from_slice(&v.to_le_bytes()),
            (ScalarValue::F64(v), ElementType::F64) => dst.copy_from_slice(&v.to_le_bytes()),
            _ => unreachable!("narrowing already validated at schema-derivation time"),
        }
    }
}

/// A message payload type willing to describe its own fields and hand back
/// scalar/repeated values by name. Implemented once per wire payload kind
/// (digital-in, IMU, analog, traffic-gen, camera-frame header, ...); the
/// window-driver/dispatcher code that produces packets implements this
/// directly rather than going through a generated reflection API.
pub trait PayloadMessage {
    /// Field descriptors in declaration order. A `&'static` slice because
    /// every instance of a given payload type shares the same shape.
    fn field_specs() -> &'static [FieldSpec]
    where
        Self: Sized;

    fn read_scalar(&self, field: &str) -> Option<ScalarValue>;
    fn read_repeated(&self, field: &str) -> Option<Vec<ScalarValue>>;
}

/// Which archive logging shape a schema is being derived for (§4.8): this
/// only affects how *repeated* fields are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerLayout {
    /// One row per packet; a repeated field becomes a fixed-size array cell
    /// whose length is captured from the first packet seen.
    Row,
    /// One row per element of a repeated field; every repeated field
    /// contributes one scalar cell per row, striped across `n` rows.
    Column,
}

/// One field of a derived compound row layout.
#[derive(Debug, Clone)]
pub struct CompoundField {
    pub name: String,
    pub element_type: ElementType,
    /// Number of elements in this field's cell (row logger with a repeated
    /// field); always 1 for scalars and for column-logger fields.
    pub array_len: usize,
    pub byte_offset: usize,
}

/// An ordered list of compound fields plus the resulting row size, built
/// once per payload type and immutable thereafter (§3 Compound Schema).
#[derive(Debug, Clone)]
pub struct CompoundSchema {
    pub fields: Vec<CompoundField>,
    pub row_bytes: usize,
}

/// Derive a [`CompoundSchema`] for `M` by walking its field specs in
/// declaration order. `overrides` narrows specific fields' element type
/// (e.g. `i32` samples known to fit in a `u8`); `prototype` is the first
/// packet of this kind, used only to capture repeated-field lengths for the
/// row-logger layout.
pub fn derive_schema<M: PayloadMessage>(
    layout: LoggerLayout,
    overrides: &HashMap<&str, ElementType>,
    prototype: &M,
) -> CoreResult<CompoundSchema> {
    let mut fields = Vec::new();
    let mut offset = 0usize;

    for spec in M::field_specs() {
        let target = match overrides.get(spec.name) {
            Some(&requested) => {
                if !ElementType::is_supported_narrowing(spec.source_type, requested) {
                    return Err(DaqCoreError::SchemaMismatch(format!(
                        "field {:?}: override {:?} is not a supported narrowing of {:?}",
                        spec.name, requested, spec.source_type
                    )));
                }
                requested
            }
            None => ElementType::native_for(spec.source_type),
        };

        let array_len = if spec.repeated {
            match layout {
                LoggerLayout::Row => {
                    let values = prototype.read_repeated(spec.name).ok_or_else(|| {
                        DaqCoreError::SchemaMismatch(format!(
                            "prototype missing repeated field {:?}",
                            spec.name
                        ))
                    })?;
                    values.len()
                }
                LoggerLayout::Column => 1,
            }
        } else {
            1
        };

        fields.push(CompoundField {
            name: spec.name.to_string(),
            element_type: target,
            array_len,
            byte_offset: offset,
        });
        offset += target.size() * array_len;
    }

    Ok(CompoundSchema { fields, row_bytes: offset })
}

/// A bound copy operation for one field, ready to be applied to any message
/// of the schema's payload type (§4.9's "copy closure bound to (message,
/// dst_bytes, offset)"). Built once per field from the derived schema.
pub enum FieldCopyOp {
    /// Read one scalar and write it at `byte_offset` in the row.
    Scalar { field: String, target: ElementType, byte_offset: usize },
    /// Copy a repeated field into a contiguous array cell; the repeated
    /// field's length must equal `len` (the prototype-captured length).
    RowArray { field: String, target: ElementType, len: usize, byte_offset: usize },
    /// Stride a repeated field across `n` separate rows, one element per
    /// row, each at `byte_offset` within its own row.
    ColumnStride { field: String, target: ElementType, byte_offset: usize },
}

impl FieldCopyOp {
    /// Build one copy op per field of `schema`.
    pub fn for_schema(schema: &CompoundSchema, layout: LoggerLayout) -> Vec<FieldCopyOp> {
        schema
            .fields
            .iter()
            .map(|f| match layout {
                LoggerLayout::Row if f.array_len > 1 => FieldCopyOp::RowArray {
                    field: f.name.clone(),
                    target: f.element_type,
                    len: f.array_len,
                    byte_offset: f.byte_offset,
                },
                LoggerLayout::Column if f.array_len == 1 => {
                    // A column-logger field may still be "repeated" at the
                    // message level even though its cell width is 1; the
                    // caller distinguishes scalar vs. repeated fields via
                    // `read_repeated`/`read_scalar` returning `Some`.
                    FieldCopyOp::ColumnStride {
                        field: f.name.clone(),
                        target: f.element_type,
                        byte_offset: f.byte_offset,
                    }
                }
                _ => FieldCopyOp::Scalar {
                    field: f.name.clone(),
                    target: f.element_type,
                    byte_offset: f.byte_offset,
                },
            })
            .collect()
    }

    /// Apply this op to `msg`, writing into one row-logger row `dst`
    /// (`dst.len()` must be the schema's `row_bytes`). Only valid for
    /// [`FieldCopyOp::Scalar`] and [`FieldCopyOp::RowArray`]; calling this on
    /// a [`FieldCopyOp::ColumnStride`] op is a logic error.
    pub fn copy_into_row<M: PayloadMessage>(&self, msg: &M, dst: &mut [u8]) -> CoreResult<()> {
        match self {
            FieldCopyOp::Scalar { field, target, byte_offset } => {
                let value = msg.read_scalar(field).ok_or_else(|| {
                    DaqCoreError::SchemaMismatch(format!("missing scalar field {field:?}"))
                })?;
                value.write_narrowed(*target, &mut dst[*byte_offset..*byte_offset + target.size()]);
                Ok(())
            }
            FieldCopyOp::RowArray { field, target, len, byte_offset } => {
                let values = msg.read_repeated(field).ok_or_else(|| {
                    DaqCoreError::SchemaMismatch(format!("missing repeated field {field:?}"))
                })?;
                if values.len() != *len {
                    return Err(DaqCoreError::SchemaMismatch(format!(
                        "repeated field {field:?} has length {} (prototype captured {len})",
                        values.len()
                    )));
                }
                let elem_size = target.size();
                for (i, value) in values.into_iter().enumerate() {
                    let at = *byte_offset + i * elem_size;
                    value.write_narrowed(*target, &mut dst[at..at + elem_size]);
                }
                Ok(())
            }
            FieldCopyOp::ColumnStride { .. } => Err(DaqCoreError::SchemaMismatch(
                "ColumnStride op cannot be applied via copy_into_row".into(),
            )),
        }
    }

    /// Apply this op to `msg`, returning one cell's worth of bytes per
    /// striped row (column logger). All repeated fields on a payload must
    /// have identical length across the whole packet (asserted by the
    /// column-logger writer in [`crate::archive`], not here).
    pub fn stride_rows<M: PayloadMessage>(&self, msg: &M) -> CoreResult<Vec<Vec<u8>>> {
        let FieldCopyOp::ColumnStride { field, target, .. } = self else {
            return Err(DaqCoreError::SchemaMismatch(
                "stride_rows only valid for ColumnStride ops".into(),
            ));
        };
        let elem_size = target.size();
        if let Some(values) = msg.read_repeated(field) {
            Ok(values
                .into_iter()
                .map(|v| {
                    let mut cell = vec![0u8; elem_size];
                    v.write_narrowed(*target, &mut cell);
                    cell
                })
                .collect())
        } else if let Some(value) = msg.read_scalar(field) {
            let mut cell = vec![0u8; elem_size];
            value.write_narrowed(*target, &mut cell);
            Ok(vec![cell])
        } else {
            Err(DaqCoreError::SchemaMismatch(format!("missing field {field:?}")))
        }
    }
}
