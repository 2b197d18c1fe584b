//! Archive writer (C8): a chunked, column-aware hierarchical-binary table
//! abstraction, plus the three packet-logger shapes built on top of it.
//!
//! Grounded in the teacher's `data/hdf5_writer.rs` (background flush of raw
//! bytes into an `hdf5::File`/`Group`, feature-gated behind `storage_hdf5`,
//! falling back to a no-op when the feature is compiled out) and
//! `data/storage_factory.rs`'s feature-gated-backend convention. Every
//! mutation of the underlying `hdf5::Dataset` is taken under
//! [`crate::sync::ARCHIVE_LOCK`], and the dataset handle itself is held in a
//! [`crate::sync::LockAdapter`] so its own `Drop` (which performs I/O) also
//! runs under the lock, per §5's lock-adapter requirement.

use std::collections::HashMap;

use crate::error::{CoreResult, DaqCoreError};
use crate::schema::{derive_schema, CompoundSchema, ElementType, FieldCopyOp, LoggerLayout, PayloadMessage};
use crate::sync::{LockAdapter, ARCHIVE_LOCK};

/// `4 GiB - 1`, the hierarchical-binary library's per-chunk size ceiling.
const MAX_CHUNK_BYTES: u64 = 4 * 1024 * 1024 * 1024 - 1;

fn bounded_chunk_size(requested: usize, element_size: usize, cols: usize) -> usize {
    let max_rows = (MAX_CHUNK_BYTES / (element_size as u64 * cols as u64)).max(1) as usize;
    requested.min(max_rows).max(1)
}

#[cfg(feature = "storage_hdf5")]
mod backend {
    use super::ElementType;
    use crate::error::{CoreResult, DaqCoreError};

    /// Monomorphizes the `hdf5` crate's generic dataset builder over our
    /// small closed set of element types, since `ElementType` only exists at
    /// runtime but `hdf5::H5Type` is a compile-time bound.
    macro_rules! for_each_native {
        ($elem:expr, |$t:ident| $body:expr) => {
            match $elem {
                ElementType::I8 => { type $t = i8; $body }
                ElementType::I16 => { type $t = i16; $body }
                ElementType::I32 => { type $t = i32; $body }
                ElementType::I64 => { type $t = i64; $body }
                ElementType::U8 => { type $t = u8; $body }
                ElementType::U16 => { type $t = u16; $body }
                ElementType::U32 => { type $t = u32; $body }
                ElementType::U64 => { type $t = u64; $body }
                ElementType::F32 => { type $t = f32; $body }
                ElementType::F64 => { type $t = f64; $body }
            }
        };
    }

    pub fn create_dataset(
        group: &hdf5::Group,
        name: &str,
        element_type: ElementType,
        cols: usize,
        chunk_rows: usize,
    ) -> CoreResult<hdf5::Dataset> {
        for_each_native!(element_type, |T| {
            let builder = group.new_dataset::<T>();
            let dataset = if cols > 1 {
                builder
                    .shape((0..).resizable(true))
                    .chunk((chunk_rows, cols))
                    .create(name)
            } else {
                builder
                    .shape((0..).resizable(true))
                    .chunk((chunk_rows,))
                    .create(name)
            };
            dataset.map_err(DaqCoreError::from)
        })
    }

    pub fn resize_rows(dataset: &hdf5::Dataset, rows: usize, cols: usize) -> CoreResult<()> {
        let shape = if cols > 1 { vec![rows, cols] } else { vec![rows] };
        dataset.resize(shape).map_err(DaqCoreError::from)
    }

    pub fn write_rows(
        dataset: &hdf5::Dataset,
        element_type: ElementType,
        row_offset: usize,
        rows: usize,
        cols: usize,
        bytes: &[u8],
    ) -> CoreResult<()> {
        for_each_native!(element_type, |T| {
            let elems: &[T] = bytemuck_cast_slice(bytes);
            let arr = if cols > 1 {
                ndarray::Array2::from_shape_vec((rows, cols), elems.to_vec())
                    .map_err(|e| DaqCoreError::ConfigMismatch(format!("row shape: {e}")))?
                    .into_dyn()
            } else {
                ndarray::Array1::from_vec(elems.to_vec()).into_dyn()
            };
            let selection = if cols > 1 {
                hdf5::Selection::from(ndarray::s![row_offset..row_offset + rows, ..])
            } else {
                hdf5::Selection::from(ndarray::s![row_offset..row_offset + rows])
            };
            dataset.write_slice(&arr, selection).map_err(DaqCoreError::from)
        })
    }

    pub fn read_rows(
        dataset: &hdf5::Dataset,
        element_type: ElementType,
        row_offset: usize,
        rows: usize,
        cols: usize,
    ) -> CoreResult<Vec<u8>> {
        for_each_native!(element_type, |T| {
            let selection = if cols > 1 {
                hdf5::Selection::from(ndarray::s![row_offset..row_offset + rows, ..])
            } else {
                hdf5::Selection::from(ndarray::s![row_offset..row_offset + rows])
            };
            let data: ndarray::ArrayD<T> = dataset.read_slice(selection).map_err(DaqCoreError::from)?;
            Ok(bytemuck_cast_vec(data.into_raw_vec()))
        })
    }

    /// Reinterprets a raw byte buffer as `&[T]`; `T` is always a plain POD
    /// numeric type drawn from [`ElementType`].
    fn bytemuck_cast_slice<T: Copy>(bytes: &[u8]) -> &[T] {
        let elem_size = std::mem::size_of::<T>();
        debug_assert_eq!(bytes.len() % elem_size, 0);
        unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<T>(), bytes.len() / elem_size) }
    }

    fn bytemuck_cast_vec<T: Copy>(values: Vec<T>) -> Vec<u8> {
        let elem_size = std::mem::size_of::<T>();
        let mut out = Vec::with_capacity(values.len() * elem_size);
        for v in values {
            let bytes: &[u8] =
                unsafe { std::slice::from_raw_parts((&v as *const T).cast::<u8>(), elem_size) };
            out.extend_from_slice(bytes);
        }
        out
    }

    /// Recovers an [`ElementType`] from a dataset's on-disk `TypeDescriptor`.
    /// The library's reflection only round-trips the closed set of native
    /// scalar widths we ever create a dataset with; anything else (a
    /// compound/enum/string type written by something other than this
    /// crate) is a schema mismatch on open.
    pub fn element_type_from_descriptor(
        descriptor: &hdf5::types::TypeDescriptor,
    ) -> CoreResult<ElementType> {
        use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
        match descriptor {
            TypeDescriptor::Integer(IntSize::U1) => Ok(ElementType::I8),
            TypeDescriptor::Integer(IntSize::U2) => Ok(ElementType::I16),
            TypeDescriptor::Integer(IntSize::U4) => Ok(ElementType::I32),
            TypeDescriptor::Integer(IntSize::U8) => Ok(ElementType::I64),
            TypeDescriptor::Unsigned(IntSize::U1) => Ok(ElementType::U8),
            TypeDescriptor::Unsigned(IntSize::U2) => Ok(ElementType::U16),
            TypeDescriptor::Unsigned(IntSize::U4) => Ok(ElementType::U32),
            TypeDescriptor::Unsigned(IntSize::U8) => Ok(ElementType::U64),
            TypeDescriptor::Float(FloatSize::U4) => Ok(ElementType::F32),
            TypeDescriptor::Float(FloatSize::U8) => Ok(ElementType::F64),
            other => Err(DaqCoreError::SchemaMismatch(format!(
                "dataset element type {other:?} is not one of the narrowing targets this crate writes"
            ))),
        }
    }

    pub fn dataset_shape_and_chunk(dataset: &hdf5::Dataset) -> (Vec<usize>, Vec<usize>) {
        let shape = dataset.shape();
        let chunk = dataset.chunk().unwrap_or_else(|| shape.clone());
        (shape, chunk)
    }

    pub fn read_selected_channels(dataset: &hdf5::Dataset, cols: usize) -> Vec<i32> {
        if cols <= 1 {
            return vec![];
        }
        dataset
            .attr("selected_channels")
            .and_then(|attr| attr.read_raw::<i32>())
            .unwrap_or_else(|_| (0..cols as i32).collect())
    }
}

/// Extensible hierarchical-binary dataset abstraction (§3 Table). `rows` is
/// the dataset's current logical row count; `chunk_write_buffer` accumulates
/// rows between direct-chunk writes.
pub struct Table {
    #[cfg(feature = "storage_hdf5")]
    dataset: LockAdapter<hdf5::Dataset>,
    element_dtype: ElementType,
    element_size: usize,
    rows: usize,
    cols: usize,
    chunk_size: usize,
    row_bytes: usize,
    chunk_bytes: u64,
    chunk_write_buffer: Vec<u8>,
    chunk_buffer_occupancy: usize,
    last_full_row_count: usize,
    channels: Vec<i32>,
}

#[cfg(not(feature = "storage_hdf5"))]
fn backend_not_enabled() -> DaqCoreError {
    DaqCoreError::ConfigMismatch(
        "archive backend 'hdf5' is not compiled in; enable the storage_hdf5 feature".into(),
    )
}

impl Table {
    /// Create an extensible dataset named `name` under `group`. 2D iff
    /// `channels.len() > 1`. `chunk_size` is bound downward so
    /// `chunk_bytes <= 4 GiB - 1`, with a warning if it had to shrink.
    #[cfg(feature = "storage_hdf5")]
    pub fn new(
        group: &hdf5::Group,
        name: &str,
        element_dtype: ElementType,
        chunk_size: usize,
        channels: Vec<i32>,
    ) -> CoreResult<Table> {
        let cols = channels.len().max(1);
        if chunk_size == 0 {
            return Err(DaqCoreError::ConfigMismatch("table chunk_size must be nonzero".into()));
        }

        let element_size = element_dtype.size();
        let bounded = bounded_chunk_size(chunk_size, element_size, cols);
        if bounded < chunk_size {
            tracing::warn!(
                requested = chunk_size,
                bounded,
                table = name,
                "chunk_size reduced to stay under the 4 GiB chunk ceiling"
            );
        }

        let _guard = ARCHIVE_LOCK.lock();
        let raw_dataset = backend::create_dataset(group, name, element_dtype, cols, bounded)?;

        if cols > 1 {
            if let Ok(attr) = raw_dataset.new_attr::<i32>().shape(cols).create("selected_channels") {
                let _ = attr.write(&channels);
            }
        }

        let dataset = LockAdapter::new(&ARCHIVE_LOCK, || raw_dataset);

        Ok(Table {
            dataset,
            element_dtype,
            element_size,
            rows: 0,
            cols,
            chunk_size: bounded,
            row_bytes: element_size * cols,
            chunk_bytes: (element_size * cols * bounded) as u64,
            chunk_write_buffer: Vec::new(),
            chunk_buffer_occupancy: 0,
            last_full_row_count: 0,
            channels,
        })
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn new(
        _group: &(),
        _name: &str,
        _element_dtype: ElementType,
        _chunk_size: usize,
        _channels: Vec<i32>,
    ) -> CoreResult<Table> {
        Err(backend_not_enabled())
    }

    /// Reopen a dataset written by a previous [`Table::new`]/`append`
    /// session: dims, dtype and chunk size come back from the dataset
    /// itself, and `selected_channels` comes back from its attribute,
    /// falling back to `0..cols` (column index == channel index) if the
    /// attribute is missing (§4.8).
    #[cfg(feature = "storage_hdf5")]
    pub fn open(group: &hdf5::Group, name: &str) -> CoreResult<Table> {
        let _guard = ARCHIVE_LOCK.lock();
        let raw_dataset = group.dataset(name).map_err(DaqCoreError::from)?;

        let (shape, chunk_shape) = backend::dataset_shape_and_chunk(&raw_dataset);
        let rows = *shape.first().ok_or_else(|| {
            DaqCoreError::SchemaMismatch(format!("dataset '{name}' has no rows dimension"))
        })?;
        let cols = shape.get(1).copied().unwrap_or(1);
        let chunk_size = chunk_shape.first().copied().unwrap_or(1).max(1);

        let descriptor = raw_dataset
            .dtype()
            .map_err(DaqCoreError::from)?
            .to_descriptor()
            .map_err(DaqCoreError::from)?;
        let element_dtype = backend::element_type_from_descriptor(&descriptor)?;
        let element_size = element_dtype.size();

        let channels = backend::read_selected_channels(&raw_dataset, cols);
        let dataset = LockAdapter::new(&ARCHIVE_LOCK, || raw_dataset);

        Ok(Table {
            dataset,
            element_dtype,
            element_size,
            rows,
            cols,
            chunk_size,
            row_bytes: element_size * cols,
            chunk_bytes: (element_size * cols * chunk_size) as u64,
            chunk_write_buffer: Vec::new(),
            chunk_buffer_occupancy: 0,
            last_full_row_count: rows,
            channels,
        })
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn open(_group: &(), _name: &str) -> CoreResult<Table> {
        Err(backend_not_enabled())
    }

    /// `bytes.len()` must be a whole multiple of `row_bytes`.
    #[cfg(feature = "storage_hdf5")]
    pub fn append(&mut self, bytes: &[u8]) -> CoreResult<()> {
        if bytes.len() % self.row_bytes != 0 {
            return Err(DaqCoreError::ConfigMismatch(format!(
                "append payload of {} bytes is not a multiple of row_bytes {}",
                bytes.len(),
                self.row_bytes
            )));
        }

        let _guard = ARCHIVE_LOCK.lock();
        // Roll back to the last full chunk boundary if the previous session
        // left a partial trailing chunk, so it gets overwritten rather than
        // leaving a gap.
        if self.rows > self.last_full_row_count {
            self.rows = self.last_full_row_count;
        }

        let incoming_rows = bytes.len() / self.row_bytes;

        if self.chunk_buffer_occupancy == 0 && incoming_rows >= self.chunk_size {
            let direct_rows = (incoming_rows / self.chunk_size) * self.chunk_size;
            let direct_bytes = direct_rows * self.row_bytes;
            self.write_direct(&bytes[..direct_bytes], direct_rows)?;

            let remainder = &bytes[direct_bytes..];
            self.chunk_write_buffer.extend_from_slice(remainder);
            self.chunk_buffer_occupancy = remainder.len() / self.row_bytes;
            return Ok(());
        }

        self.chunk_write_buffer.extend_from_slice(bytes);
        self.chunk_buffer_occupancy += incoming_rows;

        while self.chunk_buffer_occupancy >= self.chunk_size {
            let chunk_bytes = self.chunk_size * self.row_bytes;
            let chunk: Vec<u8> = self.chunk_write_buffer.drain(..chunk_bytes).collect();
            self.write_direct(&chunk, self.chunk_size)?;
            self.chunk_buffer_occupancy -= self.chunk_size;
        }

        Ok(())
    }

    #[cfg(feature = "storage_hdf5")]
    fn write_direct(&mut self, bytes: &[u8], rows: usize) -> CoreResult<()> {
        let new_row_count = self.rows + rows;
        let dataset = self.dataset.get();
        backend::resize_rows(dataset, new_row_count, self.cols)?;
        backend::write_rows(dataset, self.element_dtype, self.rows, rows, self.cols, bytes)?;
        self.rows = new_row_count;
        self.last_full_row_count = new_row_count;
        Ok(())
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn append(&mut self, _bytes: &[u8]) -> CoreResult<()> {
        Err(backend_not_enabled())
    }

    /// Pad the remaining buffer with zeros and write it as a partial chunk;
    /// the next `append` rolls the dataset's logical row count back to
    /// `last_full_row_count`.
    #[cfg(feature = "storage_hdf5")]
    pub fn flush_partial(&mut self) -> CoreResult<()> {
        if self.chunk_buffer_occupancy == 0 {
            return Ok(());
        }
        let _guard = ARCHIVE_LOCK.lock();
        let pad_rows = self.chunk_size - self.chunk_buffer_occupancy;
        self.chunk_write_buffer.resize(self.chunk_write_buffer.len() + pad_rows * self.row_bytes, 0);
        let rows = self.chunk_buffer_occupancy + pad_rows;
        let bytes = std::mem::take(&mut self.chunk_write_buffer);
        self.write_direct(&bytes, rows)?;
        self.chunk_buffer_occupancy = 0;
        Ok(())
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn flush_partial(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Hyperslab read of `n` rows starting at `offset`; the returned buffer
    /// is `element_size * cols * n` bytes.
    #[cfg(feature = "storage_hdf5")]
    pub fn read(&self, offset: usize, n: usize) -> CoreResult<Vec<u8>> {
        let _guard = ARCHIVE_LOCK.lock();
        backend::read_rows(self.dataset.get(), self.element_dtype, offset, n, self.cols)
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn read(&self, _offset: usize, _n: usize) -> CoreResult<Vec<u8>> {
        Err(backend_not_enabled())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn channels(&self) -> &[i32] {
        &self.channels
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(err) = self.flush_partial() {
            tracing::warn!(error = %err, "failed to flush partial chunk on table close");
        }
    }
}

/// `<PayloadName>_headers` sibling row: `{experiment_id, sequence_number,
/// timestamp_ns}`, packed as three little-endian `u64`s.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub experiment_id: u64,
    pub sequence_number: u64,
    pub timestamp_ns: u64,
}

impl PacketHeader {
    const ROW_BYTES: usize = 24;

    fn to_bytes(self) -> [u8; Self::ROW_BYTES] {
        let mut out = [0u8; Self::ROW_BYTES];
        out[0..8].copy_from_slice(&self.experiment_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence_number.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out
    }
}

/// One row per packet; channels become columns, repeated fields become
/// fixed-size array cells. Enforces strictly sequential `sequence_number`
/// starting at 0 (§4.8.1).
pub struct RowLogger<M: PayloadMessage> {
    schema: CompoundSchema,
    ops: Vec<FieldCopyOp>,
    channels_table: Table,
    headers_table: Table,
    next_sequence_number: u64,
    _marker: std::marker::PhantomData<M>,
}

impl<M: PayloadMessage> RowLogger<M> {
    #[cfg(feature = "storage_hdf5")]
    pub fn new(
        group: &hdf5::Group,
        payload_name: &str,
        overrides: &HashMap<&str, ElementType>,
        chunk_size: usize,
        channels: Vec<i32>,
        prototype: &M,
    ) -> CoreResult<Self> {
        let schema = derive_schema(LoggerLayout::Row, overrides, prototype)?;
        let ops = FieldCopyOp::for_schema(&schema, LoggerLayout::Row);

        // The compound row is opaque to HDF5 here; the channels table is
        // byte-addressed with an element width equal to the whole row.
        let row_width = schema.row_bytes;
        let channels_table = Table::new(group, &format!("{payload_name}_channels"), ElementType::U8, chunk_size, channels)?;
        debug_assert_eq!(channels_table.row_bytes() % row_width.max(1), 0);

        let headers_table = Table::new(group, &format!("{payload_name}_headers"), ElementType::U8, chunk_size, vec![])?;

        Ok(RowLogger {
            schema,
            ops,
            channels_table,
            headers_table,
            next_sequence_number: 0,
            _marker: std::marker::PhantomData,
        })
    }

    #[cfg(not(feature = "storage_hdf5"))]
    pub fn new(
        _group: &(),
        _payload_name: &str,
        _overrides: &HashMap<&str, ElementType>,
        _chunk_size: usize,
        _channels: Vec<i32>,
        _prototype: &M,
    ) -> CoreResult<Self> {
        Err(backend_not_enabled())
    }

    pub fn append(&mut self, header: PacketHeader, message: &M) -> CoreResult<()> {
        if header.sequence_number != self.next_sequence_number {
            return Err(DaqCoreError::SequenceGap {
                expected: self.next_sequence_number,
                got: header.sequence_number,
            });
        }

        let mut row = vec![0u8; self.schema.row_bytes];
        for op in &self.ops {
            op.copy_into_row(message, &mut row)?;
        }

        self.channels_table.append(&row)?;
        self.headers_table.append(&header.to_bytes())?;
        self.next_sequence_number += 1;
        Ok(())
    }

    pub fn schema(&self) -> &CompoundSchema {
        &self.schema
    }
}

/// One dataset per channel, created lazily on first sight; one row per
/// element of a repeated field, striped across rows (§4.8.2). All repeated
/// fields in a packet must carry identical length.
pub struct ColumnLogger<M: PayloadMessage> {
    schema: CompoundSchema,
    ops: Vec<FieldCopyOp>,
    payload_name: String,
    chunk_size: usize,
    channel_tables: HashMap<i32, Table>,
    _marker: std::marker::PhantomData<M>,
}

impl<M: PayloadMessage> ColumnLogger<M> {
    pub fn new(
        payload_name: impl Into<String>,
        overrides: &HashMap<&str, ElementType>,
        chunk_size: usize,
        prototype: &M,
    ) -> CoreResult<Self> {
        let schema = derive_schema(LoggerLayout::Column, overrides, prototype)?;
        let ops = FieldCopyOp::for_schema(&schema, LoggerLayout::Column);
        Ok(ColumnLogger {
            schema,
            ops,
            payload_name: payload_name.into(),
            chunk_size,
            channel_tables: HashMap::new(),
            _marker: std::marker::PhantomData,
        })
    }

    #[cfg(feature = "storage_hdf5")]
    pub fn append(&mut self, group: &hdf5::Group, channel: i32, message: &M) -> CoreResult<()> {
        let mut striped: Vec<Vec<Vec<u8>>> = Vec::with_capacity(self.ops.len());
        let mut expected_len = None;
        for op in &self.ops {
            let rows = op.stride_rows(message)?;
            match expected_len {
                None => expected_len = Some(rows.len()),
                Some(n) if n != rows.len() => {
                    return Err(DaqCoreError::SchemaMismatch(format!(
                        "column logger {}: repeated fields disagree on length ({} vs {})",
                        self.payload_name, n, rows.len()
                    )))
                }
                _ => {}
            }
            striped.push(rows);
        }

        let table = match self.channel_tables.get_mut(&channel) {
            Some(t) => t,
            None => {
                let name = format!("{}Channel{channel}", self.payload_name);
                let table = Table::new(group, &name, ElementType::U8, self.chunk_size, vec![channel])?;
                self.channel_tables.entry(channel).or_insert(table)
            }
        };

        let n_rows = expected_len.unwrap_or(0);
        for row_idx in 0..n_rows {
            let mut row = vec![0u8; self.schema.row_bytes];
            let mut offset = 0;
            for (op_idx, field) in self.schema.fields.iter().enumerate() {
                let cell = &striped[op_idx][row_idx];
                row[offset..offset + cell.len()].copy_from_slice(cell);
                offset += field.element_type.size();
            }
            table.append(&row)?;
        }
        Ok(())
    }
}

/// One row per packet in a 1D dataset, with a sibling headers dataset
/// (§4.8.3).
pub struct ChannelLessLogger<M: PayloadMessage> {
    schema: CompoundSchema,
    ops: Vec<FieldCopyOp>,
    data_table: Table,
    headers_table: Table,
    _marker: std::marker::PhantomData<M>,
}

impl<M: PayloadMessage> ChannelLessLogger<M> {
    #[cfg(feature = "storage_hdf5")]
    pub fn new(
        group: &hdf5::Group,
        payload_name: &str,
        overrides: &HashMap<&str, ElementType>,
        chunk_size: usize,
        prototype: &M,
    ) -> CoreResult<Self> {
        let schema = derive_schema(LoggerLayout::Row, overrides, prototype)?;
        let ops = FieldCopyOp::for_schema(&schema, LoggerLayout::Row);
        let data_table = Table::new(group, payload_name, ElementType::U8, chunk_size, vec![])?;
        let headers_table = Table::new(group, &format!("{payload_name}_headers"), ElementType::U8, chunk_size, vec![])?;
        Ok(ChannelLessLogger { schema, ops, data_table, headers_table, _marker: std::marker::PhantomData })
    }

    pub fn append(&mut self, header: PacketHeader, message: &M) -> CoreResult<()> {
        let mut row = vec![0u8; self.schema.row_bytes];
        for op in &self.ops {
            op.copy_into_row(message, &mut row)?;
        }
        self.data_table.append(&row)?;
        self.headers_table.append(&header.to_bytes())?;
        Ok(())
    }
}
