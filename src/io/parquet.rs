//! Parquet source: record batches in, [`FieldAccess`] rows out.
//!
//! Every known source column is cast once per record batch to the canonical
//! Arrow type of its [`FieldKind`] (`Int64`, `Float64`, `Utf8`,
//! `Timestamp(Microsecond)`), so per-row access is a downcast and an index.
//! A column that is missing, or whose physical type cannot be cast, reads as
//! absent and the decoder falls back to its default.

use crate::decode::{FieldAccess, FieldKind, SOURCE_FIELDS};
use crate::error::{LoadError, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{can_cast_types, cast};
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit, TimestampMicrosecondType};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Streams record batches from one Parquet file.
pub struct ParquetRowReader {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
}

impl ParquetRowReader {
    /// Open `path` and log the known columns it lacks.
    ///
    /// A non-zero `limit` stops the reader after that many rows, so a small
    /// limit never decodes a whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Decode`] if the file cannot be opened or has no
    /// valid Parquet footer.
    pub fn open(path: impl AsRef<Path>, batch_size: usize, limit: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| LoadError::decode(&path, e))?;
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| LoadError::decode(&path, e))?;

        let schema = builder.schema();
        let missing: Vec<&str> = SOURCE_FIELDS
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| schema.field_with_name(name).is_err())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(file = %path.display(), ?missing, "columns missing, defaults will be used");
        }

        let mut builder = builder.with_batch_size(batch_size.max(1));
        if limit > 0 {
            builder = builder.with_limit(limit);
        }
        let reader = builder
            .build()
            .map_err(|e| LoadError::decode(&path, e))?;
        Ok(Self { path, reader })
    }

    /// Next record batch with its known columns cast, or `None` at end of file.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Decode`] if a page cannot be read or decompressed.
    pub fn next_batch(&mut self) -> Result<Option<DecodedBatch>> {
        let batch = self
            .reader
            .next()
            .transpose()
            .map_err(|e| LoadError::decode(&self.path, e))?;
        Ok(batch.map(|b| DecodedBatch::new(&b)))
    }
}

/// One record batch with the known columns in canonical form.
pub struct DecodedBatch {
    num_rows: usize,
    columns: HashMap<&'static str, (FieldKind, ArrayRef)>,
}

impl DecodedBatch {
    fn new(batch: &RecordBatch) -> Self {
        let mut columns = HashMap::with_capacity(SOURCE_FIELDS.len());
        for (name, kind) in SOURCE_FIELDS {
            let Some(array) = batch.column_by_name(name) else {
                continue;
            };
            let target = canonical_type(kind, array.data_type());
            if !can_cast_types(array.data_type(), &target) {
                tracing::debug!(column = name, from = %array.data_type(), to = %target, "column type not castable");
                continue;
            }
            match cast(array, &target) {
                Ok(cast_array) => {
                    columns.insert(name, (kind, cast_array));
                }
                Err(e) => tracing::debug!(column = name, error = %e, "column cast failed"),
            }
        }
        Self {
            num_rows: batch.num_rows(),
            columns,
        }
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Row views in file order.
    pub fn rows(&self) -> impl Iterator<Item = BatchRow<'_>> {
        (0..self.num_rows).map(move |row| BatchRow { batch: self, row })
    }

    fn column(&self, name: &str, kind: FieldKind) -> Option<&ArrayRef> {
        self.columns
            .get(name)
            .filter(|(k, _)| *k == kind)
            .map(|(_, a)| a)
    }
}

/// Canonical Arrow type for `kind`. Timestamps keep their source time zone so
/// the stored epoch value is not shifted.
fn canonical_type(kind: FieldKind, source: &DataType) -> DataType {
    match kind {
        FieldKind::Int => DataType::Int64,
        FieldKind::Float => DataType::Float64,
        FieldKind::Text => DataType::Utf8,
        FieldKind::Timestamp => match source {
            DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
            _ => DataType::Timestamp(TimeUnit::Microsecond, None),
        },
    }
}

/// A single row of a [`DecodedBatch`].
#[derive(Clone, Copy)]
pub struct BatchRow<'a> {
    batch: &'a DecodedBatch,
    row: usize,
}

impl FieldAccess for BatchRow<'_> {
    fn int(&self, name: &str) -> Option<i64> {
        let a = self.batch.column(name, FieldKind::Int)?.as_primitive_opt::<Int64Type>()?;
        a.is_valid(self.row).then(|| a.value(self.row))
    }

    fn float(&self, name: &str) -> Option<f64> {
        let a = self.batch.column(name, FieldKind::Float)?.as_primitive_opt::<Float64Type>()?;
        a.is_valid(self.row).then(|| a.value(self.row))
    }

    fn text(&self, name: &str) -> Option<&str> {
        let a = self.batch.column(name, FieldKind::Text)?.as_string_opt::<i32>()?;
        a.is_valid(self.row).then(|| a.value(self.row))
    }

    fn timestamp_micros(&self, name: &str) -> Option<i64> {
        let a = self
            .batch
            .column(name, FieldKind::Timestamp)?
            .as_primitive_opt::<TimestampMicrosecondType>()?;
        a.is_valid(self.row).then(|| a.value(self.row))
    }
}

/// One column as reported by [`inspect_schema`].
#[derive(Debug, Clone, Serialize)]
pub struct ColumnSummary {
    pub index: usize,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// First row's value rendered as text; `None` for an empty file.
    pub sample: Option<String>,
}

/// Schema overview of a Parquet file.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub path: PathBuf,
    pub num_rows: i64,
    pub num_row_groups: usize,
    pub columns: Vec<ColumnSummary>,
}

impl SchemaSummary {
    pub fn print(&self) {
        println!("Schema of {}", self.path.display());
        println!("  rows: {}, row groups: {}", self.num_rows, self.num_row_groups);
        for c in &self.columns {
            println!(
                "  [{:>2}] {:<24} {:<32} sample={}",
                c.index,
                c.name,
                c.data_type,
                c.sample.as_deref().unwrap_or("<none>")
            );
        }
    }
}

/// List every column with its type and first value.
///
/// # Errors
///
/// Returns [`LoadError::Decode`] if the file is unreadable.
pub fn inspect_schema(path: impl AsRef<Path>) -> Result<SchemaSummary> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path).map_err(|e| LoadError::decode(&path, e))?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| LoadError::decode(&path, e))?;
    let schema = builder.schema().clone();
    let num_rows = builder.metadata().file_metadata().num_rows();
    let num_row_groups = builder.metadata().num_row_groups();

    let mut reader = builder
        .with_batch_size(1)
        .with_limit(1)
        .build()
        .map_err(|e| LoadError::decode(&path, e))?;
    let first = reader
        .next()
        .transpose()
        .map_err(|e| LoadError::decode(&path, e))?
        .filter(|b| b.num_rows() > 0);

    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| ColumnSummary {
            index,
            name: field.name().clone(),
            data_type: field.data_type().to_string(),
            nullable: field.is_nullable(),
            sample: first
                .as_ref()
                .and_then(|b| array_value_to_string(b.column(index), 0).ok()),
        })
        .collect();

    Ok(SchemaSummary {
        path,
        num_rows,
        num_row_groups,
        columns,
    })
}
