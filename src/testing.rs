//! Fixtures for tests of the loader.
//!
//! - [`RawTrip`] mirrors a source row with the raw physical types found in
//!   trip files, every column nullable.
//! - [`write_trip_parquet`] writes such rows through `serde_arrow` and
//!   `ArrowWriter`; [`write_batch_parquet`] writes a hand-built
//!   [`RecordBatch`] for files with unusual schemas.
//! - [`sample_records`] builds already-decoded records.
//!
//! ```no_run
//! use bulkload::testing::{RawTrip, write_trip_parquet};
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("trips.parquet");
//! let rows: Vec<RawTrip> = (0..100).map(RawTrip::sample).collect();
//! write_trip_parquet(&path, &rows)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::record::Record;
use anyhow::{Context, Result};
use arrow::datatypes::FieldRef;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Duration};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_arrow::to_record_batch;
use std::fs::File;
use std::path::Path;

/// 2024-01-01T00:00:00Z in epoch microseconds.
pub const BASE_MICROS: i64 = 1_704_067_200_000_000;

/// A source row as stored in trip Parquet files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrip {
    #[serde(rename = "VendorID")]
    pub vendor_id: Option<i32>,
    /// Epoch microseconds; written as `Int64` and cast on read.
    pub tpep_pickup_datetime: Option<i64>,
    pub tpep_dropoff_datetime: Option<i64>,
    pub passenger_count: Option<f64>,
    pub trip_distance: Option<f64>,
    #[serde(rename = "RatecodeID")]
    pub rate_code_id: Option<f64>,
    pub store_and_fwd_flag: Option<String>,
    #[serde(rename = "PULocationID")]
    pub pu_location_id: Option<i32>,
    #[serde(rename = "DOLocationID")]
    pub do_location_id: Option<i32>,
    pub payment_type: Option<i64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
}

impl RawTrip {
    /// A plausible, fully populated row; `i` varies every column.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn sample(i: usize) -> Self {
        let n = i as i64;
        let pickup = BASE_MICROS + n * 1_000_000;
        let fare = 5.0 + (i % 50) as f64;
        Self {
            vendor_id: Some((i % 2 + 1) as i32),
            tpep_pickup_datetime: Some(pickup),
            tpep_dropoff_datetime: Some(pickup + 600_000_000),
            passenger_count: Some((i % 4 + 1) as f64),
            trip_distance: Some((i % 100) as f64 / 10.0),
            rate_code_id: Some(1.0),
            store_and_fwd_flag: Some(if i % 10 == 0 { "Y" } else { "N" }.to_string()),
            pu_location_id: Some((i % 265 + 1) as i32),
            do_location_id: Some(((i * 7) % 265 + 1) as i32),
            payment_type: Some((i % 4 + 1) as i64),
            fare_amount: Some(fare),
            extra: Some(0.5),
            mta_tax: Some(0.5),
            tip_amount: Some(1.25),
            tolls_amount: Some(0.0),
            improvement_surcharge: Some(0.3),
            total_amount: Some(fare + 2.55),
            congestion_surcharge: Some(2.5),
        }
    }
}

/// Write `rows` to a Parquet file, returning the row count.
///
/// # Errors
///
/// Returns an error if the schema cannot be traced, the batch cannot be
/// built, or the file cannot be written.
pub fn write_trip_parquet(path: impl AsRef<Path>, rows: &[RawTrip]) -> Result<usize> {
    let fields = Vec::<FieldRef>::from_type::<RawTrip>(TracingOptions::default())
        .context("trace RawTrip schema")?;
    let batch = to_record_batch(&fields, &rows).context("convert rows to RecordBatch")?;
    write_batch_parquet(path, &batch)?;
    Ok(rows.len())
}

/// Write a single record batch to a Parquet file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_batch_parquet(path: impl AsRef<Path>, batch: &RecordBatch) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let props = WriterProperties::builder().build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context("create ArrowWriter")?;
    writer.write(batch).context("write batch to parquet")?;
    writer.close().context("close ArrowWriter")?;
    Ok(())
}

/// `n` decoded records with distinct pickup times, in order.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn sample_records(n: usize) -> Vec<Record> {
    let base = DateTime::from_timestamp_micros(BASE_MICROS)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default();
    (0..n)
        .map(|i| {
            let pickup = base + Duration::seconds(i as i64);
            Record {
                vendor_id: (i % 2 + 1) as u8,
                pickup_datetime: Some(pickup),
                dropoff_datetime: Some(pickup + Duration::minutes(10)),
                passenger_count: (i % 4 + 1) as u8,
                trip_distance: (i % 100) as f64 / 10.0,
                rate_code_id: 1,
                pu_location_id: (i % 265 + 1) as u16,
                do_location_id: ((i * 7) % 265 + 1) as u16,
                payment_type: 1,
                fare_amount: 5.0 + (i % 50) as f64,
                ..Record::default()
            }
        })
        .collect()
}
