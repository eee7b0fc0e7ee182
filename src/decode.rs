//! Row decoding: raw named fields in, clamped [`Record`]s out.
//!
//! Decoding is split in two layers:
//! - [`FieldAccess`] is the only thing the decoder needs from a container
//!   format: typed lookup of a field by name for the current row.
//! - [`decode_row`] turns one such row into a [`Record`], enforcing every
//!   destination constraint. It cannot fail; unreadable fields fall back to
//!   clamped defaults so one corrupt row never discards the file.
//!
//! [`decode_file`] drives the Parquet implementation end to end.

use crate::config::{LoaderConfig, SchemaLimits};
use crate::error::Result;
use crate::io::parquet::ParquetRowReader;
use crate::record::{
    Record, clamp_decimal, clamp_smallint, clamp_tinyint, micros_to_datetime, normalize_flag,
};
use std::path::Path;
use std::time::Instant;

/// Canonical type a source field is read as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// int or long
    Int,
    /// float or double
    Float,
    Text,
    /// Microseconds since the Unix epoch.
    Timestamp,
}

pub const VENDOR_ID: &str = "VendorID";
pub const PICKUP: &str = "tpep_pickup_datetime";
pub const DROPOFF: &str = "tpep_dropoff_datetime";
pub const PASSENGER_COUNT: &str = "passenger_count";
pub const TRIP_DISTANCE: &str = "trip_distance";
pub const RATE_CODE_ID: &str = "RatecodeID";
pub const STORE_AND_FWD_FLAG: &str = "store_and_fwd_flag";
pub const PU_LOCATION_ID: &str = "PULocationID";
pub const DO_LOCATION_ID: &str = "DOLocationID";
pub const PAYMENT_TYPE: &str = "payment_type";
pub const FARE_AMOUNT: &str = "fare_amount";
pub const EXTRA: &str = "extra";
pub const MTA_TAX: &str = "mta_tax";
pub const TIP_AMOUNT: &str = "tip_amount";
pub const TOLLS_AMOUNT: &str = "tolls_amount";
pub const IMPROVEMENT_SURCHARGE: &str = "improvement_surcharge";
pub const TOTAL_AMOUNT: &str = "total_amount";
pub const CONGESTION_SURCHARGE: &str = "congestion_surcharge";

/// Every source field [`decode_row`] reads, with the kind it reads it as.
pub const SOURCE_FIELDS: [(&str, FieldKind); 18] = [
    (VENDOR_ID, FieldKind::Int),
    (PICKUP, FieldKind::Timestamp),
    (DROPOFF, FieldKind::Timestamp),
    (PASSENGER_COUNT, FieldKind::Float),
    (TRIP_DISTANCE, FieldKind::Float),
    (RATE_CODE_ID, FieldKind::Float),
    (STORE_AND_FWD_FLAG, FieldKind::Text),
    (PU_LOCATION_ID, FieldKind::Int),
    (DO_LOCATION_ID, FieldKind::Int),
    (PAYMENT_TYPE, FieldKind::Int),
    (FARE_AMOUNT, FieldKind::Float),
    (EXTRA, FieldKind::Float),
    (MTA_TAX, FieldKind::Float),
    (TIP_AMOUNT, FieldKind::Float),
    (TOLLS_AMOUNT, FieldKind::Float),
    (IMPROVEMENT_SURCHARGE, FieldKind::Float),
    (TOTAL_AMOUNT, FieldKind::Float),
    (CONGESTION_SURCHARGE, FieldKind::Float),
];

/// Typed, by-name access to the fields of the current row.
///
/// Each accessor returns `None` when the field is absent, null, or cannot be
/// represented as the requested type.
pub trait FieldAccess {
    fn int(&self, name: &str) -> Option<i64>;
    fn float(&self, name: &str) -> Option<f64>;
    fn text(&self, name: &str) -> Option<&str>;
    fn timestamp_micros(&self, name: &str) -> Option<i64>;
}

/// Decode one row. Never fails: see the module docs.
pub fn decode_row<R: FieldAccess + ?Sized>(row: &R, limits: &SchemaLimits) -> Record {
    let int = |name| row.int(name).unwrap_or(0);
    // Float sources for integer columns are truncated; `as` saturates and maps NaN to 0.
    #[allow(clippy::cast_possible_truncation)]
    let float_as_int = |name| row.float(name).map_or(0, |v| v as i64);
    let money = |name| clamp_decimal(row.float(name).unwrap_or(0.0), limits.money_max);

    Record {
        vendor_id: clamp_tinyint(int(VENDOR_ID)),
        pickup_datetime: row.timestamp_micros(PICKUP).and_then(micros_to_datetime),
        dropoff_datetime: row.timestamp_micros(DROPOFF).and_then(micros_to_datetime),
        passenger_count: clamp_tinyint(float_as_int(PASSENGER_COUNT)),
        trip_distance: clamp_decimal(
            row.float(TRIP_DISTANCE).unwrap_or(0.0),
            limits.trip_distance_max,
        ),
        rate_code_id: clamp_tinyint(float_as_int(RATE_CODE_ID)),
        store_and_fwd_flag: normalize_flag(row.text(STORE_AND_FWD_FLAG)),
        pu_location_id: clamp_smallint(int(PU_LOCATION_ID)),
        do_location_id: clamp_smallint(int(DO_LOCATION_ID)),
        payment_type: clamp_tinyint(int(PAYMENT_TYPE)),
        fare_amount: clamp_decimal(
            row.float(FARE_AMOUNT).unwrap_or(0.0),
            limits.fare_amount_max,
        ),
        extra: money(EXTRA),
        mta_tax: money(MTA_TAX),
        tip_amount: money(TIP_AMOUNT),
        tolls_amount: money(TOLLS_AMOUNT),
        improvement_surcharge: money(IMPROVEMENT_SURCHARGE),
        total_amount: money(TOTAL_AMOUNT),
        congestion_surcharge: money(CONGESTION_SURCHARGE),
    }
}

/// Options for one decode pass.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// Stop after this many records; `0` means read everything.
    pub limit: usize,
    /// Log progress every this many rows; `0` disables it.
    pub progress_interval: usize,
    /// Rows per Arrow record batch pulled from the reader.
    pub read_batch_size: usize,
    pub limits: SchemaLimits,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            progress_interval: 100_000,
            read_batch_size: 64 * 1024,
            limits: SchemaLimits::default(),
        }
    }
}

impl DecodeOptions {
    #[must_use]
    pub fn from_config(cfg: &LoaderConfig) -> Self {
        Self {
            limit: cfg.load.record_limit,
            progress_interval: cfg.load.progress_interval,
            limits: cfg.limits,
            ..Self::default()
        }
    }
}

/// Accumulates decoded records, enforcing the limit and logging progress.
struct Collector {
    out: Vec<Record>,
    opts: DecodeOptions,
}

impl Collector {
    fn new(opts: DecodeOptions) -> Self {
        Self {
            out: Vec::new(),
            opts,
        }
    }

    /// Push one row; returns `false` once the limit has been reached.
    fn push<R: FieldAccess + ?Sized>(&mut self, row: &R) -> bool {
        self.out.push(decode_row(row, &self.opts.limits));
        let n = self.out.len();
        if self.opts.progress_interval > 0 && n % self.opts.progress_interval == 0 {
            tracing::info!(rows = n, "decoding...");
        }
        if self.opts.limit > 0 && n >= self.opts.limit {
            tracing::info!(limit = self.opts.limit, "reached record limit");
            return false;
        }
        true
    }
}

/// Decode an in-memory row source.
pub fn decode_rows<I, R>(rows: I, opts: DecodeOptions) -> Vec<Record>
where
    I: IntoIterator<Item = R>,
    R: FieldAccess,
{
    let mut collector = Collector::new(opts);
    for row in rows {
        if !collector.push(&row) {
            break;
        }
    }
    collector.out
}

/// Decode a Parquet file into clamped records.
///
/// # Errors
///
/// Returns [`LoadError::Decode`](crate::error::LoadError::Decode) if the file
/// cannot be opened, is not Parquet, or a record batch cannot be read.
/// Row-level problems are never errors.
pub fn decode_file(path: impl AsRef<Path>, opts: DecodeOptions) -> Result<Vec<Record>> {
    let path = path.as_ref();
    tracing::info!(file = %path.display(), "reading parquet file");
    let started = Instant::now();

    let mut reader = ParquetRowReader::open(path, opts.read_batch_size, opts.limit)?;
    let mut collector = Collector::new(opts);
    'batches: while let Some(batch) = reader.next_batch()? {
        for row in batch.rows() {
            if !collector.push(&row) {
                break 'batches;
            }
        }
    }

    let elapsed = started.elapsed();
    let n = collector.out.len();
    if elapsed.is_zero() {
        tracing::info!(rows = n, "read complete");
    } else {
        #[allow(clippy::cast_precision_loss)]
        let rate = n as f64 / elapsed.as_secs_f64();
        tracing::info!(rows = n, elapsed_ms = elapsed.as_millis(), rate = format!("{rate:.2}"), "read complete");
    }
    Ok(collector.out)
}
