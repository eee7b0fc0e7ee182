//! The canonical decoded trip record and the clamping rules that produce it.
//!
//! Every value in a [`Record`] already fits its destination column: narrow
//! integers are stored in `u8`/`u16`, decimals are non-negative, bounded and
//! rounded to cents, and the flag is a single `char`.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Upper bound of a `TINYINT` column.
pub const TINYINT_MAX: i64 = u8::MAX as i64;
/// Upper bound of a `SMALLINT` column.
pub const SMALLINT_MAX: i64 = u16::MAX as i64;
/// Flag written when the source value is missing or empty.
pub const DEFAULT_FLAG: char = 'N';

/// Column order used by every backend.
pub const COLUMNS: [&str; 18] = [
    "pickup_datetime",
    "vendor_id",
    "dropoff_datetime",
    "passenger_count",
    "trip_distance",
    "rate_code_id",
    "store_and_fwd_flag",
    "pu_location_id",
    "do_location_id",
    "payment_type",
    "fare_amount",
    "extra",
    "mta_tax",
    "tip_amount",
    "tolls_amount",
    "improvement_surcharge",
    "total_amount",
    "congestion_surcharge",
];

/// One decoded trip, valid for the destination schema.
///
/// Built by the decoder and never mutated afterwards; workers receive records
/// by value in disjoint chunks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub vendor_id: u8,
    pub pickup_datetime: Option<NaiveDateTime>,
    pub dropoff_datetime: Option<NaiveDateTime>,
    pub passenger_count: u8,
    pub trip_distance: f64,
    pub rate_code_id: u8,
    pub store_and_fwd_flag: char,
    pub pu_location_id: u16,
    pub do_location_id: u16,
    pub payment_type: u8,
    pub fare_amount: f64,
    pub extra: f64,
    pub mta_tax: f64,
    pub tip_amount: f64,
    pub tolls_amount: f64,
    pub improvement_surcharge: f64,
    pub total_amount: f64,
    pub congestion_surcharge: f64,
}

impl Default for Record {
    /// The record a completely unreadable row decodes to.
    fn default() -> Self {
        Self {
            vendor_id: 0,
            pickup_datetime: None,
            dropoff_datetime: None,
            passenger_count: 0,
            trip_distance: 0.0,
            rate_code_id: 0,
            store_and_fwd_flag: DEFAULT_FLAG,
            pu_location_id: 0,
            do_location_id: 0,
            payment_type: 0,
            fare_amount: 0.0,
            extra: 0.0,
            mta_tax: 0.0,
            tip_amount: 0.0,
            tolls_amount: 0.0,
            improvement_surcharge: 0.0,
            total_amount: 0.0,
            congestion_surcharge: 0.0,
        }
    }
}

impl Record {
    /// Synthetic record used to probe a backend before real work starts.
    #[must_use]
    pub fn probe() -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            vendor_id: 1,
            pickup_datetime: Some(now),
            dropoff_datetime: Some(now),
            passenger_count: 1,
            trip_distance: 1.5,
            rate_code_id: 1,
            store_and_fwd_flag: DEFAULT_FLAG,
            pu_location_id: 100,
            do_location_id: 200,
            payment_type: 1,
            fare_amount: 10.0,
            extra: 0.5,
            mta_tax: 0.5,
            tip_amount: 2.0,
            tolls_amount: 0.0,
            improvement_surcharge: 0.3,
            total_amount: 13.3,
            congestion_surcharge: 0.0,
        }
    }
}

/// Clamp into `[0, 255]`.
#[must_use]
pub fn clamp_tinyint(value: i64) -> u8 {
    // The clamp guarantees the conversion cannot fail.
    u8::try_from(value.clamp(0, TINYINT_MAX)).unwrap_or(u8::MAX)
}

/// Clamp into `[0, 65535]`.
#[must_use]
pub fn clamp_smallint(value: i64) -> u16 {
    u16::try_from(value.clamp(0, SMALLINT_MAX)).unwrap_or(u16::MAX)
}

/// Clamp a decimal into `[0, max]` and round to two fractional digits.
///
/// NaN and infinities become `0.0`. A `max` with fractional cents is rounded
/// down to whole cents first, so the result never exceeds it.
#[must_use]
pub fn clamp_decimal(value: f64, max: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        return 0.0;
    }
    (value * 100.0).round().min(cents_cap(max)) / 100.0
}

/// `max` in whole cents, rounded down unless the difference is float noise.
fn cents_cap(max: f64) -> f64 {
    let scaled = max * 100.0;
    let nearest = scaled.round();
    if (scaled - nearest).abs() <= scaled.abs() * 1e-15 + 1e-9 {
        nearest
    } else {
        scaled.floor()
    }
}

/// Whether `max` has at most two fractional digits.
#[must_use]
pub fn is_whole_cents(max: f64) -> bool {
    max.is_finite() && cents_cap(max) == (max * 100.0).round()
}

/// First character of `raw`, or [`DEFAULT_FLAG`] when absent or empty.
#[must_use]
pub fn normalize_flag(raw: Option<&str>) -> char {
    raw.and_then(|s| s.chars().next()).unwrap_or(DEFAULT_FLAG)
}

/// Convert epoch microseconds to a UTC wall-clock timestamp.
#[must_use]
pub fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}
