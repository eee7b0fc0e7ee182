//! Input side of the loader.
//!
//! - [`scan`] finds the Parquet files to load.
//! - [`parquet`] reads them batch by batch and exposes rows to the decoder.

pub mod parquet;
pub mod scan;

pub use parquet::{ColumnSummary, SchemaSummary, inspect_schema};
pub use scan::{display_name, scan_parquet_files};
