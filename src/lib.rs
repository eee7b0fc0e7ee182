//! # bulkload
//!
//! A **concurrent, partitioned bulk loader** for trip records stored as Parquet.
//! Each file is decoded into validated in-memory records, split into contiguous
//! chunks, and written by a bounded pool of workers, each through its own
//! batched, transactional writer session. Per-worker outcomes are aggregated
//! into load statistics, and one worker's failure never stops its siblings.
//!
//! ## Key Features
//!
//! - **Clamping decoder** - every value fits its destination column; corrupt
//!   rows decode to defaults instead of aborting the file
//! - **Static partitioning** - `ceil(n / w)` contiguous chunks, one per worker
//! - **Uniform writer sessions** - buffered batches, commit or rollback per
//!   batch, release exactly once on every exit path
//! - **Failure isolation** - worker failures are recorded, not propagated;
//!   failing files are skipped and reported
//! - **Backends** - PostgreSQL and JSON lines (optional via feature flags) and
//!   an in-memory store with failure injection
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulkload::{LoaderConfig, Loader};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let config = LoaderConfig::from_xml_file("loader.xml")?;
//! let loader = Loader::from_config(config)?;
//!
//! let run = loader.run_dir(loader.config().source_dir.clone())?;
//! run.print();
//! run.save_to_file("run-report.json")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - XML configuration, defaults and validation
//! - [`decode`] - the [`FieldAccess`] seam and the clamping row decoder
//! - [`io`] - Parquet reading, schema inspection and input discovery
//! - [`partition`] - chunking of the record sequence
//! - [`writer`] - the [`Backend`] trait, [`WriterSession`] and the backends
//! - [`orchestrator`] - the [`Loader`]: worker pool, cancellation, run driver
//! - [`stats`] - worker results, load and run reports
//! - [`progress`] - live per-worker counters
//! - [`testing`] - Parquet fixtures for tests

pub mod config;
pub mod decode;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod partition;
pub mod progress;
pub mod record;
pub mod retry;
pub mod stats;
pub mod testing;
pub mod writer;

pub use config::{BackendKind, LoadOptions, LoaderConfig, SchemaLimits};
pub use decode::{DecodeOptions, FieldAccess, decode_file, decode_row};
pub use error::{LoadError, Result, WorkerFailure};
pub use orchestrator::{CancelToken, LoadState, Loader};
pub use partition::{Chunk, WorkerId, partition};
pub use progress::{ProgressBoard, ProgressSnapshot};
pub use record::Record;
pub use stats::{
    FileOutcome, FileStatus, LoadReport, LoadStatus, RunReport, TripSummary, WorkerResult,
    aggregate,
};
pub use writer::memory::MemoryStore;
pub use writer::{Backend, Connector, SessionOptions, SessionStats, WriterSession};

#[cfg(feature = "jsonl")]
pub use writer::jsonl::JsonlConnector;
#[cfg(feature = "postgres")]
pub use writer::postgres::PostgresConnector;
