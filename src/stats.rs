//! Per-worker results and their aggregation into load and run reports.
//!
//! Reports render to JSON with `serde_json::json!` and print a fixed-layout
//! text summary. Throughput is `None` whenever the elapsed time is zero.

use crate::error::{LoadError, Result, WorkerFailure};
use crate::partition::WorkerId;
use crate::record::Record;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[allow(clippy::cast_precision_loss)]
fn per_second(count: u64, elapsed: Duration) -> Option<f64> {
    (!elapsed.is_zero()).then(|| count as f64 / elapsed.as_secs_f64())
}

fn fmt_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |r| format!("{r:.2} records/sec"))
}

/// What one worker achieved.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResult {
    pub worker: WorkerId,
    /// Records committed; partial counts survive a failure.
    pub inserted: u64,
    pub elapsed: Duration,
    pub failure: Option<WorkerFailure>,
}

impl WorkerResult {
    #[must_use]
    pub fn succeeded(worker: WorkerId, inserted: u64, elapsed: Duration) -> Self {
        Self {
            worker,
            inserted,
            elapsed,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(
        worker: WorkerId,
        inserted: u64,
        elapsed: Duration,
        failure: WorkerFailure,
    ) -> Self {
        Self {
            worker,
            inserted,
            elapsed,
            failure: Some(failure),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The failure as a [`LoadError::Worker`], if there was one.
    #[must_use]
    pub fn error(&self) -> Option<LoadError> {
        self.failure.clone().map(|failure| LoadError::Worker {
            worker: self.worker,
            failure,
        })
    }

    /// Records per second; `None` when `elapsed` is zero.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        per_second(self.inserted, self.elapsed)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "worker": self.worker.to_string(),
            "inserted": self.inserted,
            "elapsed_ms": self.elapsed.as_millis(),
            "rate": self.rate(),
            "failure": self.failure,
        })
    }
}

/// Outcome class of one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Every worker completed its chunk.
    Done,
    /// At least one worker succeeded and at least one failed.
    PartiallyFailed,
    /// Every worker failed.
    FatalFailed,
}

impl LoadStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::PartiallyFailed => "partially_failed",
            Self::FatalFailed => "fatal_failed",
        }
    }
}

/// Content statistics of a decoded file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TripSummary {
    pub trips: u64,
    /// Sum of `total_amount`, the fare as charged including surcharges and tips.
    pub total_fare: f64,
    pub total_distance: f64,
    pub total_passengers: u64,
}

impl TripSummary {
    #[must_use]
    pub fn from_records(records: &[Record]) -> Self {
        records.iter().fold(Self::default(), |mut s, r| {
            s.trips += 1;
            s.total_fare += r.total_amount;
            s.total_distance += r.trip_distance;
            s.total_passengers += u64::from(r.passenger_count);
            s
        })
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_fare(&self) -> Option<f64> {
        (self.trips > 0).then(|| self.total_fare / self.trips as f64)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_distance(&self) -> Option<f64> {
        (self.trips > 0).then(|| self.total_distance / self.trips as f64)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "trips": self.trips,
            "total_fare": self.total_fare,
            "average_fare": self.average_fare(),
            "total_distance": self.total_distance,
            "average_distance": self.average_distance(),
            "total_passengers": self.total_passengers,
        })
    }
}

/// Load-wide statistics for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    /// Display name of the source.
    pub source: String,
    /// Records decoded and handed to the workers.
    pub records: u64,
    pub total_inserted: u64,
    /// Slowest worker's elapsed time.
    pub wall_time: Duration,
    /// Ordered by worker index.
    pub workers: Vec<WorkerResult>,
    /// Mean of the defined per-worker rates.
    pub average_rate: Option<f64>,
    /// `total_inserted / wall_time`.
    pub overall_rate: Option<f64>,
    pub status: LoadStatus,
    pub trips: TripSummary,
}

/// Combine per-worker results.
///
/// The status is [`LoadStatus::Done`] for an empty result set.
#[must_use]
pub fn aggregate(mut results: Vec<WorkerResult>) -> LoadReport {
    results.sort_by_key(|r| r.worker);
    let total_inserted = results.iter().map(|r| r.inserted).sum();
    let wall_time = results
        .iter()
        .map(|r| r.elapsed)
        .max()
        .unwrap_or(Duration::ZERO);

    let rates: Vec<f64> = results.iter().filter_map(WorkerResult::rate).collect();
    #[allow(clippy::cast_precision_loss)]
    let average_rate = (!rates.is_empty()).then(|| rates.iter().sum::<f64>() / rates.len() as f64);

    let ok = results.iter().filter(|r| r.is_success()).count();
    let status = if ok == results.len() {
        LoadStatus::Done
    } else if ok > 0 {
        LoadStatus::PartiallyFailed
    } else {
        LoadStatus::FatalFailed
    };

    LoadReport {
        source: String::new(),
        records: total_inserted,
        total_inserted,
        wall_time,
        workers: results,
        average_rate,
        overall_rate: per_second(total_inserted, wall_time),
        status,
        trips: TripSummary::default(),
    }
}

impl LoadReport {
    /// Attach what was fed into the load.
    #[must_use]
    pub fn with_input(mut self, source: impl Into<String>, records: u64, trips: TripSummary) -> Self {
        self.source = source.into();
        self.records = records;
        self.trips = trips;
        self
    }

    pub fn failed_workers(&self) -> impl Iterator<Item = &WorkerResult> {
        self.workers.iter().filter(|r| !r.is_success())
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "source": self.source,
            "status": self.status.as_str(),
            "records": self.records,
            "total_inserted": self.total_inserted,
            "wall_time_ms": self.wall_time.as_millis(),
            "average_rate": self.average_rate,
            "overall_rate": self.overall_rate,
            "workers": self.workers.iter().map(WorkerResult::to_json).collect::<Vec<_>>(),
            "trips": self.trips.to_json(),
        })
    }

    /// Print the per-worker performance summary to stdout.
    pub fn print(&self) {
        println!("\n========== Load Report: {} ==========", self.source);
        println!("Status: {}", self.status.as_str());
        for w in &self.workers {
            let outcome = w
                .failure
                .as_ref()
                .map_or_else(|| "ok".to_string(), ToString::to_string);
            println!(
                "  {:<8} {:>10} records  {:>8.3}s  {:>24}  {}",
                w.worker.to_string(),
                w.inserted,
                w.elapsed.as_secs_f64(),
                fmt_rate(w.rate()),
                outcome
            );
        }
        println!("--------------------------------------");
        println!("Records decoded:     {}", self.records);
        println!("Records inserted:    {}", self.total_inserted);
        println!("Wall time:           {:.3}s", self.wall_time.as_secs_f64());
        println!("Average worker rate: {}", fmt_rate(self.average_rate));
        println!("Overall throughput:  {}", fmt_rate(self.overall_rate));
        if self.trips.trips > 0 {
            println!("Total fare:          {:.2}", self.trips.total_fare);
            if let Some(avg) = self.trips.average_fare() {
                println!("Average fare:        {avg:.2}");
            }
            println!("Total distance:      {:.2}", self.trips.total_distance);
            if let Some(avg) = self.trips.average_distance() {
                println!("Average distance:    {avg:.2}");
            }
            println!("Total passengers:    {}", self.trips.total_passengers);
        }
        println!("======================================\n");
    }
}

/// How much of one file made it into the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Loaded,
    Partial,
    Failed,
}

impl FileStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl From<LoadStatus> for FileStatus {
    fn from(status: LoadStatus) -> Self {
        match status {
            LoadStatus::Done => Self::Loaded,
            LoadStatus::PartiallyFailed => Self::Partial,
            LoadStatus::FatalFailed => Self::Failed,
        }
    }
}

/// Result of loading one file within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub file: String,
    pub status: FileStatus,
    /// Present whenever the file got as far as dispatching workers.
    pub report: Option<LoadReport>,
    /// Why the file was not fully loaded: the file-level error, or the first
    /// failed worker.
    pub error: Option<String>,
}

impl FileOutcome {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "file": self.file,
            "status": self.status.as_str(),
            "error": self.error,
            "report": self.report.as_ref().map(LoadReport::to_json),
        })
    }
}

/// Result of a multi-file run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub files: Vec<FileOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    #[must_use]
    pub fn total_inserted(&self) -> u64 {
        self.files
            .iter()
            .filter_map(|f| f.report.as_ref())
            .map(|r| r.total_inserted)
            .sum()
    }

    pub fn with_status(&self, status: FileStatus) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(move |f| f.status == status)
    }

    /// True when every file loaded completely.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Loaded)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "files": self.files.iter().map(FileOutcome::to_json).collect::<Vec<_>>(),
            "loaded": self.with_status(FileStatus::Loaded).count(),
            "partial": self.with_status(FileStatus::Partial).count(),
            "failed": self.with_status(FileStatus::Failed).count(),
            "total_inserted": self.total_inserted(),
            "elapsed_ms": self.elapsed.as_millis(),
            "overall_rate": per_second(self.total_inserted(), self.elapsed),
        })
    }

    pub fn print(&self) {
        println!("\n========== Run Summary ==========");
        println!("Files:          {}", self.files.len());
        for status in [FileStatus::Loaded, FileStatus::Partial, FileStatus::Failed] {
            println!("  {:<12} {}", status.as_str(), self.with_status(status).count());
        }
        for f in self.files.iter().filter(|f| f.status != FileStatus::Loaded) {
            let why = f.error.as_deref().unwrap_or("some workers failed");
            println!("  - {} [{}]: {why}", f.file, f.status.as_str());
        }
        println!("Total inserted: {}", self.total_inserted());
        println!("Elapsed:        {:.3}s", self.elapsed.as_secs_f64());
        println!(
            "Throughput:     {}",
            fmt_rate(per_second(self.total_inserted(), self.elapsed))
        );
        println!("=================================\n");
    }

    /// Write the JSON form of this report to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`](crate::error::LoadError::Io) if the file
    /// cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json()).map_err(std::io::Error::from)?;
        let mut file = File::create(path)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(i: usize, n: u64, ms: u64) -> WorkerResult {
        WorkerResult::succeeded(WorkerId(i), n, Duration::from_millis(ms))
    }

    #[test]
    fn zero_elapsed_has_no_rate() {
        assert_eq!(ok(0, 100, 0).rate(), None);
        assert_eq!(ok(0, 100, 500).rate(), Some(200.0));
    }

    #[test]
    fn aggregate_sums_and_takes_max_wall_time() {
        let report = aggregate(vec![ok(1, 300, 3_000), ok(0, 100, 1_000)]);
        assert_eq!(report.total_inserted, 400);
        assert_eq!(report.wall_time, Duration::from_secs(3));
        assert_eq!(report.workers[0].worker, WorkerId(0));
        assert_eq!(report.average_rate, Some(100.0));
        let overall = report.overall_rate.unwrap();
        assert!((overall - 133.333).abs() < 0.01);
        assert_eq!(report.status, LoadStatus::Done);
    }

    #[test]
    fn average_rate_skips_undefined_rates() {
        let report = aggregate(vec![ok(0, 100, 0), ok(1, 50, 1_000)]);
        assert_eq!(report.average_rate, Some(50.0));
        let report = aggregate(vec![ok(0, 0, 0)]);
        assert_eq!(report.average_rate, None);
        assert_eq!(report.overall_rate, None);
    }

    #[test]
    fn status_reflects_failures() {
        let failed = |i| {
            WorkerResult::failed(
                WorkerId(i),
                0,
                Duration::ZERO,
                WorkerFailure::Connection("refused".into()),
            )
        };
        assert_eq!(
            aggregate(vec![ok(0, 1, 1), failed(1)]).status,
            LoadStatus::PartiallyFailed
        );
        assert_eq!(aggregate(vec![failed(0), failed(1)]).status, LoadStatus::FatalFailed);
        assert_eq!(aggregate(Vec::new()).status, LoadStatus::Done);
    }

    #[test]
    fn trip_summary() {
        let mut a = Record::default();
        a.fare_amount = 10.0;
        a.total_amount = 13.5;
        a.trip_distance = 2.0;
        a.passenger_count = 2;
        let mut b = a;
        b.fare_amount = 20.0;
        b.total_amount = 24.5;
        let s = TripSummary::from_records(&[a, b]);
        assert_eq!(s.trips, 2);
        assert_eq!(s.total_passengers, 4);
        assert_eq!(s.total_fare, 38.0);
        assert_eq!(s.average_fare(), Some(19.0));
        assert_eq!(s.average_distance(), Some(2.0));
        assert_eq!(TripSummary::default().average_fare(), None);
    }

    #[test]
    fn json_shape() {
        let report = aggregate(vec![ok(0, 10, 0)]).with_input("a.parquet", 10, TripSummary::default());
        let v = report.to_json();
        assert_eq!(v["source"], "a.parquet");
        assert_eq!(v["status"], "done");
        assert!(v["overall_rate"].is_null());
        assert_eq!(v["workers"][0]["worker"], "Task-1");
    }
}
