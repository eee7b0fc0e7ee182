//! The load orchestrator.
//!
//! A load takes one file (or an in-memory record vector) through
//!
//! ```text
//! Idle -> Scanning -> Dispatching -> Awaiting -> Aggregated -> Done
//!                                                           -> PartiallyFailed
//!                                                           -> FatalFailed
//! ```
//!
//! Scanning decodes the input. Dispatching partitions it and hands each chunk,
//! by value, to a worker on a bounded Rayon pool; each worker opens its own
//! [`WriterSession`]. Awaiting collects exactly one [`WorkerResult`] per worker
//! from a channel. A failing worker never stops its siblings: its failure is
//! recorded in its result and the load continues.
//!
//! With a load timeout, a shared cancel flag is raised when the deadline passes.
//! Workers check it between batches. The orchestrator then waits up to the
//! shutdown grace period; workers that still have not reported are recorded as
//! [`WorkerFailure::TimedOut`] with the count they had committed by then. From
//! that point on their sessions roll back instead of committing, so nothing
//! lands in the backend that the report does not count. A commit already in
//! flight when the grace period ends can still complete.

use crate::config::LoaderConfig;
use crate::decode::{DecodeOptions, decode_file};
use crate::error::{LoadError, Result, WorkerFailure};
use crate::io::scan::{display_name, scan_parquet_files};
use crate::partition::{Chunk, WorkerId, partition, split_into_chunks};
use crate::progress::ProgressBoard;
use crate::record::Record;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::stats::{
    FileOutcome, FileStatus, LoadReport, LoadStatus, RunReport, TripSummary, WorkerResult, aggregate,
};
use crate::writer::{Connector, SessionOptions, WriterSession, connector_for};
use crossbeam_channel::RecvTimeoutError;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle of a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Scanning,
    Dispatching,
    Awaiting,
    Aggregated,
    Done,
    PartiallyFailed,
    FatalFailed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<LoadStatus> for LoadState {
    fn from(status: LoadStatus) -> Self {
        match status {
            LoadStatus::Done => Self::Done,
            LoadStatus::PartiallyFailed => Self::PartiallyFailed,
            LoadStatus::FatalFailed => Self::FatalFailed,
        }
    }
}

struct StateTracker<'a> {
    source: &'a str,
    state: LoadState,
}

impl<'a> StateTracker<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            state: LoadState::Idle,
        }
    }

    fn advance(&mut self, next: LoadState) {
        tracing::debug!(source = self.source, from = %self.state, to = %next, "load state");
        self.state = next;
    }
}

/// Cooperative cancellation shared by the workers of one load.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    abandoned: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    #[must_use]
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            abandoned: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancelled or past the deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Give up on the workers that have not reported. Implies [`cancel`](Self::cancel).
    pub fn abandon(&self) {
        self.cancel();
        self.abandoned.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Everything a worker needs besides its chunk.
#[derive(Clone)]
struct WorkerContext {
    connector: Arc<dyn Connector>,
    session: SessionOptions,
    retry: RetryPolicy,
    board: Arc<ProgressBoard>,
    cancel: CancelToken,
}

/// Drives loads against one backend.
pub struct Loader {
    config: LoaderConfig,
    connector: Arc<dyn Connector>,
    progress: Mutex<Option<Arc<ProgressBoard>>>,
}

impl Loader {
    #[must_use]
    pub fn new(config: LoaderConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            progress: Mutex::new(None),
        }
    }

    /// Validate `config` and connect to the backend it selects.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Config`] if validation fails or the backend is
    /// unavailable in this build.
    pub fn from_config(config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        let connector = connector_for(&config)?;
        Ok(Self::new(config, connector))
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Progress board of the current (or most recent) load.
    ///
    /// # Panics
    ///
    /// Panics if the progress mutex is poisoned.
    #[must_use]
    pub fn progress(&self) -> Option<Arc<ProgressBoard>> {
        self.progress
            .lock()
            .expect("progress mutex poisoned")
            .clone()
    }

    /// Open one session, probe the backend, and close it again.
    ///
    /// # Errors
    ///
    /// Returns the connection or probe error.
    pub fn check_connection(&self) -> Result<()> {
        tracing::info!(backend = self.connector.name(), "testing backend connection");
        let mut session = WriterSession::open(
            &*self.connector,
            WorkerId(0),
            SessionOptions::from(&self.config.load),
        )?;
        session.test_insert()?;
        session.close()
    }

    /// Decode `path` and load its records.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Decode`] or [`LoadError::EmptyInput`]; worker
    /// failures are reported in the [`LoadReport`] instead.
    ///
    /// # Panics
    ///
    /// Panics if the progress mutex is poisoned.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let path = path.as_ref();
        let source = path.display().to_string();
        self.load_path(path, &source)
    }

    fn load_path(&self, path: &Path, source: &str) -> Result<LoadReport> {
        let mut tracker = StateTracker::new(source);
        tracker.advance(LoadState::Scanning);
        let records = decode_file(path, DecodeOptions::from_config(&self.config))?;
        self.dispatch(records, &mut tracker)
    }

    /// Load already-decoded records.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::EmptyInput`] if `records` is empty.
    pub fn load_records(&self, records: Vec<Record>, source: &str) -> Result<LoadReport> {
        let mut tracker = StateTracker::new(source);
        tracker.advance(LoadState::Scanning);
        self.dispatch(records, &mut tracker)
    }

    fn dispatch(&self, records: Vec<Record>, tracker: &mut StateTracker<'_>) -> Result<LoadReport> {
        if records.is_empty() {
            return Err(LoadError::EmptyInput(tracker.source.to_string()));
        }
        tracker.advance(LoadState::Dispatching);

        let load = &self.config.load;
        let workers = load.workers.max(1);
        let n = records.len();
        let trips = TripSummary::from_records(&records);
        let chunks = partition(n, workers);
        tracing::info!(
            source = tracker.source,
            records = n,
            workers = chunks.len(),
            chunk_size = chunks.first().map_or(0, Chunk::len),
            batch_size = load.batch_size,
            "dispatching load"
        );

        let board = Arc::new(ProgressBoard::new(chunks.len()));
        *self.progress.lock().expect("progress mutex poisoned") = Some(Arc::clone(&board));

        let cancel = CancelToken::new(load.load_timeout().map(|t| Instant::now() + t));
        let ctx = WorkerContext {
            connector: Arc::clone(&self.connector),
            session: SessionOptions::from(load),
            retry: load.retry_policy(),
            board,
            cancel,
        };
        let parts = split_into_chunks(records, &chunks);

        let results = if workers == 1 {
            tracker.advance(LoadState::Awaiting);
            chunks
                .iter()
                .zip(parts)
                .map(|(chunk, part)| guarded_worker(&ctx, *chunk, part))
                .collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("bulkload-worker-{}", i + 1))
                .build()
                .map_err(|e| LoadError::Config(format!("cannot build worker pool: {e}")))?;
            let (tx, rx) = crossbeam_channel::bounded(chunks.len());
            for (chunk, part) in chunks.iter().copied().zip(parts) {
                let tx = tx.clone();
                let ctx = ctx.clone();
                pool.spawn(move || {
                    // The receiver is gone only if the orchestrator gave up on us.
                    let _ = tx.send(guarded_worker(&ctx, chunk, part));
                });
            }
            drop(tx);
            tracker.advance(LoadState::Awaiting);
            await_results(&rx, &chunks, &ctx, load.shutdown_grace())
        };

        tracker.advance(LoadState::Aggregated);
        let report = aggregate(results).with_input(tracker.source, n as u64, trips);
        tracker.advance(report.status.into());
        for failed in report.failed_workers() {
            if let Some(failure) = &failed.failure {
                tracing::warn!(
                    worker = %failed.worker,
                    inserted = failed.inserted,
                    error = %failure,
                    "worker did not complete its chunk"
                );
            }
        }
        tracing::info!(
            source = tracker.source,
            status = report.status.as_str(),
            inserted = report.total_inserted,
            wall_ms = report.wall_time.as_millis(),
            "load finished"
        );
        Ok(report)
    }

    /// Check the connection, then load every file in order.
    ///
    /// A file that fails to decode or load is recorded and skipped.
    ///
    /// # Errors
    ///
    /// Returns the connection error if the initial probe fails.
    pub fn run(&self, files: &[PathBuf]) -> Result<RunReport> {
        self.run_files(files, None)
    }

    /// Scan `dir` recursively for Parquet files and [`run`](Self::run) them.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be scanned or the connection check fails.
    pub fn run_dir(&self, dir: impl AsRef<Path>) -> Result<RunReport> {
        let dir = dir.as_ref();
        let files = scan_parquet_files(dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "scanned source directory");
        self.run_files(&files, Some(dir))
    }

    fn run_files(&self, files: &[PathBuf], root: Option<&Path>) -> Result<RunReport> {
        let started = Instant::now();
        self.check_connection()?;

        let mut report = RunReport::default();
        if files.is_empty() {
            tracing::warn!("no parquet files to load");
        }
        for (i, path) in files.iter().enumerate() {
            let name = root.map_or_else(|| path.display().to_string(), |r| display_name(r, path));
            tracing::info!(file = %name, "[{}/{}] loading", i + 1, files.len());
            let outcome = match self.load_path(path, &name) {
                Ok(load) => {
                    load.print();
                    let error = load
                        .failed_workers()
                        .find_map(WorkerResult::error)
                        .map(|e| e.to_string());
                    FileOutcome {
                        file: name,
                        status: load.status.into(),
                        report: Some(load),
                        error,
                    }
                }
                Err(e) => {
                    tracing::error!(file = %name, error = %e, "file skipped");
                    FileOutcome {
                        file: name,
                        status: FileStatus::Failed,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.files.push(outcome);
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }
}

/// Collect one result per chunk, applying the deadline and grace period.
fn await_results(
    rx: &crossbeam_channel::Receiver<WorkerResult>,
    chunks: &[Chunk],
    ctx: &WorkerContext,
    grace: Duration,
) -> Vec<WorkerResult> {
    let cancel = &ctx.cancel;
    let started = Instant::now();
    let mut slots: Vec<Option<WorkerResult>> = vec![None; chunks.len()];
    let mut received = 0;
    let mut grace_deadline: Option<Instant> = None;
    let mut disconnected = false;

    while received < chunks.len() {
        let next = match grace_deadline.or(cancel.deadline()) {
            Some(until) => rx.recv_deadline(until),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(result) => {
                let idx = result.worker.0;
                if let Some(slot) = slots.get_mut(idx) {
                    if slot.replace(result).is_none() {
                        received += 1;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) if grace_deadline.is_none() => {
                tracing::warn!(
                    pending = chunks.len() - received,
                    "load timeout reached, cancelling workers"
                );
                cancel.cancel();
                grace_deadline = Some(Instant::now() + grace);
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    pending = chunks.len() - received,
                    "shutdown grace period elapsed, abandoning workers"
                );
                cancel.abandon();
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                disconnected = true;
                break;
            }
        }
    }

    let elapsed = started.elapsed();
    slots
        .into_iter()
        .zip(chunks)
        .map(|(slot, chunk)| {
            slot.unwrap_or_else(|| {
                let failure = if disconnected {
                    WorkerFailure::Panicked("worker exited without reporting".into())
                } else {
                    WorkerFailure::TimedOut
                };
                let inserted = ctx.board.inserted(chunk.worker);
                WorkerResult::failed(chunk.worker, inserted, elapsed, failure)
            })
        })
        .collect()
}

fn guarded_worker(ctx: &WorkerContext, chunk: Chunk, records: Vec<Record>) -> WorkerResult {
    let started = Instant::now();
    catch_unwind(AssertUnwindSafe(|| run_worker(ctx, chunk, records))).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(worker = %chunk.worker, panic = %message, "worker panicked");
        WorkerResult::failed(
            chunk.worker,
            ctx.board.inserted(chunk.worker),
            started.elapsed(),
            WorkerFailure::Panicked(message),
        )
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Stream one chunk through one session.
fn run_worker(ctx: &WorkerContext, chunk: Chunk, records: Vec<Record>) -> WorkerResult {
    let started = Instant::now();
    let worker = chunk.worker;
    tracing::info!(worker = %worker, start = chunk.start, end = chunk.end, "worker started");

    let mut session = match WriterSession::open(&*ctx.connector, worker, ctx.session) {
        Ok(s) => s
            .with_progress(Arc::clone(&ctx.board))
            .with_abandon_flag(Arc::clone(&ctx.cancel.abandoned)),
        Err(e) => {
            tracing::error!(worker = %worker, error = %e, "cannot open session");
            return WorkerResult::failed(worker, 0, started.elapsed(), e.into());
        }
    };

    let mut failure: Option<WorkerFailure> = None;
    for batch in records.chunks(ctx.session.batch_size) {
        if ctx.cancel.is_cancelled() {
            failure = Some(WorkerFailure::Cancelled);
            break;
        }
        let sent = retry_with_backoff(&ctx.retry, |attempt| {
            if attempt > 1 {
                tracing::info!(worker = %worker, attempt, rows = batch.len(), "resending batch");
            }
            session.add_records(batch.iter().copied())?;
            session.flush()
        });
        if let Err(e) = sent {
            failure = Some(e.into());
            break;
        }
    }

    let inserted = session.total_inserted();
    let stats = session.performance_stats();
    if let Err(e) = session.close() {
        tracing::warn!(worker = %worker, error = %e, "session close failed");
        if failure.is_none() {
            failure = Some(e.into());
        }
    }

    let elapsed = started.elapsed();
    match failure {
        None => {
            tracing::info!(worker = %worker, %stats, "worker finished");
            WorkerResult::succeeded(worker, inserted, elapsed)
        }
        Some(f) => WorkerResult::failed(worker, inserted, elapsed, f),
    }
}
