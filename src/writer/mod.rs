//! Writer sessions: buffered, batched, transactional inserts.
//!
//! These APIs are synchronous. Backends that talk to an async client drive it
//! on a session-private runtime.
//!
//! A backend only implements the primitive operations of [`Backend`];
//! [`WriterSession`] layers the shared semantics on top:
//!
//! - records are buffered and sent in batches of `batch_size`;
//! - a batch is committed as a unit, or rolled back and discarded without
//!   being counted;
//! - the connection is released exactly once, after a final flush, whether the
//!   session is closed explicitly or dropped on an error or panic path.
//!
//! Each session owns its connection exclusively. Parallelism comes from
//! opening one session per worker through a shared [`Connector`].

#[cfg(feature = "jsonl")]
pub mod jsonl;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::config::{BackendKind, LoadOptions, LoaderConfig};
use crate::error::{LoadError, Result};
use crate::partition::WorkerId;
use crate::progress::ProgressBoard;
use crate::record::Record;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One backend connection, as seen by a [`WriterSession`].
pub trait Backend: Send {
    /// Send `records` as a single round trip inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch was not accepted; the session rolls back.
    fn insert_batch(&mut self, records: &[Record]) -> Result<()>;

    /// Make everything sent since the last commit durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the session rolls back.
    fn commit(&mut self) -> Result<()>;

    /// Discard everything sent since the last commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback itself fails.
    fn rollback(&mut self) -> Result<()>;

    /// Write a synthetic record and, where the backend allows it, remove it again.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot accept writes.
    fn probe(&mut self, record: &Record) -> Result<()>;

    /// Close the underlying connection. Called exactly once per session.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails; the connection is abandoned either way.
    fn release(&mut self) -> Result<()>;
}

/// Opens backend connections, one per call.
pub trait Connector: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;

    /// Open a fresh connection for `worker`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Connection`] if no connection can be established.
    fn connect(&self, worker: WorkerId) -> Result<Box<dyn Backend>>;
}

/// Per-session knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub batch_size: usize,
    /// Log the running total each time it crosses a multiple of this; `0` disables.
    pub log_interval: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            log_interval: 100_000,
        }
    }
}

impl From<&LoadOptions> for SessionOptions {
    fn from(load: &LoadOptions) -> Self {
        Self {
            batch_size: load.batch_size.max(1),
            log_interval: load.log_interval,
        }
    }
}

/// Read-only performance view of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub worker: WorkerId,
    pub inserted: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

impl SessionStats {
    /// Records per second; `None` when no time has elapsed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> Option<f64> {
        (!self.elapsed.is_zero()).then(|| self.inserted as f64 / self.elapsed.as_secs_f64())
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} records in {} batches, {:.3}s",
            self.worker,
            self.inserted,
            self.batches,
            self.elapsed.as_secs_f64()
        )?;
        match self.rate() {
            Some(r) => write!(f, " ({r:.2} records/sec)"),
            None => write!(f, " (rate n/a)"),
        }
    }
}

/// A buffered, batching writer bound to one backend connection.
pub struct WriterSession {
    worker: WorkerId,
    backend_name: &'static str,
    backend: Option<Box<dyn Backend>>,
    buffer: Vec<Record>,
    opts: SessionOptions,
    inserted: u64,
    batches: u64,
    started: Instant,
    progress: Option<Arc<ProgressBoard>>,
    abandoned: Option<Arc<AtomicBool>>,
}

impl WriterSession {
    /// Open a connection for `worker` and start the session clock.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Connection`] if the connector fails.
    pub fn open(connector: &dyn Connector, worker: WorkerId, opts: SessionOptions) -> Result<Self> {
        let backend = connector.connect(worker)?;
        tracing::debug!(worker = %worker, backend = connector.name(), "session opened");
        Ok(Self::from_backend(backend, connector.name(), worker, opts))
    }

    /// Wrap an already-open backend connection.
    #[must_use]
    pub fn from_backend(
        backend: Box<dyn Backend>,
        backend_name: &'static str,
        worker: WorkerId,
        opts: SessionOptions,
    ) -> Self {
        let batch_size = opts.batch_size.max(1);
        Self {
            worker,
            backend_name,
            backend: Some(backend),
            buffer: Vec::with_capacity(batch_size),
            opts: SessionOptions { batch_size, ..opts },
            inserted: 0,
            batches: 0,
            started: Instant::now(),
            progress: None,
            abandoned: None,
        }
    }

    /// Report committed counts to `board` as well.
    #[must_use]
    pub fn with_progress(mut self, board: Arc<ProgressBoard>) -> Self {
        self.progress = Some(board);
        self
    }

    /// Once `flag` is raised, batches are rolled back instead of committed.
    #[must_use]
    pub fn with_abandon_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abandoned = Some(flag);
        self
    }

    #[must_use]
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Buffer one record, sending a batch once the buffer is full.
    ///
    /// # Errors
    ///
    /// Propagates the error of the batch this record completed.
    pub fn add_record(&mut self, record: Record) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.opts.batch_size {
            self.execute_batch()?;
        }
        Ok(())
    }

    /// Same as calling [`add_record`](Self::add_record) for each record.
    ///
    /// # Errors
    ///
    /// Stops at the first failing batch and returns its error.
    pub fn add_records(&mut self, records: impl IntoIterator<Item = Record>) -> Result<()> {
        for record in records {
            self.add_record(record)?;
        }
        Ok(())
    }

    /// Send the buffer as one batch and commit it. Returns the batch size.
    ///
    /// On failure the transaction is rolled back and the buffer is cleared
    /// without counting it. The same happens when the session was abandoned
    /// while the batch was being sent.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::BatchInsert`], or [`LoadError::Connection`] if the
    /// connection was lost or already released.
    pub fn execute_batch(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let Some(backend) = self.backend.as_mut() else {
            self.buffer.clear();
            return Err(LoadError::connection(format!("{} session already released", self.worker)));
        };

        // Taken out first so a panicking backend leaves nothing for Drop to resend.
        let mut batch = std::mem::take(&mut self.buffer);
        let rows = batch.len();
        let mut outcome = backend.insert_batch(&batch);
        if outcome.is_ok() {
            outcome = if self.abandoned.as_ref().is_some_and(|f| f.load(Ordering::SeqCst)) {
                Err(LoadError::connection(format!("{} abandoned before commit", self.worker)))
            } else {
                backend.commit()
            };
        }
        batch.clear();
        self.buffer = batch;

        if let Err(err) = outcome {
            if let Err(rb) = backend.rollback() {
                tracing::warn!(worker = %self.worker, error = %rb, "rollback failed");
            }
            tracing::error!(worker = %self.worker, rows, error = %err, "batch rolled back");
            return Err(match err {
                e @ (LoadError::BatchInsert { .. } | LoadError::Connection(_)) => e,
                other => LoadError::batch(rows, other),
            });
        }

        let before = self.inserted;
        self.inserted += rows as u64;
        self.batches += 1;
        if let Some(board) = &self.progress {
            board.record(self.worker, rows as u64);
        }
        let every = self.opts.log_interval;
        if every > 0 && before / every != self.inserted / every {
            tracing::info!(worker = %self.worker, inserted = self.inserted, "progress");
        }
        Ok(rows)
    }

    /// Send whatever is buffered, if anything.
    ///
    /// # Errors
    ///
    /// See [`execute_batch`](Self::execute_batch).
    pub fn flush(&mut self) -> Result<()> {
        self.execute_batch().map(|_| ())
    }

    /// Records buffered but not yet sent.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Records committed so far.
    #[must_use]
    pub fn total_inserted(&self) -> u64 {
        self.inserted
    }

    #[must_use]
    pub fn performance_stats(&self) -> SessionStats {
        SessionStats {
            worker: self.worker,
            inserted: self.inserted,
            batches: self.batches,
            elapsed: self.started.elapsed(),
        }
    }

    /// Probe the backend with a synthetic record.
    ///
    /// # Errors
    ///
    /// Returns the backend's probe error.
    pub fn test_insert(&mut self) -> Result<()> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| LoadError::connection("session already released"))?;
        backend.probe(&Record::probe())?;
        tracing::info!(backend = self.backend_name, "test insert succeeded");
        Ok(())
    }

    /// Flush, then release the connection.
    ///
    /// The connection is released even if the flush fails.
    ///
    /// # Errors
    ///
    /// Returns the flush error, or else the release error.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        let released = match self.backend.take() {
            Some(mut backend) => backend.release(),
            None => Ok(()),
        };
        tracing::debug!(worker = %self.worker, stats = %self.performance_stats(), "session released");
        flushed.and(released)
    }
}

impl Drop for WriterSession {
    fn drop(&mut self) {
        if self.backend.is_some() {
            if let Err(e) = self.finish() {
                tracing::warn!(worker = %self.worker, error = %e, "error while releasing session");
            }
        }
    }
}

/// Build the connector the configuration selects.
///
/// # Errors
///
/// Returns [`LoadError::Config`] if the backend's settings are missing or the
/// backend was compiled out.
pub fn connector_for(cfg: &LoaderConfig) -> Result<Arc<dyn Connector>> {
    match cfg.backend {
        #[cfg(feature = "postgres")]
        BackendKind::Postgres => {
            let pg = cfg
                .postgres
                .clone()
                .ok_or_else(|| LoadError::Config("missing <postgres> settings".into()))?;
            Ok(Arc::new(postgres::PostgresConnector::new(pg)))
        }
        #[cfg(feature = "jsonl")]
        BackendKind::Jsonl => {
            let j = cfg
                .jsonl
                .clone()
                .ok_or_else(|| LoadError::Config("missing <jsonl> settings".into()))?;
            Ok(Arc::new(jsonl::JsonlConnector::new(j)))
        }
        BackendKind::Memory => Ok(Arc::new(memory::MemoryStore::new())),
        #[allow(unreachable_patterns)]
        other => Err(LoadError::Config(format!(
            "backend {} is not compiled into this build",
            other.display_name()
        ))),
    }
}
