//! In-memory backend with failure injection.
//!
//! A [`MemoryStore`] is both the shared "database" and its [`Connector`].
//! Cloning it is cheap and every clone sees the same state, so a test can
//! keep one handle for assertions and give another to the loader.

use super::{Backend, Connector};
use crate::error::{LoadError, Result};
use crate::partition::WorkerId;
use crate::record::Record;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct StoreState {
    committed: BTreeMap<WorkerId, Vec<Record>>,
    refused: HashSet<WorkerId>,
    /// `(worker, n)`: the n-th `insert_batch` call (1-based) of that worker fails.
    failing_batches: HashSet<(WorkerId, u64)>,
    batch_delay: Duration,
    opened: usize,
    released: usize,
    probes: usize,
    rollbacks: usize,
}

/// Shared in-memory destination.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().expect("memory store mutex poisoned")
    }

    /// Make every connection attempt for `worker` fail.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    pub fn refuse_connection(&self, worker: WorkerId) {
        self.state().refused.insert(worker);
    }

    /// Make the `nth` (1-based) batch sent by `worker`'s session fail.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    pub fn fail_batch(&self, worker: WorkerId, nth: u64) {
        self.state().failing_batches.insert((worker, nth));
    }

    /// Sleep this long inside every `insert_batch`.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    pub fn set_batch_delay(&self, delay: Duration) {
        self.state().batch_delay = delay;
    }

    /// All committed records, ordered by worker and then by commit order.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.state().committed.values().flatten().copied().collect()
    }

    /// Records committed by one worker.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn records_for(&self, worker: WorkerId) -> Vec<Record> {
        self.state()
            .committed
            .get(&worker)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of committed records.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().committed.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections successfully opened.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    /// Connections released.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn released(&self) -> usize {
        self.state().released
    }

    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn probes(&self) -> usize {
        self.state().probes
    }

    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }
}

impl Connector for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn connect(&self, worker: WorkerId) -> Result<Box<dyn Backend>> {
        let mut state = self.state();
        if state.refused.contains(&worker) {
            return Err(LoadError::connection(format!("{worker}: connection refused")));
        }
        state.opened += 1;
        drop(state);
        Ok(Box::new(MemoryBackend {
            store: self.clone(),
            worker,
            staged: Vec::new(),
            batches_sent: 0,
        }))
    }
}

/// One connection to a [`MemoryStore`].
pub struct MemoryBackend {
    store: MemoryStore,
    worker: WorkerId,
    staged: Vec<Record>,
    batches_sent: u64,
}

impl Backend for MemoryBackend {
    fn insert_batch(&mut self, records: &[Record]) -> Result<()> {
        self.batches_sent += 1;
        let (delay, fail) = {
            let state = self.store.state();
            (
                state.batch_delay,
                state.failing_batches.contains(&(self.worker, self.batches_sent)),
            )
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if fail {
            return Err(LoadError::batch(
                records.len(),
                format!("injected failure on batch {}", self.batches_sent),
            ));
        }
        self.staged.extend_from_slice(records);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.store
            .state()
            .committed
            .entry(self.worker)
            .or_default()
            .extend(staged);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.staged.clear();
        self.store.state().rollbacks += 1;
        Ok(())
    }

    fn probe(&mut self, _record: &Record) -> Result<()> {
        self.store.state().probes += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.staged.clear();
        self.store.state().released += 1;
        Ok(())
    }
}
