use bulkload::record::Record;
use bulkload::testing::sample_records;
use bulkload::writer::{Backend, Connector, SessionOptions, WriterSession};
use bulkload::{LoadError, MemoryStore, ProgressBoard, WorkerId};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn opts(batch_size: usize) -> SessionOptions {
    SessionOptions {
        batch_size,
        log_interval: 0,
    }
}

#[test]
fn batches_are_sent_when_the_buffer_fills() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut session = WriterSession::open(&store, WorkerId(0), opts(3))?;

    session.add_records(sample_records(7))?;
    assert_eq!(store.len(), 6);
    assert_eq!(session.pending(), 1);
    assert_eq!(session.total_inserted(), 6);

    session.flush()?;
    assert_eq!(store.len(), 7);
    assert_eq!(session.pending(), 0);
    assert_eq!(session.performance_stats().batches, 3);

    // Flushing an empty buffer is a no-op.
    assert_eq!(session.execute_batch()?, 0);
    session.close()?;
    Ok(())
}

#[test]
fn add_records_matches_repeated_add_record() -> anyhow::Result<()> {
    let records = sample_records(10);

    let a = MemoryStore::new();
    let mut s = WriterSession::open(&a, WorkerId(0), opts(4))?;
    s.add_records(records.clone())?;
    s.close()?;

    let b = MemoryStore::new();
    let mut s = WriterSession::open(&b, WorkerId(0), opts(4))?;
    for r in records.iter().copied() {
        s.add_record(r)?;
    }
    s.close()?;

    assert_eq!(a.records(), b.records());
    assert_eq!(a.records(), records);
    Ok(())
}

#[test]
fn failed_batch_is_rolled_back_and_not_counted() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.fail_batch(WorkerId(0), 2);
    let records = sample_records(9);
    let mut session = WriterSession::open(&store, WorkerId(0), opts(3))?;

    session.add_records(records[0..3].iter().copied())?;
    let err = session.add_records(records[3..6].iter().copied()).unwrap_err();
    assert!(matches!(err, LoadError::BatchInsert { rows: 3, .. }), "got {err:?}");
    assert_eq!(store.len(), 3);
    assert_eq!(session.total_inserted(), 3);
    assert_eq!(session.pending(), 0);
    assert_eq!(store.rollbacks(), 1);

    // The session stays usable after a rolled-back batch.
    session.add_records(records[6..9].iter().copied())?;
    session.close()?;
    let mut expected = records[0..3].to_vec();
    expected.extend_from_slice(&records[6..9]);
    assert_eq!(store.records(), expected);
    Ok(())
}

#[test]
fn close_flushes_then_releases_once() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut session = WriterSession::open(&store, WorkerId(0), opts(100))?;
    session.add_records(sample_records(42))?;
    assert!(store.is_empty());

    session.close()?;
    assert_eq!(store.len(), 42);
    assert_eq!(store.opened(), 1);
    assert_eq!(store.released(), 1);
    Ok(())
}

#[test]
fn drop_flushes_and_releases_once() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    {
        let mut session = WriterSession::open(&store, WorkerId(0), opts(100))?;
        session.add_records(sample_records(5))?;
    }
    assert_eq!(store.len(), 5);
    assert_eq!(store.released(), 1);
    Ok(())
}

#[test]
fn release_happens_on_error_paths() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.fail_batch(WorkerId(0), 1);

    let load = |store: &MemoryStore| -> bulkload::Result<()> {
        let mut session = WriterSession::open(store, WorkerId(0), opts(2))?;
        session.add_records(sample_records(4))?;
        session.close()
    };
    assert!(load(&store).is_err());
    assert_eq!(store.opened(), 1);
    assert_eq!(store.released(), 1);
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn release_happens_on_panic() {
    let store = MemoryStore::new();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut session = WriterSession::open(&store, WorkerId(0), opts(10)).unwrap();
        session.add_records(sample_records(3)).unwrap();
        panic!("worker blew up");
    }));
    assert!(outcome.is_err());
    assert_eq!(store.released(), 1);
    // Drop still flushed the buffered records.
    assert_eq!(store.len(), 3);
}

#[test]
fn refused_connection_opens_nothing() {
    let store = MemoryStore::new();
    store.refuse_connection(WorkerId(2));
    let err = WriterSession::open(&store, WorkerId(2), opts(10)).err();
    assert!(matches!(err, Some(LoadError::Connection(_))));
    assert_eq!(store.opened(), 0);
    assert_eq!(store.released(), 0);
}

#[test]
fn test_insert_leaves_no_rows() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut session = WriterSession::open(&store, WorkerId(0), opts(10))?;
    session.test_insert()?;
    session.close()?;
    assert_eq!(store.probes(), 1);
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn committed_batches_reach_the_progress_board() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let board = Arc::new(ProgressBoard::new(2));
    let mut session =
        WriterSession::open(&store, WorkerId(1), opts(4))?.with_progress(Arc::clone(&board));
    session.add_records(sample_records(10))?;
    assert_eq!(board.inserted(WorkerId(1)), 8);
    session.close()?;
    assert_eq!(board.inserted(WorkerId(1)), 10);
    assert_eq!(board.inserted(WorkerId(0)), 0);
    Ok(())
}

#[test]
fn abandoned_session_rolls_back_instead_of_committing() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let abandoned = Arc::new(AtomicBool::new(false));
    let mut session = WriterSession::open(&store, WorkerId(0), opts(5))?
        .with_abandon_flag(Arc::clone(&abandoned));

    session.add_records(sample_records(5))?;
    assert_eq!(store.len(), 5);

    abandoned.store(true, Ordering::SeqCst);
    let err = session.add_records(sample_records(5)).unwrap_err();
    assert!(matches!(err, LoadError::Connection(_)), "got {err:?}");
    assert_eq!(session.total_inserted(), 5);
    assert_eq!(store.rollbacks(), 1);

    session.close()?;
    assert_eq!(store.len(), 5);
    assert_eq!(store.released(), 1);
    Ok(())
}

/// Accepts inserts but fails every commit, counting calls.
#[derive(Default, Clone)]
struct CommitFails {
    rollbacks: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl Backend for CommitFails {
    fn insert_batch(&mut self, _records: &[Record]) -> bulkload::Result<()> {
        Ok(())
    }
    fn commit(&mut self) -> bulkload::Result<()> {
        Err(LoadError::Io(std::io::Error::other("disk full")))
    }
    fn rollback(&mut self) -> bulkload::Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn probe(&mut self, _record: &Record) -> bulkload::Result<()> {
        Ok(())
    }
    fn release(&mut self) -> bulkload::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Connector for CommitFails {
    fn name(&self) -> &'static str {
        "commit-fails"
    }
    fn connect(&self, _worker: WorkerId) -> bulkload::Result<Box<dyn Backend>> {
        Ok(Box::new(self.clone()))
    }
}

#[test]
fn commit_failure_rolls_back_as_a_batch_error() {
    let backend = CommitFails::default();
    let mut session = WriterSession::open(&backend, WorkerId(0), opts(2)).unwrap();
    let err = session.add_records(sample_records(2)).unwrap_err();
    assert!(matches!(err, LoadError::BatchInsert { rows: 2, .. }), "got {err:?}");
    assert_eq!(session.total_inserted(), 0);
    assert_eq!(backend.rollbacks.load(Ordering::SeqCst), 1);
    drop(session);
    assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
}
