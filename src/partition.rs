//! Static, contiguous partitioning of the decoded record sequence.
//!
//! `n` records are cut into chunks of `ceil(n / w)`; only the last chunk may be
//! shorter, and indices past the end produce no chunk at all, so fewer than `w`
//! workers run when `n < w`. There is no work stealing: skew is bounded by one
//! chunk size.

use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// Zero-based worker index; displayed one-based as `Task-N`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task-{}", self.0 + 1)
    }
}

/// A half-open sub-range `[start, end)` of the record sequence owned by one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub worker: WorkerId,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Split `n` records across at most `workers` contiguous chunks.
///
/// `workers == 0` is treated as 1 and `n == 0` yields no chunks.
#[must_use]
pub fn partition(n: usize, workers: usize) -> Vec<Chunk> {
    let w = workers.max(1);
    if n == 0 {
        return Vec::new();
    }
    let size = n.div_ceil(w);
    (0..w)
        .map(|i| (i, i * size))
        .take_while(|&(_, start)| start < n)
        .map(|(i, start)| Chunk {
            worker: WorkerId(i),
            start,
            end: (start + size).min(n),
        })
        .collect()
}

/// Move `records` into one owned vector per chunk, without copying.
///
/// `chunks` must come from [`partition`] over `records.len()`; the returned
/// vectors are in chunk order.
///
/// # Panics
///
/// Panics if `chunks` does not exactly tile `0..records.len()`.
#[must_use]
pub fn split_into_chunks<T>(mut records: Vec<T>, chunks: &[Chunk]) -> Vec<Vec<T>> {
    let covered: usize = chunks.iter().map(Chunk::len).sum();
    assert_eq!(covered, records.len(), "chunks must cover every record");

    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks.iter().rev() {
        assert_eq!(chunk.end, records.len(), "chunks must be contiguous");
        out.push(records.split_off(chunk.start));
    }
    out.reverse();
    out
}
