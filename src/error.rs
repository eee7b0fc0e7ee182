//! Error taxonomy for the load pipeline.
//!
//! Row-level decode problems never show up here: they are absorbed by clamping
//! inside [`decode_row`](crate::decode::decode_row). Everything else either
//! aborts a single worker ([`LoadError::BatchInsert`], [`LoadError::Connection`])
//! or the load of one file ([`LoadError::Decode`], [`LoadError::EmptyInput`]).

use crate::partition::WorkerId;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the decoder, writer sessions and the orchestrator.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source file could not be opened or is structurally unreadable.
    #[error("cannot decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    /// A batch failed to commit and was rolled back; its records were not counted.
    #[error("batch of {rows} records failed: {message}")]
    BatchInsert { rows: usize, message: String },

    /// A backend session could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A worker could not complete its chunk.
    #[error("{worker} failed: {failure}")]
    Worker {
        worker: WorkerId,
        failure: WorkerFailure,
    },

    /// Nothing to load (empty file, or nothing left after the record limit).
    #[error("no records to load from {0}")]
    EmptyInput(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn batch(rows: usize, message: impl ToString) -> Self {
        Self::BatchInsert {
            rows,
            message: message.to_string(),
        }
    }

    pub fn connection(message: impl ToString) -> Self {
        Self::Connection(message.to_string())
    }

    /// True for failures a worker may retry (a rolled-back batch).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BatchInsert { .. })
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Why a worker's chunk was not fully loaded. Recorded in its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum WorkerFailure {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("batch insert error: {0}")]
    Batch(String),
    #[error("cancelled before completion")]
    Cancelled,
    #[error("did not report within the shutdown grace period")]
    TimedOut,
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl From<LoadError> for WorkerFailure {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Connection(msg) => Self::Connection(msg),
            LoadError::Worker { failure, .. } => failure,
            other => Self::Batch(other.to_string()),
        }
    }
}
