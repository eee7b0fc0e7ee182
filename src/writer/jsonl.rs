//! JSON-lines document sink.
//!
//! Each worker appends to its own file, `<output_dir>/<collection>-task-<n>.jsonl`,
//! one JSON document per record. The committed prefix of the file is durable;
//! rollback truncates back to it, which gives per-batch atomicity without a
//! server.

use super::{Backend, Connector};
use crate::config::JsonlConfig;
use crate::error::{LoadError, Result};
use crate::partition::WorkerId;
use crate::record::Record;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Opens one JSON-lines file per worker.
#[derive(Debug, Clone)]
pub struct JsonlConnector {
    cfg: JsonlConfig,
}

impl JsonlConnector {
    #[must_use]
    pub fn new(cfg: JsonlConfig) -> Self {
        Self { cfg }
    }

    /// File the given worker writes to.
    #[must_use]
    pub fn path_for(&self, worker: WorkerId) -> PathBuf {
        self.cfg
            .output_dir
            .join(format!("{}-task-{}.jsonl", self.cfg.collection, worker.0 + 1))
    }
}

impl Connector for JsonlConnector {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn connect(&self, worker: WorkerId) -> Result<Box<dyn Backend>> {
        let path = self.path_for(worker);
        fs::create_dir_all(&self.cfg.output_dir).map_err(|e| {
            LoadError::connection(format!("cannot create {}: {e}", self.cfg.output_dir.display()))
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LoadError::connection(format!("cannot open {}: {e}", path.display())))?;
        let committed_len = file
            .metadata()
            .map_err(|e| LoadError::connection(format!("cannot stat {}: {e}", path.display())))?
            .len();
        Ok(Box::new(JsonlBackend {
            path,
            file: Some(file),
            committed_len,
        }))
    }
}

/// One open JSON-lines file.
pub struct JsonlBackend {
    path: PathBuf,
    file: Option<File>,
    committed_len: u64,
}

impl JsonlBackend {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| LoadError::connection(format!("{} already closed", self.path.display())))
    }

    fn truncate_to_committed(&mut self) -> Result<()> {
        let len = self.committed_len;
        self.file()?.set_len(len)?;
        Ok(())
    }
}

fn encode(records: &[Record]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(records.len() * 320);
    for r in records {
        serde_json::to_writer(&mut buf, r).map_err(|e| LoadError::batch(records.len(), e))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

impl Backend for JsonlBackend {
    fn insert_batch(&mut self, records: &[Record]) -> Result<()> {
        let buf = encode(records)?;
        self.file()?
            .write_all(&buf)
            .map_err(|e| LoadError::batch(records.len(), e))
    }

    fn commit(&mut self) -> Result<()> {
        let file = self.file()?;
        file.flush()?;
        file.sync_data()?;
        let len = file.metadata()?.len();
        self.committed_len = len;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.truncate_to_committed()
    }

    fn probe(&mut self, record: &Record) -> Result<()> {
        let buf = encode(std::slice::from_ref(record))?;
        self.file()?.write_all(&buf)?;
        self.truncate_to_committed()
    }

    fn release(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}
