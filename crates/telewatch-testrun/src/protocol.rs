//! Durable protocol records of finished test runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{RunState, StepLog, StepStatus, TestKind, TestRun};
use crate::persist::atomic_write_json;

const PROTOCOL_FILE: &str = "protocol.json";

/// Failure modes of the protocol store.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No protocol (or step log) for the given identifier.
    #[error("protocol not found: {0}")]
    NotFound(String),

    /// Low-level I/O error on the backing files.
    #[error("protocol storage failure: {0}")]
    Storage(#[from] std::io::Error),

    /// A stored record is not a valid protocol document.
    #[error("protocol document not parseable: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Recorded outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStep {
    /// 1-based step index.
    pub index: u32,
    /// Sub-test type.
    pub kind: TestKind,
    /// Terminal status the step reached.
    pub status: StepStatus,
    /// True when a step log file was written.
    pub log: bool,
}

/// Immutable result record of one finished or aborted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProtocol {
    /// Protocol identifier (the run id).
    pub id: String,
    /// Configuration the run executed.
    pub config_id: String,
    /// Configuration display name at run time.
    pub name: String,
    /// Time the run reached its terminal state.
    pub finished_at: DateTime<Utc>,
    /// True when the run was cancelled.
    pub aborted: bool,
    /// Per-step records, ordered by index.
    pub steps: Vec<ProtocolStep>,
}

/// Writes and serves protocol records, one directory per run.
///
/// A record and its step logs live and die together: delete removes the
/// whole directory, so a half-deleted protocol is never observable.
pub struct ProtocolWriter {
    root: PathBuf,
}

impl ProtocolWriter {
    /// Writer rooted at the given directory (created if missing).
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ProtocolError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory for one run id; rejects ids that would escape the root.
    fn run_dir(&self, id: &str) -> Result<PathBuf, ProtocolError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(ProtocolError::NotFound(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    /// Persist a terminal run and its step logs as one record.
    pub fn write(&self, run: &TestRun, logs: &[StepLog]) -> Result<TestProtocol, ProtocolError> {
        let dir = self.run_dir(&run.run_id)?;
        std::fs::create_dir_all(&dir)?;

        for log in logs {
            if log.is_empty() {
                continue;
            }
            std::fs::write(dir.join(format!("step_{}.log", log.index)), log.render())?;
        }

        let protocol = TestProtocol {
            id: run.run_id.clone(),
            config_id: run.config_id.clone(),
            name: run.name.clone(),
            finished_at: Utc::now(),
            aborted: run.state == RunState::Aborted,
            steps: run
                .steps
                .iter()
                .map(|step| ProtocolStep {
                    index: step.index,
                    kind: step.kind,
                    status: step.status,
                    log: logs.iter().any(|l| l.index == step.index && !l.is_empty()),
                })
                .collect(),
        };
        atomic_write_json(&dir.join(PROTOCOL_FILE), &protocol)?;
        Ok(protocol)
    }

    /// All stored protocols, newest first.
    pub fn list(&self) -> Result<Vec<TestProtocol>, ProtocolError> {
        let mut protocols = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            match read_protocol(&entry.path()) {
                Ok(protocol) => protocols.push(protocol),
                Err(error) => {
                    tracing::warn!(
                        "skipping unreadable protocol in {}: {error}",
                        entry.path().display()
                    );
                }
            }
        }
        protocols.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        Ok(protocols)
    }

    /// One protocol by id.
    pub fn get(&self, id: &str) -> Result<TestProtocol, ProtocolError> {
        let dir = self.run_dir(id)?;
        if !dir.join(PROTOCOL_FILE).exists() {
            return Err(ProtocolError::NotFound(id.to_string()));
        }
        read_protocol(&dir)
    }

    /// Stored log of one step.
    pub fn step_log(&self, id: &str, index: u32) -> Result<String, ProtocolError> {
        let dir = self.run_dir(id)?;
        let path = dir.join(format!("step_{index}.log"));
        if !path.exists() {
            return Err(ProtocolError::NotFound(format!("{id}/step_{index}")));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Remove a protocol and its step logs as a single unit.
    pub fn delete(&self, id: &str) -> Result<(), ProtocolError> {
        let dir = self.run_dir(id)?;
        if !dir.exists() {
            return Err(ProtocolError::NotFound(id.to_string()));
        }
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }
}

fn read_protocol(dir: &Path) -> Result<TestProtocol, ProtocolError> {
    let raw = std::fs::read_to_string(dir.join(PROTOCOL_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}
