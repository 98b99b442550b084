//! Data model of the testing subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported sub-test types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Both links must be up before anything else runs.
    ConnectionCheck,
    /// General interrogation exchange against the configured signal list.
    GeneralInterrogation,
    /// Replay of every configured signal as spontaneous transmission.
    SignalSequence,
}

/// One ordered unit of work within a configuration.
///
/// `index` values are contiguous starting at 1 and are reassigned by the
/// store on every save; they are never edited independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    /// 1-based position within the configuration.
    pub index: u32,
    /// Sub-test type executed at this position.
    pub kind: TestKind,
    /// Signal list reference for kinds that replay signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_list: Option<String>,
}

/// A named, ordered list of sub-tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Stable identifier; assigned on first save when empty.
    #[serde(default)]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// Status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Success,
    /// Completed with a recorded failure.
    Failed,
    /// Cancelled before or during execution.
    Aborted,
}

impl StepStatus {
    /// Wire string, as pushed in test notices.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Aborted => "aborted",
        }
    }

    /// True once the step can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Aborted
        )
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Steps are executing.
    Running,
    /// All steps reached success or failed.
    Finished,
    /// The run was cancelled.
    Aborted,
}

impl RunState {
    /// Wire string, as pushed in test notices.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Aborted => "aborted",
        }
    }
}

/// Outcome ledger entry for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based step index.
    pub index: u32,
    /// Sub-test type.
    pub kind: TestKind,
    /// Current status.
    pub status: StepStatus,
    /// Failure or cancellation detail when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Transient state of one in-progress or completed run.
///
/// Exactly one run exists process-wide; the terminal snapshot stays
/// queryable until the next start overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    /// Run identifier, also the protocol identifier after completion.
    pub run_id: String,
    /// Configuration the run executes.
    pub config_id: String,
    /// Configuration display name at start time.
    pub name: String,
    /// Admission time.
    pub started_at: DateTime<Utc>,
    /// Overall state.
    pub state: RunState,
    /// Per-step outcome ledger, ordered by index.
    pub steps: Vec<StepResult>,
}

impl TestRun {
    /// Fresh run for a configuration: all steps pending, state running.
    #[must_use]
    pub fn admit(config: &TestConfiguration) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            config_id: config.id.clone(),
            name: config.name.clone(),
            started_at: Utc::now(),
            state: RunState::Running,
            steps: config
                .steps
                .iter()
                .map(|step| StepResult {
                    index: step.index,
                    kind: step.kind,
                    status: StepStatus::Pending,
                    detail: None,
                })
                .collect(),
        }
    }
}

/// Collected log lines of one executed step.
#[derive(Debug, Clone)]
pub struct StepLog {
    /// 1-based step index the log belongs to.
    pub index: u32,
    lines: Vec<String>,
}

impl StepLog {
    /// Empty log for a step.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self {
            index,
            lines: Vec::new(),
        }
    }

    /// Append one line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// True when nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render as file content, one line per entry.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}
