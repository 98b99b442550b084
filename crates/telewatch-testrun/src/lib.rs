//! Test orchestration: configurations, the single-run engine, protocols.
//!
//! A test configuration is an ordered list of sub-tests. The engine admits
//! at most one run at a time, executes its steps strictly sequentially
//! against the shared client/server link, records every step outcome, and
//! persists the finished (or aborted) run as an immutable protocol record.

mod config_store;
mod engine;
mod executor;
mod model;
mod persist;
mod protocol;

pub use config_store::{ConfigStoreError, TestConfigStore};
pub use engine::{RunError, StepExecutor, TestEngine};
pub use executor::PipelineStepExecutor;
pub use model::{
    RunState, StepLog, StepResult, StepStatus, TestConfiguration, TestKind, TestRun, TestStep,
};
pub use protocol::{ProtocolError, ProtocolStep, ProtocolWriter, TestProtocol};
