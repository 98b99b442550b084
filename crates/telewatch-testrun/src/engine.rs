//! Single-run test orchestration.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, watch};

use telewatch_events::{EventBus, TestNotice};

use crate::config_store::{ConfigStoreError, TestConfigStore};
use crate::model::{RunState, StepLog, StepStatus, TestConfiguration, TestRun, TestStep};
use crate::protocol::ProtocolWriter;

/// Failure modes when starting a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The referenced configuration does not exist.
    #[error("configuration not found: {0}")]
    ConfigurationNotFound(String),

    /// Another run is currently active; runs never overlap.
    #[error("a test run is already active")]
    AlreadyRunning,

    /// The configuration store failed.
    #[error("configuration store failure")]
    Store(#[source] ConfigStoreError),
}

/// Collaborator seam executing one sub-test to its terminal outcome.
///
/// Implementations drive the shared client/server link; the engine only
/// sequences them and records results, so a test double slots in here.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run one step, appending progress to its log.
    async fn execute(&self, step: &TestStep, log: &mut StepLog) -> anyhow::Result<()>;
}

/// Sequences the steps of one admitted run and owns its outcome ledger.
///
/// At most one run is active process-wide; admission is test-and-set under
/// the run lock, so concurrent starts can never overlap.
pub struct TestEngine {
    bus: EventBus,
    configs: Arc<TestConfigStore>,
    protocols: Arc<ProtocolWriter>,
    executor: Arc<dyn StepExecutor>,
    current: RwLock<Option<TestRun>>,
    /// Armed while a run is active. Lock order: `current` before `abort`.
    abort: Mutex<Option<watch::Sender<bool>>>,
}

impl TestEngine {
    /// Engine over the injected stores and executor.
    #[must_use]
    pub fn new(
        bus: EventBus,
        configs: Arc<TestConfigStore>,
        protocols: Arc<ProtocolWriter>,
        executor: Arc<dyn StepExecutor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            configs,
            protocols,
            executor,
            current: RwLock::new(None),
            abort: Mutex::new(None),
        })
    }

    /// Snapshot of the current or last run; `None` before the first start.
    pub async fn status(&self) -> Option<TestRun> {
        self.current.read().await.clone()
    }

    /// Admit and start a run for the given configuration.
    pub async fn start(self: &Arc<Self>, config_id: &str) -> Result<TestRun, RunError> {
        let config = self.configs.get(config_id).await.map_err(|error| match error {
            ConfigStoreError::NotFound(id) => RunError::ConfigurationNotFound(id),
            other => RunError::Store(other),
        })?;

        let (run, abort_rx) = {
            let mut current = self.current.write().await;
            if current
                .as_ref()
                .is_some_and(|run| run.state == RunState::Running)
            {
                return Err(RunError::AlreadyRunning);
            }
            let run = TestRun::admit(&config);
            *current = Some(run.clone());
            let (abort_tx, abort_rx) = watch::channel(false);
            *self.abort.lock().await = Some(abort_tx);
            (run, abort_rx)
        };

        self.bus.publish_test(TestNotice::RunStarted {
            run_id: run.run_id.clone(),
            config_id: run.config_id.clone(),
            name: run.name.clone(),
        });
        tracing::info!("test run {} started for configuration {}", run.run_id, config.id);
        tokio::spawn(run_steps(Arc::clone(self), config, abort_rx));
        Ok(run)
    }

    /// Cancel the active run.
    ///
    /// Seals the ledger immediately: the current and all not-yet-started
    /// steps are recorded `aborted` and the run turns terminal, even when
    /// an uninterruptible step finishes moments later — its late result is
    /// discarded. A no-op when no run is active; returns the current
    /// snapshot either way.
    pub async fn abort(&self) -> Option<TestRun> {
        let (snapshot, notices) = {
            let mut current = self.current.write().await;
            let armed = self.abort.lock().await.take();

            let mut notices = Vec::new();
            if let (Some(run), Some(abort_tx)) = (current.as_mut(), armed)
                && run.state == RunState::Running
            {
                let _ = abort_tx.send(true);
                for step in &mut run.steps {
                    if !step.status.is_terminal() {
                        step.status = StepStatus::Aborted;
                        notices.push(TestNotice::StepStatus {
                            run_id: run.run_id.clone(),
                            index: step.index,
                            status: StepStatus::Aborted.as_str().to_string(),
                        });
                    }
                }
                run.state = RunState::Aborted;
                notices.push(TestNotice::RunFinished {
                    run_id: run.run_id.clone(),
                    state: RunState::Aborted.as_str().to_string(),
                });
                tracing::info!("test run {} aborted", run.run_id);
            }
            (current.clone(), notices)
        };

        for notice in notices {
            self.bus.publish_test(notice);
        }
        snapshot
    }

    /// Record one step transition; ignored once the ledger is sealed.
    async fn record_step(&self, index: u32, status: StepStatus, detail: Option<String>) {
        let notice = {
            let mut current = self.current.write().await;
            let Some(run) = current.as_mut() else { return };
            if run.state != RunState::Running {
                return;
            }
            let Some(step) = run.steps.iter_mut().find(|step| step.index == index) else {
                return;
            };
            if step.status.is_terminal() {
                return;
            }
            step.status = status;
            step.detail = detail;
            TestNotice::StepStatus {
                run_id: run.run_id.clone(),
                index,
                status: status.as_str().to_string(),
            }
        };
        self.bus.publish_test(notice);
    }

    /// Seal the run (unless an abort already did) and persist the protocol.
    async fn finalize(&self, aborted: bool, logs: Vec<StepLog>) {
        let (snapshot, notices) = {
            let mut current = self.current.write().await;
            self.abort.lock().await.take();
            let Some(run) = current.as_mut() else { return };

            let mut notices = Vec::new();
            if run.state == RunState::Running {
                if aborted {
                    // Abort landed between steps; seal the remainder here.
                    for step in &mut run.steps {
                        if !step.status.is_terminal() {
                            step.status = StepStatus::Aborted;
                            notices.push(TestNotice::StepStatus {
                                run_id: run.run_id.clone(),
                                index: step.index,
                                status: StepStatus::Aborted.as_str().to_string(),
                            });
                        }
                    }
                    run.state = RunState::Aborted;
                } else {
                    run.state = RunState::Finished;
                }
                notices.push(TestNotice::RunFinished {
                    run_id: run.run_id.clone(),
                    state: run.state.as_str().to_string(),
                });
            }
            (run.clone(), notices)
        };

        for notice in notices {
            self.bus.publish_test(notice);
        }
        if let Err(error) = self.protocols.write(&snapshot, &logs) {
            tracing::error!(
                "writing protocol for run {} failed: {error}",
                snapshot.run_id
            );
        }
    }
}

/// The sequential step loop of one run.
///
/// Steps never execute concurrently: each sub-test exclusively drives the
/// shared client/server link. One step's failure is recorded and the loop
/// moves on, so a full report is preserved.
async fn run_steps(
    engine: Arc<TestEngine>,
    config: TestConfiguration,
    mut abort_rx: watch::Receiver<bool>,
) {
    let mut logs: Vec<StepLog> = Vec::new();

    for step in &config.steps {
        if *abort_rx.borrow() {
            break;
        }
        engine.record_step(step.index, StepStatus::Running, None).await;

        let mut log = StepLog::new(step.index);
        let outcome = tokio::select! {
            result = engine.executor.execute(step, &mut log) => Some(result),
            _ = abort_rx.changed() => None,
        };

        let Some(result) = outcome else {
            // Abort observed mid-step; the ledger is already sealed.
            logs.push(log);
            break;
        };
        if *abort_rx.borrow() {
            // Abort wins over a racing natural completion.
            logs.push(log);
            break;
        }

        match result {
            Ok(()) => {
                engine
                    .record_step(step.index, StepStatus::Success, None)
                    .await;
            }
            Err(error) => {
                tracing::warn!("step {} failed: {error:#}", step.index);
                log.push(format!("error: {error:#}"));
                engine
                    .record_step(step.index, StepStatus::Failed, Some(error.to_string()))
                    .await;
            }
        }
        logs.push(log);
    }

    let aborted = *abort_rx.borrow();
    engine.finalize(aborted, logs).await;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use anyhow::anyhow;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use super::*;
    use crate::model::{TestKind, TestStep};
    use telewatch_events::Envelope;

    /// Test double with scripted outcomes and a configurable pace.
    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<anyhow::Result<()>>>,
        delay: Duration,
        started: Notify,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<anyhow::Result<()>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                delay,
                started: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(&self, step: &TestStep, log: &mut StepLog) -> anyhow::Result<()> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            log.push(format!("step {} executed", step.index));
            self.outcomes.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    struct Fixture {
        engine: Arc<TestEngine>,
        bus: EventBus,
        protocols: Arc<ProtocolWriter>,
        config_id: String,
        _dir: tempfile::TempDir,
    }

    async fn fixture(steps: usize, executor: Arc<ScriptedExecutor>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(256);
        let configs = Arc::new(TestConfigStore::new(dir.path().join("test_configs.json")));
        let protocols = Arc::new(ProtocolWriter::new(dir.path().join("protocols")).unwrap());

        let config = configs
            .save(TestConfiguration {
                id: String::new(),
                name: "Abnahmeprüfung".to_string(),
                steps: (0..steps)
                    .map(|_| TestStep {
                        index: 0,
                        kind: TestKind::GeneralInterrogation,
                        signal_list: None,
                    })
                    .collect(),
            })
            .await
            .unwrap();

        let engine = TestEngine::new(bus.clone(), configs, protocols.clone(), executor);
        Fixture {
            engine,
            bus,
            protocols,
            config_id: config.id,
            _dir: dir,
        }
    }

    async fn wait_run_finished(
        rx: &mut tokio::sync::broadcast::Receiver<Envelope>,
    ) -> String {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Envelope::Test(TestNotice::RunFinished { state, .. }) =
                    rx.recv().await.unwrap()
                {
                    return state;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn failed_step_is_recorded_and_the_run_continues() {
        let executor = ScriptedExecutor::new(
            vec![Ok(()), Err(anyhow!("server link is down")), Ok(())],
            Duration::from_millis(1),
        );
        let fixture = fixture(3, executor).await;
        let mut rx = fixture.bus.subscribe();

        let run = fixture.engine.start(&fixture.config_id).await.unwrap();
        assert_eq!(run.state, RunState::Running);

        assert_eq!(wait_run_finished(&mut rx).await, "finished");

        let snapshot = fixture.engine.status().await.unwrap();
        assert_eq!(snapshot.state, RunState::Finished);
        let statuses: Vec<StepStatus> =
            snapshot.steps.iter().map(|step| step.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Success, StepStatus::Failed, StepStatus::Success]
        );
        assert_eq!(
            snapshot.steps[1].detail.as_deref(),
            Some("server link is down")
        );

        let protocol = fixture.protocols.get(&snapshot.run_id).unwrap();
        assert!(!protocol.aborted);
        assert_eq!(protocol.steps[1].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn second_start_conflicts_and_leaves_the_active_run_untouched() {
        let executor = ScriptedExecutor::new(vec![Ok(())], Duration::from_millis(300));
        let fixture = fixture(1, executor).await;
        let mut rx = fixture.bus.subscribe();

        let run = fixture.engine.start(&fixture.config_id).await.unwrap();
        let conflict = fixture.engine.start(&fixture.config_id).await;
        assert!(matches!(conflict, Err(RunError::AlreadyRunning)));

        let snapshot = fixture.engine.status().await.unwrap();
        assert_eq!(snapshot.run_id, run.run_id);
        assert_eq!(snapshot.state, RunState::Running);

        wait_run_finished(&mut rx).await;
    }

    #[tokio::test]
    async fn unknown_configuration_is_rejected() {
        let executor = ScriptedExecutor::new(vec![], Duration::from_millis(1));
        let fixture = fixture(1, executor).await;
        assert!(matches!(
            fixture.engine.start("missing").await,
            Err(RunError::ConfigurationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn abort_seals_every_non_terminal_step() {
        let executor =
            ScriptedExecutor::new(vec![Ok(()), Ok(()), Ok(())], Duration::from_millis(250));
        let fixture = fixture(3, executor.clone()).await;

        fixture.engine.start(&fixture.config_id).await.unwrap();
        executor.started.notified().await;

        let snapshot = fixture.engine.abort().await.unwrap();
        assert_eq!(snapshot.state, RunState::Aborted);
        assert!(snapshot
            .steps
            .iter()
            .all(|step| step.status == StepStatus::Aborted));

        // The protocol record appears once the loop observes the abort.
        let protocol = timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(protocol) = fixture.protocols.get(&snapshot.run_id) {
                    return protocol;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(protocol.aborted);
    }

    #[tokio::test]
    async fn abort_wins_over_a_racing_natural_completion() {
        let executor = ScriptedExecutor::new(vec![Ok(())], Duration::from_millis(100));
        let fixture = fixture(1, executor.clone()).await;

        fixture.engine.start(&fixture.config_id).await.unwrap();
        executor.started.notified().await;

        let snapshot = fixture.engine.abort().await.unwrap();
        assert_eq!(snapshot.steps[0].status, StepStatus::Aborted);

        // Even after the step's own future would have succeeded, the
        // recorded status stays aborted.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let late = fixture.engine.status().await.unwrap();
        assert_eq!(late.steps[0].status, StepStatus::Aborted);
        assert_eq!(late.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn abort_without_a_run_is_a_no_op() {
        let executor = ScriptedExecutor::new(vec![], Duration::from_millis(1));
        let fixture = fixture(1, executor).await;
        assert!(fixture.engine.abort().await.is_none());
    }

    #[tokio::test]
    async fn terminal_snapshot_stays_until_the_next_start() {
        let executor = ScriptedExecutor::new(vec![Ok(()), Ok(())], Duration::from_millis(1));
        let fixture = fixture(1, executor).await;
        let mut rx = fixture.bus.subscribe();

        let first = fixture.engine.start(&fixture.config_id).await.unwrap();
        wait_run_finished(&mut rx).await;
        let snapshot = fixture.engine.status().await.unwrap();
        assert_eq!(snapshot.run_id, first.run_id);
        assert_eq!(snapshot.state, RunState::Finished);

        let second = fixture.engine.start(&fixture.config_id).await.unwrap();
        assert_ne!(second.run_id, first.run_id);
        wait_run_finished(&mut rx).await;
    }
}
