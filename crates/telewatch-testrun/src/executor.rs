//! Step executor driving the shared client/server link.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;

use telewatch_events::{ChannelSide, Direction, FrameKind, TelegramDraft};
use telewatch_stack::{ConnectionSupervisor, SignalDictionary};

use crate::engine::StepExecutor;
use crate::model::{StepLog, TestKind, TestStep};

/// Activation cause of a general interrogation.
const COT_ACTIVATION: u8 = 6;
/// Activation confirmation cause.
const COT_ACTIVATION_CON: u8 = 7;
/// Activation termination cause.
const COT_ACTIVATION_TERM: u8 = 10;
/// Cause for objects reported in response to a station interrogation.
const COT_INTERROGATED: u8 = 20;
/// Type identification of a general interrogation command.
const TYPE_GI: u8 = 100;

/// Executes sub-tests by replaying the corresponding exchanges through the
/// supervisor's capture pipeline, so every test frame lands in the history
/// and on the live stream like regular traffic.
pub struct PipelineStepExecutor {
    supervisor: Arc<ConnectionSupervisor>,
    signals: Arc<SignalDictionary>,
    signal_dir: Option<PathBuf>,
    pace: Duration,
}

impl PipelineStepExecutor {
    /// Executor over the running supervisor and the default signal list.
    #[must_use]
    pub fn new(supervisor: Arc<ConnectionSupervisor>, signals: Arc<SignalDictionary>) -> Self {
        Self {
            supervisor,
            signals,
            signal_dir: None,
            pace: Duration::from_millis(50),
        }
    }

    /// Directory from which per-step signal list references are loaded.
    #[must_use]
    pub fn with_signal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.signal_dir = Some(dir.into());
        self
    }

    /// Delay between replayed frames.
    #[must_use]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Signal dictionary for one step: its referenced list when present,
    /// otherwise the injected default.
    fn dictionary_for(&self, step: &TestStep) -> anyhow::Result<Arc<SignalDictionary>> {
        let Some(name) = step.signal_list.as_deref() else {
            return Ok(Arc::clone(&self.signals));
        };
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            bail!("invalid signal list reference: {name}");
        }
        let Some(dir) = self.signal_dir.as_ref() else {
            return Ok(Arc::clone(&self.signals));
        };
        let dictionary = SignalDictionary::load(dir.join(name))
            .with_context(|| format!("loading signal list {name}"))?;
        Ok(Arc::new(dictionary))
    }

    async fn require_links(&self, log: &mut StepLog) -> anyhow::Result<()> {
        for side in ChannelSide::ALL {
            if !self.supervisor.is_connected(side).await {
                bail!("{side} link is down");
            }
            log.push(format!("{side} link is up"));
        }
        Ok(())
    }

    /// Replay one application telegram as seen by both endpoints.
    async fn exchange(
        &self,
        origin: ChannelSide,
        type_id: u8,
        cause: u8,
        ioa: u32,
        label: &str,
        value: Option<&str>,
    ) -> anyhow::Result<()> {
        for (side, direction) in [(origin, Direction::Outgoing), (origin.peer(), Direction::Incoming)] {
            let status = self.supervisor.status(side).await;
            let local = status.local_endpoint.unwrap_or_else(|| "0.0.0.0:0".to_string());
            let remote = status.remote_endpoint.unwrap_or_else(|| "0.0.0.0:0".to_string());
            let mut draft = TelegramDraft::plain(side, direction, FrameKind::I, label, local, remote)
                .with_asdu(type_id, cause, 0, 1, ioa);
            if let Some(value) = value {
                draft = draft.with_value(value);
            }
            self.supervisor
                .observe(draft)
                .await
                .with_context(|| format!("recording {label} on {side}"))?;
        }
        tokio::time::sleep(self.pace).await;
        Ok(())
    }

    async fn general_interrogation(
        &self,
        step: &TestStep,
        log: &mut StepLog,
    ) -> anyhow::Result<()> {
        let signals = self.dictionary_for(step)?;

        self.exchange(
            ChannelSide::Client,
            TYPE_GI,
            COT_ACTIVATION,
            0,
            "GENERALABFRAGE",
            Some("0x14"),
        )
        .await?;
        log.push("general interrogation activated (cause 6)");

        self.exchange(
            ChannelSide::Server,
            TYPE_GI,
            COT_ACTIVATION_CON,
            0,
            "GENERALABFRAGE",
            Some("0x14"),
        )
        .await?;
        log.push("activation confirmed (cause 7)");

        for row in signals.rows() {
            let label = signals.resolve_label(row.ioa, row.type_id, COT_INTERROGATED);
            let value = (!row.value.is_empty()).then_some(row.value.as_str());
            self.exchange(
                ChannelSide::Server,
                row.type_id,
                COT_INTERROGATED,
                row.ioa,
                &label,
                value,
            )
            .await?;
            log.push(format!("IOA {} reported: {label}", row.ioa));
        }

        self.exchange(
            ChannelSide::Server,
            TYPE_GI,
            COT_ACTIVATION_TERM,
            0,
            "GENERALABFRAGE",
            Some("0x14"),
        )
        .await?;
        log.push(format!(
            "general interrogation terminated, {} objects reported",
            signals.rows().len()
        ));
        Ok(())
    }

    async fn signal_sequence(&self, step: &TestStep, log: &mut StepLog) -> anyhow::Result<()> {
        let signals = self.dictionary_for(step)?;
        if signals.rows().is_empty() {
            bail!("signal list has no rows");
        }
        for row in signals.rows() {
            let label = signals.resolve_label(row.ioa, row.type_id, row.cause);
            let value = (!row.value.is_empty()).then_some(row.value.as_str());
            self.exchange(
                ChannelSide::Server,
                row.type_id,
                row.cause,
                row.ioa,
                &label,
                value,
            )
            .await?;
            log.push(format!("IOA {} transmitted: {label}", row.ioa));
        }
        Ok(())
    }
}

#[async_trait]
impl StepExecutor for PipelineStepExecutor {
    async fn execute(&self, step: &TestStep, log: &mut StepLog) -> anyhow::Result<()> {
        match step.kind {
            TestKind::ConnectionCheck => self.require_links(log).await,
            TestKind::GeneralInterrogation => {
                self.require_links(log).await?;
                self.general_interrogation(step, log).await
            }
            TestKind::SignalSequence => {
                self.require_links(log).await?;
                self.signal_sequence(step, log).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telewatch_events::{EventBus, LinkState};
    use telewatch_history::TelegramHistory;
    use telewatch_stack::{SignalRow, StackError, StackEvent, StackEventSender, TelecontrolStack};
    use tokio::sync::Mutex;

    struct ScriptedStack {
        side: ChannelSide,
        sender: Mutex<Option<StackEventSender>>,
    }

    impl ScriptedStack {
        fn new(side: ChannelSide) -> Arc<Self> {
            Arc::new(Self {
                side,
                sender: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TelecontrolStack for ScriptedStack {
        fn side(&self) -> ChannelSide {
            self.side
        }

        fn local_endpoint(&self) -> String {
            format!("127.0.0.1:{}", 2404 + u16::from(self.side == ChannelSide::Client))
        }

        fn remote_endpoint(&self) -> String {
            "10.0.0.2:2404".to_string()
        }

        async fn start(&self, events: StackEventSender) -> Result<(), StackError> {
            events
                .send(StackEvent::Link {
                    state: LinkState::Connected,
                    detail: None,
                })
                .await
                .map_err(|_| StackError::Failed("events channel closed".to_string()))?;
            *self.sender.lock().await = Some(events);
            Ok(())
        }

        async fn stop(&self) -> Result<(), StackError> {
            self.sender.lock().await.take();
            Ok(())
        }
    }

    struct Fixture {
        executor: PipelineStepExecutor,
        history: Arc<TelegramHistory>,
        supervisor: Arc<ConnectionSupervisor>,
        _dir: tempfile::TempDir,
    }

    async fn connected_fixture(rows: Vec<SignalRow>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(256);
        let history = Arc::new(TelegramHistory::open(dir.path().join("telegrams")).unwrap());
        let supervisor = ConnectionSupervisor::new(
            bus,
            history.clone(),
            ScriptedStack::new(ChannelSide::Client),
            ScriptedStack::new(ChannelSide::Server),
            Duration::from_secs(30),
        );
        for side in ChannelSide::ALL {
            supervisor.start(side).await.unwrap();
        }
        // Both scripted stacks report ready immediately; wait for the pumps.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if supervisor.is_connected(ChannelSide::Client).await
                    && supervisor.is_connected(ChannelSide::Server).await
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let executor = PipelineStepExecutor::new(
            supervisor.clone(),
            Arc::new(SignalDictionary::from_rows(rows)),
        )
        .with_pace(Duration::from_millis(1));
        Fixture {
            executor,
            history,
            supervisor,
            _dir: dir,
        }
    }

    fn step(kind: TestKind) -> TestStep {
        TestStep {
            index: 1,
            kind,
            signal_list: None,
        }
    }

    fn rows() -> Vec<SignalRow> {
        vec![SignalRow {
            ioa: 0x000102,
            label: "Leistungsschalter Q0".to_string(),
            type_id: 1,
            cause: 20,
            value: "1".to_string(),
        }]
    }

    #[tokio::test]
    async fn connection_check_requires_both_links() {
        let fixture = connected_fixture(rows()).await;
        fixture.supervisor.stop(ChannelSide::Server).await.unwrap();

        let mut log = StepLog::new(1);
        let result = fixture
            .executor
            .execute(&step(TestKind::ConnectionCheck), &mut log)
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("server"));
    }

    #[tokio::test]
    async fn general_interrogation_replays_the_full_exchange() {
        let fixture = connected_fixture(rows()).await;

        let mut log = StepLog::new(1);
        fixture
            .executor
            .execute(&step(TestKind::GeneralInterrogation), &mut log)
            .await
            .unwrap();
        assert!(!log.is_empty());

        let client = fixture
            .history
            .query(ChannelSide::Client, None)
            .await
            .unwrap();
        let activation = &client[0];
        assert_eq!(activation.type_id, Some(TYPE_GI));
        assert_eq!(activation.cause, Some(COT_ACTIVATION));
        assert_eq!(activation.ioa, Some(0));
        assert_eq!(activation.label, "GENERALABFRAGE");

        // The interrogated object shows up on both channels.
        let server = fixture
            .history
            .query(ChannelSide::Server, None)
            .await
            .unwrap();
        assert!(server.iter().any(|event| event.ioa == Some(0x000102)));
        assert!(client.iter().any(|event| event.ioa == Some(0x000102)));

        // Termination closes the exchange.
        assert!(server
            .iter()
            .any(|event| event.cause == Some(COT_ACTIVATION_TERM)));
    }

    #[tokio::test]
    async fn signal_sequence_requires_rows() {
        let fixture = connected_fixture(Vec::new()).await;
        let mut log = StepLog::new(1);
        let result = fixture
            .executor
            .execute(&step(TestKind::SignalSequence), &mut log)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn signal_sequence_transmits_every_row() {
        let fixture = connected_fixture(rows()).await;
        let mut log = StepLog::new(1);
        fixture
            .executor
            .execute(&step(TestKind::SignalSequence), &mut log)
            .await
            .unwrap();

        let server = fixture
            .history
            .query(ChannelSide::Server, None)
            .await
            .unwrap();
        let transmitted = server
            .iter()
            .find(|event| event.ioa == Some(0x000102))
            .unwrap();
        assert_eq!(transmitted.label, "Leistungsschalter Q0");
        assert_eq!(transmitted.value.as_deref(), Some("1"));
    }
}
