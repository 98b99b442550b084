//! Application context wiring.

use std::sync::Arc;

use telewatch_events::{ChannelSide, EventBus};
use telewatch_history::TelegramHistory;
use telewatch_stack::{
    ConnectionSupervisor, PlaceholderConfig, PlaceholderStack, SignalDictionary,
};
use telewatch_testrun::{PipelineStepExecutor, ProtocolWriter, TestConfigStore, TestEngine};

use crate::settings::GatewaySettings;

/// Shared state handed to every request handler.
///
/// Built once in `main` and injected via `State`; the single engine and
/// the per-channel stores live here instead of in process-wide globals, so
/// the single-active-run and monotonic-sequence invariants have one owner.
#[derive(Clone)]
pub struct AppContext {
    /// Live fan-out hub.
    pub bus: EventBus,
    /// Durable telegram history.
    pub history: Arc<TelegramHistory>,
    /// Link supervision and capture pipeline.
    pub supervisor: Arc<ConnectionSupervisor>,
    /// Test-run orchestrator.
    pub engine: Arc<TestEngine>,
    /// Test configuration store.
    pub configs: Arc<TestConfigStore>,
    /// Protocol records of finished runs.
    pub protocols: Arc<ProtocolWriter>,
}

impl AppContext {
    /// Wire the full pipeline from settings.
    pub fn build(settings: &GatewaySettings) -> anyhow::Result<Self> {
        let bus = EventBus::new(settings.bus_capacity);
        let history = Arc::new(TelegramHistory::open(settings.data_dir.join("telegrams"))?);

        let signals = Arc::new(match settings.signal_list_path() {
            Some(path) if path.exists() => SignalDictionary::load(&path)?,
            Some(path) => {
                tracing::warn!(
                    "signal list {} not found, labels fall back to raw values",
                    path.display()
                );
                SignalDictionary::empty()
            }
            None => SignalDictionary::empty(),
        });

        let client = Arc::new(PlaceholderStack::new(
            ChannelSide::Client,
            PlaceholderConfig::new(&settings.client.local, &settings.client.remote),
            Arc::clone(&signals),
        ));
        let server = Arc::new(PlaceholderStack::new(
            ChannelSide::Server,
            PlaceholderConfig::new(&settings.server.local, &settings.server.remote),
            Arc::clone(&signals),
        ));
        let supervisor = ConnectionSupervisor::new(
            bus.clone(),
            Arc::clone(&history),
            client,
            server,
            telewatch_stack::CONNECT_TIMEOUT,
        );

        let configs = Arc::new(TestConfigStore::new(
            settings.data_dir.join("configs").join("test_configs.json"),
        ));
        let protocols = Arc::new(ProtocolWriter::new(settings.data_dir.join("protocols"))?);
        let executor = Arc::new(
            PipelineStepExecutor::new(Arc::clone(&supervisor), signals)
                .with_signal_dir(settings.data_dir.join("signallisten")),
        );
        let engine = TestEngine::new(
            bus.clone(),
            Arc::clone(&configs),
            Arc::clone(&protocols),
            executor,
        );

        Ok(Self {
            bus,
            history,
            supervisor,
            engine,
            configs,
            protocols,
        })
    }
}
