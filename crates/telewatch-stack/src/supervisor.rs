//! Connection supervision and the capture pipeline.
//!
//! The supervisor tracks the externally visible link state of both
//! channels, pumps stack observations into the durable history and the
//! live bus, and guards the `connecting` phase with a deferred timeout so
//! a hung stack never leaves the UI dialing forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use telewatch_events::{
    ChannelSide, ConnectionStatus, EventBus, LinkState, StatusUpdate, TelegramDraft, TelegramEvent,
};
use telewatch_history::{HistoryError, TelegramHistory};

use crate::stack::{StackError, StackEvent, TelecontrolStack};

/// Safety net for a stack that never reports a ready link.
///
/// Expiry resets only the externally visible status; the underlying start
/// operation is not cancelled.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the stack observation channel per started link.
const STACK_EVENT_CAPACITY: usize = 64;

/// Current connection state of both channels.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Client channel state.
    pub client: ConnectionStatus,
    /// Server channel state.
    pub server: ConnectionStatus,
}

struct ChannelRuntime {
    stack: Arc<dyn TelecontrolStack>,
    status: RwLock<ConnectionStatus>,
    /// Bumped on every transition; lets the connect watchdog detect that
    /// its observation went stale.
    epoch: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelRuntime {
    fn new(stack: Arc<dyn TelecontrolStack>) -> Self {
        Self {
            stack,
            status: RwLock::new(ConnectionStatus::disconnected()),
            epoch: AtomicU64::new(0),
            pump: Mutex::new(None),
        }
    }
}

/// Owns both channels' link state and the stack→history→bus pipeline.
pub struct ConnectionSupervisor {
    bus: EventBus,
    history: Arc<TelegramHistory>,
    connect_timeout: Duration,
    client: ChannelRuntime,
    server: ChannelRuntime,
}

impl ConnectionSupervisor {
    /// Build a supervisor over the two injected stacks.
    #[must_use]
    pub fn new(
        bus: EventBus,
        history: Arc<TelegramHistory>,
        client: Arc<dyn TelecontrolStack>,
        server: Arc<dyn TelecontrolStack>,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            history,
            connect_timeout,
            client: ChannelRuntime::new(client),
            server: ChannelRuntime::new(server),
        })
    }

    fn runtime(&self, side: ChannelSide) -> &ChannelRuntime {
        match side {
            ChannelSide::Client => &self.client,
            ChannelSide::Server => &self.server,
        }
    }

    /// Current status of one channel.
    pub async fn status(&self, side: ChannelSide) -> ConnectionStatus {
        self.runtime(side).status.read().await.clone()
    }

    /// Current status of both channels.
    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            client: self.status(ChannelSide::Client).await,
            server: self.status(ChannelSide::Server).await,
        }
    }

    /// True when the channel's link is up.
    pub async fn is_connected(&self, side: ChannelSide) -> bool {
        self.status(side).await.connected
    }

    /// Start one channel's stack.
    ///
    /// A start on a channel that is already connecting or connected is a
    /// no-op returning the current status.
    pub async fn start(self: &Arc<Self>, side: ChannelSide) -> Result<ConnectionStatus, StackError> {
        let runtime = self.runtime(side);
        {
            let status = runtime.status.read().await;
            if status.state != LinkState::Disconnected {
                return Ok(status.clone());
            }
        }

        let (tx, rx) = mpsc::channel(STACK_EVENT_CAPACITY);
        runtime.stack.start(tx).await?;

        let status = ConnectionStatus::connecting(
            runtime.stack.local_endpoint(),
            runtime.stack.remote_endpoint(),
        );
        let epoch = self.transition(side, status.clone()).await;

        let pump = tokio::spawn(pump_events(Arc::clone(self), side, rx));
        *runtime.pump.lock().await = Some(pump);
        self.spawn_connect_watchdog(side, epoch);

        Ok(status)
    }

    /// Stop one channel's stack.
    ///
    /// A stop on a disconnected channel is a no-op returning the current
    /// status.
    pub async fn stop(self: &Arc<Self>, side: ChannelSide) -> Result<ConnectionStatus, StackError> {
        let runtime = self.runtime(side);
        {
            let status = runtime.status.read().await;
            if status.state == LinkState::Disconnected {
                return Ok(status.clone());
            }
        }

        match runtime.stack.stop().await {
            Ok(()) | Err(StackError::NotRunning) => {}
            Err(error) => return Err(error),
        }

        // The stack's sender is gone now, so the pump drains and exits.
        if let Some(pump) = runtime.pump.lock().await.take() {
            if pump.await.is_err() {
                tracing::warn!("{side} pump task panicked");
            }
        }

        let status = self.status(side).await;
        if status.state == LinkState::Disconnected {
            return Ok(status);
        }
        self.transition(side, ConnectionStatus::disconnected()).await;
        Ok(ConnectionStatus::disconnected())
    }

    /// Stop both channels; used on gateway shutdown.
    pub async fn shutdown(self: &Arc<Self>) {
        for side in ChannelSide::ALL {
            if let Err(error) = self.stop(side).await {
                tracing::warn!("stopping {side} on shutdown failed: {error}");
            }
        }
    }

    /// Record one observed frame: durable append first, broadcast second.
    ///
    /// A storage failure is returned to the caller and the frame is not
    /// broadcast; a broadcast without listeners is not a failure.
    pub async fn observe(&self, draft: TelegramDraft) -> Result<TelegramEvent, HistoryError> {
        let event = self.history.append(draft).await?;
        self.bus.publish_telegram(event.clone());
        Ok(event)
    }

    /// Apply a status transition and publish it. Returns the new epoch.
    async fn transition(&self, side: ChannelSide, status: ConnectionStatus) -> u64 {
        let runtime = self.runtime(side);
        {
            let mut current = runtime.status.write().await;
            *current = status.clone();
        }
        let epoch = runtime.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.bus.publish_status(StatusUpdate {
            channel: side,
            status,
        });
        epoch
    }

    /// One deferred timer per start attempt: if the channel still shows
    /// `connecting` with an unchanged epoch when it fires, the visible
    /// status falls back to disconnected.
    fn spawn_connect_watchdog(self: &Arc<Self>, side: ChannelSide, epoch: u64) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(supervisor.connect_timeout).await;
            let runtime = supervisor.runtime(side);
            let stale = {
                let status = runtime.status.read().await;
                status.state == LinkState::Connecting
                    && runtime.epoch.load(Ordering::SeqCst) == epoch
            };
            if stale {
                tracing::warn!(
                    "{side} still connecting after {:?}, resetting visible status",
                    supervisor.connect_timeout
                );
                supervisor
                    .transition(side, ConnectionStatus::disconnected())
                    .await;
            }
        });
    }
}

/// Per-link pump: stack observations → status tracker + capture pipeline.
async fn pump_events(
    supervisor: Arc<ConnectionSupervisor>,
    side: ChannelSide,
    mut rx: mpsc::Receiver<StackEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            StackEvent::Link { state, detail } => {
                if let Some(detail) = detail {
                    tracing::debug!("{side} link {state:?}: {detail}");
                }
                let runtime = supervisor.runtime(side);
                let status = match state {
                    LinkState::Connected => ConnectionStatus::connected(
                        runtime.stack.local_endpoint(),
                        runtime.stack.remote_endpoint(),
                    ),
                    LinkState::Connecting => ConnectionStatus::connecting(
                        runtime.stack.local_endpoint(),
                        runtime.stack.remote_endpoint(),
                    ),
                    LinkState::Disconnected => ConnectionStatus::disconnected(),
                };
                supervisor.transition(side, status).await;
            }
            StackEvent::Frame(draft) => {
                if let Err(error) = supervisor.observe(draft).await {
                    tracing::error!("{side} frame not recorded, not broadcast: {error}");
                }
            }
        }
    }
    tracing::debug!("{side} event pump ended");
}
