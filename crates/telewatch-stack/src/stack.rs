//! Stack capability trait and the placeholder implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use telewatch_events::{ChannelSide, Direction, FrameKind, LinkState, TelegramDraft};

use crate::signals::SignalDictionary;

/// Failure modes at the stack boundary.
#[derive(Debug, Error)]
pub enum StackError {
    /// `start` on a stack that is already running.
    #[error("stack already running")]
    AlreadyRunning,

    /// `stop` on a stack that is not running.
    #[error("stack not running")]
    NotRunning,

    /// The underlying stack failed to start or stop.
    #[error("stack failure: {0}")]
    Failed(String),
}

/// One observation emitted by a running stack.
#[derive(Debug)]
pub enum StackEvent {
    /// Link lifecycle transition, with optional detail text.
    Link {
        /// New link state.
        state: LinkState,
        /// Short human-readable reason.
        detail: Option<String>,
    },
    /// A frame was observed on the wire.
    Frame(TelegramDraft),
}

/// Channel on which a stack reports its observations.
pub type StackEventSender = mpsc::Sender<StackEvent>;

/// Capability boundary to the (out-of-scope) protocol stack.
///
/// The core never inspects stack-internal protocol bytes; it starts and
/// stops the stack and consumes its link transitions and observed frames.
#[async_trait]
pub trait TelecontrolStack: Send + Sync {
    /// Which logical endpoint this stack drives.
    fn side(&self) -> ChannelSide;

    /// Local address of the endpoint (`host:port`).
    fn local_endpoint(&self) -> String;

    /// Remote address of the peer (`host:port`).
    fn remote_endpoint(&self) -> String;

    /// Bring the link up; observations flow to `events` until `stop`.
    async fn start(&self, events: StackEventSender) -> Result<(), StackError>;

    /// Take the link down.
    async fn stop(&self) -> Result<(), StackError>;
}

/// Timing and addressing for the placeholder stack.
#[derive(Debug, Clone)]
pub struct PlaceholderConfig {
    /// Local address (`host:port`).
    pub local_endpoint: String,
    /// Remote address (`host:port`).
    pub remote_endpoint: String,
    /// Common address of the ASDU used for simulated I-frames.
    pub station: u16,
    /// Originator address used for simulated I-frames.
    pub originator: u8,
    /// Simulated dial time before the link reports ready.
    pub dial_delay: Duration,
    /// TESTFR keep-alive cadence.
    pub keepalive_interval: Duration,
    /// Cadence of simulated application traffic.
    pub traffic_interval: Duration,
}

impl PlaceholderConfig {
    /// Config with the original tool's timing defaults.
    #[must_use]
    pub fn new(local_endpoint: impl Into<String>, remote_endpoint: impl Into<String>) -> Self {
        Self {
            local_endpoint: local_endpoint.into(),
            remote_endpoint: remote_endpoint.into(),
            station: 1,
            originator: 0,
            dial_delay: Duration::from_millis(500),
            keepalive_interval: Duration::from_secs(15),
            traffic_interval: Duration::from_secs(5),
        }
    }
}

struct RunningLink {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Simulated IEC-104 endpoint.
///
/// No real telecontrol framing or sequencing happens here: the placeholder
/// reports a ready link after a dial delay and then produces STARTDT and
/// TESTFR control traffic plus I-frames synthesized from the signal
/// dictionary, so the observation pipeline sees realistic event shapes.
pub struct PlaceholderStack {
    side: ChannelSide,
    config: PlaceholderConfig,
    signals: Arc<SignalDictionary>,
    link: Mutex<Option<RunningLink>>,
}

impl PlaceholderStack {
    /// Create a stopped placeholder endpoint.
    #[must_use]
    pub fn new(side: ChannelSide, config: PlaceholderConfig, signals: Arc<SignalDictionary>) -> Self {
        Self {
            side,
            config,
            signals,
            link: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TelecontrolStack for PlaceholderStack {
    fn side(&self) -> ChannelSide {
        self.side
    }

    fn local_endpoint(&self) -> String {
        self.config.local_endpoint.clone()
    }

    fn remote_endpoint(&self) -> String {
        self.config.remote_endpoint.clone()
    }

    async fn start(&self, events: StackEventSender) -> Result<(), StackError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Err(StackError::AlreadyRunning);
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_link(
            self.side,
            self.config.clone(),
            Arc::clone(&self.signals),
            events,
            shutdown_rx,
        ));
        *link = Some(RunningLink { shutdown, task });
        tracing::info!("placeholder {} stack started", self.side);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StackError> {
        let running = self.link.lock().await.take();
        let Some(running) = running else {
            return Err(StackError::NotRunning);
        };
        let _ = running.shutdown.send(true);
        if running.task.await.is_err() {
            tracing::warn!("placeholder {} link task panicked on stop", self.side);
        }
        tracing::info!("placeholder {} stack stopped", self.side);
        Ok(())
    }
}

/// Simulated link lifecycle: dial, report ready, produce traffic, tear down.
async fn run_link(
    side: ChannelSide,
    config: PlaceholderConfig,
    signals: Arc<SignalDictionary>,
    events: StackEventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    // Direction of monitor-direction data as seen by this endpoint.
    let data_direction = match side {
        ChannelSide::Client => Direction::Incoming,
        ChannelSide::Server => Direction::Outgoing,
    };
    let control_direction = match side {
        ChannelSide::Client => Direction::Outgoing,
        ChannelSide::Server => Direction::Incoming,
    };
    let plain = |direction: Direction, kind: FrameKind, label: &str| {
        TelegramDraft::plain(
            side,
            direction,
            kind,
            label,
            config.local_endpoint.clone(),
            config.remote_endpoint.clone(),
        )
    };
    let link = |state: LinkState, detail: &str| StackEvent::Link {
        state,
        detail: Some(detail.to_string()),
    };

    let detail = format!("dialing {}", config.remote_endpoint);
    if events.send(link(LinkState::Connecting, &detail)).await.is_err() {
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(config.dial_delay) => {}
        _ = shutdown.changed() => {
            let _ = events.send(link(LinkState::Disconnected, "stopped while dialing")).await;
            return;
        }
    }

    let connect_frames = [
        plain(control_direction, FrameKind::Tcp, "Verbindung aufgebaut"),
        plain(control_direction, FrameKind::U, "STARTDT act"),
        plain(control_direction.flip(), FrameKind::U, "STARTDT con"),
    ];
    for frame in connect_frames {
        if events.send(StackEvent::Frame(frame)).await.is_err() {
            return;
        }
    }
    if events
        .send(link(LinkState::Connected, "TCP and IEC-104 link established"))
        .await
        .is_err()
    {
        return;
    }

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    let mut traffic = tokio::time::interval_at(
        tokio::time::Instant::now() + config.traffic_interval,
        config.traffic_interval,
    );
    let mut data_frames: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = keepalive.tick() => {
                let act = plain(control_direction, FrameKind::U, "TESTFR act");
                let con = plain(control_direction.flip(), FrameKind::U, "TESTFR con");
                if events.send(StackEvent::Frame(act)).await.is_err()
                    || events.send(StackEvent::Frame(con)).await.is_err()
                {
                    return;
                }
            }
            _ = traffic.tick() => {
                let Some(row) = pick_row(&signals) else { continue };
                let label = signals.resolve_label(row.ioa, row.type_id, row.cause);
                let mut draft = plain(data_direction, FrameKind::I, &label).with_asdu(
                    row.type_id,
                    row.cause,
                    config.originator,
                    config.station,
                    row.ioa,
                );
                if !row.value.is_empty() {
                    draft = draft.with_value(row.value.clone());
                }
                if events.send(StackEvent::Frame(draft)).await.is_err() {
                    return;
                }
                data_frames += 1;
                // Acknowledge a batch of I-frames with one S-frame.
                if data_frames % 4 == 0 {
                    let ack = plain(data_direction.flip(), FrameKind::S, "S-Frame");
                    if events.send(StackEvent::Frame(ack)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    let _ = events
        .send(StackEvent::Frame(plain(
            control_direction,
            FrameKind::Tcp,
            "Verbindung getrennt",
        )))
        .await;
    let _ = events.send(link(LinkState::Disconnected, "stopped")).await;
}

fn pick_row(signals: &SignalDictionary) -> Option<crate::signals::SignalRow> {
    let mut rng = rand::thread_rng();
    signals.rows().choose(&mut rng).cloned()
}

/// Direction helper local to the simulator.
trait Flip {
    fn flip(self) -> Self;
}

impl Flip for Direction {
    fn flip(self) -> Self {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> PlaceholderConfig {
        let mut config = PlaceholderConfig::new("127.0.0.1:2404", "127.0.0.1:55000");
        config.dial_delay = Duration::from_millis(5);
        config.keepalive_interval = Duration::from_millis(20);
        config.traffic_interval = Duration::from_millis(10);
        config
    }

    fn signals() -> Arc<SignalDictionary> {
        Arc::new(SignalDictionary::from_rows(vec![crate::signals::SignalRow {
            ioa: 100,
            label: "Leistungsschalter Q0".to_string(),
            type_id: 1,
            cause: 20,
            value: "1".to_string(),
        }]))
    }

    #[tokio::test]
    async fn placeholder_reports_ready_and_produces_traffic() {
        let stack = PlaceholderStack::new(ChannelSide::Server, fast_config(), signals());
        let (tx, mut rx) = mpsc::channel(64);
        stack.start(tx).await.unwrap();

        let mut connected = false;
        let mut saw_i_frame = false;
        while let Some(event) = rx.recv().await {
            match event {
                StackEvent::Link {
                    state: LinkState::Connected,
                    ..
                } => connected = true,
                StackEvent::Frame(frame) if frame.frame_kind == FrameKind::I => {
                    assert_eq!(frame.ioa, Some(100));
                    assert_eq!(frame.label, "Leistungsschalter Q0");
                    saw_i_frame = true;
                }
                _ => {}
            }
            if connected && saw_i_frame {
                break;
            }
        }
        assert!(connected && saw_i_frame);

        stack.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_emits_final_disconnect() {
        let stack = PlaceholderStack::new(ChannelSide::Client, fast_config(), signals());
        let (tx, mut rx) = mpsc::channel(64);
        stack.start(tx).await.unwrap();
        stack.stop().await.unwrap();

        let mut last_link = None;
        while let Ok(event) = rx.try_recv() {
            if let StackEvent::Link { state, .. } = event {
                last_link = Some(state);
            }
        }
        assert_eq!(last_link, Some(LinkState::Disconnected));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let stack = PlaceholderStack::new(ChannelSide::Client, fast_config(), signals());
        let (tx, _rx) = mpsc::channel(64);
        stack.start(tx.clone()).await.unwrap();
        assert!(matches!(
            stack.start(tx).await,
            Err(StackError::AlreadyRunning)
        ));
        stack.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let stack = PlaceholderStack::new(ChannelSide::Server, fast_config(), signals());
        assert!(matches!(stack.stop().await, Err(StackError::NotRunning)));
    }
}
