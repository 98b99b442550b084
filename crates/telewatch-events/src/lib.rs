//! Event model and live broadcast hub for telewatch.
//!
//! Every discrete observation in the system — a decoded telegram, a link
//! status transition, a test-run step update — is represented here and
//! fanned out to observer sessions through the [`EventBus`].
//!
//! # Architecture
//!
//! ```text
//! stack activity ─▶ TelegramDraft ─▶ history (assigns sequence/delta)
//!                                         │
//!                                         ▼
//!                        Envelope ─▶ EventBus.publish() ─▶ broadcast::Sender
//!                                         │
//!                                         ▼
//!                            fan-out to observer WebSocket sessions
//! ```
//!
//! The bus carries only messages published *after* subscription time;
//! observers backfill from the history store and deduplicate the seam via
//! the per-channel `sequence` carried by every telegram.

use tokio::sync::broadcast;

mod envelope;
mod status;
mod telegram;

pub use envelope::{Envelope, TestNotice};
pub use status::{ConnectionStatus, LinkState, StatusUpdate};
pub use telegram::{
    ChannelSide, Direction, FrameKind, TelegramDraft, TelegramEvent, UnknownChannel,
};

/// Live fan-out hub for push messages.
///
/// Backed by `tokio::sync::broadcast` for:
/// - thread-safe 1-to-many fan-out
/// - non-blocking publish
/// - automatic cleanup on receiver drop
///
/// A subscriber that falls more than `capacity` messages behind observes
/// `RecvError::Lagged` on its own receiver; publishers and other
/// subscribers are never blocked by it.
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast sender (clonable for multiple publishers).
    tx: broadcast::Sender<Envelope>,
    /// Per-subscriber buffer capacity.
    capacity: usize,
}

impl EventBus {
    /// Create a new bus with the given per-subscriber capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Per-subscriber buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an envelope to all current subscribers.
    ///
    /// Returns the number of subscribers that received the message.
    /// Returns 0 when nobody is listening (not an error).
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.tx.send(envelope).unwrap_or(0)
    }

    /// Publish a finalized telegram event.
    pub fn publish_telegram(&self, event: TelegramEvent) -> usize {
        self.publish(Envelope::Telegram(event))
    }

    /// Publish a connection status transition.
    pub fn publish_status(&self, update: StatusUpdate) -> usize {
        self.publish(Envelope::Status(update))
    }

    /// Publish a test-run lifecycle notice.
    pub fn publish_test(&self, notice: TestNotice) -> usize {
        self.publish(Envelope::Test(notice))
    }

    /// Subscribe to the bus.
    ///
    /// The receiver sees every envelope published after this call — never a
    /// replay of earlier traffic. Dropping it unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
