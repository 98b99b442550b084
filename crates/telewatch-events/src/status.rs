//! Connection status snapshot values.

use serde::{Deserialize, Serialize};

use crate::telegram::ChannelSide;

/// Externally visible link state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No link; the stack is stopped or the connection dropped.
    Disconnected,
    /// A start command was accepted and the stack is dialing.
    Connecting,
    /// The stack reported a ready link.
    Connected,
}

/// Point-in-time connection state of one channel.
///
/// A current-value cache, not an event log: only the latest value per
/// channel is retained, while each transition also travels through the
/// broadcast hub as a [`StatusUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// True only in [`LinkState::Connected`].
    pub connected: bool,
    /// Local address of the endpoint when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<String>,
    /// Remote address of the peer when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<String>,
    /// Full state, including the transient `connecting` phase.
    pub state: LinkState,
}

impl ConnectionStatus {
    /// The initial state of every channel.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            local_endpoint: None,
            remote_endpoint: None,
            state: LinkState::Disconnected,
        }
    }

    /// Status for a dialing link.
    #[must_use]
    pub fn connecting(local_endpoint: impl Into<String>, remote_endpoint: impl Into<String>) -> Self {
        Self {
            connected: false,
            local_endpoint: Some(local_endpoint.into()),
            remote_endpoint: Some(remote_endpoint.into()),
            state: LinkState::Connecting,
        }
    }

    /// Status for an established link.
    #[must_use]
    pub fn connected(local_endpoint: impl Into<String>, remote_endpoint: impl Into<String>) -> Self {
        Self {
            connected: true,
            local_endpoint: Some(local_endpoint.into()),
            remote_endpoint: Some(remote_endpoint.into()),
            state: LinkState::Connected,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// A status transition as pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Channel the transition happened on.
    pub channel: ChannelSide,
    /// New status value.
    #[serde(flatten)]
    pub status: ConnectionStatus,
}
