//! Canonical representation of one observed protocol event.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical endpoint a telegram was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSide {
    /// The controlling station (master) side.
    Client,
    /// The controlled station (slave) side.
    Server,
}

impl ChannelSide {
    /// Both channels, in display order.
    pub const ALL: [ChannelSide; 2] = [ChannelSide::Client, ChannelSide::Server];

    /// Stable lowercase name used on the wire and in file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelSide::Client => "client",
            ChannelSide::Server => "server",
        }
    }

    /// The opposite endpoint.
    #[must_use]
    pub fn peer(self) -> ChannelSide {
        match self {
            ChannelSide::Client => ChannelSide::Server,
            ChannelSide::Server => ChannelSide::Client,
        }
    }
}

impl fmt::Display for ChannelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a channel name that is neither `client` nor `server`.
#[derive(Debug, Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelSide {
    type Err = UnknownChannel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "client" => Ok(ChannelSide::Client),
            "server" => Ok(ChannelSide::Server),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Transfer direction relative to the observed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received by the endpoint.
    Incoming,
    /// Sent by the endpoint.
    Outgoing,
}

/// Frame category of an observed telegram.
///
/// `I` carries application data, `S`/`U` are link control, `Tcp` marks a
/// raw connection-level event (connect, disconnect, socket error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Information transfer frame.
    I,
    /// Supervisory (acknowledge) frame.
    S,
    /// Unnumbered control frame (STARTDT, STOPDT, TESTFR).
    U,
    /// TCP-level connection event, no IEC-104 framing.
    #[serde(rename = "TCP")]
    Tcp,
}

/// A telegram as observed by a stack, before the history store finalizes it.
///
/// `sequence`, `timestamp` and `delta` are assigned at capture time by the
/// history store; everything else is filled in by the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct TelegramDraft {
    /// Observing endpoint.
    pub channel: ChannelSide,
    /// Transfer direction.
    pub direction: Direction,
    /// Frame category.
    pub frame_kind: FrameKind,
    /// Local address of the observing endpoint (`host:port`).
    pub local_endpoint: String,
    /// Remote address of the peer (`host:port`).
    pub remote_endpoint: String,
    /// Human-readable description, resolved against the signal dictionary.
    pub label: String,
    /// ASDU type identification (I-frames only).
    pub type_id: Option<u8>,
    /// Cause of transmission (I-frames only).
    pub cause: Option<u8>,
    /// Originator address (I-frames only).
    pub originator: Option<u8>,
    /// Common address of the ASDU (I-frames only).
    pub station: Option<u16>,
    /// Information object address, 3-byte composite (I-frames only).
    pub ioa: Option<u32>,
    /// Decoded information value as display text (I-frames only).
    pub value: Option<String>,
}

impl TelegramDraft {
    /// Draft for a link-control or TCP-level telegram without ASDU fields.
    #[must_use]
    pub fn plain(
        channel: ChannelSide,
        direction: Direction,
        frame_kind: FrameKind,
        label: impl Into<String>,
        local_endpoint: impl Into<String>,
        remote_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            direction,
            frame_kind,
            local_endpoint: local_endpoint.into(),
            remote_endpoint: remote_endpoint.into(),
            label: label.into(),
            type_id: None,
            cause: None,
            originator: None,
            station: None,
            ioa: None,
            value: None,
        }
    }

    /// Draft for a TCP-level connection event.
    #[must_use]
    pub fn tcp(
        channel: ChannelSide,
        direction: Direction,
        label: impl Into<String>,
        local_endpoint: impl Into<String>,
        remote_endpoint: impl Into<String>,
    ) -> Self {
        Self::plain(
            channel,
            direction,
            FrameKind::Tcp,
            label,
            local_endpoint,
            remote_endpoint,
        )
    }

    /// Attach the application-layer fields of an I-frame.
    #[must_use]
    pub fn with_asdu(mut self, type_id: u8, cause: u8, originator: u8, station: u16, ioa: u32) -> Self {
        self.type_id = Some(type_id);
        self.cause = Some(cause);
        self.originator = Some(originator);
        self.station = Some(station);
        self.ioa = Some(ioa);
        self
    }

    /// Attach the decoded information value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Finalize the draft with capture metadata assigned by the history store.
    #[must_use]
    pub fn into_event(self, sequence: u64, timestamp: DateTime<Utc>, delta: f64) -> TelegramEvent {
        TelegramEvent {
            channel: self.channel,
            sequence,
            direction: self.direction,
            frame_kind: self.frame_kind,
            timestamp,
            delta,
            local_endpoint: self.local_endpoint,
            remote_endpoint: self.remote_endpoint,
            label: self.label,
            type_id: self.type_id,
            cause: self.cause,
            originator: self.originator,
            station: self.station,
            ioa: self.ioa,
            value: self.value,
        }
    }
}

/// One finalized, observed protocol event.
///
/// The unit flowing through both the durable history and the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramEvent {
    /// Observing endpoint.
    pub channel: ChannelSide,
    /// Per-channel capture index, strictly increasing, reset only by a
    /// history clear.
    pub sequence: u64,
    /// Transfer direction.
    pub direction: Direction,
    /// Frame category.
    pub frame_kind: FrameKind,
    /// Capture time, sub-millisecond resolution.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the previous accepted event on the same
    /// (channel, direction) pair; 0.0 for the first.
    pub delta: f64,
    /// Local address of the observing endpoint.
    pub local_endpoint: String,
    /// Remote address of the peer.
    pub remote_endpoint: String,
    /// Human-readable description.
    pub label: String,
    /// ASDU type identification (I-frames only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_id: Option<u8>,
    /// Cause of transmission (I-frames only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<u8>,
    /// Originator address (I-frames only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator: Option<u8>,
    /// Common address of the ASDU (I-frames only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station: Option<u16>,
    /// Information object address (I-frames only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ioa: Option<u32>,
    /// Decoded information value (I-frames only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn channel_side_round_trip() {
        for side in ChannelSide::ALL {
            let parsed: ChannelSide = side.as_str().parse().unwrap();
            assert_eq!(parsed, side);
        }
        assert!("link".parse::<ChannelSide>().is_err());
    }

    #[test]
    fn frame_kind_wire_names() {
        assert_eq!(serde_json::to_string(&FrameKind::I).unwrap(), "\"I\"");
        assert_eq!(serde_json::to_string(&FrameKind::Tcp).unwrap(), "\"TCP\"");
    }

    #[test]
    fn asdu_fields_are_skipped_when_absent() {
        let event = TelegramDraft::tcp(
            ChannelSide::Client,
            Direction::Incoming,
            "Verbindung getrennt",
            "127.0.0.1:2404",
            "10.0.0.2:2404",
        )
        .into_event(7, Utc::now(), 1.5);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "client");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["frame_kind"], "TCP");
        assert!(json.get("type_id").is_none());
        assert!(json.get("ioa").is_none());
    }

    #[test]
    fn i_frame_round_trip() {
        let event = TelegramDraft::plain(
            ChannelSide::Server,
            Direction::Outgoing,
            FrameKind::I,
            "GENERALABFRAGE",
            "0.0.0.0:2404",
            "10.0.0.2:55001",
        )
        .with_asdu(100, 6, 0, 1, 0)
        .with_value("0x14")
        .into_event(1, Utc::now(), 0.0);

        let json = serde_json::to_string(&event).unwrap();
        let back: TelegramEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.type_id, Some(100));
        assert_eq!(back.ioa, Some(0));
    }
}
