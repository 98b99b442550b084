//! Tagged push messages for observer sessions.

use serde::{Deserialize, Serialize};

use crate::status::StatusUpdate;
use crate::telegram::TelegramEvent;

/// Test-run lifecycle notice for the live stream.
///
/// Step statuses travel as their wire strings so the envelope stays
/// independent of the orchestrator's internal types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestNotice {
    /// A run was admitted and its steps snapshotted.
    RunStarted {
        /// Run identifier.
        run_id: String,
        /// Configuration the run executes.
        config_id: String,
        /// Configuration display name.
        name: String,
    },
    /// One step changed status.
    StepStatus {
        /// Run identifier.
        run_id: String,
        /// 1-based step index.
        index: u32,
        /// New status (wire string, e.g. `running`, `success`, `failed`).
        status: String,
    },
    /// The run reached a terminal state.
    RunFinished {
        /// Run identifier.
        run_id: String,
        /// Terminal state (`finished` or `aborted`).
        state: String,
    },
}

/// One message on the live push channel.
///
/// Wire format: `{"type": "status" | "telegram" | "test", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Envelope {
    /// A connection status transition.
    Status(StatusUpdate),
    /// A newly recorded telegram.
    Telegram(TelegramEvent),
    /// A test-run lifecycle notice.
    Test(TestNotice),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ConnectionStatus;
    use crate::telegram::ChannelSide;

    #[test]
    fn status_envelope_wire_shape() {
        let envelope = Envelope::Status(StatusUpdate {
            channel: ChannelSide::Server,
            status: ConnectionStatus::disconnected(),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["payload"]["channel"], "server");
        assert_eq!(json["payload"]["connected"], false);
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::Test(TestNotice::StepStatus {
            run_id: "run-1".to_string(),
            index: 2,
            status: "failed".to_string(),
        });
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"test\""));
        assert!(json.contains("\"event\":\"step_status\""));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
