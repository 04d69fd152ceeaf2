//! Duplex-channel wire protocol (§6): a newline-framed-equivalent typed
//! JSON message enum, adapted from the gRPC streaming shape of
//! `knhk-sidecar`'s REST/gRPC proxy server to a single `type`-tagged
//! envelope carried over an Axum WebSocket.

use hookbridge_metrics::OverallMetrics;
use hookbridge_protocol::{HookEvent, HookResponse, RequestId};
use serde::{Deserialize, Serialize};

/// Maximum duplex-channel frame size (§4.1).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DuplexMessage {
    HookRequest {
        id: RequestId,
        data: HookEvent,
    },
    HookResponse {
        id: RequestId,
        data: HookResponse,
    },
    PerformanceQuery {
        id: RequestId,
    },
    PerformanceResponse {
        id: RequestId,
        data: OverallMetrics,
    },
    HealthCheck {
        id: RequestId,
    },
    HealthResponse {
        id: RequestId,
        healthy: bool,
    },
    ConnectionConfirmed {
        id: RequestId,
        principal: String,
    },
    Error {
        id: Option<RequestId>,
        kind: String,
        message: String,
    },
}

impl DuplexMessage {
    pub fn error(id: Option<RequestId>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        DuplexMessage::Error {
            id,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookbridge_protocol::HookKind;

    #[test]
    fn hook_request_round_trips_through_json() {
        let event = HookEvent::new(HookKind::PreTool, "s1", "Bash");
        let msg = DuplexMessage::HookRequest { id: event.id, data: event };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"hook_request\""));
        let back: DuplexMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, DuplexMessage::HookRequest { .. }));
    }

    #[test]
    fn unknown_type_fails_to_parse_as_a_parse_error_not_a_panic() {
        let raw = r#"{"type":"something_unrecognized"}"#;
        let result: Result<DuplexMessage, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }
}
