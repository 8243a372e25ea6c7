//! Gateway message format
//!
//! Defines the structure for all WebSocket messages.

use super::{
    AckPayload, CloseCode, HelloPayload, JoinChannelPayload, LeaveChannelPayload, OpCode,
    SendMessagePayload,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message format
///
/// All messages sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Request nonce, echoed back on the matching Ack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<Value>,

    /// Event data payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn new(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            t: None,
            s: None,
            n: None,
            d,
        }
    }

    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    ///
    /// The sequence number is assigned when the frame is written.
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            t: Some(event_type.into()),
            ..Self::new(OpCode::Dispatch, Some(data))
        }
    }

    /// Create a Hello message (op=10)
    #[must_use]
    pub fn hello(payload: HelloPayload) -> Self {
        Self::new(OpCode::Hello, Some(serde_json::to_value(payload).unwrap_or_default()))
    }

    /// Create a Heartbeat ACK message (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, None)
    }

    /// Create an Ack message (op=6) answering the request carrying `nonce`
    #[must_use]
    pub fn ack(nonce: Option<Value>, payload: AckPayload) -> Self {
        Self {
            n: nonce,
            ..Self::new(OpCode::Ack, Some(serde_json::to_value(payload).unwrap_or_default()))
        }
    }

    // === Parsing Client Messages ===

    fn payload<T: DeserializeOwned>(&self, op: OpCode) -> Option<Result<T, serde_json::Error>> {
        if self.op != op {
            return None;
        }
        Some(serde_json::from_value(self.d.clone().unwrap_or(Value::Null)))
    }

    /// Parse as a Join Channel payload (op=2)
    pub fn as_join_channel(&self) -> Option<Result<JoinChannelPayload, serde_json::Error>> {
        self.payload(OpCode::JoinChannel)
    }

    /// Parse as a Send Message payload (op=3)
    pub fn as_send_message(&self) -> Option<Result<SendMessagePayload, serde_json::Error>> {
        self.payload(OpCode::SendMessage)
    }

    /// Parse as a Leave Channel payload (op=4)
    pub fn as_leave_channel(&self) -> Option<Result<LeaveChannelPayload, serde_json::Error>> {
        self.payload(OpCode::LeaveChannel)
    }

    /// Parse the last seen message id of a heartbeat (op=1)
    pub fn as_heartbeat_offset(&self) -> Option<Option<i64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_i64))
    }

    /// Parse as an Ack payload (op=6)
    pub fn as_ack(&self) -> Option<AckPayload> {
        self.payload(OpCode::Ack).and_then(Result::ok)
    }

    // === Utilities ===

    /// Check if this is a valid client message
    #[must_use]
    pub fn is_valid_client_message(&self) -> bool {
        self.op.is_client_op()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create an error close frame
    #[must_use]
    pub fn close_frame(code: CloseCode) -> (u16, String) {
        (code.as_u16(), code.reason().to_string())
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
