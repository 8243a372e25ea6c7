//! Frame operation codes

use serde::{Deserialize, Serialize};

/// The `op` field of a gateway frame
///
/// Travels as a bare integer. Dispatch, Ack, Hello and HeartbeatAck only ever
/// flow server to client; a client sending one is closed with 4001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OpCode {
    /// Channel event with a sequence number
    Dispatch = 0,
    /// Keepalive, optionally carrying the last seen message id
    Heartbeat = 1,
    JoinChannel = 2,
    SendMessage = 3,
    LeaveChannel = 4,
    /// Reply to a client frame, echoing its nonce
    Ack = 6,
    /// First frame on every connection
    Hello = 10,
    HeartbeatAck = 11,
}

impl OpCode {
    /// Ops a client is allowed to send
    pub const CLIENT: [Self; 4] = [
        Self::Heartbeat,
        Self::JoinChannel,
        Self::SendMessage,
        Self::LeaveChannel,
    ];

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_client_op(self) -> bool {
        Self::CLIENT.contains(&self)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::JoinChannel,
            3 => Self::SendMessage,
            4 => Self::LeaveChannel,
            6 => Self::Ack,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(format!("invalid op code: {other}")),
        };
        Ok(op)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.as_u8()
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}({})", self.as_u8())
    }
}
