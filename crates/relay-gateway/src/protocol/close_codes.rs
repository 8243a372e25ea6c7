//! WebSocket close codes

use serde::{Deserialize, Serialize};

/// Why the gateway closed a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Internal failure, typically the outbound queue going away
    UnknownError = 4000,
    /// Client sent an op it may not send
    UnknownOpcode = 4001,
    /// Frame was not a valid gateway message
    DecodeError = 4002,
    /// Operation sent while the connection was not active
    NotAuthenticated = 4003,
    /// Outbound queue overflowed; the client should reconnect and resume
    SlowConsumer = 4008,
    /// No heartbeat within the timeout
    SessionTimeout = 4009,
}

impl CloseCode {
    pub const ALL: [Self; 6] = [
        Self::UnknownError,
        Self::UnknownOpcode,
        Self::DecodeError,
        Self::NotAuthenticated,
        Self::SlowConsumer,
        Self::SessionTimeout,
    ];

    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_u16() == value)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// True when the client broke the protocol, as opposed to the server
    /// giving up on an otherwise well-behaved connection
    #[must_use]
    pub const fn is_client_fault(self) -> bool {
        matches!(
            self,
            Self::UnknownOpcode | Self::DecodeError | Self::NotAuthenticated
        )
    }

    /// Reason text carried in the close frame
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::UnknownError => "unknown error",
            Self::UnknownOpcode => "op code not allowed from client",
            Self::DecodeError => "frame is not a gateway message",
            Self::NotAuthenticated => "connection is not active",
            Self::SlowConsumer => "outbound queue full",
            Self::SessionTimeout => "session timeout",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_u16(value).ok_or(value)
    }
}
