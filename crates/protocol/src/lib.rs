//! Wire protocol spoken between charging stations and the gateway.
//!
//! Every WebSocket text message on a session is either an RPC frame
//! (`[messageTypeId, uniqueId, ...]`, see [`frame`]) or, in the
//! server-to-station direction only, a plain text push line.

pub mod frame;
pub mod messages;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use frame::{DecodeError, Frame, decode, encode};

/// WebSocket sub-protocol advertised during the upgrade.
pub const SUBPROTOCOL: &str = "ocpp2.0.1";

/// Text sent once on a freshly admitted connection.
pub const WELCOME_MESSAGE: &str = "Welcome! You are authenticated.";

/// Close reason sent when the `token` query parameter is absent or unknown.
pub const AUTH_FAILED_REASON: &str = "Invalid or missing authentication token.";

/// Close reason sent when the request path carries no station identity.
pub const MISSING_IDENTITY_REASON: &str = "Missing charging station identity.";

/// Close reason sent to an older session when its identity reconnects.
pub const SUPERSEDED_REASON: &str = "Superseded by a new connection.";

/// Heartbeat interval (seconds) suggested in a BootNotification result.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u32 = 10;

/// Spacing between two telemetry push lines.
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 2_000;

/// Telemetry lines pushed to every station, in order, repeating.
pub const DEFAULT_TELEMETRY_SAMPLES: &[&str] = &[
    "Data1: Voltage: 220V",
    "Data2: Current: 10A",
    "Data3: Temperature: 25C",
];

// ── Message type ids ─────────────────────────────────────────────────────────

pub mod message_type {
    pub const CALL: u64 = 2;
    pub const CALL_RESULT: u64 = 3;
    pub const CALL_ERROR: u64 = 4;
}

// ── Error codes ──────────────────────────────────────────────────────────────

/// `errorCode` carried by a CallError frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormatViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    MessageTypeNotSupported,
    RpcFrameworkError,
    GenericError,
}

impl ErrorCode {
    pub const ALL: &[ErrorCode] = &[
        Self::NotImplemented,
        Self::NotSupported,
        Self::InternalError,
        Self::ProtocolError,
        Self::SecurityError,
        Self::FormatViolation,
        Self::PropertyConstraintViolation,
        Self::OccurrenceConstraintViolation,
        Self::TypeConstraintViolation,
        Self::MessageTypeNotSupported,
        Self::RpcFrameworkError,
        Self::GenericError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormatViolation => "FormatViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::MessageTypeNotSupported => "MessageTypeNotSupported",
            Self::RpcFrameworkError => "RpcFrameworkError",
            Self::GenericError => "GenericError",
        }
    }

    /// Lenient parse: unrecognized codes collapse into `GenericError`.
    pub fn from_wire(s: &str) -> Self {
        s.parse().unwrap_or(Self::GenericError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error code: {0}")]
pub struct UnknownErrorCode(pub String);

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownErrorCode(s.to_string()))
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&s))
    }
}
