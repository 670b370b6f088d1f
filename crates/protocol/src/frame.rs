//! RPC framing: Call / CallResult / CallError.
//!
//! ```text
//! Call        [2, "<uniqueId>", "<action>", {payload}]
//! CallResult  [3, "<uniqueId>", {payload}]
//! CallError   [4, "<uniqueId>", "<errorCode>", "<description>", {details}]
//! ```

use serde_json::{Value, json};

use crate::{ErrorCode, message_type};

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        code: ErrorCode,
        description: String,
        details: Value,
    },
}

impl Frame {
    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    pub fn error(
        unique_id: impl Into<String>,
        code: ErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            code,
            description: description.into(),
            details: json!({}),
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn message_type(&self) -> u64 {
        match self {
            Self::Call { .. } => message_type::CALL,
            Self::CallResult { .. } => message_type::CALL_RESULT,
            Self::CallError { .. } => message_type::CALL_ERROR,
        }
    }
}

/// Why an inbound text could not be read as a [`Frame`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("unknown message type id: {0}")]
    UnknownMessageType(u64),
}

/// Serialize a frame into its JSON array text form.
pub fn encode(frame: &Frame) -> String {
    let value = match frame {
        Frame::Call {
            unique_id,
            action,
            payload,
        } => json!([message_type::CALL, unique_id, action, payload]),
        Frame::CallResult { unique_id, payload } => {
            json!([message_type::CALL_RESULT, unique_id, payload])
        },
        Frame::CallError {
            unique_id,
            code,
            description,
            details,
        } => json!([
            message_type::CALL_ERROR,
            unique_id,
            code.as_str(),
            description,
            details
        ]),
    };
    value.to_string()
}

/// Parse one inbound text message.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Array(mut items) = value else {
        return Err(DecodeError::Malformed("frame is not a json array"));
    };
    if items.len() < 3 {
        return Err(DecodeError::Malformed("frame has fewer than 3 elements"));
    }

    let type_id = items[0]
        .as_u64()
        .ok_or(DecodeError::Malformed("message type id is not an integer"))?;
    // Any string is a valid id; correlation is the session's concern.
    let unique_id = take_string(&mut items[1], "unique id is not a string")?;

    match type_id {
        message_type::CALL => {
            if items.len() != 4 {
                return Err(DecodeError::Malformed("call must have 4 elements"));
            }
            let action = take_string(&mut items[2], "action is not a string")?;
            Ok(Frame::Call {
                unique_id,
                action,
                payload: items[3].take(),
            })
        },
        message_type::CALL_RESULT => {
            if items.len() != 3 {
                return Err(DecodeError::Malformed("call result must have 3 elements"));
            }
            Ok(Frame::CallResult {
                unique_id,
                payload: items[2].take(),
            })
        },
        message_type::CALL_ERROR => {
            if !(4..=5).contains(&items.len()) {
                return Err(DecodeError::Malformed("call error must have 4 or 5 elements"));
            }
            let code = take_string(&mut items[2], "error code is not a string")?;
            let description = take_string(&mut items[3], "error description is not a string")?;
            let details = items.get_mut(4).map(Value::take).unwrap_or_else(|| json!({}));
            Ok(Frame::CallError {
                unique_id,
                code: ErrorCode::from_wire(&code),
                description,
                details,
            })
        },
        other => Err(DecodeError::UnknownMessageType(other)),
    }
}

fn take_string(value: &mut Value, reason: &'static str) -> Result<String, DecodeError> {
    match value.take() {
        Value::String(s) => Ok(s),
        _ => Err(DecodeError::Malformed(reason)),
    }
}
