//! Request and Response message types.
//!
//! Error responses are converted into typed [`Error`] variants here, by
//! error code, so nothing above the adapter has to read backend messages.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, RequestId};

use super::Command;

// ============================================================================
// Request
// ============================================================================

/// A command request from client to backend.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "method": "module.methodName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Command with method and params.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            id: RequestId::generate(),
            command,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response from backend to client.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "uuid", "type": "success", "result": { ... } }
/// ```
///
/// Error:
/// ```json
/// { "id": "uuid", "type": "error", "error": "forbidden", "message": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Response type.
    #[serde(rename = "type")]
    pub response_type: ResponseType,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error code (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            response_type: ResponseType::Success,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn error(id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            response_type: ResponseType::Error,
            result: None,
            error: Some(code.into()),
            message: Some(message.into()),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response_type == ResponseType::Success
    }

    /// Extracts the result value.
    ///
    /// # Errors
    ///
    /// The typed error for the response's error code.
    pub fn into_result(self) -> Result<Value> {
        self.into_result_inner(None)
    }

    /// Extracts the result value of a channel operation.
    ///
    /// Permission codes become [`Error::ChannelRejected`] for `channel_id`.
    ///
    /// # Errors
    ///
    /// The typed error for the response's error code.
    pub fn into_channel_result(self, channel_id: &ChannelId) -> Result<Value> {
        self.into_result_inner(Some(channel_id))
    }

    fn into_result_inner(self, channel_id: Option<&ChannelId>) -> Result<Value> {
        match self.response_type {
            ResponseType::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseType::Error => {
                let code = self.error.unwrap_or_else(|| "unknown".to_string());
                let message = self.message.unwrap_or_else(|| code.clone());
                Err(remote_error(&code, message, channel_id))
            }
        }
    }
}

// ============================================================================
// ResponseType
// ============================================================================

/// Response type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Maps a backend error code onto a typed error.
#[must_use]
pub fn remote_error(code: &str, message: String, channel_id: Option<&ChannelId>) -> Error {
    match (code, channel_id) {
        ("unauthorized" | "token_expired" | "invalid_token", _) => Error::auth_rejected(message),
        ("forbidden" | "not_allowed" | "not_found", Some(channel_id)) => {
            Error::channel_rejected(channel_id.clone(), message)
        }
        ("timeout", _) => Error::timeout(message, 0),
        ("unavailable" | "rate_limited", _) => Error::network(message),
        _ => Error::Remote {
            code: code.to_string(),
            message,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConnectionCommand, MessageCommand};

    #[test]
    fn test_request_serialization() {
        let request = Request::new(Command::Message(MessageCommand::Send {
            channel_id: ChannelId::from_raw("u1-u2"),
            text: "hi".into(),
        }));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["id"], request.id.to_string());
        assert_eq!(json["method"], "message.send");
        assert_eq!(json["params"]["text"], "hi");
    }

    #[test]
    fn test_disconnect_request_has_no_params() {
        let request = Request::new(Command::Connection(ConnectionCommand::Disconnect));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "connection.disconnect");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_success_response() {
        let json_str = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "type": "success",
            "result": {"messageId": "m1"}
        }"#;

        let response: Response = serde_json::from_str(json_str).unwrap();
        assert!(response.is_success());
        let result = response.into_result().unwrap();
        assert_eq!(result["messageId"], "m1");
    }

    #[test]
    fn test_unauthorized_is_auth_rejected() {
        let response = Response::error(RequestId::generate(), "token_expired", "expired");
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, Error::AuthRejected { .. }));
    }

    #[test]
    fn test_forbidden_on_channel_is_channel_rejected() {
        let channel_id = ChannelId::from_raw("u1-u2");
        let response = Response::error(RequestId::generate(), "forbidden", "not a member");
        let err = response.into_channel_result(&channel_id).unwrap_err();
        assert!(matches!(err, Error::ChannelRejected { channel_id: ref id, .. } if *id == channel_id));
    }

    #[test]
    fn test_unknown_code_is_remote() {
        let response = Response::error(RequestId::generate(), "teapot", "short and stout");
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, Error::Remote { ref code, .. } if code == "teapot"));
    }

    #[test]
    fn test_error_without_message_uses_code() {
        let json_str = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "type": "error",
            "error": "unavailable"
        }"#;

        let response: Response = serde_json::from_str(json_str).unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Network error: unavailable");
    }
}
