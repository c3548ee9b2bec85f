//! Wire protocol between notify clients and the agent
//!
//! One connection carries exactly one request and one response, each a
//! single UTF-8 JSON document terminated by `\n`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format_timestamp;

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors raised by the wire codec
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Invalid UTF-8 payload: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Invalid JSON payload: {0}")]
    Schema(String),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Message discriminator; only `notify` exists today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Notify,
}

/// Command stashed by the agent and run when the notification is clicked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyAction {
    /// Absolute path of the program to run
    pub executable: String,
    /// Arguments passed verbatim
    pub arguments: Vec<String>,
}

/// Request sent by a short-lived client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub request_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub sound: Option<String>,
    pub action: NotifyAction,
    #[serde(default)]
    pub source: Option<String>,
}

impl NotifyRequest {
    /// Build a version 1 notify request
    pub fn new(
        request_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        sound: Option<String>,
        action: NotifyAction,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: MessageType::Notify,
            request_id: request_id.into(),
            title: title.into(),
            message: message.into(),
            sound,
            action,
            source: Some(env!("CARGO_PKG_NAME").to_string()),
        }
    }
}

/// Failure codes surfaced to notify callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    BadRequest,
    PermissionDenied,
    InvalidAction,
    EnqueueFailed,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::BadRequest => "bad_request",
            FailureCode::PermissionDenied => "permission_denied",
            FailureCode::InvalidAction => "invalid_action",
            FailureCode::EnqueueFailed => "enqueue_failed",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent reply: either success with `request_id`/`queued_at` or failure with `code`/`message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<String>,
}

impl AgentResponse {
    pub fn success(request_id: impl Into<String>, queued_at: DateTime<Utc>) -> Self {
        Self {
            ok: true,
            request_id: Some(request_id.into()),
            code: None,
            message: None,
            queued_at: Some(format_timestamp(queued_at)),
        }
    }

    pub fn failure(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            request_id: None,
            code: Some(code),
            message: Some(message.into()),
            queued_at: None,
        }
    }
}

/// UTF-8 check, whitespace trim, empty check
fn sanitized_payload(data: &[u8]) -> Result<&str, WireError> {
    let text = std::str::from_utf8(data)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(WireError::EmptyPayload);
    }
    Ok(trimmed)
}

fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    let mut data = serde_json::to_vec(message).map_err(WireError::Serialize)?;
    data.push(b'\n');
    Ok(data)
}

pub fn encode_request(request: &NotifyRequest) -> Result<Vec<u8>, WireError> {
    encode_line(request)
}

pub fn encode_response(response: &AgentResponse) -> Result<Vec<u8>, WireError> {
    encode_line(response)
}

pub fn decode_request(data: &[u8]) -> Result<NotifyRequest, WireError> {
    let payload = sanitized_payload(data)?;
    let request: NotifyRequest =
        serde_json::from_str(payload).map_err(|e| WireError::Schema(e.to_string()))?;

    if request.version != PROTOCOL_VERSION {
        return Err(WireError::Schema(format!(
            "unsupported protocol version: {}",
            request.version
        )));
    }
    if request.request_id.is_empty() {
        return Err(WireError::Schema("request_id must not be empty".to_string()));
    }
    Ok(request)
}

pub fn decode_response(data: &[u8]) -> Result<AgentResponse, WireError> {
    let payload = sanitized_payload(data)?;
    let response: AgentResponse =
        serde_json::from_str(payload).map_err(|e| WireError::Schema(e.to_string()))?;

    if response.ok && response.request_id.is_none() {
        return Err(WireError::Schema(
            "successful response without request_id".to_string(),
        ));
    }
    if !response.ok && response.code.is_none() {
        return Err(WireError::Schema("failed response without code".to_string()));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> NotifyRequest {
        NotifyRequest::new(
            "r1",
            "Build",
            "Done",
            Some("Ping".to_string()),
            NotifyAction {
                executable: "/bin/echo".to_string(),
                arguments: vec!["hi".to_string()],
            },
        )
    }

    #[test]
    fn test_request_wire_shape() {
        let data = encode_request(&sample_request()).unwrap();
        assert_eq!(data.last(), Some(&b'\n'));
        assert_eq!(data.iter().filter(|b| **b == b'\n').count(), 1);

        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["type"], "notify");
        assert_eq!(value["request_id"], "r1");
        assert_eq!(value["action"]["executable"], "/bin/echo");
        assert_eq!(value["action"]["arguments"][0], "hi");
    }

    #[test]
    fn test_decode_request() {
        let json = br#"  {"version":1,"type":"notify","request_id":"r1","title":"Build","message":"Done","sound":null,"action":{"executable":"/bin/echo","arguments":["hi"]},"source":null}
"#;
        let request = decode_request(json).unwrap();
        assert_eq!(request.request_id, "r1");
        assert_eq!(request.sound, None);
        assert_eq!(request.action.arguments, vec!["hi"]);
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode_request(b""), Err(WireError::EmptyPayload)));
        assert!(matches!(
            decode_request(b" \n\t  \r\n"),
            Err(WireError::EmptyPayload)
        ));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        assert!(matches!(
            decode_request(&[0x7b, 0xff, 0xfe, 0x7d]),
            Err(WireError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(matches!(decode_request(b"{not json"), Err(WireError::Schema(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        let json = br#"{"version":"1","type":"notify","request_id":"r1","title":"t","message":"m","action":{"executable":"/bin/echo","arguments":[]}}"#;
        assert!(matches!(decode_request(json), Err(WireError::Schema(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let json = br#"{"version":1,"type":"ping","request_id":"r1","title":"t","message":"m","action":{"executable":"/bin/echo","arguments":[]}}"#;
        assert!(matches!(decode_request(json), Err(WireError::Schema(_))));
    }

    #[test]
    fn test_decode_rejects_empty_request_id() {
        let json = br#"{"version":1,"type":"notify","request_id":"","title":"t","message":"m","action":{"executable":"/bin/echo","arguments":[]}}"#;
        assert!(matches!(decode_request(json), Err(WireError::Schema(_))));
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut request = sample_request();
        request.version = 2;
        let data = serde_json::to_vec(&request).unwrap();
        assert!(matches!(decode_request(&data), Err(WireError::Schema(_))));
    }

    #[test]
    fn test_success_response_shape() {
        let response = AgentResponse::success("r1", Utc::now());
        let data = encode_response(&response).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["request_id"], "r1");
        assert!(value["queued_at"].as_str().unwrap().contains('.'));
        assert!(value.get("code").is_none());

        assert_eq!(decode_response(&data).unwrap(), response);
    }

    #[test]
    fn test_failure_response_shape() {
        let response = AgentResponse::failure(FailureCode::InvalidAction, "nope");
        let data = encode_response(&response).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["code"], "invalid_action");
        assert!(value.get("request_id").is_none());
    }

    #[test]
    fn test_decode_response_requires_tag_fields() {
        assert!(matches!(decode_response(br#"{"ok":true}"#), Err(WireError::Schema(_))));
        assert!(matches!(
            decode_response(br#"{"ok":false,"message":"x"}"#),
            Err(WireError::Schema(_))
        ));
    }
}
