//! Anthropic Messages streaming wire types.
//!
//! These mirror the SSE event shapes exactly and are not part of the
//! public API; routing into engine semantics happens in
//! [`stream`](crate::stream).

use serde::{Deserialize, Serialize};

// ── Streaming event types ───────────────────────────────────────────

/// One decoded SSE `data:` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Content block index (for `content_block_*` events).
    pub index: Option<u32>,
    /// Content block (for `content_block_start`).
    pub content_block: Option<ContentBlockStart>,
    /// Delta payload (for `content_block_delta` and `message_delta`).
    pub delta: Option<Delta>,
    /// Error payload (for in-band `error` events).
    pub error: Option<ErrorDetail>,
}

/// Block header in a `content_block_start` event.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlockStart {
    #[serde(rename = "type")]
    pub block_type: String,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Inline image source (for `type: "image"` blocks).
    pub source: Option<ImageSource>,
}

/// Delta payload within streaming events.
#[derive(Debug, Deserialize)]
pub(crate) struct Delta {
    #[serde(rename = "type")]
    pub delta_type: Option<String>,
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub signature: Option<String>,
    pub partial_json: Option<String>,
}

/// In-band error detail.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Base64 image source on an `image` content block.
#[derive(Debug, Deserialize)]
pub(crate) struct ImageSource {
    pub media_type: Option<String>,
    pub data: Option<String>,
}

// ── Continuation request types ──────────────────────────────────────

/// A tool result block inside the continuation user message.
#[derive(Debug, Serialize)]
pub(crate) struct ToolResultBlock {
    #[serde(rename = "type")]
    pub block_type: &'static str,
    pub tool_use_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// The single user message carrying a round's tool results.
#[derive(Debug, Serialize)]
pub(crate) struct ToolResultMessage {
    pub role: &'static str,
    pub content: Vec<ToolResultBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta_event() {
        let raw = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, "content_block_delta");
        assert_eq!(event.delta.unwrap().text.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_parse_tool_use_block_start() {
        let raw = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        let block = event.content_block.unwrap();
        assert_eq!(block.block_type, "tool_use");
        assert_eq!(block.id.as_deref(), Some("toolu_1"));
    }

    #[test]
    fn test_parse_error_event() {
        let raw = r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.error.unwrap().error_type, "overloaded_error");
    }

    #[test]
    fn test_tool_result_serialization_omits_false_is_error() {
        let msg = ToolResultMessage {
            role: "user",
            content: vec![ToolResultBlock {
                block_type: "tool_result",
                tool_use_id: "toolu_1".into(),
                content: "ok".into(),
                is_error: false,
            }],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["content"][0].get("is_error").is_none());
        assert_eq!(value["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let raw = r#"{"type":"message_start","message":{"usage":{"input_tokens":5}}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, "message_start");
    }
}
