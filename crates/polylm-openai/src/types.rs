//! OpenAI chat-completions streaming wire types.

use serde::{Deserialize, Serialize};

// ── Streaming chunk types ───────────────────────────────────────────

/// One decoded `data:` chunk.
///
/// Error chunks carry `error` instead of `choices`; both are optional
/// so either shape parses.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub error: Option<ErrorDetail>,
}

/// One streamed choice. Only index 0 is used; `n > 1` is never
/// requested.
#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub delta: Option<Delta>,
    pub finish_reason: Option<String>,
}

/// The incremental delta on a choice.
#[derive(Debug, Deserialize)]
pub(crate) struct Delta {
    pub content: Option<String>,
    /// Dedicated reasoning channel some compatible servers emit.
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One indexed tool-call fragment.
#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

/// Function name/argument fragments within a tool-call delta.
#[derive(Debug, Deserialize)]
pub(crate) struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// In-band error payload.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<serde_json::Value>,
}

impl ErrorDetail {
    /// The best available error code, preferring `code` over `type`.
    pub fn code_str(&self) -> String {
        match &self.code {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.error_type.clone().unwrap_or_else(|| "unknown".into()),
        }
    }
}

// ── Continuation request types ──────────────────────────────────────

/// One `role: tool` message carrying a single call's result.
#[derive(Debug, Serialize)]
pub(crate) struct ToolResultMessage {
    pub role: &'static str,
    pub tool_call_id: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_delta() {
        let raw = r#"{"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(
            chunk.choices[0].delta.as_ref().unwrap().content.as_deref(),
            Some("Hi")
        );
    }

    #[test]
    fn test_parse_tool_call_fragment() {
        let raw = r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_x","function":{"name":"get_weather","arguments":""}}]},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        let calls = chunk.choices[0].delta.as_ref().unwrap().tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_x"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );
    }

    #[test]
    fn test_fragment_without_index_defaults_to_zero() {
        let raw = r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{}"}}]}}]}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        let calls = chunk.choices[0].delta.as_ref().unwrap().tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
    }

    #[test]
    fn test_parse_error_chunk() {
        let raw = r#"{"error":{"message":"quota exceeded","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        let error = chunk.error.unwrap();
        assert_eq!(error.code_str(), "insufficient_quota");
        assert!(chunk.choices.is_empty());
    }

    #[test]
    fn test_code_str_falls_back_to_type() {
        let error = ErrorDetail {
            message: "m".into(),
            error_type: Some("server_error".into()),
            code: None,
        };
        assert_eq!(error.code_str(), "server_error");
    }

    #[test]
    fn test_tool_result_message_shape() {
        let msg = ToolResultMessage {
            role: "tool",
            tool_call_id: "call_1".into(),
            content: "ok".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }
}
