//! Gemini generate-content streaming wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Streaming chunk types ───────────────────────────────────────────

/// One decoded `data:` chunk.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub error: Option<ApiError>,
}

/// One streamed candidate. Only the first is used.
#[derive(Debug, Deserialize)]
pub(crate) struct Candidate {
    pub content: Option<Content>,
}

/// The content object on a candidate.
#[derive(Debug, Deserialize)]
pub(crate) struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part. Exactly one payload field is set per part; calls
/// arrive as whole objects, never fragmented.
#[derive(Debug, Deserialize)]
pub(crate) struct Part {
    pub text: Option<String>,
    /// Marks `text` as reasoning rather than display content.
    #[serde(default)]
    pub thought: bool,
    #[serde(rename = "thoughtSignature")]
    pub thought_signature: Option<String>,
    #[serde(rename = "inlineData")]
    pub inline_data: Option<InlineData>,
    #[serde(rename = "functionCall")]
    pub function_call: Option<FunctionCall>,
}

/// Inline binary payload.
#[derive(Debug, Deserialize)]
pub(crate) struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub data: Option<String>,
}

/// A whole function call. Carries no identifier on the wire; the
/// engine mints one.
#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCall {
    pub name: String,
    pub args: Option<Value>,
}

/// In-band error payload.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub code: Option<u16>,
    pub message: String,
    pub status: Option<String>,
}

// ── Continuation request types ──────────────────────────────────────

/// A `functionResponse` part inside the continuation message.
#[derive(Debug, Serialize)]
pub(crate) struct FunctionResponsePart {
    #[serde(rename = "functionResponse")]
    pub function_response: FunctionResponse,
}

/// The response payload for one executed call.
#[derive(Debug, Serialize)]
pub(crate) struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// The single user message carrying a round's function responses.
#[derive(Debug, Serialize)]
pub(crate) struct FunctionResponseMessage {
    pub role: &'static str,
    pub parts: Vec<FunctionResponsePart>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_part() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}],"role":"model"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let part = &chunk.candidates[0].content.as_ref().unwrap().parts[0];
        assert_eq!(part.text.as_deref(), Some("Hi"));
        assert!(!part.thought);
    }

    #[test]
    fn test_parse_thought_part_with_signature() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"mull","thought":true,"thoughtSignature":"c2ln"}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let part = &chunk.candidates[0].content.as_ref().unwrap().parts[0];
        assert!(part.thought);
        assert_eq!(part.thought_signature.as_deref(), Some("c2ln"));
    }

    #[test]
    fn test_parse_function_call_part() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"search","args":{"q":"rust"}}}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let call = chunk.candidates[0].content.as_ref().unwrap().parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.args.as_ref().unwrap()["q"], "rust");
    }

    #[test]
    fn test_parse_inline_data_part() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let data = chunk.candidates[0].content.as_ref().unwrap().parts[0]
            .inline_data
            .as_ref()
            .unwrap();
        assert_eq!(data.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_parse_error_chunk() {
        let raw = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let error = chunk.error.unwrap();
        assert_eq!(error.code, Some(429));
        assert_eq!(error.status.as_deref(), Some("RESOURCE_EXHAUSTED"));
    }

    #[test]
    fn test_function_response_serialization() {
        let msg = FunctionResponseMessage {
            role: "user",
            parts: vec![FunctionResponsePart {
                function_response: FunctionResponse {
                    name: "search".into(),
                    response: serde_json::json!({"content": "ok"}),
                },
            }],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["parts"][0]["functionResponse"]["name"], "search");
    }
}
