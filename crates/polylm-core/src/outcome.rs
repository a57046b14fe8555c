//! Provider-agnostic tool result envelope.
//!
//! Every tool execution attempt — success or failure — produces a
//! [`ToolOutcome`] that the continuation layer re-serializes into the
//! active provider's tool-result message shape. Failures carry a
//! [`ToolFailureKind`] so the model receives explicit non-retry guidance
//! instead of being induced into a retry loop.

use serde::{Deserialize, Serialize};

/// Why a tool call failed, and what the model should conclude.
///
/// All three kinds are final for the current turn; the distinction tells
/// the model *which* thing not to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The arguments violated the tool's schema. Don't retry with the
    /// same parameters — they are wrong.
    InvalidParams,
    /// The tool does not exist or is not permitted. Don't retry — the
    /// tool is unavailable.
    Unavailable,
    /// The execution itself failed (timeout, rate limit, handler error).
    /// Don't retry — the failure is already final for this turn.
    Transient,
}

impl ToolFailureKind {
    /// Guidance text appended to the result content sent to the model.
    pub fn guidance(self) -> &'static str {
        match self {
            Self::InvalidParams => {
                "Do not retry with the same arguments; they are invalid."
            }
            Self::Unavailable => "Do not retry; this tool is unavailable.",
            Self::Transient => "Do not retry; this failure is final for the current turn.",
        }
    }
}

/// The provider-agnostic result of one tool execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The call identifier, already reconciled into the active
    /// provider's format by the time the result batch is built.
    pub call_id: String,
    /// The tool name.
    pub tool_name: String,
    /// Result text on success, or the failure description.
    pub content: String,
    /// Set when the attempt failed.
    pub failure: Option<ToolFailureKind>,
}

impl ToolOutcome {
    /// A successful outcome.
    pub fn ok(call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            failure: None,
        }
    }

    /// A failed outcome. The model-facing content combines the failure
    /// description with the kind's non-retry guidance.
    pub fn failed(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        kind: ToolFailureKind,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: format!("{detail} {}", kind.guidance()),
            failure: Some(kind),
        }
    }

    /// Whether this outcome represents a failure.
    pub fn is_error(&self) -> bool {
        self.failure.is_some()
    }
}
