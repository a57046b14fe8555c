//! Tool-result batch construction for continuation requests.

use serde_json::Value;

use polylm_core::{ToolOutcome, ToolResultBuilder, WireFormat};

use crate::types::ToolResultMessage;

/// Builds the chat-completions continuation batch: one `role: tool`
/// message per outcome, keyed by `tool_call_id`, in detection order.
///
/// This dialect has no error flag on tool messages; failure guidance
/// travels inside the content text.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiResultBuilder;

impl ToolResultBuilder for OpenAiResultBuilder {
    fn format(&self) -> WireFormat {
        WireFormat::OpenAi
    }

    fn build(&self, outcomes: &[ToolOutcome]) -> Vec<Value> {
        outcomes
            .iter()
            .filter_map(|outcome| {
                let message = ToolResultMessage {
                    role: "tool",
                    tool_call_id: outcome.call_id.clone(),
                    content: outcome.content.clone(),
                };
                match serde_json::to_value(&message) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize tool result");
                        None
                    }
                }
            })
            .collect()
    }
}
