//! Tool-result batch construction for continuation requests.

use serde_json::Value;

use polylm_core::{ToolOutcome, ToolResultBuilder, WireFormat};

use crate::types::{ToolResultBlock, ToolResultMessage};

/// Builds the Messages-dialect continuation batch: one `user` message
/// whose content is a `tool_result` block per outcome, in detection
/// order, with `is_error` set on failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicResultBuilder;

impl ToolResultBuilder for AnthropicResultBuilder {
    fn format(&self) -> WireFormat {
        WireFormat::Anthropic
    }

    fn build(&self, outcomes: &[ToolOutcome]) -> Vec<Value> {
        let message = ToolResultMessage {
            role: "user",
            content: outcomes
                .iter()
                .map(|outcome| ToolResultBlock {
                    block_type: "tool_result",
                    tool_use_id: outcome.call_id.clone(),
                    content: outcome.content.clone(),
                    is_error: outcome.is_error(),
                })
                .collect(),
        };
        match serde_json::to_value(&message) {
            Ok(value) => vec![value],
            Err(e) => {
                // Serialization of these plain structs cannot fail in
                // practice; guard anyway.
                tracing::error!(error = %e, "failed to serialize tool result batch");
                Vec::new()
            }
        }
    }
}
