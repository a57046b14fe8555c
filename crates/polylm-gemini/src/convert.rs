//! Tool-result batch construction for continuation requests.

use serde_json::{Value, json};

use polylm_core::{ToolOutcome, ToolResultBuilder, WireFormat};

use crate::types::{FunctionResponse, FunctionResponseMessage, FunctionResponsePart};

/// Builds the generate-content continuation batch: one `user` message
/// whose parts are a `functionResponse` per outcome, in detection
/// order. Parallel calls must answer inside a single message.
///
/// Failures are encoded as an `error` field in the response object;
/// the dialect has no dedicated error flag.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiResultBuilder;

impl ToolResultBuilder for GeminiResultBuilder {
    fn format(&self) -> WireFormat {
        WireFormat::Gemini
    }

    fn build(&self, outcomes: &[ToolOutcome]) -> Vec<Value> {
        let message = FunctionResponseMessage {
            role: "user",
            parts: outcomes
                .iter()
                .map(|outcome| {
                    let response = if outcome.is_error() {
                        json!({"error": outcome.content})
                    } else {
                        json!({"content": outcome.content})
                    };
                    FunctionResponsePart {
                        function_response: FunctionResponse {
                            name: outcome.tool_name.clone(),
                            response,
                        },
                    }
                })
                .collect(),
        };
        match serde_json::to_value(&message) {
            Ok(value) => vec![value],
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize tool result batch");
                Vec::new()
            }
        }
    }
}
