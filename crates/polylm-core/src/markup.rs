//! Fallback markup tool-call extraction.
//!
//! Models without native tool calling can be prompted to emit calls as
//! inline markup, a JSON object wrapped in `<tool_call>` tags inside the
//! visible text stream. This accumulator strips well-formed blocks out
//! of the display text and collects them as pending calls; a block whose
//! payload fails to parse degrades back into visible text rather than
//! being silently discarded.
//!
//! Markup calls carry no provider identifier. Collected records leave
//! `id` empty for the engine to mint.

use serde_json::Value;

use crate::error::truncate_for_log;
use crate::think::partial_suffix_len;
use crate::turn::ToolCallRecord;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// Streaming `<tool_call>` markup accumulator.
#[derive(Debug, Default)]
pub struct MarkupToolAccumulator {
    in_call: bool,
    pending: String,
    calls: Vec<ToolCallRecord>,
}

impl MarkupToolAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one delta; returns the portion that remains display text.
    pub fn feed(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut display = String::new();

        loop {
            let tag = if self.in_call { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = self.pending.find(tag) {
                let before: String = self.pending.drain(..pos).collect();
                self.pending.drain(..tag.len());
                if self.in_call {
                    self.resolve_block(&before, &mut display);
                } else {
                    display.push_str(&before);
                }
                self.in_call = !self.in_call;
            } else {
                if self.in_call {
                    // Keep buffering the block body until the close tag.
                    return display;
                }
                let keep = partial_suffix_len(&self.pending, OPEN_TAG);
                let emit_to = self.pending.len() - keep;
                let emitted: String = self.pending.drain(..emit_to).collect();
                display.push_str(&emitted);
                return display;
            }
        }
    }

    /// Releases withheld text at end of stream.
    ///
    /// An unterminated block degrades to display text, open tag
    /// included, so nothing the model produced is lost.
    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.in_call {
            self.in_call = false;
            format!("{OPEN_TAG}{rest}")
        } else {
            rest
        }
    }

    /// Takes the calls collected so far, in detection order.
    pub fn take_completed(&mut self) -> Vec<ToolCallRecord> {
        std::mem::take(&mut self.calls)
    }

    /// Whether any calls have been collected.
    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    fn resolve_block(&mut self, body: &str, display: &mut String) {
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(value) => {
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() {
                    tracing::warn!(
                        raw = %truncate_for_log(body, 200),
                        "markup tool call without a name; degrading to text"
                    );
                    display.push_str(body);
                    return;
                }
                let arguments = value
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                self.calls.push(ToolCallRecord::pending("", name, arguments));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw = %truncate_for_log(body, 200),
                    "unparseable markup tool call; degrading to text"
                );
                display.push_str(body);
            }
        }
    }
}
