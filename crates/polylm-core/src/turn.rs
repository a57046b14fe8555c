//! The turn data model.
//!
//! A [`Turn`] is one assistant response cycle, possibly spanning a
//! tool-call continuation. It is created when a stream begins, mutated
//! incrementally per decoded delta, and finalized exactly once — after
//! which it is immutable and handed to the external message store.
//!
//! Content is a closed tagged union of [`ContentPart`]s. Consecutive
//! parts of the same kind are merged as they are appended, so no two
//! adjacent parts share a kind — except around an image, which always
//! breaks a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::estimator::{StatsSnapshot, estimate_tokens};

/// Placeholder display text recorded when a turn suspends for tool
/// execution without having produced any visible text.
pub const TOOL_PLACEHOLDER_TEXT: &str = "Working on it…";

/// One piece of a turn's content, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    /// Visible assistant text.
    Text {
        /// The text content.
        value: String,
    },
    /// Reasoning ("thinking") text, rendered separately from display text.
    Thinking {
        /// The reasoning content.
        value: String,
    },
    /// An image, either inline binary delivered as a data URI or an
    /// extracted markdown image reference.
    Image {
        /// The image URI (usually a `data:` URI).
        uri: String,
        /// Whether the payload arrived completely.
        complete: bool,
    },
}

impl ContentPart {
    /// Returns the textual content of a text part, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { value } => Some(value),
            _ => None,
        }
    }

    /// Returns the reasoning content, if this is a thinking part.
    pub fn as_thinking(&self) -> Option<&str> {
        match self {
            Self::Thinking { value } => Some(value),
            _ => None,
        }
    }
}

/// Execution status of a tool call attached to a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Accumulation finished; the call has not executed yet.
    Pending,
    /// The call executed and produced a result.
    Completed,
    /// The call executed and failed.
    Failed,
}

/// A fully accumulated tool call.
///
/// Created once every fragment has been assembled into parseable JSON.
/// The `id` is provider-native at creation; the identifier reconciler
/// derives sibling-format IDs on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Provider-native call identifier (may be empty for fallback-markup
    /// calls until the engine mints one).
    pub id: String,
    /// The tool name.
    pub name: String,
    /// Decoded JSON arguments.
    pub arguments: Value,
    /// Current execution status.
    pub status: ToolCallStatus,
    /// The textual result, once completed or failed.
    pub result: Option<String>,
}

impl ToolCallRecord {
    /// Creates a pending record from accumulated fields.
    pub fn pending(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
        }
    }
}

/// How a newly arrived continuation signature combines with an existing
/// one on the same turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMergePolicy {
    /// Most-recent-wins: the signature must be fresh each round.
    Replace,
    /// Cumulative: rounds append, separated by a newline.
    Append,
}

/// An opaque provider-issued continuation signature.
///
/// Round-tripped unmodified to preserve model continuity across turns;
/// the engine never inspects `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// The opaque signature blob.
    pub data: String,
    /// Merge behavior across continuation rounds.
    pub policy: SignatureMergePolicy,
}

/// One assistant response cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Accumulated visible text, in arrival order.
    pub display_text: String,
    /// Accumulated reasoning text, in arrival order.
    pub thinking_text: String,
    /// Ordered content parts.
    pub parts: Vec<ContentPart>,
    /// Tool calls detected in this turn (across all rounds).
    pub tool_calls: Vec<ToolCallRecord>,
    /// Generation statistics, attached at finalization.
    pub stats: StatsSnapshot,
    /// Opaque continuation signature, if the provider issued one.
    pub signature: Option<Signature>,
    /// Whether the turn finalized on the error path.
    pub is_error: bool,
    finalized: bool,
}

impl Turn {
    /// Creates an empty, un-finalized turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends visible text, merging into a trailing text part.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.display_text.push_str(text);
        if let Some(ContentPart::Text { value }) = self.parts.last_mut() {
            value.push_str(text);
        } else {
            self.parts.push(ContentPart::Text {
                value: text.to_string(),
            });
        }
    }

    /// Appends reasoning text, merging into a trailing thinking part.
    pub fn push_thinking(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.thinking_text.push_str(text);
        if let Some(ContentPart::Thinking { value }) = self.parts.last_mut() {
            value.push_str(text);
        } else {
            self.parts.push(ContentPart::Thinking {
                value: text.to_string(),
            });
        }
    }

    /// Appends an image part. Images never merge and always break a
    /// same-kind run on either side.
    pub fn push_image(&mut self, uri: String, complete: bool) {
        self.parts.push(ContentPart::Image { uri, complete });
    }

    /// Merges a newly arrived signature according to its policy.
    pub fn merge_signature(&mut self, incoming: Signature) {
        match (&mut self.signature, incoming.policy) {
            (Some(existing), SignatureMergePolicy::Append) => {
                existing.data.push('\n');
                existing.data.push_str(&incoming.data);
                existing.policy = SignatureMergePolicy::Append;
            }
            (slot, _) => *slot = Some(incoming),
        }
    }

    /// Concatenation of all non-placeholder text and thinking parts, in
    /// order. This is the basis for the final token estimate.
    pub fn merged_generated_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                ContentPart::Text { value } if value != TOOL_PLACEHOLDER_TEXT => {
                    out.push_str(value);
                }
                ContentPart::Thinking { value } => out.push_str(value),
                _ => {}
            }
        }
        out
    }

    /// Recomputes the token estimate from the merged generated text and
    /// stores it into the stats snapshot.
    pub fn recompute_token_estimate(&mut self) {
        self.stats.token_count = estimate_tokens(&self.merged_generated_text());
    }

    /// Marks the turn finalized. Returns `false` (and changes nothing)
    /// if it was already finalized — a turn is finalized exactly once.
    pub fn finalize(&mut self, stats: StatsSnapshot) -> bool {
        if self.finalized {
            return false;
        }
        self.stats.ttft_ms = stats.ttft_ms;
        self.stats.total_ms = stats.total_ms;
        self.stats.tokens_per_second = stats.tokens_per_second;
        self.finalized = true;
        true
    }

    /// Whether the turn has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adjacent_text_parts_merge() {
        let mut turn = Turn::new();
        turn.push_text("Hello");
        turn.push_text(", world");
        assert_eq!(turn.parts.len(), 1);
        assert_eq!(turn.parts[0].as_text(), Some("Hello, world"));
        assert_eq!(turn.display_text, "Hello, world");
    }

    #[test]
    fn test_adjacent_thinking_parts_merge() {
        let mut turn = Turn::new();
        turn.push_thinking("step 1 ");
        turn.push_thinking("step 2");
        assert_eq!(turn.parts.len(), 1);
        assert_eq!(turn.parts[0].as_thinking(), Some("step 1 step 2"));
    }

    #[test]
    fn test_kind_change_starts_new_part() {
        let mut turn = Turn::new();
        turn.push_text("answer: ");
        turn.push_thinking("hmm");
        turn.push_text("42");
        assert_eq!(turn.parts.len(), 3);
    }

    #[test]
    fn test_image_breaks_text_run() {
        let mut turn = Turn::new();
        turn.push_text("before ");
        turn.push_image("data:image/png;base64,AAAA".into(), true);
        turn.push_text("after");
        assert_eq!(turn.parts.len(), 3);
        assert!(matches!(turn.parts[1], ContentPart::Image { .. }));
        // the text parts around the image did not merge
        assert_eq!(turn.parts[0].as_text(), Some("before "));
        assert_eq!(turn.parts[2].as_text(), Some("after"));
    }

    #[test]
    fn test_empty_pushes_are_ignored() {
        let mut turn = Turn::new();
        turn.push_text("");
        turn.push_thinking("");
        assert!(turn.parts.is_empty());
    }

    #[test]
    fn test_signature_replace_policy() {
        let mut turn = Turn::new();
        turn.merge_signature(Signature {
            data: "sig-round-1".into(),
            policy: SignatureMergePolicy::Replace,
        });
        turn.merge_signature(Signature {
            data: "sig-round-2".into(),
            policy: SignatureMergePolicy::Replace,
        });
        assert_eq!(turn.signature.as_ref().unwrap().data, "sig-round-2");
    }

    #[test]
    fn test_signature_append_policy() {
        let mut turn = Turn::new();
        turn.merge_signature(Signature {
            data: "a".into(),
            policy: SignatureMergePolicy::Append,
        });
        turn.merge_signature(Signature {
            data: "b".into(),
            policy: SignatureMergePolicy::Append,
        });
        assert_eq!(turn.signature.as_ref().unwrap().data, "a\nb");
    }

    #[test]
    fn test_merged_generated_text_skips_placeholder_and_images() {
        let mut turn = Turn::new();
        turn.push_text(TOOL_PLACEHOLDER_TEXT);
        turn.push_image("data:image/png;base64,XX".into(), true);
        turn.push_thinking("because");
        turn.push_text("42");
        assert_eq!(turn.merged_generated_text(), "because42");
    }

    #[test]
    fn test_recompute_token_estimate_matches_estimator() {
        let mut turn = Turn::new();
        turn.push_text("Hello world, this is a test.");
        turn.push_thinking("internal reasoning here");
        turn.recompute_token_estimate();
        assert_eq!(
            turn.stats.token_count,
            estimate_tokens(&turn.merged_generated_text())
        );
    }

    #[test]
    fn test_finalize_exactly_once() {
        let mut turn = Turn::new();
        assert!(turn.finalize(StatsSnapshot::default()));
        assert!(!turn.finalize(StatsSnapshot::default()));
        assert!(turn.is_finalized());
    }

    #[test]
    fn test_tool_call_record_pending() {
        let rec = ToolCallRecord::pending("call_1", "search", json!({"q": "rust"}));
        assert_eq!(rec.status, ToolCallStatus::Pending);
        assert!(rec.result.is_none());
    }
}
