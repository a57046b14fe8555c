//! Native tool-call fragment accumulation.
//!
//! Providers with first-class tool calling stream each call as a series
//! of indexed fragments: an ID and name fragment first (sometimes split
//! themselves), then argument-JSON fragments that only parse once the
//! last one lands. The accumulator keys slots by the provider's call
//! index and resolves them at end of round, in detection order.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::truncate_for_log;
use crate::turn::ToolCallRecord;

#[derive(Debug, Default)]
struct Slot {
    id: String,
    name: String,
    arguments_json: String,
}

/// Accumulates indexed native tool-call fragments for one stream round.
#[derive(Debug, Default)]
pub struct NativeToolAccumulator {
    slots: BTreeMap<u32, Slot>,
}

impl NativeToolAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records ID and name fragments for the call at `index`.
    ///
    /// Either field may arrive absent or split across events; fragments
    /// concatenate in arrival order.
    pub fn fragment(&mut self, index: u32, id: Option<&str>, name: Option<&str>) {
        let slot = self.slots.entry(index).or_default();
        if let Some(id) = id {
            slot.id.push_str(id);
        }
        if let Some(name) = name {
            slot.name.push_str(name);
        }
    }

    /// Appends an argument-JSON fragment for the call at `index`.
    pub fn arguments_fragment(&mut self, index: u32, fragment: &str) {
        self.slots.entry(index).or_default().arguments_json.push_str(fragment);
    }

    /// Records a whole call in one step, for dialects that deliver
    /// complete call objects instead of fragments.
    pub fn whole_call(&mut self, index: u32, id: &str, name: &str, arguments: &Value) {
        let slot = self.slots.entry(index).or_default();
        slot.id = id.to_string();
        slot.name = name.to_string();
        slot.arguments_json = arguments.to_string();
    }

    /// Whether any fragments have been recorded this round.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolves all slots into pending records, in detection order.
    ///
    /// A slot completes when it has a non-empty name and its accumulated
    /// argument JSON parses (an empty argument buffer means `{}`). A
    /// slot that fails to parse is logged and dropped rather than
    /// poisoning the sibling calls. The accumulator is left empty.
    pub fn take_completed(&mut self) -> Vec<ToolCallRecord> {
        let slots = std::mem::take(&mut self.slots);
        let mut completed = Vec::new();
        for (index, slot) in slots {
            if slot.name.is_empty() {
                tracing::warn!(index, "dropping tool call with no name");
                continue;
            }
            let arguments = if slot.arguments_json.is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                match serde_json::from_str(&slot.arguments_json) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            index,
                            tool = %slot.name,
                            error = %e,
                            raw = %truncate_for_log(&slot.arguments_json, 200),
                            "dropping tool call with unparseable arguments"
                        );
                        continue;
                    }
                }
            };
            completed.push(ToolCallRecord::pending(slot.id, slot.name, arguments));
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fragmented_call_assembles() {
        let mut acc = NativeToolAccumulator::new();
        acc.fragment(0, Some("call_x"), Some("get_"));
        acc.fragment(0, None, Some("weather"));
        acc.arguments_fragment(0, "{\"a\"");
        acc.arguments_fragment(0, ":1}");
        let calls = acc.take_completed();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_x");
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments, json!({"a": 1}));
    }

    #[test]
    fn test_empty_arguments_default_to_object() {
        let mut acc = NativeToolAccumulator::new();
        acc.fragment(0, Some("call_1"), Some("list_files"));
        let calls = acc.take_completed();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn test_multiple_calls_in_detection_order() {
        let mut acc = NativeToolAccumulator::new();
        acc.fragment(1, Some("call_b"), Some("second"));
        acc.fragment(0, Some("call_a"), Some("first"));
        acc.arguments_fragment(0, "{}");
        acc.arguments_fragment(1, "{}");
        let calls = acc.take_completed();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn test_unparseable_arguments_drop_only_that_call() {
        let mut acc = NativeToolAccumulator::new();
        acc.fragment(0, Some("call_bad"), Some("broken"));
        acc.arguments_fragment(0, "{not json");
        acc.fragment(1, Some("call_ok"), Some("fine"));
        acc.arguments_fragment(1, "{\"x\":true}");
        let calls = acc.take_completed();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "fine");
    }

    #[test]
    fn test_nameless_call_is_dropped() {
        let mut acc = NativeToolAccumulator::new();
        acc.fragment(0, Some("call_1"), None);
        acc.arguments_fragment(0, "{}");
        assert!(acc.take_completed().is_empty());
    }

    #[test]
    fn test_whole_call() {
        let mut acc = NativeToolAccumulator::new();
        acc.whole_call(0, "", "lookup", &json!({"q": "rust"}));
        let calls = acc.take_completed();
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));
        assert!(calls[0].id.is_empty());
    }

    #[test]
    fn test_take_resets_accumulator() {
        let mut acc = NativeToolAccumulator::new();
        acc.fragment(0, Some("call_1"), Some("t"));
        let _ = acc.take_completed();
        assert!(acc.is_empty());
    }
}
