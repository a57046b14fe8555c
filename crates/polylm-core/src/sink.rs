//! External collaborator interfaces.
//!
//! The engine produces data; presentation, persistence, and preferences
//! are consumed through these narrow traits. Implementations live
//! outside this workspace (UI layer, storage layer) or in tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::turn::{ContentPart, Turn};

/// Live-rendering sink for an in-flight turn.
///
/// Parsers call [`on_incremental`](RenderSink::on_incremental) with the
/// full accumulated display/thinking text after each routed delta, and
/// [`on_final`](RenderSink::on_final) exactly once with the finalized
/// content parts.
pub trait RenderSink: Send + Sync {
    /// Incremental render callback with accumulated text so far.
    fn on_incremental(&self, display_text: &str, thinking_text: &str);

    /// Final render callback with the complete ordered content parts.
    fn on_final(&self, parts: &[ContentPart]);
}

/// Persistent message store for finalized turns.
pub trait MessageSink: Send + Sync {
    /// Stores a finalized turn under the given session and returns its
    /// storage index.
    fn store_turn(&self, session_id: &str, turn: &Turn) -> usize;
}

/// Key-value preference store.
///
/// Used only for advisory cross-instance locking; the engine keeps no
/// state of its own here.
pub trait PrefStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Writes a value.
    fn set(&self, key: &str, value: &str);
    /// Removes a value.
    fn remove(&self, key: &str);
}

/// One recorded tool-execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The tool name.
    pub tool_name: String,
    /// The provider-native call identifier.
    pub call_id: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Result text or failure description.
    pub detail: String,
}

/// Error from a history sink.
///
/// History-recording failures must never mask the execution outcome;
/// the executor logs them and moves on.
#[derive(Debug, thiserror::Error)]
#[error("history sink error: {0}")]
pub struct HistorySinkError(pub String);

/// Sink for tool-execution history, for diagnostics.
pub trait ExecutionHistory: Send + Sync {
    /// Records one attempt.
    fn record(&self, entry: ExecutionRecord) -> Result<(), HistorySinkError>;
}

/// A no-op render sink for headless use and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn on_incremental(&self, _display_text: &str, _thinking_text: &str) {}
    fn on_final(&self, _parts: &[ContentPart]) {}
}

/// Bounded in-memory execution history, oldest entries dropped first.
#[derive(Debug)]
pub struct MemoryExecutionHistory {
    entries: Mutex<VecDeque<ExecutionRecord>>,
    cap: usize,
}

impl MemoryExecutionHistory {
    /// Creates a history holding at most `cap` records.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    /// A snapshot of the recorded attempts, oldest first.
    pub fn recent(&self) -> Vec<ExecutionRecord> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl ExecutionHistory for MemoryExecutionHistory {
    fn record(&self, entry: ExecutionRecord) -> Result<(), HistorySinkError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.cap {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }
}
