//! Streaming response engine for multi-provider LLM chat.
//!
//! The engine orchestrates one assistant turn end to end: it drives a
//! provider [`StreamDriver`](polylm_core::StreamDriver) over an open
//! byte stream, executes accumulated tool calls through a gated
//! pipeline, re-issues continuation requests until the model answers
//! without further calls, and keeps the request lifecycle, cross-format
//! call-ID reconciliation, and continuation-signature bookkeeping
//! consistent throughout.
//!
//! # Layout
//!
//! - [`lifecycle`] — the allow-listed request state machine.
//! - [`reconcile`] — sibling call-ID mapping across wire formats.
//! - [`signature`] — signature backups across history edits.
//! - [`registry`] / [`executor`] — tool definitions and the execution
//!   pipeline (permissions, rate admission, schema validation, timeout).
//! - [`continuation`] — the stream/execute/resend loop.
//! - [`advisory`] — cross-instance request locking.
//! - [`context`] — per-surface shared state and engine events.
//!
//! Provider dialects live in their own crates (`polylm-anthropic`,
//! `polylm-openai`, `polylm-gemini`) and plug in behind the traits in
//! [`polylm_core`].

pub mod advisory;
pub mod context;
pub mod continuation;
pub mod executor;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;
pub mod signature;

pub use advisory::AdvisoryLock;
pub use context::{EngineContext, EngineEvent};
pub use continuation::{ContinuationConfig, ContinuationOrchestrator};
pub use executor::{
    ExecutorConfig, GateFailure, PermissionDecision, PermissionGate, RateLimiter, ToolExecutor,
};
pub use lifecycle::{InvalidTransition, RequestLifecycle, RequestState, TransitionRecord};
pub use reconcile::IdReconciler;
pub use registry::{ToolDefinition, ToolError, ToolHandler, ToolRegistry, tool_fn};
pub use signature::{SignatureBackup, SignatureStore};

pub use polylm_core as core;
