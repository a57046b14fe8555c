//! Core vocabulary and shared parsing machinery for the polylm engine.
//!
//! This crate defines the provider-agnostic data model (turns, content
//! parts, tool calls, outcomes), the text-level sub-parsers every
//! dialect shares (`<think>` splitting, markdown image lifting, fallback
//! tool markup, native fragment accumulation), the [`TurnAssembler`]
//! that composes them, and the seams provider crates implement
//! ([`StreamDriver`], [`ToolResultBuilder`]).
//!
//! Provider crates depend only on this crate; the engine crate consumes
//! drivers behind trait objects, so dialects stay independently
//! compilable.

pub mod accumulate;
pub mod assemble;
pub mod error;
pub mod estimator;
pub mod events;
pub mod image_md;
pub mod markup;
pub mod outcome;
pub mod sink;
pub mod think;
pub mod turn;
pub mod wire;

pub use assemble::{AssemblerConfig, Control, TurnAssembler};
pub use error::EngineError;
pub use estimator::{StatsSnapshot, StreamClock, estimate_tokens};
pub use events::EventBus;
pub use outcome::{ToolFailureKind, ToolOutcome};
pub use sink::{
    ExecutionHistory, ExecutionRecord, MemoryExecutionHistory, MessageSink, PrefStore, RenderSink,
};
pub use turn::{
    ContentPart, Signature, SignatureMergePolicy, ToolCallRecord, ToolCallStatus, Turn,
};
pub use wire::{
    ByteStream, FinalizedTurn, LineFramer, ParseMode, ParseOutcome, ResendFn, StreamDriver,
    ToolResultBuilder, WireFormat,
};
