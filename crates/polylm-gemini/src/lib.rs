//! Gemini generate-content dialect for the polylm engine.
//!
//! Speaks the candidates/parts SSE format: each chunk's
//! `candidates[0].content.parts[]` holds whole payloads (text, thought
//! text, thought signatures, inline binary data, or complete function
//! calls). Calls carry no wire identifier; the engine mints
//! `fn_`-prefixed IDs for them.
//!
//! Thought signatures on this dialect must be fresh each round, so
//! [`dialect_config`] selects the most-recent-wins merge policy.

mod convert;
mod stream;
mod types;

pub use convert::GeminiResultBuilder;
pub use stream::GeminiDriver;

use polylm_core::{AssemblerConfig, SignatureMergePolicy};

/// The assembler configuration this dialect expects.
pub fn dialect_config() -> AssemblerConfig {
    AssemblerConfig {
        fallback_tool_markup: false,
        signature_policy: SignatureMergePolicy::Replace,
        ..AssemblerConfig::default()
    }
}
