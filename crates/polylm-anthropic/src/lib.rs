//! Anthropic Messages dialect for the polylm engine.
//!
//! Speaks the typed content-block SSE format: `content_block_start` /
//! `content_block_delta` / `content_block_stop` events carrying
//! `text_delta`, `thinking_delta`, `signature_delta`, and
//! `input_json_delta` payloads, with in-band `error` events and
//! `toolu_`-prefixed tool-call IDs.
//!
//! Continuation signatures on this dialect are cumulative across tool
//! rounds, so [`dialect_config`] selects the append merge policy.

mod convert;
mod stream;
mod types;

pub use convert::AnthropicResultBuilder;
pub use stream::AnthropicDriver;

use polylm_core::{AssemblerConfig, SignatureMergePolicy};

/// The assembler configuration this dialect expects.
///
/// Native tool calling is first-class, so fallback markup scanning is
/// off; signatures append across continuation rounds.
pub fn dialect_config() -> AssemblerConfig {
    AssemblerConfig {
        fallback_tool_markup: false,
        signature_policy: SignatureMergePolicy::Append,
        ..AssemblerConfig::default()
    }
}
