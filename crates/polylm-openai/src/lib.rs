//! OpenAI chat-completions dialect for the polylm engine.
//!
//! Speaks the flat SSE delta format: `choices[0].delta` chunks carrying
//! content, reasoning content, and indexed tool-call fragments, with a
//! `data: [DONE]` sentinel and `call_`-prefixed tool-call IDs.
//!
//! Because compatible servers front local models without native tool
//! calling, [`dialect_config`] enables fallback `<tool_call>` markup
//! scanning; `<think>` tag extraction is always on in the assembler.

mod convert;
mod stream;
mod types;

pub use convert::OpenAiResultBuilder;
pub use stream::OpenAiDriver;

use polylm_core::{AssemblerConfig, SignatureMergePolicy};

/// The assembler configuration this dialect expects.
pub fn dialect_config() -> AssemblerConfig {
    AssemblerConfig {
        fallback_tool_markup: true,
        // This dialect issues no continuation signatures; the policy is
        // inert but most-recent-wins is the safe default.
        signature_policy: SignatureMergePolicy::Replace,
        ..AssemblerConfig::default()
    }
}
