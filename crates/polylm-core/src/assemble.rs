//! The turn assembler.
//!
//! One [`TurnAssembler`] owns the in-flight [`Turn`] and every
//! text-level sub-parser. Provider stream drivers decode their wire
//! format and route semantic deltas here; the assembler applies the
//! shared pipeline (markup tool extraction, `<think>` splitting,
//! markdown image lifting), enforces size ceilings, feeds the render
//! sink, and finalizes the turn exactly once on whichever path ends the
//! stream: normal completion, tool suspension, provider error,
//! cancellation, or truncation.

use std::sync::Arc;

use crate::accumulate::NativeToolAccumulator;
use crate::error::EngineError;
use crate::estimator::{StreamClock, estimate_tokens};
use crate::image_md::{MarkdownImageScanner, Segment};
use crate::markup::MarkupToolAccumulator;
use crate::sink::{MessageSink, RenderSink};
use crate::think::ThinkTagParser;
use crate::turn::{
    Signature, SignatureMergePolicy, TOOL_PLACEHOLDER_TEXT, ToolCallRecord, Turn,
};
use crate::wire::{FinalizedTurn, ParseMode, ParseOutcome};

/// Default ceiling on accumulated text bytes for one turn.
pub const DEFAULT_TEXT_CEILING: usize = 2 * 1024 * 1024;

/// Default ceiling on accumulated inline-image bytes for one turn.
pub const DEFAULT_IMAGE_CEILING: usize = 64 * 1024 * 1024;

/// Notice appended to the display text when a ceiling cuts a turn short.
pub const TRUNCATION_NOTICE: &str = "\n\n[Response truncated: size limit reached.]";

/// Notice appended to the display text when the user cancels a stream.
pub const CANCELLATION_NOTICE: &str = "\n\n[Stopped by user.]";

/// Flow-control signal returned to the driver after each routed delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Control {
    /// Keep streaming.
    Continue,
    /// Stop reading; a ceiling was hit and the turn will finalize as
    /// truncated.
    Stop,
}

/// Assembler tuning knobs.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Ceiling on text bytes, cumulative across continuation rounds.
    pub text_ceiling: usize,
    /// Ceiling on inline-image bytes, cumulative across rounds.
    pub image_ceiling: usize,
    /// Whether to scan display text for fallback `<tool_call>` markup.
    pub fallback_tool_markup: bool,
    /// Merge policy for continuation signatures on this dialect.
    pub signature_policy: SignatureMergePolicy,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            text_ceiling: DEFAULT_TEXT_CEILING,
            image_ceiling: DEFAULT_IMAGE_CEILING,
            fallback_tool_markup: false,
            signature_policy: SignatureMergePolicy::Replace,
        }
    }
}

/// Assembles one turn from routed semantic deltas.
pub struct TurnAssembler {
    turn: Turn,
    clock: StreamClock,
    think: ThinkTagParser,
    images: MarkdownImageScanner,
    markup: Option<MarkupToolAccumulator>,
    native: NativeToolAccumulator,
    render: Arc<dyn RenderSink>,
    messages: Arc<dyn MessageSink>,
    session_id: String,
    cfg: AssemblerConfig,
    sig_buf: String,
    text_bytes: usize,
    image_bytes: usize,
    mode: ParseMode,
    truncated: bool,
    native_markup_warned: bool,
}

impl std::fmt::Debug for TurnAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnAssembler")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .field("text_bytes", &self.text_bytes)
            .field("image_bytes", &self.image_bytes)
            .field("truncated", &self.truncated)
            .finish_non_exhaustive()
    }
}

impl TurnAssembler {
    /// Creates an assembler for a fresh turn and starts its clock.
    pub fn new(
        session_id: impl Into<String>,
        render: Arc<dyn RenderSink>,
        messages: Arc<dyn MessageSink>,
        cfg: AssemblerConfig,
    ) -> Self {
        let markup = cfg.fallback_tool_markup.then(MarkupToolAccumulator::new);
        Self {
            turn: Turn::new(),
            clock: StreamClock::start(),
            think: ThinkTagParser::new(),
            images: MarkdownImageScanner::new(),
            markup,
            native: NativeToolAccumulator::new(),
            render,
            messages,
            session_id: session_id.into(),
            cfg,
            sig_buf: String::new(),
            text_bytes: 0,
            image_bytes: 0,
            mode: ParseMode::Initial,
            truncated: false,
            native_markup_warned: false,
        }
    }

    /// Read access to the in-flight turn.
    pub fn turn(&self) -> &Turn {
        &self.turn
    }

    /// The current parse mode.
    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    // ── Delta routing ───────────────────────────────────────────────

    /// Routes a visible-text delta through the text pipeline.
    pub fn text_delta(&mut self, delta: &str) -> Control {
        if delta.is_empty() {
            return Control::Continue;
        }
        self.clock.mark_first_token();

        let after_markup = match &mut self.markup {
            Some(markup) => markup.feed(delta),
            None => delta.to_string(),
        };
        self.route_plain(&after_markup);

        self.render
            .on_incremental(&self.turn.display_text, &self.turn.thinking_text);
        self.check_text_ceiling()
    }

    /// Routes a dedicated-channel reasoning delta.
    pub fn thinking_delta(&mut self, delta: &str) -> Control {
        if delta.is_empty() {
            return Control::Continue;
        }
        self.clock.mark_first_token();
        self.text_bytes += delta.len();
        self.clock.add_tokens(estimate_tokens(delta));
        self.turn.push_thinking(delta);
        self.render
            .on_incremental(&self.turn.display_text, &self.turn.thinking_text);
        self.check_text_ceiling()
    }

    /// Appends a continuation-signature fragment for this round.
    pub fn signature_fragment(&mut self, data: &str) {
        self.sig_buf.push_str(data);
    }

    /// Replaces this round's signature with a complete blob.
    pub fn signature_whole(&mut self, data: &str) {
        self.sig_buf.clear();
        self.sig_buf.push_str(data);
    }

    /// Attaches an inline image delivered directly on the wire.
    pub fn inline_image(&mut self, uri: String, complete: bool) -> Control {
        self.clock.mark_first_token();
        self.image_bytes += uri.len();
        self.turn.push_image(uri, complete);
        if self.image_bytes > self.cfg.image_ceiling {
            tracing::warn!(
                session = %self.session_id,
                bytes = self.image_bytes,
                "inline image ceiling exceeded; truncating turn"
            );
            self.mark_truncated();
            return Control::Stop;
        }
        Control::Continue
    }

    /// Records native tool-call ID/name fragments.
    pub fn native_fragment(&mut self, index: u32, id: Option<&str>, name: Option<&str>) {
        self.native.fragment(index, id, name);
    }

    /// Records a native argument-JSON fragment.
    pub fn native_arguments(&mut self, index: u32, fragment: &str) {
        self.native.arguments_fragment(index, fragment);
    }

    /// Records a whole native call object.
    pub fn native_whole_call(&mut self, index: u32, id: &str, name: &str, arguments: &serde_json::Value) {
        self.native.whole_call(index, id, name, arguments);
    }

    // ── Terminal paths ──────────────────────────────────────────────

    /// Finalizes the turn on a provider or transport error.
    ///
    /// Partial content is preserved. The token estimate is recomputed
    /// from the generated parts first, then a humanized error block is
    /// appended so the classification text never inflates the estimate.
    pub fn fail(&mut self, err: &EngineError) -> FinalizedTurn {
        self.flush_pipeline();
        self.turn.recompute_token_estimate();
        let notice = format!("\n\n{}", err.user_message());
        self.turn.push_text(&notice);
        self.turn.is_error = true;
        self.store_final(true)
    }

    /// Finalizes the turn after cancellation, keeping partial content.
    pub fn cancelled(&mut self) -> FinalizedTurn {
        self.flush_pipeline();
        self.turn.recompute_token_estimate();
        self.turn.push_text(CANCELLATION_NOTICE);
        self.store_final(false)
    }

    /// Ends the round at stream exhaustion.
    ///
    /// Flushes every sub-parser, then either suspends for tool
    /// execution (when completed calls exist and no ceiling fired) or
    /// finalizes the turn.
    pub fn finish(&mut self) -> ParseOutcome {
        self.flush_pipeline();

        if self.truncated {
            return ParseOutcome::Completed(self.finalize_success());
        }

        let calls = self.collect_calls();
        if calls.is_empty() {
            ParseOutcome::Completed(self.finalize_success())
        } else {
            self.suspend_for_tools(&calls);
            ParseOutcome::AwaitingTools(calls)
        }
    }

    /// Re-arms the sub-parsers for a continuation round.
    ///
    /// The turn, its clock, and the cumulative size counters carry over;
    /// only the per-round parsers reset.
    pub fn resume_continuation(&mut self) {
        self.think = ThinkTagParser::new();
        self.images = MarkdownImageScanner::new();
        self.markup = self.cfg.fallback_tool_markup.then(MarkupToolAccumulator::new);
        self.native = NativeToolAccumulator::new();
        self.mode = ParseMode::Continuation;
    }

    /// Records executed-call results onto the suspended turn.
    ///
    /// Results are matched by ID, falling back to the first pending call
    /// with the same name; the engine may have minted or reconciled the
    /// ID after suspension, in which case the record adopts it.
    pub fn record_tool_results(&mut self, results: &[ToolCallRecord]) {
        for result in results {
            let idx = self
                .turn
                .tool_calls
                .iter()
                .position(|c| c.id == result.id)
                .or_else(|| {
                    self.turn.tool_calls.iter().position(|c| {
                        c.status == crate::turn::ToolCallStatus::Pending && c.name == result.name
                    })
                });
            if let Some(idx) = idx {
                let existing = &mut self.turn.tool_calls[idx];
                existing.id.clone_from(&result.id);
                existing.status = result.status;
                existing.result.clone_from(&result.result);
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn route_plain(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let split = self.think.feed(text);
        self.route_display(&split.display);
        if !split.thinking.is_empty() {
            self.text_bytes += split.thinking.len();
            self.clock.add_tokens(estimate_tokens(&split.thinking));
            self.turn.push_thinking(&split.thinking);
        }
    }

    fn route_display(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        for segment in self.images.feed(text) {
            match segment {
                Segment::Text(value) => {
                    self.text_bytes += value.len();
                    self.clock.add_tokens(estimate_tokens(&value));
                    self.turn.push_text(&value);
                }
                Segment::Image { uri } => {
                    self.image_bytes += uri.len();
                    self.turn.push_image(uri, true);
                }
            }
        }
    }

    fn check_text_ceiling(&mut self) -> Control {
        if self.text_bytes > self.cfg.text_ceiling {
            tracing::warn!(
                session = %self.session_id,
                bytes = self.text_bytes,
                "text ceiling exceeded; truncating turn"
            );
            self.mark_truncated();
            return Control::Stop;
        }
        if self.image_bytes > self.cfg.image_ceiling {
            tracing::warn!(
                session = %self.session_id,
                bytes = self.image_bytes,
                "image ceiling exceeded; truncating turn"
            );
            self.mark_truncated();
            return Control::Stop;
        }
        Control::Continue
    }

    fn mark_truncated(&mut self) {
        if !self.truncated {
            self.truncated = true;
            // Recount first so the notice never inflates the estimate,
            // matching the error path.
            self.turn.recompute_token_estimate();
            self.turn.push_text(TRUNCATION_NOTICE);
        }
    }

    /// Drains every sub-parser in pipeline order: markup first (its
    /// remainder is still subject to think splitting), then think, then
    /// the image scanner.
    fn flush_pipeline(&mut self) {
        if let Some(markup) = &mut self.markup {
            let rest = markup.flush();
            if !rest.is_empty() {
                self.route_plain(&rest);
            }
        }
        let split = self.think.flush();
        self.route_display(&split.display);
        if !split.thinking.is_empty() {
            self.text_bytes += split.thinking.len();
            self.turn.push_thinking(&split.thinking);
        }
        if let Some(rest) = self.images.flush() {
            self.text_bytes += rest.len();
            self.turn.push_text(&rest);
        }
        self.merge_round_signature();
    }

    fn merge_round_signature(&mut self) {
        if self.sig_buf.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.sig_buf);
        self.turn.merge_signature(Signature {
            data,
            policy: self.cfg.signature_policy,
        });
    }

    /// Collects this round's completed calls, preferring the native
    /// channel when both produced something.
    fn collect_calls(&mut self) -> Vec<ToolCallRecord> {
        let native = self.native.take_completed();
        let markup = match &mut self.markup {
            Some(m) => m.take_completed(),
            None => Vec::new(),
        };
        if !native.is_empty() {
            if !markup.is_empty() && !self.native_markup_warned {
                self.native_markup_warned = true;
                tracing::warn!(
                    session = %self.session_id,
                    native = native.len(),
                    markup = markup.len(),
                    "both native and markup tool calls present; using native"
                );
            }
            native
        } else {
            markup
        }
    }

    fn suspend_for_tools(&mut self, calls: &[ToolCallRecord]) {
        if self.turn.display_text.is_empty() {
            self.turn.push_text(TOOL_PLACEHOLDER_TEXT);
        }
        self.turn.tool_calls.extend(calls.iter().cloned());
        // Clock keeps running; the partial snapshot has no totals.
        self.turn.stats = self.clock.partial_snapshot();
        self.render
            .on_incremental(&self.turn.display_text, &self.turn.thinking_text);
    }

    fn finalize_success(&mut self) -> FinalizedTurn {
        // A truncated turn already recounted when the notice went in.
        if !self.truncated {
            self.turn.recompute_token_estimate();
        }
        self.store_final(false)
    }

    fn store_final(&mut self, errored: bool) -> FinalizedTurn {
        self.clock.stop();
        self.clock.set_token_count(self.turn.stats.token_count);
        self.turn.finalize(self.clock.final_snapshot());
        let index = self.messages.store_turn(&self.session_id, &self.turn);
        self.render.on_final(&self.turn.parts);
        FinalizedTurn {
            index,
            errored,
            truncated: self.truncated,
        }
    }
}
