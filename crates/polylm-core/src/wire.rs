//! Wire-format tags, byte-stream framing, and the driver seams.
//!
//! The engine does not open network connections. Each provider dialect
//! implements [`StreamDriver`] over an already-opened [`ByteStream`] of
//! raw chunks, using [`LineFramer`] to recover complete lines across
//! arbitrary chunk boundaries (a decoded chunk may end mid-line; the
//! trailing partial line is re-buffered, not processed).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::assemble::TurnAssembler;
use crate::error::EngineError;
use crate::outcome::ToolOutcome;
use crate::turn::ToolCallRecord;

/// The three supported provider wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// SSE JSON events with typed content blocks and `toolu_` call IDs.
    Anthropic,
    /// Flat SSE chat-completion deltas with `call_` call IDs.
    OpenAi,
    /// JSON-array-oriented SSE candidates; call IDs are engine-minted
    /// with an `fn_` prefix.
    Gemini,
}

impl WireFormat {
    /// The literal ID prefix associated with this format.
    ///
    /// Used only for heuristic format detection and canonicalization,
    /// never for parsing-logic correctness.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Anthropic => "toolu_",
            Self::OpenAi => "call_",
            Self::Gemini => "fn_",
        }
    }

    /// All formats, in a fixed order.
    pub const ALL: [WireFormat; 3] = [Self::Anthropic, Self::OpenAi, Self::Gemini];

    /// Detects which format an ID looks like, by prefix.
    pub fn detect(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| id.starts_with(f.id_prefix()))
    }
}

/// An incremental stream of raw response bytes.
///
/// This is the shape `bytes_stream()` yields on an HTTP response body;
/// the transport that opens it is an external collaborator.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;

/// Whether a parser invocation starts a fresh turn or merges into the
/// previous one after tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// First round of a turn.
    Initial,
    /// Continuation round: merge into the existing turn.
    Continuation,
}

/// A finalized turn's bookkeeping, as reported by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizedTurn {
    /// Storage index returned by the message sink.
    pub index: usize,
    /// Whether the turn finalized on the error path.
    pub errored: bool,
    /// Whether the turn was truncated by a size ceiling.
    pub truncated: bool,
}

/// The result of driving one stream round to completion.
#[derive(Debug)]
pub enum ParseOutcome {
    /// The turn finalized (success, error, or truncation).
    Completed(FinalizedTurn),
    /// The round ended with completed tool calls; the turn is suspended
    /// awaiting a continuation.
    AwaitingTools(Vec<ToolCallRecord>),
    /// The stream was cancelled; the turn was finalized with whatever
    /// partial content had accumulated.
    Cancelled(FinalizedTurn),
}

/// A provider dialect's incremental stream parser.
///
/// Boxed-future object-safe trait so the engine can hold drivers behind
/// `Arc<dyn StreamDriver>`.
pub trait StreamDriver: Send + Sync {
    /// The wire format this driver speaks.
    fn format(&self) -> WireFormat;

    /// Consumes the reader to exhaustion (or cancellation / ceiling),
    /// routing decoded deltas into `assembler`.
    fn drive<'a>(
        &'a self,
        reader: ByteStream,
        assembler: &'a mut TurnAssembler,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ParseOutcome, EngineError>> + Send + 'a>>;
}

/// Builds the provider-specific tool-result message batch for a
/// continuation request.
pub trait ToolResultBuilder: Send + Sync {
    /// The wire format the batch targets.
    fn format(&self) -> WireFormat;

    /// Re-serializes outcomes into the provider's expected message
    /// shapes, in detection order.
    fn build(&self, outcomes: &[ToolOutcome]) -> Vec<Value>;
}

/// The function used to re-issue a request with a tool-result batch,
/// returning a fresh byte stream for the continuation round.
pub type ResendFn = std::sync::Arc<
    dyn Fn(Vec<Value>) -> Pin<Box<dyn Future<Output = Result<ByteStream, EngineError>> + Send>>
        + Send
        + Sync,
>;

// ── Line framing ────────────────────────────────────────────────────

/// Default cap on buffered, not-yet-framed data.
pub const DEFAULT_FRAMER_CAP: usize = 16 * 1024 * 1024; // 16 MiB

/// Reassembles complete lines from arbitrary byte chunks.
///
/// Handles UTF-8 sequences split across chunk boundaries (decoding the
/// valid prefix and carrying the rest), strips `\r`, and re-buffers a
/// trailing partial line until the next chunk completes it.
#[derive(Debug)]
pub struct LineFramer {
    buffer: String,
    utf8_buf: Vec<u8>,
    cap: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_capacity_limit(DEFAULT_FRAMER_CAP)
    }
}

impl LineFramer {
    /// Creates a framer with the given buffered-data cap.
    ///
    /// Dialects carrying large inline binary payloads need a cap above
    /// the default, since a whole payload can arrive inside one line.
    pub fn with_capacity_limit(cap: usize) -> Self {
        Self {
            buffer: String::new(),
            utf8_buf: Vec::new(),
            cap,
        }
    }

    /// Feeds a chunk and returns the complete lines it unlocked.
    ///
    /// Returns an error if buffered data exceeds the cap (malformed or
    /// adversarial input); the framer clears itself in that case.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, EngineError> {
        self.utf8_buf.extend_from_slice(bytes);

        if self.utf8_buf.len() > self.cap || self.buffer.len() > self.cap {
            self.utf8_buf.clear();
            self.buffer.clear();
            return Err(EngineError::ResponseFormat {
                message: format!("stream line buffer exceeded {} bytes", self.cap),
                raw: String::new(),
            });
        }

        match std::str::from_utf8(&self.utf8_buf) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.utf8_buf.clear();
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to > 0 {
                    // SAFETY: `from_utf8` validated bytes up to this
                    // index are valid UTF-8.
                    let valid =
                        unsafe { std::str::from_utf8_unchecked(&self.utf8_buf[..valid_up_to]) };
                    self.buffer.push_str(valid);
                }
                match e.error_len() {
                    // Invalid sequence: skip past it.
                    Some(len) => {
                        self.utf8_buf.drain(..valid_up_to + len);
                    }
                    // Incomplete sequence at the end: keep it for the
                    // next chunk.
                    None => {
                        self.utf8_buf.drain(..valid_up_to);
                    }
                }
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            lines.push(line);
        }
        Ok(lines)
    }

    /// Takes the trailing partial line at end of stream, if any.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Extracts the payload of an SSE `data:` line.
///
/// Returns `None` for comment lines (leading `:`), event-name lines,
/// and blank lines.
pub fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
}
