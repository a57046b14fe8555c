//! Incremental parser for the Anthropic Messages SSE stream.
//!
//! Routes typed content-block events into the shared assembler: text
//! and thinking deltas stream as they arrive, signature deltas
//! accumulate per round, and `tool_use` blocks build up through
//! `input_json_delta` fragments keyed by block index. In-band `error`
//! events finalize the turn as an error turn, preserving whatever
//! partial content already streamed.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use polylm_core::wire::sse_data;
use polylm_core::{
    ByteStream, Control, EngineError, LineFramer, ParseOutcome, StreamDriver, TurnAssembler,
    WireFormat,
};

use crate::types::StreamEvent;

/// Framer cap for this dialect; an inline image arrives base64-encoded
/// inside a single `data:` line, so the cap must sit above the
/// assembler's image ceiling.
const FRAMER_CAP: usize = 96 * 1024 * 1024;

/// Stream driver for the Anthropic Messages dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicDriver;

/// Per-event routing result.
enum Routed {
    Continue,
    Stop,
    Error(EngineError),
}

impl StreamDriver for AnthropicDriver {
    fn format(&self) -> WireFormat {
        WireFormat::Anthropic
    }

    fn drive<'a>(
        &'a self,
        reader: ByteStream,
        assembler: &'a mut TurnAssembler,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ParseOutcome, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let mut reader = reader;
            let mut framer = LineFramer::with_capacity_limit(FRAMER_CAP);

            loop {
                let chunk = tokio::select! {
                    chunk = reader.next() => chunk,
                    () = cancel.cancelled() => {
                        return Ok(ParseOutcome::Cancelled(assembler.cancelled()));
                    }
                };
                let Some(chunk) = chunk else {
                    break;
                };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        return Ok(ParseOutcome::Completed(assembler.fail(&err)));
                    }
                };
                let lines = match framer.push(&bytes) {
                    Ok(lines) => lines,
                    // Buffer overflow is resource exhaustion, not a crash:
                    // the turn finalizes with what streamed so far.
                    Err(err) => {
                        return Ok(ParseOutcome::Completed(assembler.fail(&err)));
                    }
                };
                for line in lines {
                    match route_line(&line, assembler) {
                        Routed::Continue => {}
                        Routed::Stop => return Ok(assembler.finish()),
                        Routed::Error(err) => {
                            return Ok(ParseOutcome::Completed(assembler.fail(&err)));
                        }
                    }
                }
            }

            // A final data line may arrive without a trailing newline.
            if let Some(rest) = framer.take_remainder() {
                match route_line(&rest, assembler) {
                    Routed::Continue | Routed::Stop => {}
                    Routed::Error(err) => {
                        return Ok(ParseOutcome::Completed(assembler.fail(&err)));
                    }
                }
            }
            Ok(assembler.finish())
        })
    }
}

fn route_line(line: &str, assembler: &mut TurnAssembler) -> Routed {
    let Some(data) = sse_data(line) else {
        return Routed::Continue;
    };
    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            // A single malformed event is skipped, not fatal.
            tracing::debug!(error = %e, "skipping unparseable stream event");
            return Routed::Continue;
        }
    };

    match event.event_type.as_str() {
        "content_block_start" => route_block_start(&event, assembler),
        "content_block_delta" => route_block_delta(&event, assembler),
        "error" => {
            let Some(detail) = &event.error else {
                return Routed::Continue;
            };
            Routed::Error(EngineError::from_provider_event(
                &detail.error_type,
                &detail.message,
                None,
            ))
        }
        // message_start, content_block_stop, message_delta, message_stop
        // and pings carry nothing the assembler needs.
        _ => Routed::Continue,
    }
}

fn route_block_start(event: &StreamEvent, assembler: &mut TurnAssembler) -> Routed {
    let (Some(index), Some(block)) = (event.index, &event.content_block) else {
        return Routed::Continue;
    };
    match block.block_type.as_str() {
        "tool_use" => {
            assembler.native_fragment(index, block.id.as_deref(), block.name.as_deref());
            Routed::Continue
        }
        "image" => {
            let Some(source) = &block.source else {
                return Routed::Continue;
            };
            let media_type = source.media_type.as_deref().unwrap_or("image/png");
            let data = source.data.as_deref().unwrap_or_default();
            let uri = format!("data:{media_type};base64,{data}");
            control_to_routed(assembler.inline_image(uri, !data.is_empty()))
        }
        _ => Routed::Continue,
    }
}

fn route_block_delta(event: &StreamEvent, assembler: &mut TurnAssembler) -> Routed {
    let (Some(index), Some(delta)) = (event.index, &event.delta) else {
        return Routed::Continue;
    };
    match delta.delta_type.as_deref() {
        Some("text_delta") => {
            let Some(text) = &delta.text else {
                return Routed::Continue;
            };
            control_to_routed(assembler.text_delta(text))
        }
        Some("thinking_delta") => {
            let Some(thinking) = &delta.thinking else {
                return Routed::Continue;
            };
            control_to_routed(assembler.thinking_delta(thinking))
        }
        Some("signature_delta") => {
            if let Some(signature) = &delta.signature {
                assembler.signature_fragment(signature);
            }
            Routed::Continue
        }
        Some("input_json_delta") => {
            if let Some(partial_json) = &delta.partial_json {
                assembler.native_arguments(index, partial_json);
            }
            Routed::Continue
        }
        _ => Routed::Continue,
    }
}

fn control_to_routed(control: Control) -> Routed {
    match control {
        Control::Continue => Routed::Continue,
        Control::Stop => Routed::Stop,
    }
}
