//! Incremental parser for the Gemini generate-content SSE stream.
//!
//! Chunks carry `candidates[0].content.parts[]`; each part is a whole
//! payload (display text, a `thought` text, a `thoughtSignature`, an
//! `inlineData` binary, or a complete `functionCall`). Calls are never
//! fragmented and carry no wire identifier; the accumulator records
//! them whole with an empty ID for the engine to mint.
//!
//! The line framer runs with a raised cap because an inline image
//! arrives base64-encoded inside a single `data:` line.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use polylm_core::wire::sse_data;
use polylm_core::{
    ByteStream, Control, EngineError, LineFramer, ParseOutcome, StreamDriver, TurnAssembler,
    WireFormat,
};

use crate::types::{Part, StreamChunk};

/// Framer cap for this dialect; must fit a whole base64 inline image.
const FRAMER_CAP: usize = 96 * 1024 * 1024;

/// Stream driver for the Gemini generate-content dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiDriver;

enum Routed {
    Continue,
    Stop,
    Error(EngineError),
}

impl StreamDriver for GeminiDriver {
    fn format(&self) -> WireFormat {
        WireFormat::Gemini
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
            // Calls are keyed by arrival order within the round.
            let mut call_index: u32 = 0;

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
                    match route_line(&line, assembler, &mut call_index) {
                        Routed::Continue => {}
                        Routed::Stop => return Ok(assembler.finish()),
                        Routed::Error(err) => {
                            return Ok(ParseOutcome::Completed(assembler.fail(&err)));
                        }
                    }
                }
            }

            if let Some(rest) = framer.take_remainder() {
                match route_line(&rest, assembler, &mut call_index) {
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

fn route_line(line: &str, assembler: &mut TurnAssembler, call_index: &mut u32) -> Routed {
    let Some(data) = sse_data(line) else {
        return Routed::Continue;
    };
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable stream chunk");
            return Routed::Continue;
        }
    };

    if let Some(error) = &chunk.error {
        let code = error.status.clone().unwrap_or_else(|| {
            error.code.map_or_else(|| "unknown".into(), |c| c.to_string())
        });
        return Routed::Error(EngineError::from_provider_event(
            &code,
            &error.message,
            error.code,
        ));
    }

    let Some(content) = chunk.candidates.first().and_then(|c| c.content.as_ref()) else {
        return Routed::Continue;
    };
    for part in &content.parts {
        match route_part(part, assembler, call_index) {
            Routed::Continue => {}
            other => return other,
        }
    }
    Routed::Continue
}

fn route_part(part: &Part, assembler: &mut TurnAssembler, call_index: &mut u32) -> Routed {
    if let Some(signature) = &part.thought_signature {
        // Most-recent-wins within the round; the dialect requires a
        // fresh signature each continuation.
        assembler.signature_whole(signature);
    }
    if let Some(call) = &part.function_call {
        let args = call
            .args
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        assembler.native_whole_call(*call_index, "", &call.name, &args);
        *call_index += 1;
    }
    if let Some(data) = &part.inline_data {
        let mime_type = data.mime_type.as_deref().unwrap_or("application/octet-stream");
        let payload = data.data.as_deref().unwrap_or_default();
        let uri = format!("data:{mime_type};base64,{payload}");
        if let Control::Stop = assembler.inline_image(uri, !payload.is_empty()) {
            return Routed::Stop;
        }
    }
    if let Some(text) = &part.text {
        let control = if part.thought {
            assembler.thinking_delta(text)
        } else {
            assembler.text_delta(text)
        };
        if let Control::Stop = control {
            return Routed::Stop;
        }
    }
    Routed::Continue
}
