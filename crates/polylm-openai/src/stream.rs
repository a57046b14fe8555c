//! Incremental parser for the OpenAI chat-completions SSE stream.
//!
//! The flat delta format: every `data:` line carries a chunk whose
//! `choices[0].delta` may hold visible content, reasoning content, or
//! indexed tool-call fragments, terminated by a `data: [DONE]`
//! sentinel. Compatible servers for local models interleave `<think>`
//! tags and fallback tool markup in `content`; both are handled by the
//! assembler's text pipeline, which this dialect enables.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use polylm_core::wire::sse_data;
use polylm_core::{
    ByteStream, Control, EngineError, LineFramer, ParseOutcome, StreamDriver, TurnAssembler,
    WireFormat,
};

use crate::types::ChatChunk;

/// Stream driver for the OpenAI chat-completions dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiDriver;

enum Routed {
    Continue,
    Done,
    Stop,
    Error(EngineError),
}

impl StreamDriver for OpenAiDriver {
    fn format(&self) -> WireFormat {
        WireFormat::OpenAi
    }

    fn drive<'a>(
        &'a self,
        reader: ByteStream,
        assembler: &'a mut TurnAssembler,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ParseOutcome, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let mut reader = reader;
            let mut framer = LineFramer::default();

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
                        Routed::Done | Routed::Stop => return Ok(assembler.finish()),
                        Routed::Error(err) => {
                            return Ok(ParseOutcome::Completed(assembler.fail(&err)));
                        }
                    }
                }
            }

            if let Some(rest) = framer.take_remainder() {
                match route_line(&rest, assembler) {
                    Routed::Continue | Routed::Done | Routed::Stop => {}
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
    if data.trim() == "[DONE]" {
        return Routed::Done;
    }

    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable stream chunk");
            return Routed::Continue;
        }
    };

    if let Some(error) = &chunk.error {
        return Routed::Error(EngineError::from_provider_event(
            &error.code_str(),
            &error.message,
            None,
        ));
    }

    let Some(choice) = chunk.choices.first() else {
        return Routed::Continue;
    };
    if let Some(reason) = &choice.finish_reason {
        // The [DONE] sentinel follows; accumulated calls are collected
        // at finish either way.
        tracing::debug!(reason, "stream finish reason");
    }
    let Some(delta) = &choice.delta else {
        return Routed::Continue;
    };

    if let Some(content) = &delta.content {
        if let Control::Stop = assembler.text_delta(content) {
            return Routed::Stop;
        }
    }
    if let Some(reasoning) = &delta.reasoning_content {
        if let Control::Stop = assembler.thinking_delta(reasoning) {
            return Routed::Stop;
        }
    }
    if let Some(tool_calls) = &delta.tool_calls {
        for call in tool_calls {
            let (name, arguments) = match &call.function {
                Some(f) => (f.name.as_deref(), f.arguments.as_deref()),
                None => (None, None),
            };
            assembler.native_fragment(call.index, call.id.as_deref(), name);
            if let Some(arguments) = arguments {
                if !arguments.is_empty() {
                    assembler.native_arguments(call.index, arguments);
                }
            }
        }
    }
    Routed::Continue
}
