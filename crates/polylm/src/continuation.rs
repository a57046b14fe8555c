//! The tool-call continuation loop.
//!
//! Drives a provider stream to its outcome and, when a round suspends
//! with completed tool calls, executes them and re-issues the request
//! with the result batch until the model answers without further calls.
//! All calls in a round execute in parallel; the result batch preserves
//! detection order regardless of completion order.
//!
//! The loop is bounded. A model that keeps requesting tools past the
//! round budget gets its turn finalized as an error instead of spinning
//! the engine forever.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use polylm_core::{
    ByteStream, EngineError, ParseOutcome, ResendFn, StreamDriver, ToolCallRecord,
    ToolCallStatus, ToolOutcome, ToolResultBuilder, TurnAssembler,
};

use crate::context::{EngineContext, EngineEvent};
use crate::executor::ToolExecutor;
use crate::lifecycle::RequestState;

/// Default bound on continuation rounds per turn.
pub const DEFAULT_MAX_ROUNDS: u32 = 8;

/// Continuation tuning knobs.
#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    /// Maximum tool-continuation rounds before the turn errors out.
    pub max_rounds: u32,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Runs the stream/execute/resend loop for one turn.
pub struct ContinuationOrchestrator {
    driver: Arc<dyn StreamDriver>,
    builder: Arc<dyn ToolResultBuilder>,
    executor: ToolExecutor,
    resend: ResendFn,
    ctx: EngineContext,
    cfg: ContinuationConfig,
}

impl ContinuationOrchestrator {
    /// Assembles an orchestrator from its collaborators.
    pub fn new(
        driver: Arc<dyn StreamDriver>,
        builder: Arc<dyn ToolResultBuilder>,
        executor: ToolExecutor,
        resend: ResendFn,
        ctx: EngineContext,
    ) -> Self {
        Self {
            driver,
            builder,
            executor,
            resend,
            ctx,
            cfg: ContinuationConfig::default(),
        }
    }

    /// Overrides the tuning knobs.
    #[must_use]
    pub fn with_config(mut self, cfg: ContinuationConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Drives `stream` to a final outcome, looping through tool rounds
    /// as needed. The lifecycle must already be in `Streaming`.
    pub async fn run(
        &self,
        stream: ByteStream,
        assembler: &mut TurnAssembler,
        cancel: CancellationToken,
    ) -> Result<ParseOutcome, EngineError> {
        let mut stream = stream;
        let mut round: u32 = 0;

        loop {
            // A driver error must not leave the turn unfinalized or the
            // lifecycle wedged in a streaming state.
            let outcome = match self.driver.drive(stream, assembler, cancel.clone()).await {
                Ok(outcome) => outcome,
                Err(err) => return Ok(self.fail_turn(assembler, &err)),
            };

            let mut calls = match outcome {
                ParseOutcome::Completed(fin) => {
                    let to = if fin.errored {
                        RequestState::Error
                    } else {
                        RequestState::Completed
                    };
                    self.shift(to);
                    self.ctx.bus().emit(&EngineEvent::TurnFinalized {
                        index: fin.index,
                        errored: fin.errored,
                    });
                    return Ok(ParseOutcome::Completed(fin));
                }
                ParseOutcome::Cancelled(fin) => {
                    self.shift(RequestState::Cancelled);
                    self.ctx.bus().emit(&EngineEvent::TurnFinalized {
                        index: fin.index,
                        errored: fin.errored,
                    });
                    return Ok(ParseOutcome::Cancelled(fin));
                }
                ParseOutcome::AwaitingTools(calls) => calls,
            };

            round += 1;
            if round > self.cfg.max_rounds {
                return Ok(self.fail_turn(
                    assembler,
                    &EngineError::ContinuationExhausted {
                        limit: self.cfg.max_rounds,
                    },
                ));
            }

            self.shift(RequestState::ToolCalling);
            self.reconcile_ids(&mut calls);

            let outcomes = match self.executor.execute_all(&calls, &cancel).await {
                Ok(outcomes) => outcomes,
                Err(err) => return Ok(self.fail_turn(assembler, &err)),
            };
            assembler.record_tool_results(&results_from_outcomes(&calls, &outcomes));

            let batch = self.builder.build(&outcomes);
            self.shift(RequestState::Continuation);
            self.ctx.bus().emit(&EngineEvent::ContinuationRound { round });

            stream = match (self.resend)(batch).await {
                Ok(stream) => stream,
                Err(err) => return Ok(self.fail_turn(assembler, &err)),
            };
            assembler.resume_continuation();
        }
    }

    /// Gives every call a usable ID in the active wire format: markup
    /// calls (empty ID) get a minted one, native IDs resolve through
    /// the reconciler so siblings stay consistent.
    fn reconcile_ids(&self, calls: &mut [ToolCallRecord]) {
        let format = self.driver.format();
        let mut reconciler = self.ctx.reconciler();
        for call in calls {
            if call.id.is_empty() {
                call.id = reconciler.mint(format);
            } else {
                call.id = reconciler.resolve(&call.id, format);
            }
        }
    }

    fn fail_turn(&self, assembler: &mut TurnAssembler, err: &EngineError) -> ParseOutcome {
        tracing::warn!(error = %err, "finalizing turn on continuation failure");
        let fin = assembler.fail(err);
        self.shift(RequestState::Error);
        self.ctx.bus().emit(&EngineEvent::TurnFinalized {
            index: fin.index,
            errored: true,
        });
        ParseOutcome::Completed(fin)
    }

    fn shift(&self, to: RequestState) {
        if let Err(e) = self.ctx.lifecycle().transition(to) {
            tracing::warn!(error = %e, "lifecycle out of step with continuation loop");
        }
    }
}

fn results_from_outcomes(
    calls: &[ToolCallRecord],
    outcomes: &[ToolOutcome],
) -> Vec<ToolCallRecord> {
    calls
        .iter()
        .zip(outcomes)
        .map(|(call, outcome)| ToolCallRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            status: if outcome.is_error() {
                ToolCallStatus::Failed
            } else {
                ToolCallStatus::Completed
            },
            result: Some(outcome.content.clone()),
        })
        .collect()
}
