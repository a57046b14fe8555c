//! Tool execution pipeline.
//!
//! Every accumulated call runs the same gauntlet: permission gate, rate
//! limiter, JSON Schema argument validation, then the handler itself
//! under a timeout. Each stage that refuses a call produces a failed
//! [`ToolOutcome`] carrying explicit non-retry guidance; nothing in the
//! pipeline is silently dropped, because the model must receive exactly
//! one result per call it made.
//!
//! The single fatal exception is a structurally broken permission
//! subsystem, which aborts the whole batch rather than letting calls
//! through unchecked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use polylm_core::error::format_violations;
use polylm_core::{
    EngineError, EventBus, ExecutionHistory, ExecutionRecord, ToolCallRecord, ToolFailureKind,
    ToolOutcome,
};

use crate::context::EngineEvent;
use crate::registry::ToolRegistry;

/// Permission decision for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// The call may proceed.
    Allow,
    /// The call is refused.
    Deny {
        /// Reason surfaced to the model.
        reason: String,
    },
}

/// A permission-gate failure, distinct from a deny.
#[derive(Debug, thiserror::Error)]
#[error("permission gate failure: {message}")]
pub struct GateFailure {
    /// What broke.
    pub message: String,
    /// A fatal failure means the subsystem itself is broken and no call
    /// may be trusted; a non-fatal one degrades to allow-with-warning.
    pub fatal: bool,
}

/// Pre-execution permission check.
pub trait PermissionGate: Send + Sync {
    /// Decides whether `tool` may run with `arguments`.
    fn check(&self, tool: &str, arguments: &Value) -> Result<PermissionDecision, GateFailure>;
}

/// Pre-execution rate admission.
pub trait RateLimiter: Send + Sync {
    /// Returns `false` to refuse the call for rate reasons.
    fn acquire(&self, tool: &str) -> bool;
}

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-call execution timeout.
    pub call_timeout: Duration,
    /// Hard ceiling the per-call timeout is clamped to.
    pub max_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(120),
        }
    }
}

/// Runs accumulated tool calls through the execution pipeline.
pub struct ToolExecutor {
    registry: ToolRegistry,
    gate: Option<Arc<dyn PermissionGate>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    history: Option<Arc<dyn ExecutionHistory>>,
    bus: EventBus<EngineEvent>,
    cfg: ExecutorConfig,
}

impl ToolExecutor {
    /// Creates an executor over a registry with default tuning.
    pub fn new(registry: ToolRegistry, bus: EventBus<EngineEvent>) -> Self {
        Self {
            registry,
            gate: None,
            limiter: None,
            history: None,
            bus,
            cfg: ExecutorConfig::default(),
        }
    }

    /// Installs a permission gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Installs a rate limiter.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Installs an execution-history sink.
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn ExecutionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Overrides the tuning knobs.
    #[must_use]
    pub fn with_config(mut self, cfg: ExecutorConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Executes a batch of calls in parallel, preserving detection
    /// order in the returned outcomes.
    ///
    /// Fails only when the permission subsystem is structurally broken;
    /// every other failure becomes a per-call outcome.
    pub async fn execute_all(
        &self,
        calls: &[ToolCallRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolOutcome>, EngineError> {
        let results = join_all(calls.iter().map(|call| self.execute_one(call, cancel))).await;
        results.into_iter().collect()
    }

    /// Executes one call through the full pipeline.
    pub async fn execute_one(
        &self,
        call: &ToolCallRecord,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, EngineError> {
        let started = Instant::now();
        self.bus.emit(&EngineEvent::ToolStarted {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
        });
        let outcome = self.run_pipeline(call, cancel).await?;
        let duration = started.elapsed();
        self.record_history(call, &outcome, duration);
        self.bus.emit(&EngineEvent::ToolFinished {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: !outcome.is_error(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(outcome)
    }

    async fn run_pipeline(
        &self,
        call: &ToolCallRecord,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, EngineError> {
        let Some(handler) = self.registry.get(&call.name) else {
            return Ok(ToolOutcome::failed(
                &call.id,
                &call.name,
                ToolFailureKind::Unavailable,
                format!("Tool '{}' is not registered.", call.name),
            ));
        };

        if let Some(gate) = &self.gate {
            match gate.check(&call.name, &call.arguments) {
                Ok(PermissionDecision::Allow) => {}
                Ok(PermissionDecision::Deny { reason }) => {
                    return Ok(ToolOutcome::failed(
                        &call.id,
                        &call.name,
                        ToolFailureKind::Unavailable,
                        format!("Permission denied: {reason}"),
                    ));
                }
                Err(failure) if failure.fatal => {
                    return Err(EngineError::PermissionFault(failure.message));
                }
                Err(failure) => {
                    tracing::warn!(
                        tool = %call.name,
                        error = %failure,
                        "permission check failed non-fatally; allowing call"
                    );
                }
            }
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.acquire(&call.name) {
                return Ok(ToolOutcome::failed(
                    &call.id,
                    &call.name,
                    ToolFailureKind::Transient,
                    format!("Tool '{}' was rate-limited.", call.name),
                ));
            }
        }

        if let Some(outcome) = self.validate_arguments(call, &handler.definition().parameters) {
            return Ok(outcome);
        }

        let timeout = self.cfg.call_timeout.min(self.cfg.max_timeout);
        let child = cancel.child_token();
        let result = tokio::select! {
            result = handler.execute(call.arguments.clone(), child.clone()) => result,
            () = tokio::time::sleep(timeout) => {
                child.cancel();
                return Ok(ToolOutcome::failed(
                    &call.id,
                    &call.name,
                    ToolFailureKind::Transient,
                    format!("Tool '{}' timed out after {}ms.", call.name, timeout.as_millis()),
                ));
            }
            () = cancel.cancelled() => {
                child.cancel();
                return Ok(ToolOutcome::failed(
                    &call.id,
                    &call.name,
                    ToolFailureKind::Transient,
                    "Execution was cancelled.",
                ));
            }
        };

        Ok(match result {
            Ok(content) => ToolOutcome::ok(&call.id, &call.name, content),
            Err(err) => ToolOutcome::failed(
                &call.id,
                &call.name,
                ToolFailureKind::Transient,
                format!("Tool '{}' failed: {err}.", call.name),
            ),
        })
    }

    /// Validates arguments against the tool's schema. Returns a failed
    /// outcome listing every violation, or `None` when valid.
    fn validate_arguments(&self, call: &ToolCallRecord, schema: &Value) -> Option<ToolOutcome> {
        let validator = match jsonschema::validator_for(schema) {
            Ok(v) => v,
            Err(e) => {
                // A broken schema is a tool-author bug; refusing every
                // call for it would hide the tool entirely.
                tracing::warn!(tool = %call.name, error = %e, "invalid tool schema; skipping validation");
                return None;
            }
        };
        let violations: Vec<String> = validator
            .iter_errors(&call.arguments)
            .map(|e| e.to_string())
            .collect();
        if violations.is_empty() {
            return None;
        }
        Some(ToolOutcome::failed(
            &call.id,
            &call.name,
            ToolFailureKind::InvalidParams,
            format_violations(&call.name, &violations),
        ))
    }

    fn record_history(&self, call: &ToolCallRecord, outcome: &ToolOutcome, duration: Duration) {
        let Some(history) = &self.history else {
            return;
        };
        let record = ExecutionRecord {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            success: !outcome.is_error(),
            duration,
            detail: outcome.content.clone(),
        };
        if let Err(e) = history.record(record) {
            tracing::warn!(tool = %call.name, error = %e, "failed to record execution history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ToolDefinition, ToolError, tool_fn};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn registry_with_echo() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(tool_fn(
            ToolDefinition {
                name: "echo".into(),
                description: "Echoes".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"],
                }),
            },
            |args| async move {
                Ok(args.get("text").and_then(Value::as_str).unwrap_or("").to_string())
            },
        ));
        reg
    }

    fn executor(reg: ToolRegistry) -> ToolExecutor {
        ToolExecutor::new(reg, EventBus::new())
    }

    fn call(name: &str, args: Value) -> ToolCallRecord {
        ToolCallRecord::pending(format!("call_{name}"), name, args)
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let exec = executor(registry_with_echo());
        let outcome = exec
            .execute_one(&call("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_error());
        assert_eq!(outcome.content, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_unavailable() {
        let exec = executor(registry_with_echo());
        let outcome = exec
            .execute_one(&call("missing", json!({})), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(ToolFailureKind::Unavailable));
        assert!(outcome.content.contains("not registered"));
    }

    #[tokio::test]
    async fn test_schema_violation_lists_all_problems() {
        let exec = executor(registry_with_echo());
        let outcome = exec
            .execute_one(&call("echo", json!({"text": 42})), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(ToolFailureKind::InvalidParams));
        assert!(outcome.content.contains("echo"));
        assert!(outcome.content.contains("Do not retry"));
    }

    #[tokio::test]
    async fn test_deny_becomes_unavailable_outcome() {
        struct DenyAll;
        impl PermissionGate for DenyAll {
            fn check(&self, _: &str, _: &Value) -> Result<PermissionDecision, GateFailure> {
                Ok(PermissionDecision::Deny {
                    reason: "not allowed in this session".into(),
                })
            }
        }
        let exec = executor(registry_with_echo()).with_gate(Arc::new(DenyAll));
        let outcome = exec
            .execute_one(&call("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(ToolFailureKind::Unavailable));
        assert!(outcome.content.contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_fatal_gate_failure_aborts_batch() {
        struct Broken;
        impl PermissionGate for Broken {
            fn check(&self, _: &str, _: &Value) -> Result<PermissionDecision, GateFailure> {
                Err(GateFailure {
                    message: "permission module failed to load".into(),
                    fatal: true,
                })
            }
        }
        let exec = executor(registry_with_echo()).with_gate(Arc::new(Broken));
        let err = exec
            .execute_one(&call("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionFault(_)));
    }

    #[tokio::test]
    async fn test_nonfatal_gate_failure_allows_with_warning() {
        struct Flaky;
        impl PermissionGate for Flaky {
            fn check(&self, _: &str, _: &Value) -> Result<PermissionDecision, GateFailure> {
                Err(GateFailure {
                    message: "transient lookup error".into(),
                    fatal: false,
                })
            }
        }
        let exec = executor(registry_with_echo()).with_gate(Arc::new(Flaky));
        let outcome = exec
            .execute_one(&call("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_error());
    }

    #[tokio::test]
    async fn test_rate_limited_call_is_transient() {
        struct RejectAll;
        impl RateLimiter for RejectAll {
            fn acquire(&self, _: &str) -> bool {
                false
            }
        }
        let exec = executor(registry_with_echo()).with_limiter(Arc::new(RejectAll));
        let outcome = exec
            .execute_one(&call("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(ToolFailureKind::Transient));
        assert!(outcome.content.contains("rate-limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_transient_outcome() {
        let mut reg = ToolRegistry::new();
        reg.register(tool_fn(
            ToolDefinition {
                name: "slow".into(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            },
            |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            },
        ));
        let exec = executor(reg).with_config(ExecutorConfig {
            call_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_secs(1),
        });
        let outcome = exec
            .execute_one(&call("slow", json!({})), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(ToolFailureKind::Transient));
        assert!(outcome.content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_produces_transient_outcome() {
        let mut reg = ToolRegistry::new();
        let started = Arc::new(AtomicBool::new(false));
        let started_clone = Arc::clone(&started);
        reg.register(tool_fn(
            ToolDefinition {
                name: "hang".into(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            },
            move |_| {
                let started = Arc::clone(&started_clone);
                async move {
                    started.store(true, Ordering::SeqCst);
                    futures::future::pending::<()>().await;
                    Err(ToolError("unreachable".into()))
                }
            },
        ));
        let exec = executor(reg);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = exec
            .execute_one(&call("hang", json!({})), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.failure, Some(ToolFailureKind::Transient));
        assert!(outcome.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let exec = executor(registry_with_echo());
        let calls = vec![
            call("echo", json!({"text": "first"})),
            call("missing", json!({})),
            call("echo", json!({"text": "third"})),
        ];
        let outcomes = exec
            .execute_all(&calls, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].content, "first");
        assert!(outcomes[1].is_error());
        assert_eq!(outcomes[2].content, "third");
    }

    #[tokio::test]
    async fn test_history_records_attempts() {
        #[derive(Default)]
        struct MemHistory {
            entries: Mutex<Vec<ExecutionRecord>>,
        }
        impl ExecutionHistory for MemHistory {
            fn record(
                &self,
                entry: ExecutionRecord,
            ) -> Result<(), polylm_core::sink::HistorySinkError> {
                self.entries.lock().unwrap().push(entry);
                Ok(())
            }
        }
        let history = Arc::new(MemHistory::default());
        let exec = executor(registry_with_echo())
            .with_history(Arc::clone(&history) as Arc<dyn ExecutionHistory>);
        let _ = exec
            .execute_one(&call("echo", json!({"text": "hi"})), &CancellationToken::new())
            .await
            .unwrap();
        let entries = history.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].tool_name, "echo");
    }
}
