//! Engine context: the shared state one chat surface owns.
//!
//! Everything here is scoped to a context instance rather than being
//! process-global, so multiple independent surfaces (windows, sessions,
//! tests) can run engines side by side without sharing lifecycle state
//! or ID mappings.

use std::sync::{Arc, Mutex, MutexGuard};

use polylm_core::EventBus;

use crate::lifecycle::RequestLifecycle;
use crate::reconcile::IdReconciler;
use crate::signature::SignatureStore;

/// Engine-level notifications delivered on the context's event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineEvent {
    /// A request began for a session.
    RequestStarted {
        /// The session the request belongs to.
        session_id: String,
    },
    /// A tool call began executing.
    ToolStarted {
        /// Reconciled call identifier.
        call_id: String,
        /// The tool name.
        tool_name: String,
    },
    /// A tool call finished executing.
    ToolFinished {
        /// Reconciled call identifier.
        call_id: String,
        /// The tool name.
        tool_name: String,
        /// Whether the call succeeded.
        success: bool,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
    /// A continuation round began.
    ContinuationRound {
        /// 1-based round number.
        round: u32,
    },
    /// A turn finalized and was stored.
    TurnFinalized {
        /// Storage index of the turn.
        index: usize,
        /// Whether it finalized on the error path.
        errored: bool,
    },
}

/// Shared per-surface engine state.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    lifecycle: RequestLifecycle,
    reconciler: Arc<Mutex<IdReconciler>>,
    signatures: Arc<Mutex<SignatureStore>>,
    bus: EventBus<EngineEvent>,
}

impl EngineContext {
    /// Creates a fresh context with default components.
    pub fn new() -> Self {
        Self::default()
    }

    /// The request state machine.
    pub fn lifecycle(&self) -> &RequestLifecycle {
        &self.lifecycle
    }

    /// Locked access to the ID reconciler.
    pub fn reconciler(&self) -> MutexGuard<'_, IdReconciler> {
        self.reconciler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Locked access to the signature store.
    pub fn signatures(&self) -> MutexGuard<'_, SignatureStore> {
        self.signatures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus<EngineEvent> {
        &self.bus
    }

    /// Clears session-scoped state on a session switch: ID mappings and
    /// signature backups. The lifecycle is left alone; a switch is not
    /// allowed to interrupt an in-flight request.
    pub fn reset_session_state(&self) {
        self.reconciler().clear();
        self.signatures().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polylm_core::WireFormat;

    #[test]
    fn test_clone_shares_state() {
        let ctx = EngineContext::new();
        let clone = ctx.clone();
        let id = ctx.reconciler().resolve("toolu_a", WireFormat::OpenAi);
        assert_eq!(clone.reconciler().resolve("toolu_a", WireFormat::OpenAi), id);
    }

    #[test]
    fn test_reset_session_state_clears_mappings() {
        let ctx = EngineContext::new();
        let _ = ctx.reconciler().resolve("toolu_a", WireFormat::OpenAi);
        ctx.reset_session_state();
        assert!(ctx.reconciler().is_empty());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = EngineContext::new();
        let b = EngineContext::new();
        let _ = a.reconciler().resolve("toolu_a", WireFormat::OpenAi);
        assert!(b.reconciler().is_empty());
    }
}
