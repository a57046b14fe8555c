//! The request lifecycle state machine.
//!
//! One request at a time moves through an explicit state machine with an
//! allow-listed transition table. Rejected transitions are logged and
//! refused rather than panicking, so a misbehaving caller cannot corrupt
//! the engine's notion of what is in flight.
//!
//! Terminal states ([`Completed`](RequestState::Completed),
//! [`Error`](RequestState::Error), [`Cancelled`](RequestState::Cancelled))
//! auto-revert to `Idle` after a short grace delay, giving observers a
//! window to read the outcome. A request stuck in `Sending` is force-
//! reset by a watchdog so a hung connection attempt cannot wedge the
//! engine forever.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Grace delay before a terminal state reverts to `Idle`.
pub const TERMINAL_GRACE: Duration = Duration::from_millis(300);

/// Watchdog deadline for the `Sending` state.
pub const SEND_WATCHDOG: Duration = Duration::from_secs(300);

/// Transition-history capacity.
const HISTORY_CAP: usize = 32;

/// The request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// No request in flight.
    Idle,
    /// Request issued; no response bytes yet.
    Sending,
    /// Response stream being parsed.
    Streaming,
    /// Suspended while tool calls execute.
    ToolCalling,
    /// A continuation round is streaming.
    Continuation,
    /// The turn finalized successfully.
    Completed,
    /// The turn finalized on the error path.
    Error,
    /// The turn finalized after cancellation.
    Cancelled,
}

impl RequestState {
    /// Whether a request is actively in flight in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Sending | Self::Streaming | Self::ToolCalling | Self::Continuation
        )
    }

    fn allows(self, to: RequestState) -> bool {
        use RequestState::{
            Cancelled, Completed, Continuation, Error, Idle, Sending, Streaming, ToolCalling,
        };
        match self {
            Idle => to == Sending,
            Sending => matches!(to, Streaming | Error | Cancelled),
            Streaming => matches!(to, ToolCalling | Completed | Error | Cancelled),
            ToolCalling => matches!(to, Continuation | Error | Cancelled),
            Continuation => matches!(to, ToolCalling | Completed | Error | Cancelled),
            Completed | Error | Cancelled => to == Idle,
        }
    }
}

/// A rejected lifecycle transition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid lifecycle transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State the machine was in.
    pub from: RequestState,
    /// State the caller requested.
    pub to: RequestState,
}

/// One recorded transition, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    /// State the machine left.
    pub from: RequestState,
    /// State the machine entered.
    pub to: RequestState,
    /// Whether this was a forced reset that bypassed the allow-list.
    pub forced: bool,
}

#[derive(Debug)]
struct Inner {
    state: RequestState,
    // Bumped on every state change; deferred tasks compare epochs so a
    // stale watchdog or grace timer never fires on a newer state.
    epoch: u64,
    cancel: Option<CancellationToken>,
    history: VecDeque<TransitionRecord>,
}

/// Shared handle to the request state machine.
#[derive(Debug, Clone)]
pub struct RequestLifecycle {
    inner: Arc<Mutex<Inner>>,
    grace: Duration,
    send_watchdog: Duration,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::with_delays(TERMINAL_GRACE, SEND_WATCHDOG)
    }
}

impl RequestLifecycle {
    /// Creates a lifecycle with custom grace and watchdog delays.
    pub fn with_delays(grace: Duration, send_watchdog: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RequestState::Idle,
                epoch: 0,
                cancel: None,
                history: VecDeque::new(),
            })),
            grace,
            send_watchdog,
        }
    }

    /// The current state.
    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    /// Begins a request: `Idle -> Sending`, storing the cancellation
    /// token and arming the send watchdog.
    pub fn begin(&self, cancel: CancellationToken) -> Result<(), InvalidTransition> {
        {
            let mut inner = self.lock();
            Self::apply(&mut inner, RequestState::Sending, false)?;
            inner.cancel = Some(cancel);
        }
        self.arm_send_watchdog();
        Ok(())
    }

    /// Attempts an allow-listed transition.
    ///
    /// Entering a terminal state schedules the grace-delay revert to
    /// `Idle`; entering `Idle` releases the cancellation token.
    pub fn transition(&self, to: RequestState) -> Result<(), InvalidTransition> {
        {
            let mut inner = self.lock();
            Self::apply(&mut inner, to, false)?;
            if to == RequestState::Idle {
                inner.cancel = None;
            }
        }
        if matches!(
            to,
            RequestState::Completed | RequestState::Error | RequestState::Cancelled
        ) {
            self.schedule_revert();
        }
        Ok(())
    }

    /// Requests cooperative cancellation of the in-flight request.
    ///
    /// Returns `false` (a no-op) when nothing is in flight; the state
    /// itself moves to `Cancelled` only once the stream driver observes
    /// the token and finalizes the turn.
    pub fn cancel(&self) -> bool {
        let inner = self.lock();
        if !inner.state.is_active() {
            return false;
        }
        if let Some(token) = &inner.cancel {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Forces the machine back to `Idle`, bypassing the allow-list.
    ///
    /// The escape hatch for wedged states; the forced transition is
    /// recorded as such in the history.
    pub fn force_reset(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.state == RequestState::Idle {
            return;
        }
        tracing::warn!(from = ?inner.state, reason, "forcing lifecycle reset");
        let from = inner.state;
        inner.state = RequestState::Idle;
        inner.epoch += 1;
        inner.cancel = None;
        Self::record(&mut inner, from, RequestState::Idle, true);
    }

    /// A copy of the recent transition history, oldest first.
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.lock().history.iter().copied().collect()
    }

    fn apply(
        inner: &mut Inner,
        to: RequestState,
        forced: bool,
    ) -> Result<(), InvalidTransition> {
        let from = inner.state;
        if !forced && !from.allows(to) {
            tracing::warn!(?from, ?to, "rejected lifecycle transition");
            return Err(InvalidTransition { from, to });
        }
        tracing::debug!(?from, ?to, "lifecycle transition");
        inner.state = to;
        inner.epoch += 1;
        Self::record(inner, from, to, forced);
        Ok(())
    }

    fn record(inner: &mut Inner, from: RequestState, to: RequestState, forced: bool) {
        if inner.history.len() == HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(TransitionRecord { from, to, forced });
    }

    fn schedule_revert(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let this = self.clone();
        let epoch = self.lock().epoch;
        let grace = self.grace;
        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            let mut inner = this.lock();
            if inner.epoch == epoch {
                let from = inner.state;
                inner.state = RequestState::Idle;
                inner.epoch += 1;
                inner.cancel = None;
                Self::record(&mut inner, from, RequestState::Idle, false);
            }
        });
    }

    fn arm_send_watchdog(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let this = self.clone();
        let epoch = self.lock().epoch;
        let deadline = self.send_watchdog;
        handle.spawn(async move {
            tokio::time::sleep(deadline).await;
            let stuck = {
                let inner = this.lock();
                inner.epoch == epoch && inner.state == RequestState::Sending
            };
            if stuck {
                this.force_reset("send watchdog expired");
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Recoverable: the inner data stays consistent under a poisoned
        // lock since every mutation completes before unlock.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
