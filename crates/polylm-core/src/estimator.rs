//! Token estimation and stream timing.
//!
//! The engine never tokenizes text (that would require model-specific
//! tokenizers). Generated-token counts are estimated with a character
//! heuristic, and throughput metrics are derived from wall-clock marks
//! recorded by [`StreamClock`]:
//!
//! - **TTFT** — time from request start to the first generated token.
//! - **TPS** — generated tokens per second during the generation phase
//!   (first token → stream end), excluding TTFT.
//!
//! A clock produces two kinds of snapshot: a *partial* one taken when a
//! turn suspends for tool execution (TTFT and token count so far, no
//! totals), and a *final* one taken once the clock is stopped.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Estimates the token count for a string.
///
/// Rough heuristic: ~4 characters per token for English text, always at
/// least 1 for non-empty input. Use provider-reported counts when
/// available for accuracy.
#[allow(clippy::cast_possible_truncation)]
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let len = text.len().min(u32::MAX as usize) as u32;
    len.div_ceil(4).max(1)
}

/// A point-in-time view of a turn's generation statistics.
///
/// Attached to a [`Turn`](crate::turn::Turn) at finalization. Partial
/// snapshots (taken mid-turn, before tool continuation) leave
/// `total_ms` and `tokens_per_second` unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Estimated generated-token count.
    pub token_count: u32,
    /// Milliseconds from request start to first generated token.
    pub ttft_ms: Option<u64>,
    /// Total milliseconds from request start to stream end.
    pub total_ms: Option<u64>,
    /// Generated tokens per second during the generation phase.
    pub tokens_per_second: Option<f64>,
}

/// Wall-clock tracker for a single logical turn.
///
/// Created when the stream begins; survives tool continuations (the
/// clock is only stopped once the final round completes without further
/// tool calls).
#[derive(Debug)]
pub struct StreamClock {
    started: Instant,
    first_token: Option<Instant>,
    stopped: Option<Instant>,
    token_count: u32,
}

impl StreamClock {
    /// Starts a new clock at the current instant.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            first_token: None,
            stopped: None,
            token_count: 0,
        }
    }

    /// Records the arrival of the first generated token.
    ///
    /// Subsequent calls are no-ops; TTFT is measured once.
    pub fn mark_first_token(&mut self) {
        if self.first_token.is_none() {
            self.first_token = Some(Instant::now());
        }
    }

    /// Replaces the running token count.
    ///
    /// Finalization recomputes the estimate from the turn's merged text
    /// rather than trusting increments alone, so branches that bypass
    /// normal delta recording cannot under-count.
    pub fn set_token_count(&mut self, count: u32) {
        self.token_count = count;
    }

    /// Adds to the running token count.
    pub fn add_tokens(&mut self, count: u32) {
        self.token_count = self.token_count.saturating_add(count);
    }

    /// Returns the current running token count.
    pub fn token_count(&self) -> u32 {
        self.token_count
    }

    /// Stops the clock. Idempotent; the first stop wins.
    pub fn stop(&mut self) {
        if self.stopped.is_none() {
            self.stopped = Some(Instant::now());
        }
    }

    /// Returns whether the clock has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    /// A mid-turn snapshot: TTFT and token count, no totals.
    pub fn partial_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            token_count: self.token_count,
            ttft_ms: self.ttft_ms(),
            total_ms: None,
            tokens_per_second: None,
        }
    }

    /// A final snapshot. The clock must be stopped first; if it is not,
    /// the snapshot is taken as of now.
    pub fn final_snapshot(&self) -> StatsSnapshot {
        let end = self.stopped.unwrap_or_else(Instant::now);
        let total_ms = duration_ms(self.started, end);
        let tokens_per_second = self.first_token.and_then(|first| {
            let gen_secs = end.duration_since(first).as_secs_f64();
            if gen_secs > 0.0 && self.token_count > 0 {
                Some(f64::from(self.token_count) / gen_secs)
            } else {
                None
            }
        });
        StatsSnapshot {
            token_count: self.token_count,
            ttft_ms: self.ttft_ms(),
            total_ms: Some(total_ms),
            tokens_per_second,
        }
    }

    fn ttft_ms(&self) -> Option<u64> {
        self.first_token.map(|t| duration_ms(self.started, t))
    }
}

fn duration_ms(from: Instant, to: Instant) -> u64 {
    u64::try_from(to.duration_since(from).as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "Hi" = 2 chars, ceil(2/4) = 1
        assert_eq!(estimate_tokens("Hi"), 1);
    }

    #[test]
    fn test_estimate_tokens_medium() {
        // 11 chars → ceil(11/4) = 3
        assert_eq!(estimate_tokens("Hello world"), 3);
    }

    #[test]
    fn test_estimate_tokens_exact_multiple() {
        assert_eq!(estimate_tokens("1234567890123456"), 4);
    }

    #[test]
    fn test_estimate_tokens_minimum() {
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn test_partial_snapshot_has_no_totals() {
        let mut clock = StreamClock::start();
        clock.mark_first_token();
        clock.add_tokens(10);

        let snap = clock.partial_snapshot();
        assert_eq!(snap.token_count, 10);
        assert!(snap.ttft_ms.is_some());
        assert!(snap.total_ms.is_none());
        assert!(snap.tokens_per_second.is_none());
    }

    #[test]
    fn test_final_snapshot_without_tokens_has_no_tps() {
        let mut clock = StreamClock::start();
        clock.stop();

        let snap = clock.final_snapshot();
        assert_eq!(snap.token_count, 0);
        assert!(snap.ttft_ms.is_none());
        assert!(snap.total_ms.is_some());
        assert!(snap.tokens_per_second.is_none());
    }

    #[test]
    fn test_mark_first_token_is_sticky() {
        let mut clock = StreamClock::start();
        clock.mark_first_token();
        let first = clock.partial_snapshot().ttft_ms;
        std::thread::sleep(Duration::from_millis(5));
        clock.mark_first_token();
        assert_eq!(clock.partial_snapshot().ttft_ms, first);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut clock = StreamClock::start();
        clock.stop();
        let first = clock.final_snapshot().total_ms;
        std::thread::sleep(Duration::from_millis(5));
        clock.stop();
        assert_eq!(clock.final_snapshot().total_ms, first);
    }

    #[test]
    fn test_tps_counts_generation_phase_only() {
        let mut clock = StreamClock::start();
        std::thread::sleep(Duration::from_millis(10));
        clock.mark_first_token();
        clock.add_tokens(100);
        std::thread::sleep(Duration::from_millis(20));
        clock.stop();

        let snap = clock.final_snapshot();
        let ttft = snap.ttft_ms.unwrap();
        let total = snap.total_ms.unwrap();
        assert!(ttft >= 10);
        assert!(total >= ttft);
        // 100 tokens over the generation window, not the whole request
        let tps = snap.tokens_per_second.unwrap();
        assert!(tps > 0.0);
    }

    #[test]
    fn test_set_token_count_overrides_running_total() {
        let mut clock = StreamClock::start();
        clock.add_tokens(5);
        clock.set_token_count(42);
        assert_eq!(clock.token_count(), 42);
    }
}
