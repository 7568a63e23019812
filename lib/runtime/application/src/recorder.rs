use std::collections::VecDeque;
use std::time::Duration;

use civitai_dl_domain::{AggregateMetrics, OperationOutcome};

const THROUGHPUT_WINDOW_MS: u64 = 60_000;

/// Bounded sliding window of outcomes plus the consecutive run counters.
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    window: VecDeque<OperationOutcome>,
    capacity: usize,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl OutcomeRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    pub fn record(&mut self, outcome: OperationOutcome) {
        if outcome.success {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn aggregates(&self, now_ms: u64) -> AggregateMetrics {
        let count = self.window.len();
        if count == 0 {
            return AggregateMetrics::default();
        }

        let successes = self.window.iter().filter(|o| o.success).count();
        let timeouts = self.window.iter().filter(|o| o.timed_out).count();
        let total: Duration = self.window.iter().map(|o| o.duration).sum();
        let recent = self
            .window
            .iter()
            .filter(|o| now_ms.saturating_sub(o.timestamp_ms) < THROUGHPUT_WINDOW_MS)
            .count();

        AggregateMetrics {
            count,
            successes,
            failures: count - successes,
            timeouts,
            success_rate: successes as f64 / count as f64,
            timeout_rate: timeouts as f64 / count as f64,
            mean_duration: total / count as u32,
            throughput_per_minute: recent,
        }
    }
}
