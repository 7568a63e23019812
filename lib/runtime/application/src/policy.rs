use std::collections::VecDeque;

use civitai_dl_domain::{
    AggregateMetrics, ConcurrencyConfig, ConcurrencyMode, ConfigError, LimitTable,
    ModeAdjustment, OperationClass, OperationOutcome, PolicyReport,
};

use crate::recorder::OutcomeRecorder;

const REPORT_ADJUSTMENTS: usize = 10;

/// What a single `record_and_maybe_adjust` call changed, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyTransition {
    EmergencyActivated { consecutive_failures: u32 },
    Recovered { consecutive_successes: u32 },
    ModeChanged(ModeAdjustment),
}

/// Maps outcome aggregates to a concurrency mode and per-class worker table.
#[derive(Debug, Clone)]
pub struct ConcurrencyPolicy {
    config: ConcurrencyConfig,
    recorder: OutcomeRecorder,
    mode: ConcurrencyMode,
    limits: LimitTable,
    emergency_fallback_active: bool,
    last_evaluation_ms: u64,
    last_mode_change_ms: u64,
    history: VecDeque<ModeAdjustment>,
}

impl ConcurrencyPolicy {
    pub fn new(config: ConcurrencyConfig, now_ms: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let limits = limits_for(&config, ConcurrencyMode::Balanced);
        let recorder = OutcomeRecorder::new(config.window_capacity);
        Ok(Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            recorder,
            mode: ConcurrencyMode::Balanced,
            limits,
            emergency_fallback_active: false,
            last_evaluation_ms: now_ms,
            last_mode_change_ms: now_ms,
        })
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    pub fn emergency_fallback_active(&self) -> bool {
        self.emergency_fallback_active
    }

    pub fn recorder(&self) -> &OutcomeRecorder {
        &self.recorder
    }

    pub fn aggregates(&self, now_ms: u64) -> AggregateMetrics {
        self.recorder.aggregates(now_ms)
    }

    /// Worker count for `class`. Always 1 while the emergency fallback is active.
    pub fn get_limit(&self, class: OperationClass) -> usize {
        if self.emergency_fallback_active {
            return 1;
        }
        self.limits.get(&class).copied().unwrap_or(1)
    }

    pub fn limits(&self) -> LimitTable {
        OperationClass::ALL
            .into_iter()
            .map(|class| (class, self.get_limit(class)))
            .collect()
    }

    pub fn record_and_maybe_adjust(
        &mut self,
        outcome: OperationOutcome,
        now_ms: u64,
    ) -> Option<PolicyTransition> {
        self.recorder.record(outcome);

        let failures = self.recorder.consecutive_failures();
        let successes = self.recorder.consecutive_successes();

        if failures >= self.config.emergency_failure_threshold {
            if self.emergency_fallback_active {
                return None;
            }
            self.emergency_fallback_active = true;
            tracing::warn!(
                consecutive_failures = failures,
                threshold = self.config.emergency_failure_threshold,
                "emergency fallback activated, all classes limited to 1 worker"
            );
            return Some(PolicyTransition::EmergencyActivated {
                consecutive_failures: failures,
            });
        }

        if self.emergency_fallback_active {
            if successes < self.config.recovery_success_threshold {
                return None;
            }
            self.emergency_fallback_active = false;
            let adjustment = self.apply_mode(ConcurrencyMode::Conservative, now_ms);
            self.last_evaluation_ms = now_ms;
            tracing::info!(
                consecutive_successes = successes,
                mode = %self.mode,
                "emergency fallback cleared"
            );
            if let Some(adjustment) = adjustment {
                self.push_history(adjustment);
            }
            return Some(PolicyTransition::Recovered {
                consecutive_successes: successes,
            });
        }

        if !self.adjustment_due(now_ms) {
            return None;
        }

        let aggregates = self.recorder.aggregates(now_ms);
        let target = decide_mode(&self.config, &aggregates);
        self.last_evaluation_ms = now_ms;
        tracing::debug!(
            success_rate = aggregates.success_rate,
            timeout_rate = aggregates.timeout_rate,
            samples = aggregates.count,
            current = %self.mode,
            target = %target,
            "concurrency evaluated"
        );

        let adjustment = self.apply_mode(target, now_ms)?;
        tracing::info!(
            from = %adjustment.from,
            to = %adjustment.to,
            before = ?adjustment.before,
            after = ?adjustment.after,
            success_rate = adjustment.aggregates.success_rate,
            timeout_rate = adjustment.aggregates.timeout_rate,
            "concurrency mode changed"
        );
        self.push_history(adjustment.clone());
        Some(PolicyTransition::ModeChanged(adjustment))
    }

    /// Operator override. `SyncOnly` also activates the emergency fallback.
    pub fn force_mode(&mut self, mode: ConcurrencyMode, now_ms: u64) {
        let previous = self.mode;
        self.emergency_fallback_active = mode == ConcurrencyMode::SyncOnly;
        let adjustment = self.apply_mode(mode, now_ms);
        self.last_evaluation_ms = now_ms;
        tracing::info!(from = %previous, to = %mode, "concurrency mode forced");
        if let Some(adjustment) = adjustment {
            self.push_history(adjustment);
        }
    }

    pub fn history(&self, limit: usize) -> Vec<ModeAdjustment> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn status_report(&self, now_ms: u64) -> PolicyReport {
        PolicyReport {
            mode: self.mode,
            limits: self.limits(),
            emergency_fallback_active: self.emergency_fallback_active,
            consecutive_failures: self.recorder.consecutive_failures(),
            consecutive_successes: self.recorder.consecutive_successes(),
            aggregates: self.recorder.aggregates(now_ms),
            last_mode_change_ms: self.last_mode_change_ms,
            recent_adjustments: self.history(REPORT_ADJUSTMENTS),
        }
    }

    fn adjustment_due(&self, now_ms: u64) -> bool {
        if self.recorder.len() < self.config.min_samples_for_adjustment {
            return false;
        }
        let interval_ms = self.config.adjustment_interval_secs.saturating_mul(1_000);
        now_ms.saturating_sub(self.last_evaluation_ms) >= interval_ms
    }

    /// Applies `mode` and returns the adjustment record when the mode changed.
    fn apply_mode(&mut self, mode: ConcurrencyMode, now_ms: u64) -> Option<ModeAdjustment> {
        if mode == self.mode {
            self.limits = limits_for(&self.config, mode);
            return None;
        }
        let before = self.limits.clone();
        let from = self.mode;
        self.limits = limits_for(&self.config, mode);
        self.mode = mode;
        self.last_mode_change_ms = now_ms;
        self.last_evaluation_ms = now_ms;
        Some(ModeAdjustment {
            at_ms: now_ms,
            from,
            to: mode,
            before,
            after: self.limits.clone(),
            aggregates: self.recorder.aggregates(now_ms),
        })
    }

    fn push_history(&mut self, adjustment: ModeAdjustment) {
        if self.history.len() >= self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(adjustment);
    }
}

/// Decision table, evaluated top-down.
pub fn decide_mode(config: &ConcurrencyConfig, aggregates: &AggregateMetrics) -> ConcurrencyMode {
    let success = aggregates.success_rate;
    let timeout = aggregates.timeout_rate;
    if success < config.success_rate_critical || timeout > config.timeout_rate_critical {
        ConcurrencyMode::SyncOnly
    } else if success >= config.success_rate_excellent && timeout <= config.timeout_rate_excellent {
        ConcurrencyMode::Aggressive
    } else if success >= config.success_rate_good && timeout <= config.timeout_rate_acceptable {
        ConcurrencyMode::Balanced
    } else {
        ConcurrencyMode::Conservative
    }
}

fn limits_for(config: &ConcurrencyConfig, mode: ConcurrencyMode) -> LimitTable {
    config
        .limits
        .iter()
        .map(|(class, limits)| {
            let value = match mode {
                ConcurrencyMode::Conservative => limits.min,
                ConcurrencyMode::Balanced => limits.default,
                ConcurrencyMode::Aggressive => limits.max,
                ConcurrencyMode::SyncOnly => 1,
            };
            (*class, value)
        })
        .collect()
}
