use std::collections::VecDeque;

use serde_json::{Value, json};

use civitai_dl_domain::{
    ConfigError, EscalationThresholds, FallbackConfig, FallbackLevel, FallbackReport, LevelChange,
    Restrictions, SystemSample, TriggerReason,
};

use crate::callbacks::{Callback, notify_all};

const REPORT_CHANGES: usize = 10;

#[derive(Debug, Clone)]
struct OutcomeRecord {
    at_ms: u64,
    success: bool,
    details: Value,
}

/// Five-level degradation ladder with condition-gated, one-step recovery.
pub struct FallbackManager {
    config: FallbackConfig,
    level: FallbackLevel,
    level_entered_at_ms: Option<u64>,
    outcomes: VecDeque<OutcomeRecord>,
    samples: VecDeque<SystemSample>,
    history: VecDeque<LevelChange>,
    last_recovery_check_ms: u64,
    callbacks: Vec<Callback<LevelChange>>,
}

impl FallbackManager {
    pub fn new(config: FallbackConfig, now_ms: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            outcomes: VecDeque::with_capacity(config.outcome_capacity),
            samples: VecDeque::with_capacity(config.metrics_capacity),
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            level: FallbackLevel::Normal,
            level_entered_at_ms: None,
            last_recovery_check_ms: now_ms,
            callbacks: Vec::new(),
        })
    }

    pub fn add_level_change_callback(&mut self, callback: Callback<LevelChange>) {
        self.callbacks.push(callback);
    }

    pub fn level(&self) -> FallbackLevel {
        self.level
    }

    /// Most recent resource sample recorded, if any.
    pub fn latest_sample(&self) -> Option<&SystemSample> {
        self.samples.back()
    }

    pub fn level_entered_at_ms(&self) -> Option<u64> {
        self.level_entered_at_ms
    }

    pub fn current_restrictions(&self) -> Restrictions {
        self.level.restrictions()
    }

    pub fn record_outcome(&mut self, success: bool, details: Value, now_ms: u64) -> Option<LevelChange> {
        if self.outcomes.len() >= self.config.outcome_capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(OutcomeRecord {
            at_ms: now_ms,
            success,
            details,
        });

        if !success {
            if let Some(change) = self.check_outcome_escalation(now_ms) {
                return Some(change);
            }
        }
        self.poll(now_ms)
    }

    /// Feeds a resource sample. At most one transition per sample; a disk
    /// breach skips straight to `EmergencyStop`.
    pub fn record_system_metrics(&mut self, sample: SystemSample, now_ms: u64) -> Option<LevelChange> {
        if self.samples.len() >= self.config.metrics_capacity.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.clone());

        let thresholds = self.thresholds()?;
        if sample.disk_free_gb < thresholds.disk_free_gb {
            return self.transition(
                FallbackLevel::EmergencyStop,
                TriggerReason::DiskSpaceLow,
                json!({ "disk_free_gb": sample.disk_free_gb, "threshold": thresholds.disk_free_gb }),
                now_ms,
            );
        }
        if sample.memory_used_mb > thresholds.memory_mb {
            return self.transition(
                self.level.escalated(),
                TriggerReason::MemoryPressure,
                json!({ "memory_used_mb": sample.memory_used_mb, "threshold": thresholds.memory_mb }),
                now_ms,
            );
        }
        if sample.cpu_percent > thresholds.cpu_percent {
            return self.transition(
                self.level.escalated(),
                TriggerReason::CpuOverload,
                json!({ "cpu_percent": sample.cpu_percent, "threshold": thresholds.cpu_percent }),
                now_ms,
            );
        }
        None
    }

    /// Escalates for an external reason. Without an explicit target this moves
    /// one level up, or to `EmergencyStop` for `DiskSpaceLow`. Never lowers the level.
    pub fn trigger_fallback(
        &mut self,
        reason: TriggerReason,
        details: Value,
        target: Option<FallbackLevel>,
        now_ms: u64,
    ) -> Option<LevelChange> {
        let target = target.unwrap_or(match reason {
            TriggerReason::DiskSpaceLow => FallbackLevel::EmergencyStop,
            _ => self.level.escalated(),
        });
        if target <= self.level {
            return None;
        }
        self.transition(target, reason, details, now_ms)
    }

    /// Operator override. Skips every precondition.
    pub fn force_level(&mut self, level: FallbackLevel, note: &str, now_ms: u64) -> Option<LevelChange> {
        self.transition(level, TriggerReason::UserRequest, json!({ "note": note }), now_ms)
    }

    /// Steps one level down if recovery conditions hold. Returns true when
    /// already at `Normal` or when the step happened.
    pub fn attempt_recovery(&mut self, now_ms: u64) -> bool {
        if self.level == FallbackLevel::Normal {
            return true;
        }
        self.last_recovery_check_ms = now_ms;
        self.recover(now_ms).is_some()
    }

    /// Timer-driven recovery check. Runs at most once per polling interval and
    /// never leaves `EmergencyStop` on its own.
    pub fn poll(&mut self, now_ms: u64) -> Option<LevelChange> {
        if !self.config.auto_recovery
            || matches!(self.level, FallbackLevel::Normal | FallbackLevel::EmergencyStop)
        {
            return None;
        }
        let interval_ms = self.config.recovery_check_interval_secs.saturating_mul(1_000);
        if now_ms.saturating_sub(self.last_recovery_check_ms) < interval_ms {
            return None;
        }
        self.last_recovery_check_ms = now_ms;
        self.recover(now_ms)
    }

    pub fn recovery_eligible(&self, now_ms: u64) -> bool {
        if self.level == FallbackLevel::Normal {
            return false;
        }
        let Some(entered) = self.level_entered_at_ms else {
            return false;
        };
        let recovery = &self.config.recovery;
        if now_ms.saturating_sub(entered) < recovery.min_stable_duration_secs.saturating_mul(1_000) {
            return false;
        }

        let window_ms = recovery.window_secs.saturating_mul(1_000);
        let (samples, successes) = self
            .outcomes
            .iter()
            .filter(|o| now_ms.saturating_sub(o.at_ms) < window_ms)
            .fold((0usize, 0usize), |(n, ok), o| (n + 1, ok + usize::from(o.success)));
        if samples < recovery.min_samples {
            return false;
        }
        if (successes as f64 / samples as f64) < recovery.required_success_rate {
            return false;
        }

        match self.samples.back() {
            Some(latest) => {
                latest.memory_used_mb <= recovery.max_memory_usage_mb
                    && latest.cpu_percent <= recovery.max_cpu_usage_percent
                    && latest.disk_free_gb >= recovery.min_disk_free_gb
            }
            None => true,
        }
    }

    pub fn history(&self, limit: usize) -> Vec<LevelChange> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn status_report(&self, now_ms: u64) -> FallbackReport {
        let window = self.error_window(now_ms);
        let failures = window.iter().filter(|o| !o.success).count();
        FallbackReport {
            level: self.level,
            level_entered_at_ms: self.level_entered_at_ms,
            time_in_level_secs: self
                .level_entered_at_ms
                .map(|entered| now_ms.saturating_sub(entered) / 1_000)
                .unwrap_or(0),
            restrictions: self.current_restrictions(),
            auto_recovery: self.config.auto_recovery,
            window_samples: window.len(),
            window_error_rate: if window.is_empty() {
                0.0
            } else {
                failures as f64 / window.len() as f64
            },
            consecutive_failures: self.trailing_failures(),
            recovery_eligible: self.recovery_eligible(now_ms),
            recent_changes: self.history(REPORT_CHANGES),
        }
    }

    fn thresholds(&self) -> Option<EscalationThresholds> {
        self.config.escalation.get(&self.level).copied()
    }

    fn error_window(&self, now_ms: u64) -> Vec<&OutcomeRecord> {
        let window_ms = self.config.error_window_secs.saturating_mul(1_000);
        self.outcomes
            .iter()
            .filter(|o| now_ms.saturating_sub(o.at_ms) < window_ms)
            .collect()
    }

    fn trailing_failures(&self) -> u32 {
        let run = self.outcomes.iter().rev().take_while(|o| !o.success).count();
        u32::try_from(run).unwrap_or(u32::MAX)
    }

    fn check_outcome_escalation(&mut self, now_ms: u64) -> Option<LevelChange> {
        let thresholds = self.thresholds()?;
        let window = self.error_window(now_ms);
        if window.len() < self.config.min_samples_for_escalation {
            return None;
        }

        let failures = window.iter().filter(|o| !o.success).count();
        let error_rate = failures as f64 / window.len() as f64;
        let consecutive = self.trailing_failures();
        let last_failure = window
            .iter()
            .rev()
            .find(|o| !o.success)
            .map(|o| o.details.clone())
            .unwrap_or(Value::Null);

        if error_rate > thresholds.error_rate {
            let details = json!({
                "error_rate": error_rate,
                "threshold": thresholds.error_rate,
                "samples": window.len(),
                "last_failure": last_failure,
            });
            return self.transition(self.level.escalated(), TriggerReason::HighErrorRate, details, now_ms);
        }
        if consecutive >= thresholds.consecutive_failures {
            let details = json!({
                "consecutive_failures": consecutive,
                "threshold": thresholds.consecutive_failures,
                "last_failure": last_failure,
            });
            return self.transition(
                self.level.escalated(),
                TriggerReason::ConsecutiveFailures,
                details,
                now_ms,
            );
        }
        None
    }

    fn recover(&mut self, now_ms: u64) -> Option<LevelChange> {
        if !self.recovery_eligible(now_ms) {
            tracing::debug!(level = %self.level, "recovery conditions not met");
            return None;
        }
        let details = json!({ "conditions_met": true });
        self.transition(self.level.recovered(), TriggerReason::Recovery, details, now_ms)
    }

    fn transition(
        &mut self,
        to: FallbackLevel,
        reason: TriggerReason,
        details: Value,
        now_ms: u64,
    ) -> Option<LevelChange> {
        if to == self.level {
            return None;
        }
        let change = LevelChange {
            at_ms: now_ms,
            from: self.level,
            to,
            reason,
            details,
        };
        self.level = to;
        self.level_entered_at_ms = if to == FallbackLevel::Normal {
            None
        } else {
            Some(now_ms)
        };

        if self.history.len() >= self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(change.clone());

        if change.to > change.from {
            tracing::warn!(
                from = %change.from,
                to = %change.to,
                reason = %change.reason,
                details = %change.details,
                "fallback escalated"
            );
        } else {
            tracing::info!(
                from = %change.from,
                to = %change.to,
                reason = %change.reason,
                "fallback level lowered"
            );
        }
        notify_all("level_change", &self.callbacks, &change);
        Some(change)
    }
}
