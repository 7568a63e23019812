use serde::{Deserialize, Serialize};

use crate::concurrency::{ConcurrencyMode, LimitTable, ModeAdjustment};
use crate::events::Event;
use crate::fallback::{FallbackLevel, LevelChange, Restrictions};
use crate::metrics::AggregateMetrics;
use crate::safety::{SafetyAlert, SafetyAssessment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyReport {
    pub mode: ConcurrencyMode,
    pub limits: LimitTable,
    pub emergency_fallback_active: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub aggregates: AggregateMetrics,
    pub last_mode_change_ms: u64,
    pub recent_adjustments: Vec<ModeAdjustment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackReport {
    pub level: FallbackLevel,
    pub level_entered_at_ms: Option<u64>,
    pub time_in_level_secs: u64,
    pub restrictions: Restrictions,
    pub auto_recovery: bool,
    pub window_samples: usize,
    pub window_error_rate: f64,
    pub consecutive_failures: u32,
    pub recovery_eligible: bool,
    pub recent_changes: Vec<LevelChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub latest: Option<SafetyAssessment>,
    pub force_safety_mode: bool,
    pub safe_for_concurrency_increase: bool,
    pub assessments_recorded: usize,
    pub recent_alerts: Vec<SafetyAlert>,
}

/// Full control-plane view. Serializable so operators can dump it as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at_ms: u64,
    pub policy: PolicyReport,
    pub fallback: FallbackReport,
    pub safety: SafetyReport,
    pub effective_limits: LimitTable,
    pub recent_events: Vec<Event>,
}
