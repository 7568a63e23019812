use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fallback::FallbackLevel;
use crate::operation::OperationClass;

/// Root configuration for the control plane.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub concurrency: ConcurrencyConfig,
    pub safety: SafetyThresholds,
    pub fallback: FallbackConfig,
    pub gateway: GatewayConfig,
}

impl ControlConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: ControlConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config at {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.concurrency.validate()?;
        self.safety.validate()?;
        self.fallback.validate()?;
        self.gateway.validate()
    }
}

/// Independently configured worker bounds for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLimits {
    pub min: usize,
    pub default: usize,
    pub max: usize,
}

impl ClassLimits {
    pub const fn new(min: usize, default: usize, max: usize) -> Self {
        Self { min, default, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub limits: BTreeMap<OperationClass, ClassLimits>,
    /// At or above (with a low timeout rate): aggressive.
    pub success_rate_excellent: f64,
    /// At or above (with an acceptable timeout rate): balanced.
    pub success_rate_good: f64,
    /// Below: sync_only.
    pub success_rate_critical: f64,
    pub timeout_rate_excellent: f64,
    pub timeout_rate_acceptable: f64,
    /// Above: sync_only.
    pub timeout_rate_critical: f64,
    pub adjustment_interval_secs: u64,
    pub min_samples_for_adjustment: usize,
    pub window_capacity: usize,
    pub emergency_failure_threshold: u32,
    pub recovery_success_threshold: u32,
    pub history_capacity: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        let limits = BTreeMap::from([
            (OperationClass::Api, ClassLimits::new(1, 2, 5)),
            (OperationClass::Model, ClassLimits::new(1, 1, 2)),
            (OperationClass::GalleryImage, ClassLimits::new(1, 2, 4)),
            (OperationClass::PreviewImage, ClassLimits::new(1, 2, 3)),
        ]);
        Self {
            limits,
            success_rate_excellent: 0.99,
            success_rate_good: 0.97,
            success_rate_critical: 0.90,
            timeout_rate_excellent: 0.005,
            timeout_rate_acceptable: 0.02,
            timeout_rate_critical: 0.10,
            adjustment_interval_secs: 30,
            min_samples_for_adjustment: 10,
            window_capacity: 100,
            emergency_failure_threshold: 10,
            recovery_success_threshold: 3,
            history_capacity: 50,
        }
    }
}

impl ConcurrencyConfig {
    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for class in OperationClass::ALL {
            let limits = self
                .limits
                .get(&class)
                .ok_or(ConfigError::MissingClass(class))?;
            if limits.min == 0 || limits.min > limits.default || limits.default > limits.max {
                return Err(ConfigError::InvalidClassLimits {
                    class,
                    min: limits.min,
                    default: limits.default,
                    max: limits.max,
                });
            }
        }

        for (name, rate) in [
            ("success_rate_excellent", self.success_rate_excellent),
            ("success_rate_good", self.success_rate_good),
            ("success_rate_critical", self.success_rate_critical),
            ("timeout_rate_excellent", self.timeout_rate_excellent),
            ("timeout_rate_acceptable", self.timeout_rate_acceptable),
            ("timeout_rate_critical", self.timeout_rate_critical),
        ] {
            check_rate(name, rate)?;
        }

        if !(self.success_rate_critical < self.success_rate_good
            && self.success_rate_good <= self.success_rate_excellent)
        {
            return Err(ConfigError::order(
                "success_rate",
                format!(
                    "expected critical ({}) < good ({}) <= excellent ({})",
                    self.success_rate_critical,
                    self.success_rate_good,
                    self.success_rate_excellent
                ),
            ));
        }
        if !(self.timeout_rate_excellent <= self.timeout_rate_acceptable
            && self.timeout_rate_acceptable < self.timeout_rate_critical)
        {
            return Err(ConfigError::order(
                "timeout_rate",
                format!(
                    "expected excellent ({}) <= acceptable ({}) < critical ({})",
                    self.timeout_rate_excellent,
                    self.timeout_rate_acceptable,
                    self.timeout_rate_critical
                ),
            ));
        }

        if self.min_samples_for_adjustment == 0 {
            return Err(ConfigError::invalid(
                "min_samples_for_adjustment",
                "must be at least 1",
            ));
        }
        if self.window_capacity < self.min_samples_for_adjustment {
            return Err(ConfigError::invalid(
                "window_capacity",
                format!(
                    "{} cannot hold min_samples_for_adjustment ({})",
                    self.window_capacity, self.min_samples_for_adjustment
                ),
            ));
        }
        if self.emergency_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "emergency_failure_threshold",
                "must be at least 1",
            ));
        }
        if self.recovery_success_threshold == 0 {
            return Err(ConfigError::invalid(
                "recovery_success_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Safety evaluator thresholds. Each metric has a warning and a critical bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    pub disk_free_warning_gb: f64,
    pub disk_free_critical_gb: f64,
    pub network_latency_warning_ms: f64,
    pub network_latency_critical_ms: f64,
    pub success_rate_warning: f64,
    pub success_rate_critical: f64,
    pub memory_growth_warning_mb_per_hour: f64,
    pub memory_growth_critical_mb_per_hour: f64,
    pub alert_cooldown_secs: u64,
    pub history_capacity: usize,
    pub alert_history_capacity: usize,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            memory_warning_mb: 2048.0,
            memory_critical_mb: 4096.0,
            cpu_warning_percent: 80.0,
            cpu_critical_percent: 95.0,
            disk_free_warning_gb: 5.0,
            disk_free_critical_gb: 1.0,
            network_latency_warning_ms: 3000.0,
            network_latency_critical_ms: 10000.0,
            success_rate_warning: 0.95,
            success_rate_critical: 0.90,
            memory_growth_warning_mb_per_hour: 100.0,
            memory_growth_critical_mb_per_hour: 500.0,
            alert_cooldown_secs: 600,
            history_capacity: 720,
            alert_history_capacity: 100,
        }
    }
}

impl SafetyThresholds {
    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (name, warning, critical) in [
            ("memory_mb", self.memory_warning_mb, self.memory_critical_mb),
            ("cpu_percent", self.cpu_warning_percent, self.cpu_critical_percent),
            (
                "network_latency_ms",
                self.network_latency_warning_ms,
                self.network_latency_critical_ms,
            ),
            (
                "memory_growth_mb_per_hour",
                self.memory_growth_warning_mb_per_hour,
                self.memory_growth_critical_mb_per_hour,
            ),
        ] {
            if !(warning < critical) {
                return Err(ConfigError::order(
                    name,
                    format!("warning ({warning}) must be below critical ({critical})"),
                ));
            }
        }

        for (name, warning, critical) in [
            (
                "disk_free_gb",
                self.disk_free_warning_gb,
                self.disk_free_critical_gb,
            ),
            (
                "success_rate",
                self.success_rate_warning,
                self.success_rate_critical,
            ),
        ] {
            if !(warning > critical) {
                return Err(ConfigError::order(
                    name,
                    format!("warning ({warning}) must be above critical ({critical})"),
                ));
            }
        }
        check_rate("success_rate_warning", self.success_rate_warning)?;
        check_rate("success_rate_critical", self.success_rate_critical)?;

        if !(300..=900).contains(&self.alert_cooldown_secs) {
            return Err(ConfigError::invalid(
                "alert_cooldown_secs",
                format!("{} is outside 300..=900", self.alert_cooldown_secs),
            ));
        }
        if self.history_capacity < 2 {
            return Err(ConfigError::invalid("history_capacity", "must be at least 2"));
        }
        Ok(())
    }
}

/// Per-level triggers. A level escalates when any bound is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EscalationThresholds {
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub disk_free_gb: f64,
}

/// Conditions that must all hold before stepping one level down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConditions {
    pub min_stable_duration_secs: u64,
    pub window_secs: u64,
    pub min_samples: usize,
    pub required_success_rate: f64,
    pub max_memory_usage_mb: f64,
    pub max_cpu_usage_percent: f64,
    pub min_disk_free_gb: f64,
}

impl Default for RecoveryConditions {
    fn default() -> Self {
        Self {
            min_stable_duration_secs: 600,
            window_secs: 600,
            min_samples: 5,
            required_success_rate: 0.98,
            max_memory_usage_mb: 2048.0,
            max_cpu_usage_percent: 80.0,
            min_disk_free_gb: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub escalation: BTreeMap<FallbackLevel, EscalationThresholds>,
    pub recovery: RecoveryConditions,
    pub error_window_secs: u64,
    pub min_samples_for_escalation: usize,
    pub outcome_capacity: usize,
    pub metrics_capacity: usize,
    pub recovery_check_interval_secs: u64,
    pub auto_recovery: bool,
    pub history_capacity: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        let escalation = BTreeMap::from([
            (
                FallbackLevel::Normal,
                EscalationThresholds {
                    error_rate: 0.05,
                    consecutive_failures: 3,
                    memory_mb: 3072.0,
                    cpu_percent: 85.0,
                    disk_free_gb: 3.0,
                },
            ),
            (
                FallbackLevel::Reduced,
                EscalationThresholds {
                    error_rate: 0.10,
                    consecutive_failures: 5,
                    memory_mb: 4096.0,
                    cpu_percent: 90.0,
                    disk_free_gb: 2.0,
                },
            ),
            (
                FallbackLevel::Conservative,
                EscalationThresholds {
                    error_rate: 0.20,
                    consecutive_failures: 8,
                    memory_mb: 5120.0,
                    cpu_percent: 95.0,
                    disk_free_gb: 1.0,
                },
            ),
            (
                FallbackLevel::SyncOnly,
                EscalationThresholds {
                    error_rate: 0.50,
                    consecutive_failures: 10,
                    memory_mb: 6144.0,
                    cpu_percent: 98.0,
                    disk_free_gb: 0.5,
                },
            ),
        ]);
        Self {
            escalation,
            recovery: RecoveryConditions::default(),
            error_window_secs: 300,
            min_samples_for_escalation: 10,
            outcome_capacity: 100,
            metrics_capacity: 60,
            recovery_check_interval_secs: 60,
            auto_recovery: true,
            history_capacity: 50,
        }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut previous: Option<(FallbackLevel, EscalationThresholds)> = None;
        for level in FallbackLevel::ALL {
            if level == FallbackLevel::EmergencyStop {
                continue;
            }
            let current = *self
                .escalation
                .get(&level)
                .ok_or(ConfigError::MissingEscalationLevel(level))?;
            check_rate("escalation.error_rate", current.error_rate)?;
            if let Some((prev_level, prev)) = previous {
                let loosens = current.error_rate >= prev.error_rate
                    && current.consecutive_failures >= prev.consecutive_failures
                    && current.memory_mb >= prev.memory_mb
                    && current.cpu_percent >= prev.cpu_percent
                    && current.disk_free_gb <= prev.disk_free_gb;
                if !loosens {
                    return Err(ConfigError::order(
                        "escalation",
                        format!("thresholds for `{level}` are stricter than for `{prev_level}`"),
                    ));
                }
            }
            previous = Some((level, current));
        }

        let recovery = &self.recovery;
        check_rate("recovery.required_success_rate", recovery.required_success_rate)?;
        if let Some(normal) = self.escalation.get(&FallbackLevel::Normal) {
            let hysteresis = recovery.max_memory_usage_mb <= normal.memory_mb
                && recovery.max_cpu_usage_percent <= normal.cpu_percent
                && recovery.min_disk_free_gb >= normal.disk_free_gb
                && 1.0 - recovery.required_success_rate <= normal.error_rate;
            if !hysteresis {
                return Err(ConfigError::order(
                    "recovery",
                    "recovery bounds must be at least as strict as normal-level escalation bounds",
                ));
            }
        }
        if recovery.min_samples == 0 {
            return Err(ConfigError::invalid("recovery.min_samples", "must be at least 1"));
        }
        if self.outcome_capacity < self.min_samples_for_escalation {
            return Err(ConfigError::invalid(
                "outcome_capacity",
                format!(
                    "{} cannot hold min_samples_for_escalation ({})",
                    self.outcome_capacity, self.min_samples_for_escalation
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub probe_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            health_check_interval_secs: 60,
            event_capacity: 200,
        }
    }
}

impl GatewayConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::invalid("probe_timeout_secs", "must be positive"));
        }
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "health_check_interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn check_rate(name: &'static str, rate: f64) -> std::result::Result<(), ConfigError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{rate} is outside [0, 1]")))
    }
}
