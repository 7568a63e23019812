use std::collections::{HashMap, VecDeque};

use civitai_dl_domain::{
    Breach, ConfigError, ErrorTrend, MetricsSnapshot, SafetyAlert, SafetyAssessment, SafetyLevel,
    SafetyReport, SafetyThresholds,
};

use crate::callbacks::{Callback, notify_all};

const TREND_SAMPLES: usize = 5;
const TREND_SLOPE: f64 = 0.01;
const GROWTH_MIN_SPAN_MS: u64 = 3_600_000;
const REPORT_ALERTS: usize = 10;

#[derive(Debug, Clone, Copy)]
struct TrendRecord {
    at_ms: u64,
    memory_used_mb: f64,
    error_rate: f64,
}

/// Scores system health from resource and reliability metrics.
pub struct SafetyEvaluator {
    thresholds: SafetyThresholds,
    history: VecDeque<TrendRecord>,
    latest: Option<SafetyAssessment>,
    assessments_recorded: usize,
    alerts: VecDeque<SafetyAlert>,
    last_alerted: HashMap<(String, SafetyLevel), u64>,
    callbacks: Vec<Callback<SafetyAlert>>,
}

impl SafetyEvaluator {
    pub fn new(thresholds: SafetyThresholds) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        Ok(Self {
            history: VecDeque::with_capacity(thresholds.history_capacity),
            alerts: VecDeque::with_capacity(thresholds.alert_history_capacity),
            thresholds,
            latest: None,
            assessments_recorded: 0,
            last_alerted: HashMap::new(),
            callbacks: Vec::new(),
        })
    }

    pub fn add_alert_callback(&mut self, callback: Callback<SafetyAlert>) {
        self.callbacks.push(callback);
    }

    pub fn latest(&self) -> Option<&SafetyAssessment> {
        self.latest.as_ref()
    }

    pub fn assess(&mut self, snapshot: &MetricsSnapshot, now_ms: u64) -> SafetyAssessment {
        self.push_trend(TrendRecord {
            at_ms: now_ms,
            memory_used_mb: snapshot.memory_used_mb,
            error_rate: snapshot.error_rate,
        });

        let growth = self.memory_growth_mb_per_hour();
        let error_trend = self.error_trend();
        let breaches = self.breaches(snapshot, growth);

        let penalty: f64 = breaches.iter().map(|b| b.penalty).sum();
        let score = (100.0 - penalty).clamp(0.0, 100.0);
        let worst = breaches
            .iter()
            .map(|b| b.severity)
            .max()
            .unwrap_or(SafetyLevel::Excellent);
        // A score in the top band overrides lone warnings.
        let level = if score >= 90.0 {
            SafetyLevel::Excellent
        } else {
            SafetyLevel::from_score(score).max(worst)
        };

        let assessment = SafetyAssessment {
            level,
            score,
            memory_growth_mb_per_hour: growth,
            error_trend,
            breaches,
            assessed_at_ms: now_ms,
        };
        tracing::debug!(
            level = %assessment.level,
            score = assessment.score,
            breaches = assessment.breaches.len(),
            "safety assessed"
        );
        self.latest = Some(assessment.clone());
        self.assessments_recorded = self.assessments_recorded.saturating_add(1);
        assessment
    }

    /// Assesses `snapshot` and raises one alert per breached threshold, skipping
    /// any (metric, level) pair still inside its cooldown.
    pub fn monitor_and_alert(&mut self, snapshot: &MetricsSnapshot, now_ms: u64) -> Vec<SafetyAlert> {
        let assessment = self.assess(snapshot, now_ms);
        let cooldown_ms = self.thresholds.alert_cooldown_secs.saturating_mul(1_000);

        let mut raised = Vec::new();
        for breach in &assessment.breaches {
            let key = (breach.metric.clone(), breach.severity);
            if let Some(last) = self.last_alerted.get(&key) {
                if now_ms.saturating_sub(*last) < cooldown_ms {
                    continue;
                }
            }
            self.last_alerted.insert(key, now_ms);

            let alert = alert_for(breach, now_ms);
            tracing::warn!(
                metric = %alert.metric,
                level = %alert.level,
                current = alert.current_value,
                threshold = alert.threshold_value,
                action = %alert.recommended_action,
                "{}",
                alert.message
            );
            if self.alerts.len() >= self.thresholds.alert_history_capacity.max(1) {
                self.alerts.pop_front();
            }
            self.alerts.push_back(alert.clone());
            notify_all("safety_alert", &self.callbacks, &alert);
            raised.push(alert);
        }
        raised
    }

    /// True iff the latest assessment is critical or worse.
    pub fn should_force_safety_mode(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|assessment| assessment.level.forces_safety_mode())
    }

    pub fn is_safe_for_concurrency_increase(&self) -> bool {
        match &self.latest {
            Some(assessment) => assessment.level <= SafetyLevel::Good,
            None => true,
        }
    }

    pub fn recommendations(&self, snapshot: &MetricsSnapshot) -> Vec<String> {
        let t = &self.thresholds;
        let mut out = Vec::new();
        if snapshot.memory_used_mb > t.memory_warning_mb {
            out.push("Reduce concurrent operations to lower memory usage".to_string());
        }
        if snapshot.cpu_percent > t.cpu_warning_percent {
            out.push("Lower worker counts until CPU load settles".to_string());
        }
        if snapshot.disk_free_gb < t.disk_free_warning_gb {
            out.push("Free disk space or point downloads at a larger volume".to_string());
        }
        if snapshot.network_latency_ms > t.network_latency_warning_ms {
            out.push("Check network connection stability".to_string());
        }
        if !snapshot.api_reachable {
            out.push("API is unreachable; pause new requests until it responds".to_string());
        }
        if snapshot.success_rate < t.success_rate_warning {
            out.push("Review recent failures before raising concurrency".to_string());
        }
        if self.memory_growth_mb_per_hour() > t.memory_growth_warning_mb_per_hour {
            out.push("Monitor for potential memory leaks".to_string());
        }
        if out.is_empty() {
            out.push("System health is within acceptable parameters".to_string());
        }
        out
    }

    pub fn alert_history(&self, limit: usize) -> Vec<SafetyAlert> {
        let skip = self.alerts.len().saturating_sub(limit);
        self.alerts.iter().skip(skip).cloned().collect()
    }

    pub fn status_report(&self) -> SafetyReport {
        SafetyReport {
            latest: self.latest.clone(),
            force_safety_mode: self.should_force_safety_mode(),
            safe_for_concurrency_increase: self.is_safe_for_concurrency_increase(),
            assessments_recorded: self.assessments_recorded,
            recent_alerts: self.alert_history(REPORT_ALERTS),
        }
    }

    fn push_trend(&mut self, record: TrendRecord) {
        if self.history.len() >= self.thresholds.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Growth between the oldest and newest trend samples. Zero until the
    /// history spans at least an hour.
    fn memory_growth_mb_per_hour(&self) -> f64 {
        let (Some(first), Some(last)) = (self.history.front(), self.history.back()) else {
            return 0.0;
        };
        let span_ms = last.at_ms.saturating_sub(first.at_ms);
        if span_ms < GROWTH_MIN_SPAN_MS {
            return 0.0;
        }
        let hours = span_ms as f64 / GROWTH_MIN_SPAN_MS as f64;
        (last.memory_used_mb - first.memory_used_mb) / hours
    }

    /// Least-squares slope over the last few error rates.
    fn error_trend(&self) -> ErrorTrend {
        if self.history.len() < TREND_SAMPLES {
            return ErrorTrend::Stable;
        }
        let recent: Vec<f64> = self
            .history
            .iter()
            .skip(self.history.len() - TREND_SAMPLES)
            .map(|r| r.error_rate)
            .collect();
        let n = recent.len() as f64;
        let x_mean = (n - 1.0) / 2.0;
        let y_mean = recent.iter().sum::<f64>() / n;
        let (mut num, mut den) = (0.0, 0.0);
        for (i, y) in recent.iter().enumerate() {
            let dx = i as f64 - x_mean;
            num += dx * (y - y_mean);
            den += dx * dx;
        }
        let slope = num / den;
        if slope > TREND_SLOPE {
            ErrorTrend::Increasing
        } else if slope < -TREND_SLOPE {
            ErrorTrend::Decreasing
        } else {
            ErrorTrend::Stable
        }
    }

    fn breaches(&self, s: &MetricsSnapshot, growth: f64) -> Vec<Breach> {
        let t = &self.thresholds;
        let mut out = Vec::new();

        above(
            &mut out,
            "memory",
            s.memory_used_mb,
            (t.memory_warning_mb, 15.0),
            (t.memory_critical_mb, 30.0),
        );
        above(
            &mut out,
            "cpu",
            s.cpu_percent,
            (t.cpu_warning_percent, 10.0),
            (t.cpu_critical_percent, 25.0),
        );
        if s.disk_free_gb < t.disk_free_critical_gb {
            out.push(breach("disk", SafetyLevel::Emergency, s.disk_free_gb, t.disk_free_critical_gb, 35.0));
        } else if s.disk_free_gb < t.disk_free_warning_gb {
            out.push(breach("disk", SafetyLevel::Warning, s.disk_free_gb, t.disk_free_warning_gb, 20.0));
        }
        above(
            &mut out,
            "network_latency",
            s.network_latency_ms,
            (t.network_latency_warning_ms, 10.0),
            (t.network_latency_critical_ms, 20.0),
        );
        if s.success_rate < t.success_rate_critical {
            out.push(breach("success_rate", SafetyLevel::Critical, s.success_rate, t.success_rate_critical, 25.0));
        } else if s.success_rate < t.success_rate_warning {
            out.push(breach("success_rate", SafetyLevel::Warning, s.success_rate, t.success_rate_warning, 10.0));
        }
        above(
            &mut out,
            "memory_growth",
            growth,
            (t.memory_growth_warning_mb_per_hour, 15.0),
            (t.memory_growth_critical_mb_per_hour, 30.0),
        );
        if !s.api_reachable {
            out.push(breach("api_connectivity", SafetyLevel::Critical, 0.0, 1.0, 40.0));
        }
        out
    }
}

fn above(out: &mut Vec<Breach>, metric: &str, value: f64, warning: (f64, f64), critical: (f64, f64)) {
    if value > critical.0 {
        out.push(breach(metric, SafetyLevel::Critical, value, critical.0, critical.1));
    } else if value > warning.0 {
        out.push(breach(metric, SafetyLevel::Warning, value, warning.0, warning.1));
    }
}

fn breach(metric: &str, severity: SafetyLevel, value: f64, threshold: f64, penalty: f64) -> Breach {
    Breach {
        metric: metric.to_string(),
        severity,
        value,
        threshold,
        penalty,
    }
}

fn alert_for(breach: &Breach, now_ms: u64) -> SafetyAlert {
    let critical = breach.severity >= SafetyLevel::Critical;
    let (message, action) = match breach.metric.as_str() {
        "memory" => (
            format!("memory usage at {:.0} MB", breach.value),
            if critical {
                "Reduce concurrency to minimum and check for memory leaks"
            } else {
                "Consider reducing concurrency levels"
            },
        ),
        "cpu" => (
            format!("CPU usage at {:.1}%", breach.value),
            "Reduce concurrency and check system load",
        ),
        "disk" => (
            format!("{:.1} GB of disk space remaining", breach.value),
            if critical {
                "Stop all downloads immediately and free disk space"
            } else {
                "Clean up temporary files"
            },
        ),
        "network_latency" => (
            format!("network latency at {:.0} ms", breach.value),
            "Switch to conservative mode and check network connection",
        ),
        "success_rate" => (
            format!("success rate down to {:.1}%", breach.value * 100.0),
            "Review recent failures and reduce concurrency",
        ),
        "memory_growth" => (
            format!("memory growing {:.1} MB/hour", breach.value),
            "Investigate memory leak and restart if necessary",
        ),
        "api_connectivity" => (
            "API unreachable".to_string(),
            "Pause new requests until the API responds",
        ),
        other => (format!("{other} threshold breached"), "Inspect system health"),
    };
    SafetyAlert {
        level: breach.severity,
        metric: breach.metric.clone(),
        message,
        current_value: breach.value,
        threshold_value: breach.threshold,
        timestamp_ms: now_ms,
        recommended_action: action.to_string(),
    }
}
