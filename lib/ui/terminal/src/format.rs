use std::fmt::Write;

use chrono::{TimeZone, Utc};

use civitai_dl_application::{BatchReport, HealthCheck};
use civitai_dl_domain::{EventLevel, StatusReport};

pub fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let policy = &report.policy;
    let fallback = &report.fallback;
    let safety = &report.safety;

    let _ = writeln!(out, "Status at {}", format_timestamp(report.generated_at_ms));
    let _ = writeln!(
        out,
        "  mode: {}{}",
        policy.mode,
        if policy.emergency_fallback_active {
            " (emergency fallback)"
        } else {
            ""
        }
    );
    let _ = writeln!(
        out,
        "  window: {} samples, success {:.1}%, timeout {:.1}%, {} / min",
        policy.aggregates.count,
        policy.aggregates.success_rate * 100.0,
        policy.aggregates.timeout_rate * 100.0,
        policy.aggregates.throughput_per_minute
    );
    let _ = writeln!(
        out,
        "  fallback: {} for {}s{}",
        fallback.level,
        fallback.time_in_level_secs,
        if fallback.recovery_eligible {
            ", recovery eligible"
        } else {
            ""
        }
    );
    match &safety.latest {
        Some(assessment) => {
            let _ = writeln!(
                out,
                "  safety: {} (score {:.0})",
                assessment.level, assessment.score
            );
        }
        None => {
            let _ = writeln!(out, "  safety: not assessed");
        }
    }

    let _ = writeln!(out, "  limits:");
    for (class, limit) in &report.effective_limits {
        let policy_limit = policy.limits.get(class).copied().unwrap_or(0);
        let _ = writeln!(
            out,
            "    {:<14} {limit} (policy {policy_limit})",
            class.as_str()
        );
    }

    if !report.recent_events.is_empty() {
        let _ = writeln!(out, "  events:");
        for event in &report.recent_events {
            let tag = match event.level {
                EventLevel::Info => "info",
                EventLevel::Warn => "warn",
                EventLevel::Error => "error",
            };
            let _ = writeln!(
                out,
                "    {} [{tag}] {}",
                format_timestamp(event.timestamp_ms),
                event.message
            );
        }
    }
    out
}

pub fn render_batch(report: &BatchReport) -> String {
    format!(
        "{:<14} limit {} | dispatched {} ok {} failed {} timeout {} skipped {}",
        report.class.as_str(),
        report.effective_limit,
        report.dispatched,
        report.succeeded,
        report.failed,
        report.timed_out,
        report.skipped
    )
}

pub fn render_health(check: &HealthCheck) -> String {
    let mut out = String::new();
    let s = &check.snapshot;
    let _ = writeln!(
        out,
        "memory {:.0} MB | cpu {:.1}% | disk free {:.1} GB | latency {:.0} ms | api {}",
        s.memory_used_mb,
        s.cpu_percent,
        s.disk_free_gb,
        s.network_latency_ms,
        if s.api_reachable { "up" } else { "down" }
    );
    let _ = writeln!(
        out,
        "safety {} (score {:.0})",
        check.assessment.level, check.assessment.score
    );
    for alert in &check.alerts {
        let _ = writeln!(out, "  ! {} -> {}", alert.message, alert.recommended_action);
    }
    if let Some(change) = &check.level_change {
        let _ = writeln!(
            out,
            "  fallback {} -> {} ({})",
            change.from, change.to, change.reason
        );
    }
    for hint in &check.recommendations {
        let _ = writeln!(out, "  - {hint}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use civitai_dl_application::ControlPlane;
    use civitai_dl_domain::{ControlConfig, FallbackLevel, OperationClass, SystemSample};
    use civitai_dl_ports::ManualClock;

    fn plane() -> ControlPlane {
        ControlPlane::new(ControlConfig::default(), Arc::new(ManualClock::new(0))).unwrap()
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(u64::MAX), "-");
    }

    #[test]
    fn status_lists_every_class() {
        let plane = plane();
        plane.force_level(FallbackLevel::Reduced, "test");
        let text = render_status(&plane.status_report());
        assert!(text.contains("fallback: reduced"));
        assert!(text.contains("safety: not assessed"));
        for class in OperationClass::ALL {
            assert!(text.contains(class.as_str()));
        }
        assert!(text.contains("[warn]"));
    }

    #[test]
    fn health_shows_alerts_and_transition() {
        let plane = plane();
        let check = plane.observe_sample(SystemSample {
            memory_used_mb: 4200.0,
            disk_free_gb: 100.0,
            ..SystemSample::default()
        });
        let text = render_health(&check);
        assert!(text.contains("memory 4200 MB"));
        assert!(text.contains("fallback normal -> reduced (memory_pressure)"));
        assert!(text.contains("  ! "));
    }

    #[test]
    fn batch_line_is_compact() {
        let report = BatchReport {
            class: OperationClass::Model,
            effective_limit: 1,
            dispatched: 3,
            succeeded: 2,
            failed: 1,
            timed_out: 0,
            skipped: 0,
        };
        assert_eq!(
            render_batch(&report),
            "model          limit 1 | dispatched 3 ok 2 failed 1 timeout 0 skipped 0"
        );
    }
}
