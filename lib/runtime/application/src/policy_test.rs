use std::time::Duration;

use civitai_dl_domain::{
    AggregateMetrics, ConcurrencyConfig, ConcurrencyMode, ConfigError, OperationClass,
    OperationOutcome,
};

use crate::policy::{ConcurrencyPolicy, PolicyTransition, decide_mode};

const INTERVAL_MS: u64 = 30_000;

fn policy() -> ConcurrencyPolicy {
    ConcurrencyPolicy::new(ConcurrencyConfig::default(), 0).unwrap()
}

fn ok(ts: u64) -> OperationOutcome {
    OperationOutcome::success(OperationClass::GalleryImage, Duration::from_millis(200), ts)
}

fn failed(ts: u64) -> OperationOutcome {
    OperationOutcome::failure(OperationClass::GalleryImage, Duration::from_millis(200), ts)
}

#[test]
fn starts_balanced_with_default_limits() {
    let policy = policy();
    assert_eq!(policy.mode(), ConcurrencyMode::Balanced);
    assert_eq!(policy.get_limit(OperationClass::Api), 2);
    assert_eq!(policy.get_limit(OperationClass::Model), 1);
    assert_eq!(policy.get_limit(OperationClass::GalleryImage), 2);
    assert!(!policy.emergency_fallback_active());
}

#[test]
fn construction_rejects_missing_class() {
    let mut config = ConcurrencyConfig::default();
    config.limits.remove(&OperationClass::Model);
    let err = ConcurrencyPolicy::new(config, 0).unwrap_err();
    assert_eq!(err, ConfigError::MissingClass(OperationClass::Model));
}

#[test]
fn tenth_consecutive_failure_activates_emergency_fallback() {
    let mut policy = policy();
    policy.force_mode(ConcurrencyMode::Aggressive, 0);
    assert_eq!(policy.get_limit(OperationClass::Api), 5);

    for i in 0..9 {
        let transition = policy.record_and_maybe_adjust(failed(i), i);
        assert!(
            !matches!(transition, Some(PolicyTransition::EmergencyActivated { .. })),
            "activated early at failure {}",
            i + 1
        );
        assert!(!policy.emergency_fallback_active());
    }

    let transition = policy.record_and_maybe_adjust(failed(9), 9);
    assert_eq!(
        transition,
        Some(PolicyTransition::EmergencyActivated {
            consecutive_failures: 10
        })
    );
    for class in OperationClass::ALL {
        assert_eq!(policy.get_limit(class), 1);
    }

    assert_eq!(policy.record_and_maybe_adjust(failed(10), 10), None);
}

#[test]
fn recovery_after_three_successes_lands_on_conservative() {
    let mut policy = policy();
    policy.force_mode(ConcurrencyMode::Aggressive, 0);
    for i in 0..10 {
        policy.record_and_maybe_adjust(failed(i), i);
    }
    assert!(policy.emergency_fallback_active());

    assert_eq!(policy.record_and_maybe_adjust(ok(20), 20), None);
    assert_eq!(policy.record_and_maybe_adjust(ok(21), 21), None);
    let transition = policy.record_and_maybe_adjust(ok(22), 22);
    assert_eq!(
        transition,
        Some(PolicyTransition::Recovered {
            consecutive_successes: 3
        })
    );
    assert!(!policy.emergency_fallback_active());
    assert_eq!(policy.mode(), ConcurrencyMode::Conservative);
    assert_eq!(policy.get_limit(OperationClass::Api), 1);
    assert_eq!(policy.get_limit(OperationClass::GalleryImage), 1);
}

#[test]
fn mode_is_stable_between_adjustment_points() {
    let mut policy = policy();
    for i in 0..20 {
        policy.record_and_maybe_adjust(ok(i * 100), i * 100);
    }
    assert_eq!(policy.mode(), ConcurrencyMode::Balanced);

    let first = policy.record_and_maybe_adjust(ok(INTERVAL_MS), INTERVAL_MS);
    assert!(matches!(first, Some(PolicyTransition::ModeChanged(_))));
    assert_eq!(policy.mode(), ConcurrencyMode::Aggressive);

    let mut now = INTERVAL_MS;
    for i in 0..14 {
        now += 1_000;
        let outcome = if i % 2 == 0 { failed(now) } else { ok(now) };
        policy.record_and_maybe_adjust(outcome, now);
        assert_eq!(policy.mode(), ConcurrencyMode::Aggressive);
    }
    assert_eq!(policy.history(10).len(), 1);

    now = INTERVAL_MS * 2;
    policy.record_and_maybe_adjust(ok(now), now);
    assert_eq!(policy.mode(), ConcurrencyMode::SyncOnly);
    assert_eq!(policy.history(10).len(), 2);
}

#[test]
fn nothing_changes_below_min_samples() {
    let mut policy = policy();
    for i in 0..9 {
        assert_eq!(policy.record_and_maybe_adjust(ok(i), INTERVAL_MS * 2), None);
    }
    assert_eq!(policy.mode(), ConcurrencyMode::Balanced);
}

#[test]
fn decision_table_is_top_down() {
    let config = ConcurrencyConfig::default();
    let rates = |success_rate: f64, timeout_rate: f64| AggregateMetrics {
        success_rate,
        timeout_rate,
        ..AggregateMetrics::default()
    };

    assert_eq!(decide_mode(&config, &rates(0.999, 0.001)), ConcurrencyMode::Aggressive);
    assert_eq!(decide_mode(&config, &rates(0.98, 0.01)), ConcurrencyMode::Balanced);
    assert_eq!(decide_mode(&config, &rates(0.95, 0.05)), ConcurrencyMode::Conservative);
    assert_eq!(decide_mode(&config, &rates(0.85, 0.0)), ConcurrencyMode::SyncOnly);
    assert_eq!(decide_mode(&config, &rates(0.995, 0.11)), ConcurrencyMode::SyncOnly);
}

#[test]
fn decision_ignores_order_within_window() {
    let config = ConcurrencyConfig {
        emergency_failure_threshold: 1_000,
        ..ConcurrencyConfig::default()
    };
    let mut front_loaded = ConcurrencyPolicy::new(config.clone(), 0).unwrap();
    let mut back_loaded = ConcurrencyPolicy::new(config, 0).unwrap();
    for i in 0..100u64 {
        let front = if i < 15 { failed(i) } else { ok(i) };
        let back = if i >= 85 { failed(i) } else { ok(i) };
        front_loaded.record_and_maybe_adjust(front, i);
        back_loaded.record_and_maybe_adjust(back, i);
    }
    assert_eq!(front_loaded.mode(), ConcurrencyMode::Balanced);

    // Each push evicts an outcome of the same kind, keeping 15 failures in both windows.
    front_loaded.record_and_maybe_adjust(failed(INTERVAL_MS), INTERVAL_MS);
    back_loaded.record_and_maybe_adjust(ok(INTERVAL_MS), INTERVAL_MS);

    assert_eq!(front_loaded.aggregates(INTERVAL_MS).success_rate, 0.85);
    assert_eq!(back_loaded.aggregates(INTERVAL_MS).success_rate, 0.85);
    assert_eq!(front_loaded.mode(), ConcurrencyMode::SyncOnly);
    assert_eq!(back_loaded.mode(), ConcurrencyMode::SyncOnly);
}

#[test]
fn mostly_successful_window_keeps_balanced_within_interval() {
    let mut policy = policy();
    for i in 0..19 {
        policy.record_and_maybe_adjust(ok(i), i);
    }
    policy.record_and_maybe_adjust(
        OperationOutcome::timeout(OperationClass::Api, Duration::from_secs(30), 19),
        19,
    );
    assert_eq!(policy.mode(), ConcurrencyMode::Balanced);
    assert!(!policy.emergency_fallback_active());
    let report = policy.status_report(20);
    assert_eq!(report.aggregates.count, 20);
    assert_eq!(report.aggregates.timeouts, 1);
    assert_eq!(report.consecutive_failures, 1);
}

#[test]
fn forcing_sync_only_activates_fallback() {
    let mut policy = policy();
    policy.force_mode(ConcurrencyMode::SyncOnly, 5);
    assert!(policy.emergency_fallback_active());
    assert_eq!(policy.get_limit(OperationClass::Api), 1);

    policy.force_mode(ConcurrencyMode::Aggressive, 6);
    assert!(!policy.emergency_fallback_active());
    assert_eq!(policy.get_limit(OperationClass::Api), 5);
    assert_eq!(policy.get_limit(OperationClass::PreviewImage), 3);
}

#[test]
fn adjustment_history_is_bounded() {
    let config = ConcurrencyConfig {
        history_capacity: 2,
        ..ConcurrencyConfig::default()
    };
    let mut policy = ConcurrencyPolicy::new(config, 0).unwrap();
    policy.force_mode(ConcurrencyMode::Aggressive, 1);
    policy.force_mode(ConcurrencyMode::Conservative, 2);
    policy.force_mode(ConcurrencyMode::Balanced, 3);
    let history = policy.history(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].to, ConcurrencyMode::Conservative);
    assert_eq!(history[1].to, ConcurrencyMode::Balanced);
}
