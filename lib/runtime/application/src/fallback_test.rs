use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use civitai_dl_domain::{
    FallbackConfig, FallbackLevel, LevelChange, SystemSample, TriggerReason,
};

use crate::fallback::FallbackManager;

const MINUTE_MS: u64 = 60_000;

fn manager() -> FallbackManager {
    FallbackManager::new(FallbackConfig::default(), 0).unwrap()
}

fn sample(memory_used_mb: f64, cpu_percent: f64, disk_free_gb: f64) -> SystemSample {
    SystemSample {
        memory_used_mb,
        cpu_percent,
        disk_free_gb,
        network_latency_ms: 100.0,
        api_reachable: true,
    }
}

fn calm() -> SystemSample {
    sample(512.0, 10.0, 100.0)
}

#[test]
fn starts_at_normal_without_entry_time() {
    let manager = manager();
    assert_eq!(manager.level(), FallbackLevel::Normal);
    assert_eq!(manager.level_entered_at_ms(), None);
    assert_eq!(manager.current_restrictions().max_api_concurrency, 5);
}

#[test]
fn outcome_escalation_waits_for_enough_samples() {
    let mut manager = manager();
    for i in 0..9 {
        assert!(manager.record_outcome(false, Value::Null, i * 1_000).is_none());
    }
    let change = manager.record_outcome(false, json!({ "class": "api" }), 9_000).unwrap();
    assert_eq!(change.from, FallbackLevel::Normal);
    assert_eq!(change.to, FallbackLevel::Reduced);
    assert_eq!(change.reason, TriggerReason::HighErrorRate);
    assert_eq!(change.details["last_failure"]["class"], "api");
    assert_eq!(manager.level_entered_at_ms(), Some(9_000));
}

#[test]
fn consecutive_failures_escalate_when_error_rate_is_low() {
    let config = FallbackConfig {
        min_samples_for_escalation: 10,
        ..FallbackConfig::default()
    };
    let mut manager = FallbackManager::new(config, 0).unwrap();
    for i in 0..57 {
        manager.record_outcome(true, Value::Null, i);
    }
    manager.record_outcome(false, Value::Null, 100);
    manager.record_outcome(false, Value::Null, 101);
    assert_eq!(manager.level(), FallbackLevel::Normal);

    let change = manager.record_outcome(false, Value::Null, 102).unwrap();
    assert_eq!(change.reason, TriggerReason::ConsecutiveFailures);
    assert_eq!(change.to, FallbackLevel::Reduced);
}

#[test]
fn escalation_never_skips_a_level() {
    let mut manager = manager();
    let mut changes: Vec<LevelChange> = Vec::new();
    for i in 0..40 {
        if let Some(change) = manager.record_outcome(false, Value::Null, i * 100) {
            changes.push(change);
        }
    }
    assert_eq!(manager.level(), FallbackLevel::EmergencyStop);
    assert_eq!(changes.len(), 4);
    for change in &changes {
        assert_eq!(change.to.value(), change.from.value() + 1);
    }
}

#[test]
fn memory_pressure_moves_one_level() {
    let mut manager = manager();
    let change = manager
        .record_system_metrics(sample(4200.0, 10.0, 100.0), 0)
        .unwrap();
    assert_eq!(change.reason, TriggerReason::MemoryPressure);
    assert_eq!(change.to, FallbackLevel::Reduced);
    assert_eq!(manager.level(), FallbackLevel::Reduced);

    assert!(manager.record_system_metrics(sample(4000.0, 10.0, 100.0), 1).is_none());
    let change = manager
        .record_system_metrics(sample(1000.0, 92.0, 100.0), 2)
        .unwrap();
    assert_eq!(change.reason, TriggerReason::CpuOverload);
    assert_eq!(change.to, FallbackLevel::Conservative);
}

#[test]
fn low_disk_jumps_to_emergency_stop_from_any_level() {
    for start in [
        FallbackLevel::Normal,
        FallbackLevel::Reduced,
        FallbackLevel::Conservative,
        FallbackLevel::SyncOnly,
    ] {
        let mut manager = manager();
        manager.force_level(start, "setup", 0);
        let change = manager
            .record_system_metrics(sample(9000.0, 99.0, 0.1), 1)
            .unwrap();
        assert_eq!(change.from, start);
        assert_eq!(change.to, FallbackLevel::EmergencyStop);
        assert_eq!(change.reason, TriggerReason::DiskSpaceLow);
        assert!(manager.current_restrictions().emergency_stop);
    }
}

#[test]
fn recovery_refused_before_stable_duration() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::Reduced, "test", 0);
    for i in 0..20 {
        manager.record_outcome(true, Value::Null, 5 * MINUTE_MS + i);
    }
    assert!(!manager.attempt_recovery(9 * MINUTE_MS));
    assert_eq!(manager.level(), FallbackLevel::Reduced);

    assert!(manager.attempt_recovery(11 * MINUTE_MS));
    assert_eq!(manager.level(), FallbackLevel::Normal);
    assert_eq!(manager.level_entered_at_ms(), None);
    assert!(manager.attempt_recovery(12 * MINUTE_MS));
}

#[test]
fn recovery_needs_recent_samples_and_success() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::Reduced, "test", 0);
    for i in 0..4 {
        manager.record_outcome(true, Value::Null, 15 * MINUTE_MS + i);
    }
    assert!(!manager.attempt_recovery(16 * MINUTE_MS));

    manager.record_outcome(false, Value::Null, 16 * MINUTE_MS);
    manager.record_outcome(true, Value::Null, 16 * MINUTE_MS + 1);
    assert!(!manager.attempt_recovery(17 * MINUTE_MS));
    assert_eq!(manager.level(), FallbackLevel::Reduced);
}

#[test]
fn recovery_blocked_by_latest_system_sample() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::Reduced, "test", 0);
    manager.record_system_metrics(sample(2500.0, 10.0, 100.0), 1);
    for i in 0..10 {
        manager.record_outcome(true, Value::Null, 12 * MINUTE_MS + i);
    }
    assert!(!manager.attempt_recovery(13 * MINUTE_MS));

    manager.record_system_metrics(calm(), 13 * MINUTE_MS);
    assert!(manager.attempt_recovery(13 * MINUTE_MS + 1));
}

#[test]
fn recovery_steps_down_one_level_at_a_time() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::SyncOnly, "test", 0);
    for i in 0..10 {
        manager.record_outcome(true, Value::Null, 9 * MINUTE_MS + i);
    }
    assert!(manager.attempt_recovery(12 * MINUTE_MS));
    assert_eq!(manager.level(), FallbackLevel::Conservative);
    assert!(!manager.attempt_recovery(13 * MINUTE_MS));

    let last = manager.history(1).pop().unwrap();
    assert_eq!(last.reason, TriggerReason::Recovery);
    assert_eq!(last.from, FallbackLevel::SyncOnly);
}

#[test]
fn outcomes_drive_auto_recovery_on_the_polling_interval() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::Reduced, "test", 0);
    for i in 0..6 {
        assert!(manager.record_outcome(true, Value::Null, 9 * MINUTE_MS + i).is_none());
    }
    assert!(manager.record_outcome(true, Value::Null, 9 * MINUTE_MS + 30_000).is_none());

    let change = manager.record_outcome(true, Value::Null, 10 * MINUTE_MS).unwrap();
    assert_eq!(change.to, FallbackLevel::Normal);
    assert_eq!(change.reason, TriggerReason::Recovery);
}

#[test]
fn poll_never_leaves_emergency_stop() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::EmergencyStop, "test", 0);
    for i in 0..10 {
        manager.record_outcome(true, Value::Null, 55 * MINUTE_MS + i);
    }
    assert!(manager.poll(60 * MINUTE_MS).is_none());
    assert_eq!(manager.level(), FallbackLevel::EmergencyStop);

    assert!(manager.attempt_recovery(60 * MINUTE_MS));
    assert_eq!(manager.level(), FallbackLevel::SyncOnly);
}

#[test]
fn disabled_auto_recovery_leaves_level_alone() {
    let config = FallbackConfig {
        auto_recovery: false,
        ..FallbackConfig::default()
    };
    let mut manager = FallbackManager::new(config, 0).unwrap();
    manager.force_level(FallbackLevel::Reduced, "test", 0);
    for i in 0..10 {
        manager.record_outcome(true, Value::Null, 20 * MINUTE_MS + i * MINUTE_MS);
    }
    assert_eq!(manager.level(), FallbackLevel::Reduced);
    assert!(manager.status_report(30 * MINUTE_MS).recovery_eligible);
}

#[test]
fn trigger_fallback_only_escalates() {
    let mut manager = manager();
    let change = manager
        .trigger_fallback(TriggerReason::SafetyAlert, json!({ "level": "critical" }), None, 0)
        .unwrap();
    assert_eq!(change.to, FallbackLevel::Reduced);

    assert!(manager
        .trigger_fallback(TriggerReason::UserRequest, Value::Null, Some(FallbackLevel::Normal), 1)
        .is_none());
    assert_eq!(manager.level(), FallbackLevel::Reduced);

    let change = manager
        .trigger_fallback(TriggerReason::DiskSpaceLow, Value::Null, None, 2)
        .unwrap();
    assert_eq!(change.to, FallbackLevel::EmergencyStop);
}

#[test]
fn force_level_always_applies() {
    let mut manager = manager();
    manager.force_level(FallbackLevel::EmergencyStop, "maintenance", 0);
    let change = manager.force_level(FallbackLevel::Normal, "done", 1).unwrap();
    assert_eq!(change.reason, TriggerReason::UserRequest);
    assert_eq!(change.details["note"], "done");
    assert_eq!(manager.level(), FallbackLevel::Normal);
    assert!(manager.force_level(FallbackLevel::Normal, "noop", 2).is_none());
}

#[test]
fn level_change_callbacks_are_isolated() {
    let mut manager = manager();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.add_level_change_callback(Box::new(|_: &LevelChange| -> anyhow::Result<()> {
        panic!("listener crashed")
    }));
    manager.add_level_change_callback(Box::new(move |change: &LevelChange| -> anyhow::Result<()> {
        sink.lock().unwrap().push(change.to);
        Ok(())
    }));

    manager.force_level(FallbackLevel::Conservative, "test", 0);
    manager.force_level(FallbackLevel::Reduced, "test", 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![FallbackLevel::Conservative, FallbackLevel::Reduced]
    );
}

#[test]
fn history_is_bounded() {
    let config = FallbackConfig {
        history_capacity: 3,
        ..FallbackConfig::default()
    };
    let mut manager = FallbackManager::new(config, 0).unwrap();
    for (i, level) in [
        FallbackLevel::Reduced,
        FallbackLevel::Conservative,
        FallbackLevel::SyncOnly,
        FallbackLevel::EmergencyStop,
    ]
    .into_iter()
    .enumerate()
    {
        manager.force_level(level, "step", i as u64);
    }
    let history = manager.history(10);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].to, FallbackLevel::Conservative);
    assert_eq!(manager.history(1)[0].to, FallbackLevel::EmergencyStop);
}

#[test]
fn status_report_is_idempotent() {
    let mut manager = manager();
    manager.record_system_metrics(sample(4200.0, 10.0, 100.0), 0);
    manager.record_outcome(false, Value::Null, 1_000);
    let first = manager.status_report(120_000);
    let second = manager.status_report(120_000);
    assert_eq!(first, second);
    assert_eq!(first.level, FallbackLevel::Reduced);
    assert_eq!(first.time_in_level_secs, 120);
    assert_eq!(first.window_samples, 1);
    assert_eq!(first.consecutive_failures, 1);
}

#[test]
fn rejects_missing_escalation_level() {
    let mut config = FallbackConfig::default();
    config.escalation.remove(&FallbackLevel::Conservative);
    assert!(FallbackManager::new(config, 0).is_err());
}
