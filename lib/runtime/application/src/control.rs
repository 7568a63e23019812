use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use civitai_dl_domain::{
    ConcurrencyMode, ConfigError, ControlConfig, Event, EventBus, EventLevel, FallbackLevel,
    LevelChange, LimitTable, MetricsSnapshot, OperationClass, OperationOutcome, Restrictions,
    SafetyAlert, SafetyAssessment, StatusReport, SystemSample, TriggerReason,
};
use civitai_dl_ports::Clock;

use crate::callbacks::Callback;
use crate::fallback::FallbackManager;
use crate::policy::{ConcurrencyPolicy, PolicyTransition};
use crate::safety::SafetyEvaluator;

const REPORT_EVENTS: usize = 20;
/// Latency reported for a probe that failed or timed out.
const UNREACHABLE_LATENCY_MS: f64 = 10_000.0;

/// Result of feeding one system sample through the safety and fallback layers.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub snapshot: MetricsSnapshot,
    pub assessment: SafetyAssessment,
    pub alerts: Vec<SafetyAlert>,
    pub level_change: Option<LevelChange>,
    pub recommendations: Vec<String>,
}

/// Owns the three controllers and answers "how many workers right now".
///
/// Each controller sits behind its own mutex. Outcome recording locks the
/// policy before the fallback manager; no other path nests locks in a
/// different order.
pub struct ControlPlane {
    config: ControlConfig,
    clock: Arc<dyn Clock>,
    policy: Mutex<ConcurrencyPolicy>,
    fallback: Mutex<FallbackManager>,
    safety: Mutex<SafetyEvaluator>,
    events: Mutex<EventBus>,
}

impl ControlPlane {
    pub fn new(config: ControlConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now_millis();
        let policy = ConcurrencyPolicy::new(config.concurrency.clone(), now)?;
        let fallback = FallbackManager::new(config.fallback.clone(), now)?;
        let safety = SafetyEvaluator::new(config.safety.clone())?;
        let mut events = EventBus::with_capacity(config.gateway.event_capacity);
        events.push(Event::new(EventLevel::Info, "Control plane initialized").at(now));

        Ok(Self {
            config,
            clock,
            policy: Mutex::new(policy),
            fallback: Mutex::new(fallback),
            safety: Mutex::new(safety),
            events: Mutex::new(events),
        })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn add_level_change_callback(&self, callback: Callback<LevelChange>) {
        lock(&self.fallback).add_level_change_callback(callback);
    }

    pub fn add_alert_callback(&self, callback: Callback<SafetyAlert>) {
        lock(&self.safety).add_alert_callback(callback);
    }

    pub fn record_outcome(&self, outcome: OperationOutcome) {
        let details = json!({
            "class": outcome.operation_class,
            "timed_out": outcome.timed_out,
            "duration_ms": u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
        });
        self.record_outcome_with_details(outcome, details);
    }

    /// Feeds one completed operation to the policy engine and the fallback
    /// manager. `details` is kept with the fallback outcome log.
    pub fn record_outcome_with_details(&self, outcome: OperationOutcome, details: Value) {
        let now = self.clock.now_millis();
        let success = outcome.success;

        let mut policy = lock(&self.policy);
        let transition = policy.record_and_maybe_adjust(outcome, now);
        let mut fallback = lock(&self.fallback);
        let change = fallback.record_outcome(success, details, now);
        drop(fallback);
        drop(policy);

        if let Some(transition) = transition {
            self.push_event(policy_event(&transition), now);
        }
        if let Some(change) = change {
            self.push_event(level_event(&change), now);
        }
    }

    /// Policy-engine limit for `class`, ignoring fallback and safety ceilings.
    pub fn current_limit(&self, class: OperationClass) -> usize {
        lock(&self.policy).get_limit(class)
    }

    /// The most restrictive of the fallback ceiling, the policy limit and the
    /// forced-safety floor. Zero under emergency stop.
    pub fn effective_limit(&self, class: OperationClass) -> usize {
        let restrictions = self.current_restrictions();
        if restrictions.emergency_stop {
            return 0;
        }
        let mut limit = restrictions.ceiling(class).min(self.current_limit(class));
        if self.should_force_safety_mode() {
            limit = limit.min(1);
        }
        limit
    }

    pub fn effective_limits(&self) -> LimitTable {
        OperationClass::ALL
            .into_iter()
            .map(|class| (class, self.effective_limit(class)))
            .collect()
    }

    pub fn current_restrictions(&self) -> Restrictions {
        lock(&self.fallback).current_restrictions()
    }

    pub fn should_force_safety_mode(&self) -> bool {
        lock(&self.safety).should_force_safety_mode()
    }

    pub fn is_safe_for_concurrency_increase(&self) -> bool {
        lock(&self.safety).is_safe_for_concurrency_increase()
    }

    pub fn mode(&self) -> ConcurrencyMode {
        lock(&self.policy).mode()
    }

    pub fn level(&self) -> FallbackLevel {
        lock(&self.fallback).level()
    }

    /// Joins `sample` with the outcome window, assesses it, raises alerts and
    /// feeds the fallback manager. When the sample itself did not move the
    /// ladder but safety just turned critical or worse, escalates one step,
    /// never past `SyncOnly`.
    pub fn observe_sample(&self, sample: SystemSample) -> HealthCheck {
        self.observe(sample, true)
    }

    /// Health observation for a probe that failed or timed out. The API
    /// counts as unreachable; resource readings carry over from the last
    /// real sample and are not fed to the fallback manager again.
    pub fn observe_failed_sample(&self) -> HealthCheck {
        let last = lock(&self.fallback)
            .latest_sample()
            .cloned()
            .unwrap_or_default();
        let sample = SystemSample {
            network_latency_ms: UNREACHABLE_LATENCY_MS,
            api_reachable: false,
            ..last
        };
        self.observe(sample, false)
    }

    fn observe(&self, sample: SystemSample, measured: bool) -> HealthCheck {
        let now = self.clock.now_millis();
        let aggregates = lock(&self.policy).aggregates(now);
        let snapshot = MetricsSnapshot::from_sample(sample.clone()).with_reliability(&aggregates);

        let (alerts, assessment, previous, recommendations) = {
            let mut safety = lock(&self.safety);
            let previous = safety.latest().map(|assessment| assessment.level);
            let alerts = safety.monitor_and_alert(&snapshot, now);
            let assessment = safety
                .latest()
                .cloned()
                .unwrap_or_else(|| safety.assess(&snapshot, now));
            let recommendations = safety.recommendations(&snapshot);
            (alerts, assessment, previous, recommendations)
        };
        let worsened = previous.is_none_or(|level| assessment.level > level);

        let level_change = {
            let mut fallback = lock(&self.fallback);
            let moved = if measured {
                fallback.record_system_metrics(sample, now)
            } else {
                None
            };
            match moved {
                Some(change) => Some(change),
                None if assessment.level.forces_safety_mode()
                    && worsened
                    && fallback.level() < FallbackLevel::SyncOnly =>
                {
                    let reason = if snapshot.api_reachable {
                        TriggerReason::SafetyAlert
                    } else {
                        TriggerReason::NetworkIssues
                    };
                    let details = json!({
                        "safety_level": assessment.level,
                        "score": assessment.score,
                        "api_reachable": snapshot.api_reachable,
                    });
                    fallback.trigger_fallback(reason, details, None, now)
                }
                None => None,
            }
        };

        for alert in &alerts {
            let level = if alert.level.forces_safety_mode() {
                EventLevel::Error
            } else {
                EventLevel::Warn
            };
            self.push_event(Event::new(level, alert.message.clone()), now);
        }
        if let Some(change) = &level_change {
            self.push_event(level_event(change), now);
        }

        HealthCheck {
            snapshot,
            assessment,
            alerts,
            level_change,
            recommendations,
        }
    }

    pub fn force_mode(&self, mode: ConcurrencyMode) {
        let now = self.clock.now_millis();
        lock(&self.policy).force_mode(mode, now);
        self.push_event(
            Event::new(EventLevel::Warn, format!("Concurrency mode forced to {mode}")),
            now,
        );
    }

    pub fn force_level(&self, level: FallbackLevel, note: &str) -> Option<LevelChange> {
        let now = self.clock.now_millis();
        let change = lock(&self.fallback).force_level(level, note, now);
        if let Some(change) = &change {
            self.push_event(level_event(change), now);
        }
        change
    }

    pub fn attempt_recovery(&self) -> bool {
        let now = self.clock.now_millis();
        let mut fallback = lock(&self.fallback);
        let before = fallback.level();
        let recovered = fallback.attempt_recovery(now);
        let after = fallback.level();
        drop(fallback);
        if after != before {
            self.push_event(
                Event::new(
                    EventLevel::Info,
                    format!("Fallback level lowered from {before} to {after}"),
                ),
                now,
            );
        }
        recovered
    }

    /// Timer-driven recovery check for callers that poll between batches.
    pub fn poll(&self) -> Option<LevelChange> {
        let now = self.clock.now_millis();
        let change = lock(&self.fallback).poll(now);
        if let Some(change) = &change {
            self.push_event(level_event(change), now);
        }
        change
    }

    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        lock(&self.events).recent(limit)
    }

    /// Read-only view of every controller. Calling it twice at the same
    /// instant yields identical reports.
    pub fn status_report(&self) -> StatusReport {
        let now = self.clock.now_millis();
        let policy = lock(&self.policy).status_report(now);
        let fallback = lock(&self.fallback).status_report(now);
        let safety = lock(&self.safety).status_report();
        StatusReport {
            generated_at_ms: now,
            policy,
            fallback,
            safety,
            effective_limits: self.effective_limits(),
            recent_events: self.recent_events(REPORT_EVENTS),
        }
    }

    fn push_event(&self, event: Event, now_ms: u64) {
        lock(&self.events).push(event.at(now_ms));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn policy_event(transition: &PolicyTransition) -> Event {
    match transition {
        PolicyTransition::EmergencyActivated {
            consecutive_failures,
        } => Event::new(
            EventLevel::Error,
            format!("Emergency fallback after {consecutive_failures} consecutive failures"),
        ),
        PolicyTransition::Recovered {
            consecutive_successes,
        } => Event::new(
            EventLevel::Info,
            format!("Emergency fallback cleared after {consecutive_successes} consecutive successes"),
        ),
        PolicyTransition::ModeChanged(adjustment) => Event::new(
            EventLevel::Info,
            format!("Concurrency mode {} -> {}", adjustment.from, adjustment.to),
        ),
    }
}

fn level_event(change: &LevelChange) -> Event {
    let level = if change.to > change.from {
        EventLevel::Warn
    } else {
        EventLevel::Info
    };
    Event::new(
        level,
        format!(
            "Fallback level {} -> {} ({})",
            change.from, change.to, change.reason
        ),
    )
}
