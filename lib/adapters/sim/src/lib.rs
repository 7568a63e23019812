//! Simulated collaborators for tests and the `simulate` command.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use civitai_dl_domain::{
    ErrorCategory, OperationClass, OperationRequest, OperationStatus, SystemSample,
};
use civitai_dl_ports::{MetricsPort, OperationPort};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replays a fixed list of statuses, then succeeds forever.
#[derive(Debug, Default)]
pub struct ScriptedOperations {
    script: Mutex<VecDeque<OperationStatus>>,
    delay: Duration,
}

impl ScriptedOperations {
    pub fn new(script: impl IntoIterator<Item = OperationStatus>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl OperationPort for ScriptedOperations {
    async fn execute(&self, _request: &OperationRequest) -> OperationStatus {
        let status = lock(&self.script)
            .pop_front()
            .unwrap_or(OperationStatus::Success);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        status
    }
}

/// Failure and timeout odds for one operation class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassProfile {
    pub failure_rate: f64,
    pub timeout_rate: f64,
}

impl Default for ClassProfile {
    fn default() -> Self {
        Self {
            failure_rate: 0.02,
            timeout_rate: 0.01,
        }
    }
}

/// Seeded random outcomes with per-class odds and a latency range.
pub struct RandomOperations {
    rng: Mutex<SmallRng>,
    profiles: BTreeMap<OperationClass, ClassProfile>,
    latency_ms: Range<u64>,
}

impl RandomOperations {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            profiles: BTreeMap::new(),
            latency_ms: 0..1,
        }
    }

    pub fn with_profile(mut self, class: OperationClass, profile: ClassProfile) -> Self {
        self.profiles.insert(class, profile);
        self
    }

    pub fn with_all_profiles(mut self, profile: ClassProfile) -> Self {
        for class in OperationClass::ALL {
            self.profiles.insert(class, profile);
        }
        self
    }

    pub fn with_latency(mut self, latency_ms: Range<u64>) -> Self {
        if latency_ms.start < latency_ms.end {
            self.latency_ms = latency_ms;
        }
        self
    }

    fn roll(&self, class: OperationClass) -> (OperationStatus, Duration) {
        let profile = self.profiles.get(&class).copied().unwrap_or_default();
        let mut rng = lock(&self.rng);
        let latency = Duration::from_millis(rng.gen_range(self.latency_ms.clone()));
        let draw: f64 = rng.gen_range(0.0..1.0);
        let status = if draw < profile.timeout_rate {
            OperationStatus::Timeout
        } else if draw < profile.timeout_rate + profile.failure_rate {
            let category = if rng.gen_bool(0.5) {
                ErrorCategory::ServerError
            } else {
                ErrorCategory::NetworkConnection
            };
            OperationStatus::failure(category, format!("simulated {category}"))
        } else {
            OperationStatus::Success
        };
        (status, latency)
    }
}

#[async_trait]
impl OperationPort for RandomOperations {
    async fn execute(&self, request: &OperationRequest) -> OperationStatus {
        let (status, latency) = self.roll(request.class);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        status
    }
}

/// Plays back system samples in order and repeats the last one.
#[derive(Debug)]
pub struct ScriptedMetrics {
    samples: Mutex<VecDeque<SystemSample>>,
    last: Mutex<SystemSample>,
}

impl ScriptedMetrics {
    pub fn new(samples: impl IntoIterator<Item = SystemSample>) -> Self {
        Self {
            samples: Mutex::new(samples.into_iter().collect()),
            last: Mutex::new(SystemSample::default()),
        }
    }

    pub fn fixed(sample: SystemSample) -> Self {
        Self::new([sample])
    }
}

#[async_trait]
impl MetricsPort for ScriptedMetrics {
    async fn fetch_snapshot(&self) -> Result<SystemSample> {
        let next = lock(&self.samples).pop_front();
        let mut last = lock(&self.last);
        if let Some(sample) = next {
            *last = sample;
        }
        Ok(last.clone())
    }
}
