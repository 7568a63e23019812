use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::OperationClass;

/// Degradation tier of the graduated fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FallbackLevel {
    Normal = 0,
    Reduced = 1,
    Conservative = 2,
    SyncOnly = 3,
    EmergencyStop = 4,
}

impl FallbackLevel {
    pub const ALL: [FallbackLevel; 5] = [
        FallbackLevel::Normal,
        FallbackLevel::Reduced,
        FallbackLevel::Conservative,
        FallbackLevel::SyncOnly,
        FallbackLevel::EmergencyStop,
    ];

    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// One step up the ladder, saturating at `EmergencyStop`.
    pub fn escalated(&self) -> FallbackLevel {
        match self {
            FallbackLevel::Normal => FallbackLevel::Reduced,
            FallbackLevel::Reduced => FallbackLevel::Conservative,
            FallbackLevel::Conservative => FallbackLevel::SyncOnly,
            FallbackLevel::SyncOnly | FallbackLevel::EmergencyStop => FallbackLevel::EmergencyStop,
        }
    }

    /// One step down the ladder, saturating at `Normal`.
    pub fn recovered(&self) -> FallbackLevel {
        match self {
            FallbackLevel::Normal | FallbackLevel::Reduced => FallbackLevel::Normal,
            FallbackLevel::Conservative => FallbackLevel::Reduced,
            FallbackLevel::SyncOnly => FallbackLevel::Conservative,
            FallbackLevel::EmergencyStop => FallbackLevel::SyncOnly,
        }
    }

    pub fn restrictions(&self) -> Restrictions {
        let (api, download, models, experimental) = match self {
            FallbackLevel::Normal => (5, 4, 2, true),
            FallbackLevel::Reduced => (3, 2, 1, true),
            FallbackLevel::Conservative => (2, 1, 1, false),
            FallbackLevel::SyncOnly => (1, 1, 1, false),
            FallbackLevel::EmergencyStop => (0, 0, 0, false),
        };
        Restrictions {
            level: *self,
            max_api_concurrency: api,
            max_download_concurrency: download,
            max_parallel_models: models,
            allow_experimental_features: experimental,
            emergency_stop: *self == FallbackLevel::EmergencyStop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::Normal => "normal",
            FallbackLevel::Reduced => "reduced",
            FallbackLevel::Conservative => "conservative",
            FallbackLevel::SyncOnly => "sync_only",
            FallbackLevel::EmergencyStop => "emergency_stop",
        }
    }
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a level transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    HighErrorRate,
    MemoryPressure,
    DiskSpaceLow,
    NetworkIssues,
    ConsecutiveFailures,
    CpuOverload,
    SafetyAlert,
    UserRequest,
    Recovery,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::HighErrorRate => "high_error_rate",
            TriggerReason::MemoryPressure => "memory_pressure",
            TriggerReason::DiskSpaceLow => "disk_space_low",
            TriggerReason::NetworkIssues => "network_issues",
            TriggerReason::ConsecutiveFailures => "consecutive_failures",
            TriggerReason::CpuOverload => "cpu_overload",
            TriggerReason::SafetyAlert => "safety_alert",
            TriggerReason::UserRequest => "user_request",
            TriggerReason::Recovery => "recovery",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry in the fallback history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub at_ms: u64,
    pub from: FallbackLevel,
    pub to: FallbackLevel,
    pub reason: TriggerReason,
    pub details: serde_json::Value,
}

/// Hard ceilings the execution gateway must honor at a given level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrictions {
    pub level: FallbackLevel,
    pub max_api_concurrency: usize,
    pub max_download_concurrency: usize,
    pub max_parallel_models: usize,
    pub allow_experimental_features: bool,
    pub emergency_stop: bool,
}

impl Restrictions {
    pub fn ceiling(&self, class: OperationClass) -> usize {
        match class {
            OperationClass::Api => self.max_api_concurrency,
            OperationClass::Model => self
                .max_download_concurrency
                .min(self.max_parallel_models),
            OperationClass::GalleryImage | OperationClass::PreviewImage => {
                self.max_download_concurrency
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(FallbackLevel::Normal < FallbackLevel::Reduced);
        assert!(FallbackLevel::SyncOnly < FallbackLevel::EmergencyStop);
        assert_eq!(FallbackLevel::EmergencyStop.escalated(), FallbackLevel::EmergencyStop);
        assert_eq!(FallbackLevel::Normal.recovered(), FallbackLevel::Normal);
        assert_eq!(FallbackLevel::SyncOnly.recovered(), FallbackLevel::Conservative);
    }

    #[test]
    fn emergency_stop_ceilings_are_zero() {
        let restrictions = FallbackLevel::EmergencyStop.restrictions();
        assert!(restrictions.emergency_stop);
        for class in OperationClass::ALL {
            assert_eq!(restrictions.ceiling(class), 0);
        }
    }

    #[test]
    fn model_ceiling_takes_parallel_models_into_account() {
        let normal = FallbackLevel::Normal.restrictions();
        assert_eq!(normal.ceiling(OperationClass::Api), 5);
        assert_eq!(normal.ceiling(OperationClass::Model), 2);
        assert_eq!(normal.ceiling(OperationClass::GalleryImage), 4);
        let reduced = FallbackLevel::Reduced.restrictions();
        assert_eq!(reduced.ceiling(OperationClass::Model), 1);
        assert!(reduced.allow_experimental_features);
        assert!(!FallbackLevel::Conservative.restrictions().allow_experimental_features);
    }
}
