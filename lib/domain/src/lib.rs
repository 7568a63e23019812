//! Domain models and invariants for the download control plane.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod metrics;
pub mod operation;
pub mod report;
pub mod safety;

pub use concurrency::{ConcurrencyMode, LimitTable, ModeAdjustment};
pub use config::{
    ClassLimits, ConcurrencyConfig, ControlConfig, EscalationThresholds, FallbackConfig,
    GatewayConfig, RecoveryConditions, SafetyThresholds,
};
pub use error::ConfigError;
pub use events::{Event, EventBus, EventLevel};
pub use fallback::{FallbackLevel, LevelChange, Restrictions, TriggerReason};
pub use metrics::{AggregateMetrics, MetricsSnapshot, SystemSample};
pub use operation::{
    ErrorCategory, OperationClass, OperationOutcome, OperationRequest, OperationStatus,
};
pub use report::{FallbackReport, PolicyReport, SafetyReport, StatusReport};
pub use safety::{Breach, ErrorTrend, SafetyAlert, SafetyAssessment, SafetyLevel};
