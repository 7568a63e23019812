use crate::fallback::FallbackLevel;
use crate::operation::OperationClass;

/// Configuration problems detected at construction. The control plane refuses
/// to start on any of these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("no concurrency limits configured for operation class `{0}`")]
    MissingClass(OperationClass),

    #[error("limits for `{class}` must satisfy 1 <= min ({min}) <= default ({default}) <= max ({max})")]
    InvalidClassLimits {
        class: OperationClass,
        min: usize,
        default: usize,
        max: usize,
    },

    #[error("threshold `{name}` is mis-ordered: {detail}")]
    ThresholdOrder { name: &'static str, detail: String },

    #[error("escalation thresholds missing for fallback level `{0}`")]
    MissingEscalationLevel(FallbackLevel),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn order(name: &'static str, detail: impl Into<String>) -> Self {
        ConfigError::ThresholdOrder {
            name,
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
