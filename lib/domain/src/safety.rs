use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall system health, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Excellent,
    Good,
    Warning,
    Critical,
    Emergency,
}

impl SafetyLevel {
    /// Fixed score bands.
    pub fn from_score(score: f64) -> SafetyLevel {
        if score >= 90.0 {
            SafetyLevel::Excellent
        } else if score >= 70.0 {
            SafetyLevel::Good
        } else if score >= 50.0 {
            SafetyLevel::Warning
        } else if score >= 20.0 {
            SafetyLevel::Critical
        } else {
            SafetyLevel::Emergency
        }
    }

    pub fn forces_safety_mode(&self) -> bool {
        *self >= SafetyLevel::Critical
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Excellent => "excellent",
            SafetyLevel::Good => "good",
            SafetyLevel::Warning => "warning",
            SafetyLevel::Critical => "critical",
            SafetyLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// A threshold crossed by one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub metric: String,
    pub severity: SafetyLevel,
    pub value: f64,
    pub threshold: f64,
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub level: SafetyLevel,
    pub score: f64,
    pub memory_growth_mb_per_hour: f64,
    pub error_trend: ErrorTrend,
    pub breaches: Vec<Breach>,
    pub assessed_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub level: SafetyLevel,
    pub metric: String,
    pub message: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub timestamp_ms: u64,
    pub recommended_action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bands() {
        assert_eq!(SafetyLevel::from_score(100.0), SafetyLevel::Excellent);
        assert_eq!(SafetyLevel::from_score(90.0), SafetyLevel::Excellent);
        assert_eq!(SafetyLevel::from_score(70.0), SafetyLevel::Good);
        assert_eq!(SafetyLevel::from_score(55.0), SafetyLevel::Warning);
        assert_eq!(SafetyLevel::from_score(20.0), SafetyLevel::Critical);
        assert_eq!(SafetyLevel::from_score(19.9), SafetyLevel::Emergency);
    }

    #[test]
    fn ordering_is_by_severity() {
        assert!(SafetyLevel::Emergency > SafetyLevel::Critical);
        assert!(SafetyLevel::Good < SafetyLevel::Warning);
        assert!(SafetyLevel::Critical.forces_safety_mode());
        assert!(!SafetyLevel::Warning.forces_safety_mode());
    }
}
