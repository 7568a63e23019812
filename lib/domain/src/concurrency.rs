use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::AggregateMetrics;
use crate::operation::OperationClass;

/// Worker count per operation class.
pub type LimitTable = BTreeMap<OperationClass, usize>;

/// Parallelism profile chosen by the policy engine.
///
/// `Conservative`, `Balanced` and `Aggressive` map to each class's configured
/// min, default and max. `SyncOnly` is a forced floor of one worker per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    Conservative,
    Balanced,
    Aggressive,
    SyncOnly,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Conservative => "conservative",
            ConcurrencyMode::Balanced => "balanced",
            ConcurrencyMode::Aggressive => "aggressive",
            ConcurrencyMode::SyncOnly => "sync_only",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mode change, kept for the status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeAdjustment {
    pub at_ms: u64,
    pub from: ConcurrencyMode,
    pub to: ConcurrencyMode,
    pub before: LimitTable,
    pub after: LimitTable,
    pub aggregates: AggregateMetrics,
}
