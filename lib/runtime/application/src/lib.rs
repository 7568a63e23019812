//! Control loop: outcome recording, concurrency policy, safety scoring,
//! graduated fallback and the execution gateway that ties them together.

pub mod callbacks;
pub mod control;
pub mod fallback;
pub mod gateway;
pub mod policy;
pub mod pool;
pub mod recorder;
pub mod safety;

pub use callbacks::Callback;
pub use control::{ControlPlane, HealthCheck};
pub use fallback::FallbackManager;
pub use gateway::{BatchReport, ExecutionGateway};
pub use policy::{ConcurrencyPolicy, PolicyTransition, decide_mode};
pub use pool::{WorkerPermit, WorkerPool};
pub use recorder::OutcomeRecorder;
pub use safety::SafetyEvaluator;

#[cfg(test)]
mod fallback_test;
#[cfg(test)]
mod policy_test;
