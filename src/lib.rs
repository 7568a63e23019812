//! Adaptive concurrency and safety fallback for bulk CivitAI downloads.

pub use civitai_dl_application as application;
pub use civitai_dl_domain as domain;
pub use civitai_dl_ports as ports;

#[cfg(feature = "system")]
pub use civitai_dl_adapter_system as system;
#[cfg(feature = "cli")]
pub use civitai_dl_ui_terminal as terminal;

pub use civitai_dl_application::{ControlPlane, ExecutionGateway};
pub use civitai_dl_domain::ControlConfig;
