//! Terminal surface: config loading, text rendering and the `cli` binary.

pub mod config;
pub mod format;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
mod logging;

pub use config::{CONFIG_ENV, config_path, load_config};
pub use format::{format_timestamp, render_batch, render_health, render_status};
