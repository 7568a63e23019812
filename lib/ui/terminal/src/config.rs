use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;

use civitai_dl_domain::ControlConfig;

pub const CONFIG_ENV: &str = "CIVITAI_DL_CONFIG";

/// Explicit path, then `CIVITAI_DL_CONFIG`, then `~/.civitai-dl/config.yaml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(home) = env::var("HOME") {
        return Path::new(&home).join(".civitai-dl").join("config.yaml");
    }

    PathBuf::from("civitai-dl-config.yaml")
}

/// Loads the control config. A missing file falls back to validated
/// defaults unless the path was chosen by flag or environment.
pub fn load_config(explicit: Option<&Path>) -> Result<ControlConfig> {
    let path = config_path(explicit);
    let chosen = explicit.is_some() || env::var_os(CONFIG_ENV).is_some();
    if !chosen && !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        let config = ControlConfig::default();
        config.validate()?;
        return Ok(config);
    }
    tracing::info!(path = %path.display(), "loading config");
    ControlConfig::load_from_path(&path)
}
