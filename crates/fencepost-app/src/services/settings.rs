// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persisted `AppConfig` (`config.json` in the data directory).

use std::path::Path;

use fencepost_core::AppConfig;
use fencepost_core::error::Result;

pub const CONFIG_FILE: &str = "config.json";

/// Read the persisted config.  `None` if missing or unreadable.
pub fn load_config(data_dir: &Path) -> Option<AppConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn persist_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

/// Load the config, writing the defaults out on first run.
pub fn load_or_init(data_dir: &Path) -> AppConfig {
    if let Some(config) = load_config(data_dir) {
        return config;
    }
    let config = AppConfig::default();
    if !data_dir.join(CONFIG_FILE).exists() {
        if let Err(e) = persist_config(data_dir, &config) {
            tracing::warn!(error = %e, "could not write default config");
        }
    }
    config
}
