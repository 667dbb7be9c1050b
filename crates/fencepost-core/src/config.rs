// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persistent service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Radius of the spatial-index query around the device, in kilometres.
    pub query_radius_km: f64,
    /// How many of the nearest fences the proximity selector keeps armed.
    pub max_watched: usize,
    /// Upper bound on a single detail fetch, in seconds.
    pub detail_fetch_timeout_secs: u64,
    /// Base URL stamped onto fetched notifications as `<base>/<key>`.
    pub details_url_base: Option<String>,
    /// File name of the registration database inside the data directory.
    pub store_file: String,
}

impl AppConfig {
    pub fn detail_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_fetch_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            query_radius_km: 16.0,
            max_watched: 3,
            detail_fetch_timeout_secs: 10,
            details_url_base: None,
            store_file: "geofences.db".into(),
        }
    }
}
