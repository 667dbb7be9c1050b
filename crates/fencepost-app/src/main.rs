// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fencepost: Geofence Coordination Service
//
// Desktop entry point.  Initialises logging (to stderr, stdout carries the
// protocol), loads config, opens the registration store, and serves plugin
// commands and host controls from stdin against the in-memory platform.

mod services;

use std::process::ExitCode;
use std::sync::Arc;

use fencepost_bridge::memory::MemoryPlatform;
use fencepost_engine::GeofencePlugin;
use fencepost_registry::RegistrationStore;

use services::host::{LineSink, StdoutBridge};
use services::{data_dir, host, settings};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Fencepost starting");

    let dir = data_dir::data_dir();
    let config = settings::load_or_init(&dir);

    let store = match RegistrationStore::open(dir.join(&config.store_file)) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "persistent storage failed, using in-memory fallback");
            match RegistrationStore::open_in_memory() {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!(error = %e, "even fallback storage failed");
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    let memory = MemoryPlatform::new();
    let plugin = GeofencePlugin::start(config, memory.platform(), store).await;

    let sink = LineSink::stdout();
    plugin.bind_bridge(Arc::new(StdoutBridge::new(sink.clone())));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let code = tokio::select! {
        served = host::serve(&plugin, &memory, stdin, &sink) => match served {
            Ok(handled) => {
                tracing::info!(handled, "input closed");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "command loop failed");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            ExitCode::SUCCESS
        }
    };

    plugin.shutdown().await;
    code
}
