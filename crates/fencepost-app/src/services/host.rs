// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Line-oriented command host.
//
// Requests arrive one JSON object per line:
//
//   {"action": "addOrUpdate", "args": [{ "id": "A", ... }]}
//
// and each gets exactly one reply line, `{"ok": <value>}` or
// `{"error": {"code", "message", "suggestion"}}`.  Bridge events share the
// same output as `{"bridge": <event>}` lines.  Commands run one at a time,
// so replies come back in request order.
//
// Lines carrying a `host` key instead drive the in-memory platform the
// desktop build runs against, standing in for the device:
//
//   {"host": "placeKey", "key": "k1", "latitude": 52.0, "longitude": 4.0, "radius": 50}
//   {"host": "removeKey", "key": "k1"}
//   {"host": "setLocation", "latitude": 52.0, "longitude": 4.0}
//   {"host": "refreshProximity"}
//   {"host": "fireTransition", "ids": ["k1"]}
//
// They are answered with the same `ok` / `error` reply lines.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use fencepost_bridge::memory::MemoryPlatform;
use fencepost_bridge::traits::ApplicationBridge;
use fencepost_core::error::{FencepostError, Result};
use fencepost_core::{GeoLocation, GeoNotification};
use fencepost_core::human_errors::{HumanError, humanize_error};
use fencepost_engine::GeofencePlugin;

#[derive(Debug, Deserialize)]
struct Command {
    action: String,
    #[serde(default)]
    args: Value,
}

/// Device-side changes applied to the in-memory platform.
#[derive(Debug, Deserialize)]
#[serde(tag = "host", rename_all = "camelCase")]
enum Control {
    /// Publish a record in the detail store and the spatial index.
    PlaceKey {
        key: String,
        latitude: f64,
        longitude: f64,
        #[serde(default = "default_radius")]
        radius: f64,
        #[serde(default)]
        data: Option<Value>,
    },
    RemoveKey {
        key: String,
    },
    /// Move the device and restart proximity selection around it.
    SetLocation {
        latitude: f64,
        longitude: f64,
    },
    RefreshProximity,
    FireTransition {
        ids: Vec<String>,
    },
}

fn default_radius() -> f64 {
    100.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Reply {
    Ok(Value),
    Error(HumanError),
}

/// Shared, line-at-a-time output.
#[derive(Clone)]
pub struct LineSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LineSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// Application bridge writing each event as a `{"bridge": ...}` line.
pub struct StdoutBridge {
    sink: LineSink,
}

impl StdoutBridge {
    pub fn new(sink: LineSink) -> Self {
        Self { sink }
    }
}

impl ApplicationBridge for StdoutBridge {
    fn deliver(&self, payload: &str) -> Result<()> {
        let event: Value = serde_json::from_str(payload)?;
        let line = serde_json::to_string(&serde_json::json!({ "bridge": event }))?;
        self.sink.write_line(&line)
    }
}

fn malformed(e: serde_json::Error) -> Reply {
    let err = FencepostError::InvalidArguments(format!("malformed command: {e}"));
    Reply::Error(humanize_error(&err))
}

async fn apply_control(plugin: &GeofencePlugin, memory: &MemoryPlatform, control: Control) -> Result<Value> {
    match control {
        Control::PlaceKey {
            key,
            latitude,
            longitude,
            radius,
            data,
        } => {
            let mut record = GeoNotification::new(key.clone(), latitude, longitude, radius);
            record.data = data;
            record.validate()?;
            memory.details.insert(&key, record);
            memory.spatial_index.set_location(&key, GeoLocation::new(latitude, longitude));
            Ok(Value::Null)
        }
        Control::RemoveKey { key } => {
            memory.spatial_index.remove(&key);
            memory.details.remove(&key);
            Ok(Value::Null)
        }
        Control::SetLocation { latitude, longitude } => {
            let location = GeoLocation::new(latitude, longitude);
            if !location.is_valid() {
                return Err(FencepostError::InvalidArguments(format!(
                    "location ({latitude}, {longitude}) out of range"
                )));
            }
            memory.location.set(Some(location));
            Ok(Value::Bool(plugin.refresh_proximity().await))
        }
        Control::RefreshProximity => Ok(Value::Bool(plugin.refresh_proximity().await)),
        Control::FireTransition { ids } => {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            Ok(Value::from(memory.monitor.fire_transition(&ids)))
        }
    }
}

async fn handle_line(plugin: &GeofencePlugin, memory: &MemoryPlatform, line: &str) -> Reply {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return malformed(e),
    };

    if value.get("host").is_some() {
        let control: Control = match serde_json::from_value(value) {
            Ok(control) => control,
            Err(e) => return malformed(e),
        };
        debug!(?control, "host control received");
        return match apply_control(plugin, memory, control).await {
            Ok(value) => Reply::Ok(value),
            Err(e) => {
                warn!(error = %e, "host control failed");
                Reply::Error(humanize_error(&e))
            }
        };
    }

    let command: Command = match serde_json::from_value(value) {
        Ok(command) => command,
        Err(e) => return malformed(e),
    };

    debug!(action = %command.action, "command received");
    match plugin.execute(&command.action, &command.args).await {
        Ok(value) => Reply::Ok(value),
        Err(e) => {
            warn!(action = %command.action, error = %e, "command failed");
            Reply::Error(humanize_error(&e))
        }
    }
}

/// Answer commands from `input` until it closes.  Returns how many ran.
///
/// Host control lines act on `memory`, which must be the platform `plugin`
/// was started with.
pub async fn serve<R>(
    plugin: &GeofencePlugin,
    memory: &MemoryPlatform,
    input: R,
    sink: &LineSink,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut handled = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle_line(plugin, memory, line).await;
        sink.write_line(&serde_json::to_string(&reply)?)?;
        handled += 1;
    }
    Ok(handled)
}
