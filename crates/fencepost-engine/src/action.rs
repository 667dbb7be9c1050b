// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plugin actions and their completion handles.
//
// The application calls in with an action name and a JSON argument array,
// the way a web-view bridge hands them over.  `Action::parse` turns that
// into a typed command before it is queued, so malformed input fails fast.

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use fencepost_core::GeoNotification;
use fencepost_core::error::{FencepostError, Result};

/// A command from the consuming application.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddOrUpdate(Vec<GeoNotification>),
    Remove(Vec<String>),
    RemoveAll,
    GetWatched,
    /// Prime location permissions.
    Initialize,
    /// The web layer is ready; replay a pending notification click.
    DeviceReady,
}

impl Action {
    /// Parse an action name and its JSON argument array.
    ///
    /// `args` may be `null` for actions that take no arguments.
    pub fn parse(name: &str, args: &Value) -> Result<Self> {
        match name {
            "addOrUpdate" => {
                let notifications = arg_array(name, args)?
                    .iter()
                    .map(GeoNotification::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::AddOrUpdate(notifications))
            }
            "remove" => {
                let ids = arg_array(name, args)?
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            FencepostError::InvalidArguments(format!("remove: id {v} is not a string"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Remove(ids))
            }
            "removeAll" => Ok(Self::RemoveAll),
            "getWatched" => Ok(Self::GetWatched),
            "initialize" => Ok(Self::Initialize),
            "deviceReady" => Ok(Self::DeviceReady),
            other => Err(FencepostError::UnknownAction(other.to_string())),
        }
    }

    /// The name the application used for this action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddOrUpdate(_) => "addOrUpdate",
            Self::Remove(_) => "remove",
            Self::RemoveAll => "removeAll",
            Self::GetWatched => "getWatched",
            Self::Initialize => "initialize",
            Self::DeviceReady => "deviceReady",
        }
    }

    /// Whether this action may only run while location permission is held.
    pub fn requires_location_permission(&self) -> bool {
        matches!(self, Self::AddOrUpdate(_) | Self::Initialize)
    }
}

fn arg_array<'a>(name: &str, args: &'a Value) -> Result<&'a [Value]> {
    match args {
        Value::Array(items) => Ok(items.as_slice()),
        Value::Null => Ok(&[][..]),
        other => Err(FencepostError::InvalidArguments(format!(
            "{name}: expected an argument array, got {other}"
        ))),
    }
}

/// Resolves one caller's request exactly once.
///
/// Every method consumes the handle, so a second resolution does not compile.
#[derive(Debug)]
pub struct CompletionHandle {
    tx: oneshot::Sender<Result<Value>>,
}

impl CompletionHandle {
    pub fn channel() -> (Self, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn resolve(self, result: Result<Value>) {
        if self.tx.send(result).is_err() {
            debug!("caller went away before the action resolved");
        }
    }

    pub fn succeed(self, value: Value) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, error: FencepostError) {
        self.resolve(Err(error));
    }
}
