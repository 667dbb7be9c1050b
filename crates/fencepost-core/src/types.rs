// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Fencepost geofence service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{FencepostError, Result};
use crate::geo::GeoLocation;

/// Unique identifier for one executed plugin action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which boundary crossings a geofence reports.
///
/// Serialized as the integer codes the web layer uses (1, 2, 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TransitionType {
    #[default]
    Enter,
    Exit,
    Both,
}

impl TransitionType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Enter => 1,
            Self::Exit => 2,
            Self::Both => 3,
        }
    }
}

impl TryFrom<u8> for TransitionType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Enter),
            2 => Ok(Self::Exit),
            3 => Ok(Self::Both),
            other => Err(format!("invalid transitionType {other}")),
        }
    }
}

impl From<TransitionType> for u8 {
    fn from(value: TransitionType) -> Self {
        value.code()
    }
}

/// A watched geofence together with the payload handed back to the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoNotification {
    /// Unique key. Detail records arrive without one and get it stamped.
    #[serde(default)]
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Geofence radius in metres.
    pub radius: f64,
    #[serde(default)]
    pub transition_type: TransitionType,
    /// Opaque payload passed through to the consumer untouched.
    #[serde(default, alias = "notification", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Metres from the query center to the fence edge. Negative means the
    /// center is already inside the fence.
    #[serde(default)]
    pub distance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl GeoNotification {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius,
            transition_type: TransitionType::default(),
            data: None,
            distance: 0.0,
            url: None,
            group_id: None,
        }
    }

    /// Parse and validate a user-supplied definition.
    pub fn from_json(value: &Value) -> Result<Self> {
        let notification: Self = serde_json::from_value(value.clone())
            .map_err(|e| FencepostError::InvalidArguments(format!("geo notification: {e}")))?;
        notification.validate()?;
        Ok(notification)
    }

    /// Check the invariants every registered notification must hold.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(FencepostError::InvalidArguments(
                "geo notification id must not be empty".into(),
            ));
        }
        if !self.location().is_valid() {
            return Err(FencepostError::InvalidArguments(format!(
                "geo notification {}: coordinates ({}, {}) out of range",
                self.id, self.latitude, self.longitude
            )));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(FencepostError::InvalidArguments(format!(
                "geo notification {}: radius must be positive, got {}",
                self.id, self.radius
            )));
        }
        Ok(())
    }

    pub fn location(&self) -> GeoLocation {
        GeoLocation::new(self.latitude, self.longitude)
    }

    /// Metres from `center` to the edge of this fence.
    pub fn edge_distance_from(&self, center: &GeoLocation) -> f64 {
        center.distance_to(&self.location()) - self.radius
    }
}

/// Runtime permissions the service may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    CoarseLocation,
    FineLocation,
}

impl Permission {
    /// Platform permission name.
    pub fn platform_name(&self) -> &'static str {
        match self {
            Self::CoarseLocation => "android.permission.ACCESS_COARSE_LOCATION",
            Self::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

/// Permissions required before any location-dependent action runs.
pub const LOCATION_PERMISSIONS: [Permission; 2] =
    [Permission::CoarseLocation, Permission::FineLocation];

/// One event from a live spatial-index radius query.
#[derive(Debug, Clone, PartialEq)]
pub enum ProximityEvent {
    /// A tracked key moved into the query area.
    Entered { key: String, location: GeoLocation },
    /// A tracked key left the query area.
    Exited { key: String },
    /// A tracked key moved but stayed inside the query area.
    Moved { key: String, location: GeoLocation },
    /// Initial data has been loaded and all initial events fired.
    Ready,
    /// The query reported an error.
    Error(String),
}

/// Payload delivered to the consuming application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BridgeEvent {
    #[serde(rename_all = "camelCase")]
    TransitionReceived {
        notifications: Vec<GeoNotification>,
        received_at: DateTime<Utc>,
    },
    NotificationClicked { data: Value },
}

impl BridgeEvent {
    pub fn transition(notifications: Vec<GeoNotification>) -> Self {
        Self::TransitionReceived {
            notifications,
            received_at: Utc::now(),
        }
    }
}
