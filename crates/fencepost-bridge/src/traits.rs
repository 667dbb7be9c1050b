// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for the geofence collaborators.
//
// Everything with real I/O is async. Implementations must be `Send + Sync`
// because the engine shares them between its worker task, the proximity
// pipeline and permission callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use fencepost_core::error::Result;
use fencepost_core::{GeoLocation, GeoNotification, Permission, ProximityEvent};

/// Live events for one spatial-index query.
pub type ProximityStream = BoxStream<'static, ProximityEvent>;

/// Batches of notifications whose geofence boundary was crossed.
pub type TransitionStream = BoxStream<'static, Vec<GeoNotification>>;

/// Realtime geospatial index holding the keys of all known fences.
#[async_trait]
pub trait SpatialIndexClient: Send + Sync {
    /// Open a radius query around `center`.
    ///
    /// The stream yields `Entered` for every key already inside, then
    /// `Ready`, then live updates until it is dropped.
    async fn query_at_location(
        &self,
        center: GeoLocation,
        radius_km: f64,
    ) -> Result<ProximityStream>;
}

/// Backend holding the full notification record for each index key.
#[async_trait]
pub trait DetailStore: Send + Sync {
    /// Fetch the record stored under `key`.
    async fn fetch_detail(&self, key: &str) -> Result<GeoNotification>;
}

/// The operating system's geofence monitoring service.
#[async_trait]
pub trait GeofenceMonitor: Send + Sync {
    /// Start monitoring one fence. Re-arming an armed id replaces it.
    ///
    /// Fails with `GeofenceLimitExceeded` or `GeofenceServiceUnavailable`.
    async fn arm(&self, notification: &GeoNotification) -> Result<()>;

    /// Stop monitoring the given ids. Unknown ids are ignored.
    async fn disarm(&self, ids: &[String]) -> Result<()>;

    /// Stream of transition batches reported by the platform.
    fn transitions(&self) -> TransitionStream;
}

/// Runtime permission checks and prompts.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    fn has_permission(&self, permission: Permission) -> bool;

    /// Prompt for `permissions`. Resolves `true` only if all were granted.
    async fn request(&self, permissions: &[Permission]) -> Result<bool>;
}

/// Source of the device's last known position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn last_location(&self) -> Result<Option<GeoLocation>>;
}

/// What the app was launched with.
pub trait LaunchContext: Send + Sync {
    /// Payload of the notification the user tapped to launch the app.
    /// Returns `Some` at most once.
    fn take_clicked_notification(&self) -> Option<Value>;
}

/// Delivery channel into the consuming application (a web view on mobile).
pub trait ApplicationBridge: Send + Sync {
    /// Hand a serialized event to the application. No acknowledgment.
    fn deliver(&self, payload: &str) -> Result<()>;
}

/// All platform collaborators the engine needs, bound at startup.
#[derive(Clone)]
pub struct Platform {
    /// Human-readable platform name (e.g. "Android 14", "Desktop (memory)").
    pub name: String,
    pub spatial_index: Arc<dyn SpatialIndexClient>,
    pub details: Arc<dyn DetailStore>,
    pub monitor: Arc<dyn GeofenceMonitor>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub location: Arc<dyn LocationProvider>,
    pub launch: Arc<dyn LaunchContext>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").field("name", &self.name).finish_non_exhaustive()
    }
}
