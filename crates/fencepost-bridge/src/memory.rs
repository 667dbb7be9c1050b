// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process collaborators for desktop/CI builds where no mobile location
// stack exists.
//
// Each type keeps its state behind a mutex and exposes helpers to drive it
// (move a key, fire a transition, answer a permission prompt) so the desktop
// host and tests can exercise the engine end to end.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use fencepost_core::error::{FencepostError, Result};
use fencepost_core::{GeoLocation, GeoNotification, Permission, ProximityEvent};

use crate::traits::*;

/// Android caps an app at 100 registered geofences.
pub const DEFAULT_MONITOR_LIMIT: usize = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

// ---------------------------------------------------------------------------
// Spatial index
// ---------------------------------------------------------------------------

struct LiveQuery {
    center: GeoLocation,
    radius_m: f64,
    inside: HashSet<String>,
    tx: mpsc::UnboundedSender<ProximityEvent>,
}

impl LiveQuery {
    fn contains(&self, location: &GeoLocation) -> bool {
        self.center.distance_to(location) <= self.radius_m
    }
}

#[derive(Default)]
struct IndexState {
    points: HashMap<String, GeoLocation>,
    queries: Vec<LiveQuery>,
}

/// Spatial index over a key → location map with live radius queries.
#[derive(Default)]
pub struct MemorySpatialIndex {
    state: Mutex<IndexState>,
}

impl MemorySpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move a key, notifying every live query it affects.
    pub fn set_location(&self, key: &str, location: GeoLocation) {
        let mut state = lock(&self.state);
        state.points.insert(key.to_string(), location);
        state.queries.retain_mut(|query| {
            let was_inside = query.inside.contains(key);
            let now_inside = query.contains(&location);
            let event = match (was_inside, now_inside) {
                (false, true) => {
                    query.inside.insert(key.to_string());
                    ProximityEvent::Entered { key: key.to_string(), location }
                }
                (true, true) => ProximityEvent::Moved { key: key.to_string(), location },
                (true, false) => {
                    query.inside.remove(key);
                    ProximityEvent::Exited { key: key.to_string() }
                }
                (false, false) => return true,
            };
            query.tx.send(event).is_ok()
        });
    }

    /// Remove a key, reporting `Exited` to queries that contained it.
    pub fn remove(&self, key: &str) {
        let mut state = lock(&self.state);
        state.points.remove(key);
        state.queries.retain_mut(|query| {
            if !query.inside.remove(key) {
                return true;
            }
            query.tx.send(ProximityEvent::Exited { key: key.to_string() }).is_ok()
        });
    }

    /// Push an error event into every live query.
    pub fn fail_queries(&self, message: &str) {
        let mut state = lock(&self.state);
        state
            .queries
            .retain(|query| query.tx.send(ProximityEvent::Error(message.to_string())).is_ok());
    }

    /// Number of queries whose stream is still held by someone.
    pub fn live_queries(&self) -> usize {
        let mut state = lock(&self.state);
        state.queries.retain(|query| !query.tx.is_closed());
        state.queries.len()
    }
}

#[async_trait]
impl SpatialIndexClient for MemorySpatialIndex {
    async fn query_at_location(
        &self,
        center: GeoLocation,
        radius_km: f64,
    ) -> Result<ProximityStream> {
        if !center.is_valid() || !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(FencepostError::InvalidArguments(format!(
                "query at ({}, {}) radius {radius_km} km",
                center.latitude, center.longitude
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut query = LiveQuery {
            center,
            radius_m: radius_km * 1000.0,
            inside: HashSet::new(),
            tx,
        };

        let mut state = lock(&self.state);
        let mut initial: Vec<(&String, &GeoLocation)> = state
            .points
            .iter()
            .filter(|(_, location)| query.contains(location))
            .collect();
        initial.sort_by(|a, b| a.0.cmp(b.0));

        for (key, location) in initial {
            query.inside.insert(key.clone());
            let _ = query.tx.send(ProximityEvent::Entered {
                key: key.clone(),
                location: *location,
            });
        }
        let _ = query.tx.send(ProximityEvent::Ready);

        debug!(inside = query.inside.len(), radius_km, "memory spatial query opened");
        state.queries.push(query);
        Ok(receiver_stream(rx))
    }
}

// ---------------------------------------------------------------------------
// Detail store
// ---------------------------------------------------------------------------

/// Key → notification record map.
#[derive(Default)]
pub struct MemoryDetailStore {
    records: Mutex<HashMap<String, GeoNotification>>,
}

impl MemoryDetailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, record: GeoNotification) {
        lock(&self.records).insert(key.to_string(), record);
    }

    pub fn remove(&self, key: &str) {
        lock(&self.records).remove(key);
    }
}

#[async_trait]
impl DetailStore for MemoryDetailStore {
    async fn fetch_detail(&self, key: &str) -> Result<GeoNotification> {
        lock(&self.records)
            .get(key)
            .cloned()
            .ok_or_else(|| FencepostError::DetailFetch {
                key: key.to_string(),
                reason: "no such record".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// Geofence monitor
// ---------------------------------------------------------------------------

/// Geofence monitor that records armed fences and lets callers fire
/// transitions by hand.
pub struct MemoryGeofenceMonitor {
    armed: Mutex<Vec<GeoNotification>>,
    limit: usize,
    available: AtomicBool,
    arm_calls: AtomicUsize,
    tx: mpsc::UnboundedSender<Vec<GeoNotification>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<GeoNotification>>>>,
}

impl Default for MemoryGeofenceMonitor {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MONITOR_LIMIT)
    }
}

impl MemoryGeofenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            armed: Mutex::new(Vec::new()),
            limit,
            available: AtomicBool::new(true),
            arm_calls: AtomicUsize::new(0),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Simulate location services being switched off or on.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Ids currently armed, in arming order.
    pub fn armed_ids(&self) -> Vec<String> {
        lock(&self.armed).iter().map(|n| n.id.clone()).collect()
    }

    /// Armed notifications, in arming order.
    pub fn armed(&self) -> Vec<GeoNotification> {
        lock(&self.armed).clone()
    }

    /// Total number of `arm` calls, successful or not.
    pub fn arm_calls(&self) -> usize {
        self.arm_calls.load(Ordering::SeqCst)
    }

    /// Report a transition for the armed fences among `ids`.
    ///
    /// Returns how many notifications were included in the batch.
    pub fn fire_transition(&self, ids: &[&str]) -> usize {
        let batch: Vec<GeoNotification> = {
            let armed = lock(&self.armed);
            ids.iter()
                .filter_map(|id| armed.iter().find(|n| n.id == *id).cloned())
                .collect()
        };
        let count = batch.len();
        if count > 0 && self.tx.send(batch).is_err() {
            warn!("transition stream dropped, batch discarded");
        }
        count
    }
}

#[async_trait]
impl GeofenceMonitor for MemoryGeofenceMonitor {
    async fn arm(&self, notification: &GeoNotification) -> Result<()> {
        self.arm_calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(FencepostError::GeofenceServiceUnavailable(
                "location services disabled".into(),
            ));
        }

        let mut armed = lock(&self.armed);
        if let Some(existing) = armed.iter_mut().find(|n| n.id == notification.id) {
            *existing = notification.clone();
            return Ok(());
        }
        if armed.len() >= self.limit {
            return Err(FencepostError::GeofenceLimitExceeded { limit: self.limit });
        }
        armed.push(notification.clone());
        Ok(())
    }

    async fn disarm(&self, ids: &[String]) -> Result<()> {
        lock(&self.armed).retain(|n| !ids.contains(&n.id));
        Ok(())
    }

    fn transitions(&self) -> TransitionStream {
        match lock(&self.rx).take() {
            Some(rx) => receiver_stream(rx),
            None => {
                warn!("transition stream already taken, returning an empty stream");
                stream::empty().boxed()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Permission provider whose prompts are answered by the caller.
pub struct MemoryPermissions {
    granted: Mutex<HashSet<Permission>>,
    answer: watch::Sender<Option<bool>>,
    requests: AtomicUsize,
}

impl MemoryPermissions {
    /// Everything granted up front.
    pub fn granted() -> Self {
        let permissions = Self::prompting();
        lock(&permissions.granted).extend(fencepost_core::LOCATION_PERMISSIONS);
        permissions
    }

    /// Nothing granted; prompts stay open until [`answer`](Self::answer).
    pub fn prompting() -> Self {
        let (answer, _) = watch::channel(None);
        Self {
            granted: Mutex::new(HashSet::new()),
            answer,
            requests: AtomicUsize::new(0),
        }
    }

    /// Nothing granted; every prompt resolves immediately with `decision`.
    pub fn auto_answer(decision: bool) -> Self {
        let permissions = Self::prompting();
        permissions.answer.send_replace(Some(decision));
        permissions
    }

    /// Resolve open and future prompts with `granted`.
    pub fn answer(&self, granted: bool) {
        self.answer.send_replace(Some(granted));
    }

    /// Number of prompts issued so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionProvider for MemoryPermissions {
    fn has_permission(&self, permission: Permission) -> bool {
        lock(&self.granted).contains(&permission)
    }

    async fn request(&self, permissions: &[Permission]) -> Result<bool> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.answer.subscribe();
        let decision = loop {
            if let Some(decision) = *rx.borrow_and_update() {
                break decision;
            }
            rx.changed()
                .await
                .map_err(|_| FencepostError::Bridge("permission prompt closed".into()))?;
        };

        if decision {
            lock(&self.granted).extend(permissions.iter().copied());
        }
        Ok(decision)
    }
}

// ---------------------------------------------------------------------------
// Location, launch context, application bridge
// ---------------------------------------------------------------------------

/// Fixed, settable last-known location.
#[derive(Default)]
pub struct MemoryLocation {
    location: Mutex<Option<GeoLocation>>,
}

impl MemoryLocation {
    pub fn new(location: Option<GeoLocation>) -> Self {
        Self {
            location: Mutex::new(location),
        }
    }

    pub fn set(&self, location: Option<GeoLocation>) {
        *lock(&self.location) = location;
    }
}

#[async_trait]
impl LocationProvider for MemoryLocation {
    async fn last_location(&self) -> Result<Option<GeoLocation>> {
        Ok(*lock(&self.location))
    }
}

/// Launch context carrying an optional tapped-notification payload.
#[derive(Default)]
pub struct MemoryLaunchContext {
    clicked: Mutex<Option<Value>>,
}

impl MemoryLaunchContext {
    pub fn new(clicked: Option<Value>) -> Self {
        Self {
            clicked: Mutex::new(clicked),
        }
    }
}

impl LaunchContext for MemoryLaunchContext {
    fn take_clicked_notification(&self) -> Option<Value> {
        lock(&self.clicked).take()
    }
}

/// Application bridge that records every payload it receives.
pub struct RecordingBridge {
    payloads: Mutex<Vec<String>>,
    available: AtomicBool,
}

impl Default for RecordingBridge {
    fn default() -> Self {
        Self {
            payloads: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the web view going away.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn payloads(&self) -> Vec<String> {
        lock(&self.payloads).clone()
    }
}

impl ApplicationBridge for RecordingBridge {
    fn deliver(&self, payload: &str) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(FencepostError::Bridge("web view unavailable".into()));
        }
        lock(&self.payloads).push(payload.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Concrete handles to every in-memory collaborator.
pub struct MemoryPlatform {
    pub spatial_index: Arc<MemorySpatialIndex>,
    pub details: Arc<MemoryDetailStore>,
    pub monitor: Arc<MemoryGeofenceMonitor>,
    pub permissions: Arc<MemoryPermissions>,
    pub location: Arc<MemoryLocation>,
    pub launch: Arc<MemoryLaunchContext>,
}

impl MemoryPlatform {
    /// Permissions granted, no location fix, nothing clicked.
    pub fn new() -> Self {
        Self::with_permissions(MemoryPermissions::granted())
    }

    pub fn with_permissions(permissions: MemoryPermissions) -> Self {
        Self {
            spatial_index: Arc::new(MemorySpatialIndex::new()),
            details: Arc::new(MemoryDetailStore::new()),
            monitor: Arc::new(MemoryGeofenceMonitor::new()),
            permissions: Arc::new(permissions),
            location: Arc::new(MemoryLocation::default()),
            launch: Arc::new(MemoryLaunchContext::default()),
        }
    }

    /// Type-erased view handed to the engine.
    pub fn platform(&self) -> Platform {
        Platform {
            name: "Desktop (memory)".into(),
            spatial_index: self.spatial_index.clone(),
            details: self.details.clone(),
            monitor: self.monitor.clone(),
            permissions: self.permissions.clone(),
            location: self.location.clone(),
            launch: self.launch.clone(),
        }
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(event: &ProximityEvent) -> Option<&str> {
        match event {
            ProximityEvent::Entered { key, .. }
            | ProximityEvent::Exited { key }
            | ProximityEvent::Moved { key, .. } => Some(key),
            _ => None,
        }
    }

    #[tokio::test]
    async fn query_reports_initial_keys_then_ready() {
        let index = MemorySpatialIndex::new();
        index.set_location("near", GeoLocation::new(0.0, 0.001));
        index.set_location("far", GeoLocation::new(10.0, 10.0));

        let mut events = index
            .query_at_location(GeoLocation::new(0.0, 0.0), 1.0)
            .await
            .expect("query");

        let first = events.next().await.expect("entered");
        assert_eq!(key_of(&first), Some("near"));
        assert!(matches!(first, ProximityEvent::Entered { .. }));
        assert_eq!(events.next().await, Some(ProximityEvent::Ready));
    }

    #[tokio::test]
    async fn live_updates_follow_the_key() {
        let index = MemorySpatialIndex::new();
        let mut events = index
            .query_at_location(GeoLocation::new(0.0, 0.0), 1.0)
            .await
            .expect("query");
        assert_eq!(events.next().await, Some(ProximityEvent::Ready));

        index.set_location("k", GeoLocation::new(0.0, 0.001));
        index.set_location("k", GeoLocation::new(0.0, 0.002));
        index.set_location("k", GeoLocation::new(5.0, 5.0));

        assert!(matches!(events.next().await, Some(ProximityEvent::Entered { .. })));
        assert!(matches!(events.next().await, Some(ProximityEvent::Moved { .. })));
        assert_eq!(
            events.next().await,
            Some(ProximityEvent::Exited { key: "k".into() })
        );
    }

    #[tokio::test]
    async fn dropped_queries_are_pruned() {
        let index = MemorySpatialIndex::new();
        let events = index
            .query_at_location(GeoLocation::new(0.0, 0.0), 1.0)
            .await
            .expect("query");
        assert_eq!(index.live_queries(), 1);
        drop(events);
        assert_eq!(index.live_queries(), 0);
    }

    #[tokio::test]
    async fn monitor_enforces_limit_but_allows_rearm() {
        let monitor = MemoryGeofenceMonitor::with_limit(1);
        let a = GeoNotification::new("a", 1.0, 1.0, 10.0);
        let b = GeoNotification::new("b", 1.0, 1.0, 10.0);

        monitor.arm(&a).await.expect("arm a");
        monitor.arm(&a).await.expect("re-arm a");
        let err = monitor.arm(&b).await.unwrap_err();
        assert!(matches!(err, FencepostError::GeofenceLimitExceeded { limit: 1 }));
        assert_eq!(monitor.armed_ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_monitor_refuses_to_arm() {
        let monitor = MemoryGeofenceMonitor::new();
        monitor.set_available(false);
        let err = monitor
            .arm(&GeoNotification::new("a", 1.0, 1.0, 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, FencepostError::GeofenceServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn fired_transitions_reach_the_stream() {
        let monitor = MemoryGeofenceMonitor::new();
        monitor
            .arm(&GeoNotification::new("a", 1.0, 1.0, 10.0))
            .await
            .expect("arm");
        let mut transitions = monitor.transitions();

        assert_eq!(monitor.fire_transition(&["a", "unknown"]), 1);
        let batch = transitions.next().await.expect("batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "a");
    }

    #[tokio::test]
    async fn prompt_waits_for_answer() {
        let permissions = Arc::new(MemoryPermissions::prompting());
        assert!(!permissions.has_permission(Permission::FineLocation));

        let pending = {
            let permissions = Arc::clone(&permissions);
            tokio::spawn(async move {
                permissions
                    .request(&fencepost_core::LOCATION_PERMISSIONS)
                    .await
            })
        };
        tokio::task::yield_now().await;
        permissions.answer(true);

        assert!(pending.await.expect("join").expect("request"));
        assert!(permissions.has_permission(Permission::FineLocation));
        assert_eq!(permissions.requests(), 1);
    }

    #[test]
    fn launch_payload_is_taken_once() {
        let launch = MemoryLaunchContext::new(Some(serde_json::json!({ "id": 1 })));
        assert!(launch.take_clicked_notification().is_some());
        assert!(launch.take_clicked_notification().is_none());
    }
}
