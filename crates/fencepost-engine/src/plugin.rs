// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Geofence plugin: the service object the application talks to.
//
// Actions are queued onto a single worker task and run in submission order.
// Callers await a oneshot completion.  Actions that need location permission
// are parked in the permission gate while the prompt is open, then re-queued
// on grant.  Alongside the worker, the plugin runs the transition pump and
// (once permission and a location fix exist) one proximity selector.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use fencepost_bridge::traits::{ApplicationBridge, Platform};
use fencepost_core::error::{FencepostError, Result};
use fencepost_core::{ActionId, AppConfig, GeoNotification, LOCATION_PERMISSIONS};
use fencepost_registry::{GeofenceRegistry, RegistrationStore};

use crate::action::{Action, CompletionHandle};
use crate::dispatcher::TransitionDispatcher;
use crate::permission::{GateStatus, PendingAction, PermissionGate};
use crate::proximity::{ProximitySelector, SelectorConfig};

struct Job {
    id: ActionId,
    action: Action,
    handle: CompletionHandle,
    /// Set when re-queued after a grant; the action runs without re-checking.
    permission_checked: bool,
}

struct ProximityHandle {
    selector: Arc<ProximitySelector>,
    cancel: CancellationToken,
}

struct PluginInner {
    config: AppConfig,
    platform: Platform,
    registry: Arc<GeofenceRegistry>,
    gate: PermissionGate,
    dispatcher: Arc<TransitionDispatcher>,
    /// Tapped-notification payload captured at launch, delivered once.
    launch_payload: Mutex<Option<Value>>,
    proximity: tokio::sync::Mutex<Option<ProximityHandle>>,
    jobs: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
}

/// The geofence service bound to one platform.
pub struct GeofencePlugin {
    inner: Arc<PluginInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GeofencePlugin {
    /// Wire the service to `platform` and start its background tasks.
    ///
    /// Proximity selection starts right away if location permission is
    /// already held.
    pub async fn start(config: AppConfig, platform: Platform, store: RegistrationStore) -> Self {
        info!(platform = %platform.name, "starting geofence plugin");

        let registry = Arc::new(GeofenceRegistry::new(store, platform.monitor.clone()));
        let dispatcher = Arc::new(TransitionDispatcher::new());
        let cancel = CancellationToken::new();
        let (jobs, rx) = mpsc::unbounded_channel();

        tokio::spawn(Arc::clone(&dispatcher).pump(platform.monitor.transitions(), cancel.child_token()));

        let launch_payload = platform.launch.take_clicked_notification();
        if launch_payload.is_some() {
            debug!("launched from a notification tap");
        }

        let inner = Arc::new(PluginInner {
            config,
            platform,
            registry,
            gate: PermissionGate::new(),
            dispatcher,
            launch_payload: Mutex::new(launch_payload),
            proximity: tokio::sync::Mutex::new(None),
            jobs,
            cancel,
        });

        let worker = tokio::spawn(worker(Arc::clone(&inner), rx));

        if inner.has_location_permission() {
            inner.ensure_proximity().await;
        }

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Parse and run an action by name, the way the application calls in.
    pub async fn execute(&self, name: &str, args: &Value) -> Result<Value> {
        let action = Action::parse(name, args)?;
        self.submit(action).await
    }

    /// Queue a typed action and wait for its result.
    pub async fn submit(&self, action: Action) -> Result<Value> {
        let (handle, rx) = CompletionHandle::channel();
        let id = ActionId::new();
        debug!(action_id = %id, action = action.name(), "action queued");
        self.inner.enqueue(Job {
            id,
            action,
            handle,
            permission_checked: false,
        });
        rx.await
            .map_err(|_| FencepostError::Bridge("action dropped before completion".into()))?
    }

    pub fn bind_bridge(&self, bridge: Arc<dyn ApplicationBridge>) {
        self.inner.dispatcher.bind(bridge);
    }

    pub fn unbind_bridge(&self) -> bool {
        self.inner.dispatcher.unbind()
    }

    pub fn permission_status(&self) -> GateStatus {
        self.inner.gate.status()
    }

    pub fn platform_name(&self) -> &str {
        &self.inner.platform.name
    }

    /// Restart proximity selection around the current location fix.
    ///
    /// Returns whether a selector is running afterwards.
    pub async fn refresh_proximity(&self) -> bool {
        if !self.inner.has_location_permission() {
            info!("location permission not held, proximity refresh skipped");
            return false;
        }
        let mut slot = self.inner.proximity.lock().await;
        self.inner.start_proximity(&mut slot).await
    }

    /// Candidates seen by the running selector, if any.
    pub async fn proximity_candidates(&self) -> Vec<GeoNotification> {
        let selector = match self.inner.proximity.lock().await.as_ref() {
            Some(handle) => Arc::clone(&handle.selector),
            None => return Vec::new(),
        };
        selector.candidates().await
    }

    /// Watched geofences in storage order.
    pub async fn watched(&self) -> Result<Vec<GeoNotification>> {
        self.inner.registry.watched().await
    }

    /// Stop every background task.  Queued and parked actions fail.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "action worker ended abnormally");
            }
        }
        info!("geofence plugin stopped");
    }
}

async fn worker(inner: Arc<PluginInner>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    loop {
        let job = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        Arc::clone(&inner).run(job).await;
    }

    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        job.handle.fail(FencepostError::Bridge("plugin shut down".into()));
    }
    inner.gate.abandon(FencepostError::Bridge("plugin shut down".into()));
    debug!("action worker stopped");
}

impl PluginInner {
    fn enqueue(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            job.handle.fail(FencepostError::Bridge("plugin shut down".into()));
        }
    }

    fn has_location_permission(&self) -> bool {
        LOCATION_PERMISSIONS
            .iter()
            .all(|p| self.platform.permissions.has_permission(*p))
    }

    #[instrument(skip_all, fields(action_id = %job.id, action = job.action.name()))]
    async fn run(self: Arc<Self>, job: Job) {
        let Job {
            id,
            action,
            handle,
            permission_checked,
        } = job;

        if action.requires_location_permission()
            && !permission_checked
            && !self.has_location_permission()
        {
            if self.gate.park(PendingAction { id, action, handle }) {
                self.request_permission();
            }
            return;
        }

        let result = self.perform(action).await;
        match &result {
            Ok(_) => debug!("action completed"),
            Err(e) => warn!(error = %e, "action failed"),
        }
        handle.resolve(result);
    }

    fn request_permission(self: Arc<Self>) {
        tokio::spawn(async move {
            let answer = tokio::select! {
                _ = self.cancel.cancelled() => return,
                answer = self.platform.permissions.request(&LOCATION_PERMISSIONS) => answer,
            };
            let granted = answer.unwrap_or_else(|e| {
                warn!(error = %e, "permission request failed, treating as denied");
                false
            });

            if let Some(pending) = self.gate.resolve(granted) {
                self.enqueue(Job {
                    id: pending.id,
                    action: pending.action,
                    handle: pending.handle,
                    permission_checked: true,
                });
            }
            if granted {
                self.ensure_proximity().await;
            }
        });
    }

    async fn perform(&self, action: Action) -> Result<Value> {
        match action {
            Action::AddOrUpdate(notifications) => {
                self.registry.add_or_update(&notifications).await?;
                Ok(Value::Null)
            }
            Action::Remove(ids) => {
                self.registry.remove(&ids).await?;
                Ok(Value::Null)
            }
            Action::RemoveAll => {
                self.registry.remove_all().await?;
                Ok(Value::Null)
            }
            Action::GetWatched => Ok(serde_json::to_value(self.registry.watched().await?)?),
            Action::Initialize => {
                self.ensure_proximity().await;
                Ok(Value::Null)
            }
            Action::DeviceReady => {
                let payload = self
                    .launch_payload
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                if let Some(data) = payload {
                    self.dispatcher.dispatch_notification_click(data);
                }
                Ok(Value::Null)
            }
        }
    }

    /// Start proximity selection unless a selector is already running.
    async fn ensure_proximity(&self) -> bool {
        let mut slot = self.proximity.lock().await;
        if slot.as_ref().is_some_and(|h| !h.cancel.is_cancelled()) {
            return true;
        }
        self.start_proximity(&mut slot).await
    }

    async fn start_proximity(&self, slot: &mut Option<ProximityHandle>) -> bool {
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
        }

        let center = match self.platform.location.last_location().await {
            Ok(Some(center)) => center,
            Ok(None) => {
                info!("no location fix yet, proximity selection skipped");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "failed to read last location");
                return false;
            }
        };

        let events = match self
            .platform
            .spatial_index
            .query_at_location(center, self.config.query_radius_km)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "spatial index query failed");
                return false;
            }
        };

        let selector = Arc::new(ProximitySelector::new(
            SelectorConfig::from(&self.config),
            center,
            self.platform.details.clone(),
            self.registry.clone(),
        ));
        let cancel = self.cancel.child_token();
        tokio::spawn(Arc::clone(&selector).run(events, cancel.clone()));
        *slot = Some(ProximityHandle { selector, cancel });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fencepost_bridge::memory::{
        MemoryLaunchContext, MemoryPermissions, MemoryPlatform, RecordingBridge,
    };
    use fencepost_core::{BridgeEvent, ErrorCode, GeoLocation};
    use serde_json::json;

    async fn start(memory: &MemoryPlatform) -> GeofencePlugin {
        let store = RegistrationStore::open_in_memory().expect("open in-memory db");
        GeofencePlugin::start(AppConfig::default(), memory.platform(), store).await
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn fence(id: &str, radius: f64) -> Value {
        json!({ "id": id, "latitude": 52.0, "longitude": 4.0, "radius": radius })
    }

    #[tokio::test]
    async fn adding_twice_keeps_latest_definition() {
        let memory = MemoryPlatform::new();
        let plugin = start(&memory).await;

        plugin.execute("addOrUpdate", &json!([fence("A", 50.0)])).await.expect("first");
        plugin.execute("addOrUpdate", &json!([fence("A", 80.0)])).await.expect("second");

        let watched = plugin.execute("getWatched", &Value::Null).await.expect("getWatched");
        let list = watched.as_array().expect("array");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], "A");
        assert_eq!(list[0]["radius"], 80.0);
    }

    #[tokio::test]
    async fn removing_unknown_id_changes_nothing() {
        let memory = MemoryPlatform::new();
        let plugin = start(&memory).await;
        plugin.execute("addOrUpdate", &json!([fence("A", 50.0)])).await.expect("add");

        plugin.execute("remove", &json!(["nope"])).await.expect("remove");
        assert_eq!(plugin.watched().await.expect("watched").len(), 1);
        assert_eq!(memory.monitor.armed_ids(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn remove_all_empties_the_set() {
        let memory = MemoryPlatform::new();
        let plugin = start(&memory).await;
        plugin
            .execute("addOrUpdate", &json!([fence("A", 50.0), fence("B", 20.0)]))
            .await
            .expect("add");

        plugin.execute("removeAll", &Value::Null).await.expect("removeAll");
        assert!(plugin.watched().await.expect("watched").is_empty());
        assert!(memory.monitor.armed_ids().is_empty());
    }

    #[tokio::test]
    async fn denied_permission_fails_without_arming() {
        let memory = MemoryPlatform::with_permissions(MemoryPermissions::auto_answer(false));
        let plugin = start(&memory).await;

        let err = plugin
            .execute("addOrUpdate", &json!([fence("A", 50.0)]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(memory.monitor.arm_calls(), 0);
        assert_eq!(plugin.permission_status(), GateStatus::Idle);
    }

    #[tokio::test]
    async fn granted_permission_runs_the_parked_action() {
        let memory = MemoryPlatform::with_permissions(MemoryPermissions::prompting());
        let plugin = Arc::new(start(&memory).await);

        let pending = {
            let plugin = Arc::clone(&plugin);
            tokio::spawn(async move { plugin.execute("addOrUpdate", &json!([fence("A", 50.0)])).await })
        };
        assert!(eventually(|| memory.permissions.requests() == 1).await);
        memory.permissions.answer(true);

        pending.await.expect("join").expect("addOrUpdate");
        assert_eq!(memory.monitor.armed_ids(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn second_parked_action_supersedes_first() {
        let memory = MemoryPlatform::with_permissions(MemoryPermissions::prompting());
        let plugin = Arc::new(start(&memory).await);

        let first = {
            let plugin = Arc::clone(&plugin);
            tokio::spawn(async move { plugin.execute("initialize", &Value::Null).await })
        };
        assert!(eventually(|| plugin.permission_status() == GateStatus::AwaitingPermission).await);

        let second = {
            let plugin = Arc::clone(&plugin);
            tokio::spawn(async move { plugin.execute("addOrUpdate", &json!([fence("B", 20.0)])).await })
        };

        let err = first.await.expect("join").unwrap_err();
        assert!(matches!(err, FencepostError::Superseded));
        assert_eq!(err.code(), ErrorCode::Unknown);

        memory.permissions.answer(true);
        second.await.expect("join").expect("addOrUpdate");
        assert_eq!(memory.permissions.requests(), 1);
        assert_eq!(memory.monitor.armed_ids(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn actions_without_permission_needs_run_immediately() {
        let memory = MemoryPlatform::with_permissions(MemoryPermissions::prompting());
        let plugin = start(&memory).await;

        let watched = plugin.execute("getWatched", &json!([])).await.expect("getWatched");
        assert_eq!(watched, json!([]));
        assert_eq!(memory.permissions.requests(), 0);
    }

    #[tokio::test]
    async fn device_ready_delivers_launch_payload_once() {
        let mut memory = MemoryPlatform::new();
        memory.launch = Arc::new(MemoryLaunchContext::new(Some(json!({ "title": "Dock 4" }))));
        let plugin = start(&memory).await;
        let bridge = Arc::new(RecordingBridge::new());
        plugin.bind_bridge(bridge.clone());

        plugin.execute("deviceReady", &Value::Null).await.expect("first");
        plugin.execute("deviceReady", &Value::Null).await.expect("second");

        let payloads = bridge.payloads();
        assert_eq!(payloads.len(), 1);
        let event: BridgeEvent = serde_json::from_str(&payloads[0]).expect("event");
        assert_eq!(
            event,
            BridgeEvent::NotificationClicked {
                data: json!({ "title": "Dock 4" })
            }
        );
    }

    #[tokio::test]
    async fn transitions_reach_the_bound_bridge() {
        let memory = MemoryPlatform::new();
        let plugin = start(&memory).await;
        let bridge = Arc::new(RecordingBridge::new());
        plugin.bind_bridge(bridge.clone());
        plugin.execute("addOrUpdate", &json!([fence("A", 50.0)])).await.expect("add");

        assert_eq!(memory.monitor.fire_transition(&["A"]), 1);
        assert!(eventually(|| bridge.payloads().len() == 1).await);

        let raw: Value = serde_json::from_str(&bridge.payloads()[0]).expect("json");
        assert_eq!(raw["event"], "transitionReceived");
        assert_eq!(raw["notifications"][0]["id"], "A");
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_before_queueing() {
        let memory = MemoryPlatform::new();
        let plugin = start(&memory).await;
        let err = plugin.execute("snooze", &Value::Null).await.unwrap_err();
        assert!(matches!(err, FencepostError::UnknownAction(_)));
    }

    #[tokio::test]
    async fn proximity_keeps_nearest_three_armed() {
        let memory = MemoryPlatform::new();
        memory.location.set(Some(GeoLocation::new(0.0, 0.0)));
        for (key, offset) in [("a", 0.005), ("b", 0.001), ("c", 0.003), ("d", 0.002)] {
            memory
                .details
                .insert(key, GeoNotification::new(key, 0.0, offset, 10.0));
            memory.spatial_index.set_location(key, GeoLocation::new(0.0, offset));
        }

        let plugin = start(&memory).await;
        let settled = eventually(|| {
            let mut armed = memory.monitor.armed_ids();
            armed.sort();
            armed == ["b", "c", "d"]
        })
        .await;
        assert!(settled, "armed: {:?}", memory.monitor.armed_ids());
        assert_eq!(plugin.proximity_candidates().await.len(), 4);
    }

    #[tokio::test]
    async fn no_location_fix_skips_proximity() {
        let memory = MemoryPlatform::new();
        let plugin = start(&memory).await;
        assert!(!plugin.refresh_proximity().await);
        assert!(plugin.proximity_candidates().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_parked_action() {
        let memory = MemoryPlatform::with_permissions(MemoryPermissions::prompting());
        let plugin = Arc::new(start(&memory).await);

        let pending = {
            let plugin = Arc::clone(&plugin);
            tokio::spawn(async move { plugin.execute("initialize", &Value::Null).await })
        };
        assert!(eventually(|| plugin.permission_status() == GateStatus::AwaitingPermission).await);

        plugin.shutdown().await;
        assert!(pending.await.expect("join").is_err());
        assert!(plugin.execute("getWatched", &Value::Null).await.is_err());
    }
}
