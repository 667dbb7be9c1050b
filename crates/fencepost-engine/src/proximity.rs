// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Proximity selector: keeps the nearest N fences around a fixed center
// armed on the platform monitor.
//
// One selector serves one spatial-index query.  Each `Entered` key is
// fetched on its own task; candidate mutation and the registry update that
// follows run under a single async lock so selections never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use fencepost_bridge::traits::{DetailStore, ProximityStream};
use fencepost_core::error::{FencepostError, Result};
use fencepost_core::{AppConfig, GeoLocation, GeoNotification, ProximityEvent};
use fencepost_registry::GeofenceRegistry;

use crate::selection::{CandidateList, select_nearest};

/// Tunables for one selector.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    pub max_watched: usize,
    pub fetch_timeout: Duration,
    pub details_url_base: Option<String>,
}

impl From<&AppConfig> for SelectorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_watched: config.max_watched,
            fetch_timeout: config.detail_fetch_timeout(),
            details_url_base: config.details_url_base.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct SelectionState {
    candidates: CandidateList,
    /// Ids this selector last registered, in selection order.
    registered: Vec<String>,
    /// Keys whose detail fetch has not landed yet, mapped to the ticket of
    /// the newest fetch. Older fetches for the same key are discarded.
    in_flight: HashMap<String, u64>,
    next_ticket: u64,
}

impl SelectionState {
    fn begin_fetch(&mut self, key: &str) -> u64 {
        self.next_ticket += 1;
        self.in_flight.insert(key.to_string(), self.next_ticket);
        self.next_ticket
    }

    /// Whether `ticket` is still the live fetch for `key`; clears it if so.
    fn finish_fetch(&mut self, key: &str, ticket: u64) -> bool {
        if self.in_flight.get(key) != Some(&ticket) {
            return false;
        }
        self.in_flight.remove(key);
        true
    }
}

/// Narrows spatial-index candidates to the closest `max_watched`.
pub struct ProximitySelector {
    config: SelectorConfig,
    center: GeoLocation,
    details: Arc<dyn DetailStore>,
    registry: Arc<GeofenceRegistry>,
    state: Mutex<SelectionState>,
}

impl ProximitySelector {
    pub fn new(
        config: SelectorConfig,
        center: GeoLocation,
        details: Arc<dyn DetailStore>,
        registry: Arc<GeofenceRegistry>,
    ) -> Self {
        Self {
            config,
            center,
            details,
            registry,
            state: Mutex::new(SelectionState::default()),
        }
    }

    pub fn center(&self) -> GeoLocation {
        self.center
    }

    /// Current candidates in arrival order.
    pub async fn candidates(&self) -> Vec<GeoNotification> {
        self.state.lock().await.candidates.as_slice().to_vec()
    }

    /// Ids registered by the last selection, nearest first.
    pub async fn registered(&self) -> Vec<String> {
        self.state.lock().await.registered.clone()
    }

    /// Consume `events` until the stream ends or `cancel` fires.
    ///
    /// Cancelling also abandons detail fetches still in flight.
    pub async fn run(self: Arc<Self>, mut events: ProximityStream, cancel: CancellationToken) {
        info!(
            latitude = self.center.latitude,
            longitude = self.center.longitude,
            max_watched = self.config.max_watched,
            "proximity selector started"
        );

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                ProximityEvent::Entered { key, .. } => {
                    let ticket = self.state.lock().await.begin_fetch(&key);
                    let selector = Arc::clone(&self);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => debug!(%key, "detail fetch abandoned"),
                            result = selector.admit(&key, ticket) => {
                                if let Err(e) = result {
                                    warn!(%key, error = %e, "candidate dropped");
                                }
                            }
                        }
                    });
                }
                ProximityEvent::Exited { key } => {
                    if let Err(e) = self.on_exited(&key).await {
                        warn!(%key, error = %e, "failed to remove exited geofence");
                    }
                }
                ProximityEvent::Moved { key, location } => {
                    debug!(%key, latitude = location.latitude, longitude = location.longitude, "key moved");
                }
                ProximityEvent::Ready => info!("initial proximity results loaded"),
                ProximityEvent::Error(message) => warn!(%message, "spatial index query error"),
            }
        }

        info!("proximity selector stopped");
    }

    async fn fetch(&self, key: &str) -> Result<GeoNotification> {
        let timeout = self.config.fetch_timeout;
        tokio::time::timeout(timeout, self.details.fetch_detail(key))
            .await
            .map_err(|_| FencepostError::Timeout {
                operation: format!("detail fetch for {key}"),
                after: timeout,
            })?
    }

    fn stamp(&self, key: &str, mut notification: GeoNotification) -> Result<GeoNotification> {
        notification.id = key.to_string();
        notification.url = self
            .config
            .details_url_base
            .as_deref()
            .map(|base| format!("{}/{key}", base.trim_end_matches('/')));
        notification.group_id = None;
        notification.distance = notification.edge_distance_from(&self.center);
        notification.validate()?;
        Ok(notification)
    }

    #[instrument(skip(self), fields(center = ?self.center))]
    async fn admit(&self, key: &str, ticket: u64) -> Result<()> {
        let fetched = self.fetch(key).await;

        let mut state = self.state.lock().await;
        if !state.finish_fetch(key, ticket) {
            debug!("key left or re-entered before its details arrived");
            return Ok(());
        }

        let candidate = self.stamp(key, fetched?)?;
        debug!(distance = candidate.distance, "candidate admitted");
        state.candidates.upsert(candidate);
        self.register_selection(&mut state).await;
        Ok(())
    }

    async fn on_exited(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        state.registered.retain(|id| id != key);
        let was_candidate = state.candidates.remove(key);

        let removed = self.registry.remove(&[key.to_string()]).await;
        if was_candidate {
            self.register_selection(&mut state).await;
        }
        debug!(%key, was_candidate, "key exited");
        removed
    }

    /// Register the nearest candidates, retiring ones no longer selected.
    async fn register_selection(&self, state: &mut SelectionState) {
        let selected = select_nearest(state.candidates.as_slice(), self.config.max_watched);
        let selected_ids: Vec<String> = selected.iter().map(|n| n.id.clone()).collect();

        let stale: Vec<String> = state
            .registered
            .iter()
            .filter(|id| !selected_ids.contains(id))
            .cloned()
            .collect();
        if !stale.is_empty() {
            if let Err(e) = self.registry.remove(&stale).await {
                warn!(error = %e, ?stale, "failed to retire deselected geofences");
            }
        }

        if !selected.is_empty() {
            if let Err(e) = self.registry.add_or_update(&selected).await {
                warn!(error = %e, "failed to register selected geofences");
            }
        }

        debug!(selected = ?selected_ids, candidates = state.candidates.len(), "selection applied");
        state.registered = selected_ids;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fencepost_bridge::memory::{MemoryDetailStore, MemoryGeofenceMonitor, MemorySpatialIndex};
    use fencepost_bridge::traits::SpatialIndexClient;
    use fencepost_registry::RegistrationStore;

    const CENTER: GeoLocation = GeoLocation {
        latitude: 0.0,
        longitude: 0.0,
    };

    struct Fixture {
        index: Arc<MemorySpatialIndex>,
        details: Arc<MemoryDetailStore>,
        monitor: Arc<MemoryGeofenceMonitor>,
        registry: Arc<GeofenceRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let monitor = Arc::new(MemoryGeofenceMonitor::new());
            let store = RegistrationStore::open_in_memory().expect("open in-memory db");
            Self {
                index: Arc::new(MemorySpatialIndex::new()),
                details: Arc::new(MemoryDetailStore::new()),
                registry: Arc::new(GeofenceRegistry::new(store, monitor.clone())),
                monitor,
            }
        }

        /// A fence `offset` degrees east of the center, radius 10 m.
        fn place(&self, key: &str, offset: f64) {
            let location = GeoLocation::new(0.0, offset);
            self.details.insert(
                key,
                GeoNotification::new(format!("record-{key}"), 0.0, offset, 10.0),
            );
            self.index.set_location(key, location);
        }

        fn selector(&self, details: Arc<dyn DetailStore>, config: SelectorConfig) -> Arc<ProximitySelector> {
            Arc::new(ProximitySelector::new(config, CENTER, details, self.registry.clone()))
        }

        async fn start(&self, selector: &Arc<ProximitySelector>) -> CancellationToken {
            let events = self
                .index
                .query_at_location(CENTER, 16.0)
                .await
                .expect("query");
            let cancel = CancellationToken::new();
            tokio::spawn(Arc::clone(selector).run(events, cancel.clone()));
            cancel
        }
    }

    fn config() -> SelectorConfig {
        SelectorConfig {
            max_watched: 3,
            fetch_timeout: Duration::from_millis(100),
            details_url_base: Some("https://fences.example/records/".into()),
        }
    }

    async fn wait_until<F>(selector: &ProximitySelector, mut done: F) -> Vec<String>
    where
        F: FnMut(&[String]) -> bool,
    {
        let mut registered = Vec::new();
        for _ in 0..200 {
            registered = selector.registered().await;
            if done(&registered) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        registered
    }

    fn sorted(mut ids: Vec<String>) -> Vec<String> {
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn registers_three_nearest_of_four() {
        let fx = Fixture::new();
        fx.place("a", 0.005);
        fx.place("b", 0.001);
        fx.place("c", 0.003);
        fx.place("d", 0.002);

        let selector = fx.selector(fx.details.clone(), config());
        let cancel = fx.start(&selector).await;

        let registered = wait_until(&selector, |ids| ids.len() == 3 && !ids.contains(&"a".to_string())).await;
        assert_eq!(registered, vec!["b", "d", "c"]);
        assert_eq!(sorted(fx.monitor.armed_ids()), vec!["b", "c", "d"]);
        assert!(!fx.registry.watched_ids().await.expect("ids").contains(&"a".to_string()));
        assert_eq!(selector.candidates().await.len(), 4);

        cancel.cancel();
    }

    #[tokio::test]
    async fn fetched_records_are_stamped() {
        let fx = Fixture::new();
        fx.place("b", 0.001);

        let selector = fx.selector(fx.details.clone(), config());
        let cancel = fx.start(&selector).await;
        wait_until(&selector, |ids| ids.len() == 1).await;

        let watched = fx.registry.watched().await.expect("watched");
        assert_eq!(watched.len(), 1);
        let b = &watched[0];
        assert_eq!(b.id, "b");
        assert_eq!(b.url.as_deref(), Some("https://fences.example/records/b"));
        assert!(b.group_id.is_none());
        let expected = CENTER.distance_to(&GeoLocation::new(0.0, 0.001)) - 10.0;
        assert!((b.distance - expected).abs() < 1e-6);

        cancel.cancel();
    }

    #[tokio::test]
    async fn exit_promotes_next_nearest() {
        let fx = Fixture::new();
        fx.place("a", 0.005);
        fx.place("b", 0.001);
        fx.place("c", 0.003);
        fx.place("d", 0.002);

        let selector = fx.selector(fx.details.clone(), config());
        let cancel = fx.start(&selector).await;
        wait_until(&selector, |ids| ids == ["b", "d", "c"]).await;

        fx.index.remove("b");
        let registered = wait_until(&selector, |ids| ids.len() == 3 && !ids.contains(&"b".to_string())).await;
        assert_eq!(sorted(registered), vec!["a", "c", "d"]);
        assert_eq!(sorted(fx.monitor.armed_ids()), vec!["a", "c", "d"]);

        cancel.cancel();
    }

    #[tokio::test]
    async fn exit_removes_stored_fence_even_when_not_a_candidate() {
        let fx = Fixture::new();
        fx.registry
            .add_or_update(&[GeoNotification::new("x", 0.0, 0.001, 10.0)])
            .await
            .expect("add");
        // No detail record, so `x` never becomes a candidate.
        fx.index.set_location("x", GeoLocation::new(0.0, 0.001));

        let selector = fx.selector(fx.details.clone(), config());
        let cancel = fx.start(&selector).await;

        fx.index.remove("x");
        for _ in 0..200 {
            if fx.registry.watched_ids().await.expect("ids").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fx.registry.watched_ids().await.expect("ids").is_empty());
        assert!(fx.monitor.armed_ids().is_empty());

        cancel.cancel();
    }

    /// Detail store that never answers for `slow`.
    struct StallingDetails {
        inner: Arc<MemoryDetailStore>,
    }

    #[async_trait]
    impl DetailStore for StallingDetails {
        async fn fetch_detail(&self, key: &str) -> Result<GeoNotification> {
            if key == "slow" {
                std::future::pending::<()>().await;
            }
            self.inner.fetch_detail(key).await
        }
    }

    #[tokio::test]
    async fn stalled_fetch_times_out_without_blocking_others() {
        let fx = Fixture::new();
        fx.place("slow", 0.001);
        fx.place("fast", 0.002);

        let details = Arc::new(StallingDetails {
            inner: fx.details.clone(),
        });
        let selector = fx.selector(details, config());
        let cancel = fx.start(&selector).await;

        let registered = wait_until(&selector, |ids| ids == ["fast"]).await;
        assert_eq!(registered, vec!["fast"]);

        // Past the fetch timeout the stalled key is gone for good.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(selector.state.lock().await.in_flight.is_empty());
        let candidates = selector.candidates().await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "fast");

        cancel.cancel();
    }

    /// Detail store whose fetches wait for a permit. Each answer carries the
    /// order in which its fetch started.
    struct GatedDetails {
        inner: Arc<MemoryDetailStore>,
        gate: tokio::sync::Semaphore,
        started: std::sync::atomic::AtomicUsize,
        finished: std::sync::atomic::AtomicUsize,
    }

    impl GatedDetails {
        fn new(inner: Arc<MemoryDetailStore>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                gate: tokio::sync::Semaphore::new(0),
                started: Default::default(),
                finished: Default::default(),
            })
        }

        fn started(&self) -> usize {
            self.started.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn release(&self, fetches: usize) {
            self.gate.add_permits(fetches);
        }
    }

    #[async_trait]
    impl DetailStore for GatedDetails {
        async fn fetch_detail(&self, key: &str) -> Result<GeoNotification> {
            let order = self.started.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            self.gate.acquire().await.expect("gate open").forget();
            let mut record = self.inner.fetch_detail(key).await?;
            record.data = Some(serde_json::json!({ "fetch": order }));
            self.finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(record)
        }
    }

    fn gated_config() -> SelectorConfig {
        SelectorConfig {
            fetch_timeout: Duration::from_secs(5),
            ..config()
        }
    }

    async fn settle(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn exit_during_fetch_discards_late_details() {
        let fx = Fixture::new();
        fx.place("g", 0.001);

        let details = GatedDetails::new(fx.details.clone());
        let selector = fx.selector(details.clone(), gated_config());
        let cancel = fx.start(&selector).await;
        settle(|| details.started() == 1).await;

        fx.index.remove("g");
        for _ in 0..200 {
            if selector.state.lock().await.in_flight.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        details.release(1);
        settle(|| details.finished() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(selector.candidates().await.is_empty());
        assert!(selector.registered().await.is_empty());
        assert!(fx.monitor.armed_ids().is_empty());
        assert!(fx.registry.watched_ids().await.expect("ids").is_empty());

        cancel.cancel();
    }

    #[tokio::test]
    async fn re_entry_during_fetch_admits_only_the_newest_fetch() {
        let fx = Fixture::new();
        fx.place("g", 0.001);

        let details = GatedDetails::new(fx.details.clone());
        let selector = fx.selector(details.clone(), gated_config());
        let cancel = fx.start(&selector).await;
        settle(|| details.started() == 1).await;

        fx.index.remove("g");
        fx.index.set_location("g", GeoLocation::new(0.0, 0.001));
        settle(|| details.started() == 2).await;

        // The semaphore is fair, so the first fetch lands first.
        details.release(2);
        let registered = wait_until(&selector, |ids| ids == ["g"]).await;
        settle(|| details.finished() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(registered, vec!["g"]);
        let candidates = selector.candidates().await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].data, Some(serde_json::json!({ "fetch": 2 })));
        assert!(selector.state.lock().await.in_flight.is_empty());
        assert_eq!(fx.monitor.armed_ids(), vec!["g"]);

        cancel.cancel();
    }

    #[test]
    fn stale_ticket_leaves_newer_fetch_in_flight() {
        let mut state = SelectionState::default();
        let first = state.begin_fetch("g");
        let second = state.begin_fetch("g");

        assert!(!state.finish_fetch("g", first));
        assert_eq!(state.in_flight.get("g"), Some(&second));
        assert!(state.finish_fetch("g", second));
        assert!(state.in_flight.is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_the_query() {
        let fx = Fixture::new();
        let selector = fx.selector(fx.details.clone(), config());
        let events = fx
            .index
            .query_at_location(CENTER, 16.0)
            .await
            .expect("query");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&selector).run(events, cancel.clone()));

        cancel.cancel();
        task.await.expect("selector exits");
        assert_eq!(fx.index.live_queries(), 0);
    }

    #[test]
    fn config_follows_app_config() {
        let app = AppConfig {
            max_watched: 5,
            details_url_base: Some("https://x".into()),
            ..AppConfig::default()
        };
        let config = SelectorConfig::from(&app);
        assert_eq!(config.max_watched, 5);
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.details_url_base.as_deref(), Some("https://x"));
    }
}
