// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Geofence registry: keeps the persisted watch set and the platform
// geofence monitor in step.
//
// An entry is only stored after the monitor accepted it, so the store never
// lists a fence the platform is not watching.  The store sits behind an async
// mutex held across each arm/persist sequence; concurrent callers (the
// action worker and the proximity pipeline) therefore never interleave.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fencepost_bridge::traits::GeofenceMonitor;
use fencepost_core::GeoNotification;
use fencepost_core::error::Result;

use crate::store::RegistrationStore;

/// The set of watched geofences.
pub struct GeofenceRegistry {
    store: Mutex<RegistrationStore>,
    monitor: Arc<dyn GeofenceMonitor>,
}

impl GeofenceRegistry {
    pub fn new(store: RegistrationStore, monitor: Arc<dyn GeofenceMonitor>) -> Self {
        Self {
            store: Mutex::new(store),
            monitor,
        }
    }

    /// Arm and upsert each notification by id.
    ///
    /// Every entry is attempted.  Entries that armed successfully stay
    /// registered even if a later one fails; the first failure is returned.
    /// An entry whose persist fails is reverted on the monitor, so the armed
    /// set never holds a fence the store cannot list or remove.
    pub async fn add_or_update(&self, notifications: &[GeoNotification]) -> Result<()> {
        let store = self.store.lock().await;
        let mut first_error = None;

        for notification in notifications {
            let outcome = match self.monitor.arm(notification).await {
                Ok(()) => {
                    let persisted = store.upsert(notification);
                    if persisted.is_err() {
                        let previous = store.get(&notification.id).ok().flatten();
                        self.revert_arm(notification, previous).await;
                    }
                    persisted
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => debug!(id = %notification.id, "geofence registered"),
                Err(e) => {
                    warn!(id = %notification.id, error = %e, "geofence registration failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(count = notifications.len(), "geofences added or updated");
                Ok(())
            }
        }
    }

    /// Undo an arm whose persist failed: restore the stored definition, or
    /// disarm a fence the store never knew.
    async fn revert_arm(&self, notification: &GeoNotification, previous: Option<GeoNotification>) {
        let reverted = match previous {
            Some(previous) => self.monitor.arm(&previous).await,
            None => self.monitor.disarm(std::slice::from_ref(&notification.id)).await,
        };
        if let Err(e) = reverted {
            warn!(id = %notification.id, error = %e, "failed to revert geofence after persist failure");
        }
    }

    /// Disarm and delete the given ids.  Unknown ids are ignored.
    pub async fn remove(&self, ids: &[String]) -> Result<()> {
        let store = self.store.lock().await;

        let mut seen = HashSet::new();
        let mut known = Vec::new();
        for id in ids {
            if seen.insert(id.as_str()) && store.contains(id)? {
                known.push(id.clone());
            }
        }

        if known.is_empty() {
            debug!(requested = ids.len(), "no registered geofences to remove");
            return Ok(());
        }

        self.monitor.disarm(&known).await?;
        let removed = store.delete(&known)?;
        info!(removed, "geofences removed");
        Ok(())
    }

    /// Disarm and delete every registered geofence.
    pub async fn remove_all(&self) -> Result<()> {
        let store = self.store.lock().await;
        let ids = store.ids()?;
        if ids.is_empty() {
            return Ok(());
        }

        self.monitor.disarm(&ids).await?;
        store.clear()?;
        Ok(())
    }

    /// Watched notifications in storage order.
    pub async fn watched(&self) -> Result<Vec<GeoNotification>> {
        self.store.lock().await.all()
    }

    /// Watched ids in storage order.
    pub async fn watched_ids(&self) -> Result<Vec<String>> {
        self.store.lock().await.ids()
    }
}
