// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transition dispatcher: forwards platform events into the application.
//
// Delivery is at-most-once: with no channel bound, or a channel that
// refuses the payload, the event is logged and dropped.  Nothing is queued
// for replay.

use std::sync::{Arc, RwLock};

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fencepost_bridge::traits::{ApplicationBridge, TransitionStream};
use fencepost_core::{BridgeEvent, GeoNotification};

/// Delivers transition and click events to the bound application channel.
#[derive(Default)]
pub struct TransitionDispatcher {
    channel: RwLock<Option<Arc<dyn ApplicationBridge>>>,
}

impl TransitionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the delivery channel, replacing any previous one.
    pub fn bind(&self, channel: Arc<dyn ApplicationBridge>) {
        *self.channel.write().unwrap_or_else(|e| e.into_inner()) = Some(channel);
        info!("application bridge bound");
    }

    /// Unbind the delivery channel. Returns whether one was bound.
    pub fn unbind(&self) -> bool {
        let previous = self.channel.write().unwrap_or_else(|e| e.into_inner()).take();
        if previous.is_some() {
            info!("application bridge unbound");
        }
        previous.is_some()
    }

    pub fn is_bound(&self) -> bool {
        self.channel.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Deliver one batch of transitioned notifications as a single event.
    pub fn dispatch_transitions(&self, notifications: Vec<GeoNotification>) -> bool {
        if notifications.is_empty() {
            return false;
        }
        debug!(count = notifications.len(), "transition received");
        self.deliver(&BridgeEvent::transition(notifications))
    }

    /// Deliver the payload of a notification the user tapped.
    pub fn dispatch_notification_click(&self, data: Value) -> bool {
        self.deliver(&BridgeEvent::NotificationClicked { data })
    }

    fn deliver(&self, event: &BridgeEvent) -> bool {
        let channel = self.channel.read().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(channel) = channel else {
            info!("no application bridge bound, event dropped");
            return false;
        };

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize bridge event, dropped");
                return false;
            }
        };

        match channel.deliver(&payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "application bridge refused event, dropped");
                false
            }
        }
    }

    /// Forward platform transition batches until the stream ends or `cancel`
    /// fires.
    pub async fn pump(self: Arc<Self>, mut transitions: TransitionStream, cancel: CancellationToken) {
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = transitions.next() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            self.dispatch_transitions(batch);
        }
        debug!("transition pump stopped");
    }
}
