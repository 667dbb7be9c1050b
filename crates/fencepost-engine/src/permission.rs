// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Permission gate: holds the one action waiting on a location permission
// prompt.
//
//   Idle ──park──▶ AwaitingPermission ──resolve(true)──▶ Idle (action re-run)
//                         │
//                         └──────resolve(false)──▶ Idle (PermissionDenied)
//
// Parking while already awaiting replaces the waiting action; the replaced
// caller is resolved with `Superseded` rather than left hanging.

use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use fencepost_core::ActionId;
use fencepost_core::error::FencepostError;

use crate::action::{Action, CompletionHandle};

/// An action parked until the permission prompt resolves.
#[derive(Debug)]
pub struct PendingAction {
    pub id: ActionId,
    pub action: Action,
    pub handle: CompletionHandle,
}

#[derive(Debug)]
enum GateState {
    Idle,
    AwaitingPermission(PendingAction),
}

/// Observable gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Idle,
    AwaitingPermission,
}

/// Single-slot holder for the action waiting on permission.
#[derive(Debug)]
pub struct PermissionGate {
    state: Mutex<GateState>,
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> GateStatus {
        match *self.lock() {
            GateState::Idle => GateStatus::Idle,
            GateState::AwaitingPermission(_) => GateStatus::AwaitingPermission,
        }
    }

    /// Park `pending` until permission resolves.
    ///
    /// Returns `true` when the caller must issue a permission request (the
    /// gate was idle), `false` when a request is already outstanding.
    pub fn park(&self, pending: PendingAction) -> bool {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut *state, GateState::AwaitingPermission(pending));
        match previous {
            GateState::Idle => {
                info!("action parked awaiting location permission");
                true
            }
            GateState::AwaitingPermission(replaced) => {
                warn!(
                    action_id = %replaced.id,
                    action = replaced.action.name(),
                    "pending action superseded by a newer one"
                );
                replaced.handle.fail(FencepostError::Superseded);
                false
            }
        }
    }

    /// Apply a permission result and return to `Idle`.
    ///
    /// On grant the parked action is handed back for re-execution.  On
    /// denial its handle is failed with `PermissionDenied` here.
    pub fn resolve(&self, granted: bool) -> Option<PendingAction> {
        let previous = std::mem::replace(&mut *self.lock(), GateState::Idle);
        let GateState::AwaitingPermission(pending) = previous else {
            return None;
        };

        if granted {
            info!(action_id = %pending.id, action = pending.action.name(), "permission granted");
            Some(pending)
        } else {
            info!(action_id = %pending.id, action = pending.action.name(), "permission denied");
            pending.handle.fail(FencepostError::PermissionDenied);
            None
        }
    }

    /// Fail any parked action with `error` (used at shutdown).
    pub fn abandon(&self, error: FencepostError) {
        let previous = std::mem::replace(&mut *self.lock(), GateState::Idle);
        if let GateState::AwaitingPermission(pending) = previous {
            pending.handle.fail(error);
        }
    }
}
