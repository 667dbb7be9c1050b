// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fencepost Engine: the coordination layer between the application's
// commands, the spatial index, and the platform geofence monitor.

pub mod action;
pub mod dispatcher;
pub mod permission;
pub mod plugin;
pub mod proximity;
pub mod selection;

pub use action::{Action, CompletionHandle};
pub use dispatcher::TransitionDispatcher;
pub use permission::{GateStatus, PermissionGate};
pub use plugin::GeofencePlugin;
pub use proximity::ProximitySelector;
pub use selection::select_nearest;
