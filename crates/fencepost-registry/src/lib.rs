// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fencepost Registry: the set of watched geofences.  `store` persists it in
// SQLite; `registry` keeps it in step with the platform geofence monitor.

pub mod registry;
pub mod store;

pub use registry::GeofenceRegistry;
pub use store::RegistrationStore;
