// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Fencepost: platform collaborator abstractions.
//!
//! The geofence service never talks to a realtime database, a location API
//! or a web view directly. Each of those is a trait in [`traits`], grouped
//! into a [`traits::Platform`] bundle that the engine receives at startup.
//!
//! [`memory`] provides in-process implementations used by the desktop host
//! and by tests.

pub mod memory;
pub mod traits;

pub use traits::Platform;
