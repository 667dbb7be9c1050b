// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the consuming application.
//
// Every error collapses onto one of the four application codes and gets a
// plain English message plus a suggestion the app can show as-is.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, FencepostError};

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanError {
    /// Application-facing error code.
    pub code: ErrorCode,
    /// Plain English summary.
    pub message: String,
    /// What the user should try.
    pub suggestion: String,
}

/// Convert a `FencepostError` into a `HumanError`.
pub fn humanize_error(err: &FencepostError) -> HumanError {
    let code = err.code();
    match err {
        FencepostError::PermissionDenied => HumanError {
            code,
            message: "Location access is turned off for this app.".into(),
            suggestion: "Allow location access in the system settings, then try again.".into(),
        },

        FencepostError::GeofenceServiceUnavailable(detail) => HumanError {
            code,
            message: "Location alerts aren't available right now.".into(),
            suggestion: format!("Make sure location services are switched on. ({detail})"),
        },

        FencepostError::PlatformUnavailable => HumanError {
            code,
            message: "This device can't watch locations.".into(),
            suggestion: "Location alerts need a phone or tablet with location services.".into(),
        },

        FencepostError::GeofenceLimitExceeded { limit } => HumanError {
            code,
            message: "Too many places are being watched.".into(),
            suggestion: format!("Remove some places first. This device can watch at most {limit}."),
        },

        FencepostError::Superseded => HumanError {
            code,
            message: "This request was replaced by a newer one.".into(),
            suggestion: "Wait for the permission prompt to finish before trying again.".into(),
        },

        FencepostError::UnknownAction(_) | FencepostError::InvalidArguments(_) => HumanError {
            code,
            message: "The app sent a request we couldn't understand.".into(),
            suggestion: format!("Please report this problem. ({err})"),
        },

        FencepostError::DetailFetch { .. } | FencepostError::Timeout { .. } => HumanError {
            code,
            message: "We couldn't load place details.".into(),
            suggestion: "Check your internet connection, then try again.".into(),
        },

        FencepostError::Database(_)
        | FencepostError::Io(_)
        | FencepostError::Serialization(_)
        | FencepostError::Bridge(_) => HumanError {
            code,
            message: "Something went wrong while saving your places.".into(),
            suggestion: format!("Restart the app. If this keeps happening, please report it. ({err})"),
        },
    }
}
