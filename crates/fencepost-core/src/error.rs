// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Fencepost.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for all Fencepost operations.
#[derive(Debug, Error)]
pub enum FencepostError {
    // -- Action errors --
    #[error("location permission denied")]
    PermissionDenied,

    #[error("action superseded by a newer request awaiting permission")]
    Superseded,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    // -- Platform geofencing --
    #[error("geofence service unavailable: {0}")]
    GeofenceServiceUnavailable(String),

    #[error("geofence limit exceeded ({limit} monitors)")]
    GeofenceLimitExceeded { limit: usize },

    // -- Proximity pipeline --
    #[error("detail fetch failed for {key}: {reason}")]
    DetailFetch { key: String, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: std::time::Duration,
    },

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("platform bridge error: {0}")]
    Bridge(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

/// Error codes surfaced to the consuming application.
///
/// The application only ever sees one of these four; everything else
/// `FencepostError` carries is detail for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    #[serde(rename = "GEOFENCE_NOT_AVAILABLE")]
    GeofenceServiceUnavailable,
    GeofenceLimitExceeded,
    Unknown,
}

impl ErrorCode {
    /// Wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::GeofenceServiceUnavailable => "GEOFENCE_NOT_AVAILABLE",
            Self::GeofenceLimitExceeded => "GEOFENCE_LIMIT_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FencepostError {
    /// Collapse this error onto the application-facing taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::GeofenceServiceUnavailable(_) | Self::PlatformUnavailable => {
                ErrorCode::GeofenceServiceUnavailable
            }
            Self::GeofenceLimitExceeded { .. } => ErrorCode::GeofenceLimitExceeded,
            Self::Superseded
            | Self::UnknownAction(_)
            | Self::InvalidArguments(_)
            | Self::DetailFetch { .. }
            | Self::Timeout { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Bridge(_) => ErrorCode::Unknown,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FencepostError>;
