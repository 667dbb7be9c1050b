// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::path::PathBuf;

use tracing::warn;

/// Return the application data directory, creating it if needed.
///
/// `FENCEPOST_DATA_DIR` wins when set.  Otherwise a conventional desktop
/// location is used; on mobile the platform bridge supplies its own.
pub fn data_dir() -> PathBuf {
    let dir = match std::env::var_os("FENCEPOST_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs_fallback().join("fencepost"),
    };
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(path = %dir.display(), error = %e, "could not create data directory");
    }
    dir
}

fn dirs_fallback() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    std::env::temp_dir()
}
