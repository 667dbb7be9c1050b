// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: everything the desktop host needs around the plugin:
// where state lives on disk, the persisted config, and the stdin/stdout
// command protocol.

pub mod data_dir;
pub mod host;
pub mod settings;
