// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Nearest-N selection over the proximity candidate list.

use fencepost_core::GeoNotification;

/// Narrow `candidates` to the `limit` closest by `distance`.
///
/// At or below the limit the list is returned as-is, in arrival order.
/// Above it, a stable sort keeps arrival order between equal distances.
pub fn select_nearest(candidates: &[GeoNotification], limit: usize) -> Vec<GeoNotification> {
    if candidates.len() <= limit {
        return candidates.to_vec();
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| candidates[a].distance.total_cmp(&candidates[b].distance));
    order.truncate(limit);
    order.into_iter().map(|i| candidates[i].clone()).collect()
}

/// Candidates seen by one proximity query, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct CandidateList {
    entries: Vec<GeoNotification>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate, or replace the one with the same id in place.
    pub fn upsert(&mut self, notification: GeoNotification) {
        match self.entries.iter_mut().find(|n| n.id == notification.id) {
            Some(existing) => *existing = notification,
            None => self.entries.push(notification),
        }
    }

    /// Drop the candidate with `id`. Returns whether one was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| n.id != id);
        self.entries.len() != before
    }

    pub fn as_slice(&self) -> &[GeoNotification] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
