/*
 * This file is part of idevscan.
 *
 * Copyright (C) 2025 idevscan contributors
 *
 * idevscan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * idevscan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with idevscan. If not, see <https://www.gnu.org/licenses/>.
 */

//! In-memory trust/extraction bookkeeping for connected devices.
//!
//! A device identifier is in at most one of `pending` and `untrusted` at a
//! time. All three sets survive disconnects so a replugged device resumes
//! from what was already learned about it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

pub type SharedRegistry = Arc<Mutex<DeviceRegistry>>;

#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    pending: BTreeSet<String>,
    untrusted: BTreeSet<String>,
    failed: BTreeSet<String>,
    /// Untrusted devices whose re-wait is in progress.
    rewaiting: BTreeSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Enter the pending set. Returns false when a wait for `id` is already
    /// running, in which case the caller must not start another one.
    pub fn begin_wait(&mut self, id: &str) -> bool {
        if self.pending.contains(id) {
            return false;
        }
        if self.untrusted.remove(id) {
            self.rewaiting.insert(id.to_string());
        }
        self.pending.insert(id.to_string());
        true
    }

    pub fn trust_succeeded(&mut self, id: &str) {
        self.pending.remove(id);
        self.untrusted.remove(id);
        self.rewaiting.remove(id);
    }

    pub fn trust_exhausted(&mut self, id: &str) {
        self.pending.remove(id);
        self.rewaiting.remove(id);
        self.untrusted.insert(id.to_string());
    }

    /// Leave the pending set without a verdict (the wait was cancelled).
    /// A device that was untrusted before the wait stays untrusted.
    pub fn wait_abandoned(&mut self, id: &str) {
        if self.pending.remove(id) && self.rewaiting.remove(id) {
            self.untrusted.insert(id.to_string());
        }
    }

    pub fn extraction_failed(&mut self, id: &str) {
        self.failed.insert(id.to_string());
    }

    pub fn extraction_succeeded(&mut self, id: &str) {
        self.failed.remove(id);
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn is_untrusted(&self, id: &str) -> bool {
        self.untrusted.contains(id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed.contains(id)
    }

    /// Untrusted or failed devices that are attached right now, sorted.
    pub fn sweep_candidates(&self, connected: &BTreeSet<String>) -> Vec<String> {
        self.untrusted
            .union(&self.failed)
            .filter(|id| connected.contains(*id))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        RegistrySummary {
            pending: self.pending.iter().cloned().collect(),
            untrusted: self.untrusted.iter().cloned().collect(),
            failed: self.failed.iter().cloned().collect(),
        }
    }
}

/// Point-in-time copy of the registry for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub pending: Vec<String>,
    pub untrusted: Vec<String>,
    pub failed: Vec<String>,
}

impl RegistrySummary {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.untrusted.is_empty() && self.failed.is_empty()
    }
}

impl fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} device(s) waiting trust, {} untrusted, {} with failed extraction",
            self.pending.len(),
            self.untrusted.len(),
            self.failed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_begin_wait_rejects_second_waiter() {
        let mut reg = DeviceRegistry::new();
        assert!(reg.begin_wait("A"));
        assert!(!reg.begin_wait("A"));
        assert!(reg.is_pending("A"));
    }

    #[test]
    fn test_exhaustion_moves_pending_to_untrusted() {
        let mut reg = DeviceRegistry::new();
        reg.begin_wait("A");
        reg.trust_exhausted("A");
        assert!(!reg.is_pending("A"));
        assert!(reg.is_untrusted("A"));
    }

    #[test]
    fn test_rewait_never_leaves_device_in_both_sets() {
        let mut reg = DeviceRegistry::new();
        reg.begin_wait("A");
        reg.trust_exhausted("A");
        assert!(reg.begin_wait("A"));
        assert!(reg.is_pending("A") && !reg.is_untrusted("A"));
        reg.trust_succeeded("A");
        assert!(!reg.is_pending("A") && !reg.is_untrusted("A"));
    }

    #[test]
    fn test_abandoned_wait_leaves_no_verdict() {
        let mut reg = DeviceRegistry::new();
        reg.begin_wait("A");
        reg.wait_abandoned("A");
        assert!(reg.summary().is_empty());
    }

    #[test]
    fn test_abandoned_rewait_keeps_untrusted_verdict() {
        let mut reg = DeviceRegistry::new();
        reg.begin_wait("A");
        reg.trust_exhausted("A");
        assert!(reg.begin_wait("A"));
        assert!(!reg.is_untrusted("A"));
        reg.wait_abandoned("A");
        assert!(!reg.is_pending("A"));
        assert!(reg.is_untrusted("A"));

        // A later wait that succeeds clears it for good
        assert!(reg.begin_wait("A"));
        reg.trust_succeeded("A");
        reg.wait_abandoned("A");
        assert!(reg.summary().is_empty());
    }

    #[test]
    fn test_failed_set_independent_of_trust() {
        let mut reg = DeviceRegistry::new();
        reg.trust_succeeded("A");
        reg.extraction_failed("A");
        assert!(reg.is_failed("A"));
        assert!(!reg.is_untrusted("A"));
        reg.extraction_succeeded("A");
        assert!(!reg.is_failed("A"));
    }

    #[test]
    fn test_sweep_candidates_only_connected_members() {
        let mut reg = DeviceRegistry::new();
        reg.begin_wait("A");
        reg.trust_exhausted("A");
        reg.extraction_failed("B");
        reg.extraction_failed("Z");
        reg.begin_wait("P");
        let candidates = reg.sweep_candidates(&set(&["A", "B", "C", "P"]));
        assert_eq!(candidates, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_summary_display() {
        let mut reg = DeviceRegistry::new();
        reg.begin_wait("A");
        reg.begin_wait("B");
        reg.trust_exhausted("B");
        reg.extraction_failed("C");
        let summary = reg.summary();
        assert_eq!(summary.pending, vec!["A".to_string()]);
        assert_eq!(
            summary.to_string(),
            "1 device(s) waiting trust, 1 untrusted, 1 with failed extraction"
        );
    }
}
