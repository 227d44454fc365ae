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

//! Per-tick reconciliation: connection deltas, sweep selection and the
//! dedup-then-persist step for finished records.
//!
//! The reconciler is the only writer of the seen registry and the record
//! sink.

use std::collections::BTreeSet;

use serde_json::json;
use tracing::{error, info, warn};

use crate::logger;
use crate::persist::{PersistenceError, RecordSink};
use crate::record::DeviceRecord;
use crate::registry::SharedRegistry;
use crate::seen::SeenRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDelta {
    /// Sorted; this is the processing order within a tick.
    pub connected: Vec<String>,
    pub disconnected: Vec<String>,
}

impl ConnectionDelta {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

pub fn diff_connections(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> ConnectionDelta {
    ConnectionDelta {
        connected: current.difference(previous).cloned().collect(),
        disconnected: previous.difference(current).cloned().collect(),
    }
}

#[derive(Debug)]
pub enum RecordOutcome {
    Saved,
    /// The primary IMEI was accepted before; nothing was written.
    Duplicate,
    /// The sink refused the record. The seen registry is untouched, so the
    /// device is treated as new next time.
    PersistFailed(PersistenceError),
}

pub struct Reconciler {
    previous: BTreeSet<String>,
    seen: SeenRegistry,
    sink: Box<dyn RecordSink>,
    registry: SharedRegistry,
}

impl Reconciler {
    pub fn new(seen: SeenRegistry, sink: Box<dyn RecordSink>, registry: SharedRegistry) -> Self {
        Self { previous: BTreeSet::new(), seen, sink, registry }
    }

    /// Record a fresh connection sample and report what changed since the
    /// previous one. Registry sets are left alone on disconnect.
    pub fn observe(&mut self, current: BTreeSet<String>) -> ConnectionDelta {
        let delta = diff_connections(&self.previous, &current);
        self.previous = current;
        delta
    }

    pub fn connected(&self) -> &BTreeSet<String> {
        &self.previous
    }

    /// Untrusted and failed devices that are connected right now.
    pub fn sweep_candidates(&self) -> Vec<String> {
        self.registry.lock().sweep_candidates(&self.previous)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn seen(&self) -> &SeenRegistry {
        &self.seen
    }

    /// Dedup by primary IMEI, then persist. The seen registry is only
    /// updated after the sink confirmed the write.
    pub fn accept(&mut self, record: &DeviceRecord) -> RecordOutcome {
        if self.seen.contains(&record.imei1) {
            info!("{} already processed", record.imei1);
            logger::log_event("device_duplicate", json!({ "imei": record.imei1, "udid": record.udid }));
            return RecordOutcome::Duplicate;
        }

        if let Err(e) = self.sink.persist(record) {
            warn!("could not save {}: {}", record.imei1, e);
            logger::log_event("persist_failed", json!({ "imei": record.imei1, "error": e.to_string() }));
            return RecordOutcome::PersistFailed(e);
        }

        if let Err(e) = self.seen.insert_and_save(&record.imei1) {
            // The row is stored; only the dedup file lags behind.
            error!("saved {} but could not update {}: {}", record.imei1, self.seen.path().display(), e);
        }
        logger::log_event(
            "device_saved",
            json!({ "imei": record.imei1, "product": record.product_name, "storage": record.storage }),
        );
        RecordOutcome::Saved
    }
}
