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

//! Scan driver.
//!
//! Each device is handled on its own worker thread so a long trust wait
//! never holds up connection polling. Workers only talk to the shared
//! registry; their finished records come back over a channel and are
//! deduplicated and persisted here, on the driver thread.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::ScanConfig;
use crate::console;
use crate::extract::{ExtractFailure, ExtractionEngine};
use crate::imei::mask_imei;
use crate::logger;
use crate::persist::{CsvSink, RecordSink};
use crate::probe::{short_id, DeviceProbe, IdeviceProbe};
use crate::reconcile::{ConnectionDelta, Reconciler, RecordOutcome};
use crate::record::DeviceRecord;
use crate::registry::{DeviceRegistry, SharedRegistry};
use crate::scheduler::{CancelToken, Clock, SystemClock, Ticker};
use crate::seen::SeenRegistry;
use crate::trust::TrustState;

const IDLE_POLL: Duration = Duration::from_millis(100);

type WorkerResult = (String, Result<DeviceRecord, ExtractFailure>);

/// What became of one device handed to a worker.
#[derive(Debug)]
pub enum DeviceEvent {
    Saved(DeviceRecord),
    Duplicate(DeviceRecord),
    PersistFailed(DeviceRecord, String),
    Failed(ExtractFailure),
    /// Finished after the stop signal; nothing was persisted.
    Discarded,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub delta: ConnectionDelta,
    /// Devices re-queued by the periodic sweep.
    pub swept: Vec<String>,
    /// Worker results handled this tick, sorted by identifier.
    pub finished: Vec<(String, DeviceEvent)>,
}

pub struct Scanner {
    config: ScanConfig,
    probe: Arc<dyn DeviceProbe>,
    engine: Arc<ExtractionEngine>,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    in_flight: BTreeSet<String>,
    workers: Vec<JoinHandle<()>>,
    tx: Sender<WorkerResult>,
    rx: Receiver<WorkerResult>,
    sweep: Ticker,
    shutdown_after_save: bool,
}

impl Scanner {
    pub fn new(
        config: ScanConfig,
        probe: Arc<dyn DeviceProbe>,
        clock: Arc<dyn Clock>,
        cancel: CancelToken,
        catalog: Catalog,
        seen: SeenRegistry,
        sink: Box<dyn RecordSink>,
    ) -> Self {
        let registry = DeviceRegistry::shared();
        let engine = Arc::new(ExtractionEngine::new(
            probe.clone(),
            registry.clone(),
            Arc::new(catalog),
            clock.clone(),
            cancel.clone(),
            &config.trust,
            config.extraction.clone(),
        ));
        let reconciler = Reconciler::new(seen, sink, registry);
        let (tx, rx) = mpsc::channel();
        let sweep = Ticker::new(config.sweep_interval());
        Self {
            config,
            probe,
            engine,
            reconciler,
            clock,
            cancel,
            in_flight: BTreeSet::new(),
            workers: Vec::new(),
            tx,
            rx,
            sweep,
            shutdown_after_save: false,
        }
    }

    /// Scanner wired to the real tools, the system clock and the CSV files
    /// named in `config`.
    pub fn from_config(config: ScanConfig, cancel: CancelToken) -> Result<Self> {
        let seen = SeenRegistry::load(&config.paths.seen_imei)
            .with_context(|| format!("loading {}", config.paths.seen_imei.display()))?;
        let catalog = Catalog::load(&config.paths.model_mapping, &config.paths.upc_mapping);
        let sink = Box::new(CsvSink::new(&config.paths));
        let probe = Arc::new(IdeviceProbe::new(config.tools.clone()));
        Ok(Self::new(config, probe, Arc::new(SystemClock), cancel, catalog, seen, sink))
    }

    pub fn set_shutdown_after_save(&mut self, enabled: bool) {
        self.shutdown_after_save = enabled;
    }

    pub fn registry(&self) -> &SharedRegistry {
        self.reconciler.registry()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn in_flight(&self) -> &BTreeSet<String> {
        &self.in_flight
    }

    /// Currently attached devices. A failed listing counts as none.
    pub fn sample(&self) -> BTreeSet<String> {
        match self.probe.list_devices(self.config.list_timeout()) {
            Ok(ids) => ids,
            Err(e) => {
                debug!("device listing failed: {}", e);
                BTreeSet::new()
            }
        }
    }

    /// One poll iteration: handle finished workers, sample connections,
    /// start workers for new devices and, when due, for sweep candidates.
    pub fn tick(&mut self) -> TickReport {
        let finished = self.collect_finished();

        let delta = self.reconciler.observe(self.sample());
        for id in &delta.disconnected {
            info!("device {} disconnected", short_id(id));
            logger::log_event("device_disconnected", json!({ "udid": id }));
        }
        for id in &delta.connected {
            info!("device {} connected", short_id(id));
            logger::log_event("device_connected", json!({ "udid": id }));
            self.spawn_worker(id);
        }

        let mut swept = Vec::new();
        if self.sweep.due(self.clock.now()) {
            for id in self.reconciler.sweep_candidates() {
                if self.spawn_worker(&id) {
                    swept.push(id);
                }
            }
        }

        TickReport { delta, swept, finished }
    }

    /// Start a worker for `id` unless one is already running.
    fn spawn_worker(&mut self, id: &str) -> bool {
        if !self.in_flight.insert(id.to_string()) {
            return false;
        }
        let engine = self.engine.clone();
        let tx = self.tx.clone();
        let id = id.to_string();
        self.workers.push(thread::spawn(move || {
            let result = engine.process(&id);
            let _ = tx.send((id, result));
        }));
        true
    }

    fn collect_finished(&mut self) -> Vec<(String, DeviceEvent)> {
        let mut results: Vec<WorkerResult> = self.rx.try_iter().collect();
        self.workers.retain(|w| !w.is_finished());
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
            .into_iter()
            .map(|(id, result)| {
                self.in_flight.remove(&id);
                let event = self.handle_result(&id, result);
                (id, event)
            })
            .collect()
    }

    fn handle_result(&mut self, id: &str, result: Result<DeviceRecord, ExtractFailure>) -> DeviceEvent {
        let record = match result {
            Ok(_) if self.cancel.is_cancelled() => {
                debug!("discarding record for {} after stop", short_id(id));
                return DeviceEvent::Discarded;
            }
            Ok(record) => record,
            Err(failure) => return DeviceEvent::Failed(failure),
        };

        match self.reconciler.accept(&record) {
            RecordOutcome::Saved => {
                if self.shutdown_after_save {
                    self.shutdown_device(id);
                }
                DeviceEvent::Saved(record)
            }
            RecordOutcome::Duplicate => DeviceEvent::Duplicate(record),
            RecordOutcome::PersistFailed(e) => DeviceEvent::PersistFailed(record, e.to_string()),
        }
    }

    fn shutdown_device(&self, id: &str) {
        match self.probe.shutdown(id, self.config.list_timeout()) {
            Ok(()) => {
                info!("shut down {}", short_id(id));
                logger::log_event("device_shutdown", json!({ "udid": id }));
            }
            Err(e) => warn!("could not shut down {}: {}", short_id(id), e),
        }
    }

    /// Block until every running worker has reported, then handle the
    /// results. Bounded by the workers' own wait and retry limits.
    pub fn wait_idle(&mut self) -> Vec<(String, DeviceEvent)> {
        let mut results = Vec::new();
        while !self.in_flight.is_empty() {
            match self.rx.recv_timeout(IDLE_POLL) {
                Ok((id, result)) => {
                    self.in_flight.remove(&id);
                    results.push((id, result));
                }
                Err(RecvTimeoutError::Timeout) => {
                    // A worker that died without reporting frees its slot
                    self.workers.retain(|w| !w.is_finished());
                    if self.workers.is_empty() {
                        self.in_flight.clear();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        results.extend(self.rx.try_iter());
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
            .into_iter()
            .map(|(id, result)| {
                let event = self.handle_result(&id, result);
                (id, event)
            })
            .collect()
    }

    /// Process every attached device once and wait for all of them.
    pub fn scan_once(&mut self) -> Vec<(String, DeviceEvent)> {
        let delta = self.reconciler.observe(self.sample());
        for id in &delta.connected {
            self.spawn_worker(id);
        }
        self.wait_idle()
    }

    /// Continuous monitoring until the cancel token fires.
    pub fn run(&mut self) -> Result<()> {
        console::info(&format!(
            "Monitoring for devices every {:?} (Ctrl+C to stop)",
            self.config.poll_interval()
        ));
        logger::log_event("monitor_started", json!({ "mode": "monitor", "shutdown": self.shutdown_after_save }));

        while !self.cancel.is_cancelled() {
            let report = self.tick();
            render_tick(&report);
            if !report.swept.is_empty() {
                console::registry_summary(&self.registry().lock().summary());
            }
            if !self.clock.sleep(self.config.poll_interval(), &self.cancel) {
                break;
            }
        }

        // Workers observe the same token; join them so none outlives us.
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let discarded = self.rx.try_iter().count();
        self.in_flight.clear();
        logger::log_event("monitor_stopped", json!({ "discarded": discarded }));
        console::info("Monitoring stopped");
        Ok(())
    }

    /// Trust state of every attached device, one classify call each.
    pub fn trust_report(&self) -> Vec<(String, TrustState)> {
        self.sample()
            .into_iter()
            .map(|id| {
                let state = self.engine.waiter().classifier().classify(&id);
                (id, state)
            })
            .collect()
    }
}

fn render_tick(report: &TickReport) {
    for id in &report.delta.connected {
        console::info(&format!("Device connected: {}", short_id(id)));
    }
    for id in &report.delta.disconnected {
        console::info(&format!("Device disconnected: {}", short_id(id)));
    }
    for id in &report.swept {
        console::info(&format!("Re-checking {}", short_id(id)));
    }
    render_events(&report.finished);
}

pub fn render_events(events: &[(String, DeviceEvent)]) {
    for (id, event) in events {
        match event {
            DeviceEvent::Saved(record) => {
                console::device_summary(record);
                console::success(&format!("Saved {} ({})", record.product_name, mask_imei(&record.imei1)));
            }
            DeviceEvent::Duplicate(record) => console::duplicate_notice(record),
            DeviceEvent::PersistFailed(record, e) => {
                console::error(&format!("Could not save {}: {}", mask_imei(&record.imei1), e))
            }
            DeviceEvent::Failed(ExtractFailure::Untrusted(reason)) => console::warning(&format!(
                "{}: {} (tap \"Trust\" on the device; it will be re-checked)",
                short_id(id),
                reason
            )),
            DeviceEvent::Failed(ExtractFailure::Cancelled) | DeviceEvent::Discarded => {}
            DeviceEvent::Failed(failure) => console::error(&format!("{}: {}", short_id(id), failure)),
        }
    }
}

pub fn list_seen(config: &ScanConfig) -> Result<Vec<String>> {
    let seen = SeenRegistry::load(&config.paths.seen_imei)
        .with_context(|| format!("loading {}", config.paths.seen_imei.display()))?;
    Ok(seen.iter().cloned().collect())
}

pub fn clear_seen(config: &ScanConfig) -> Result<usize> {
    // A corrupt file is replaced rather than reported.
    let mut seen = SeenRegistry::load(&config.paths.seen_imei)
        .unwrap_or_else(|_| SeenRegistry::new(&config.paths.seen_imei));
    let count = seen.len();
    seen.clear_and_save()
        .with_context(|| format!("writing {}", config.paths.seen_imei.display()))?;
    Ok(count)
}

/// Delete the CSV outputs and empty the seen list.
pub fn reset_data(config: &ScanConfig) -> Result<Vec<PathBuf>> {
    let removed = CsvSink::new(&config.paths).remove_outputs()?;
    clear_seen(config)?;
    Ok(removed)
}
