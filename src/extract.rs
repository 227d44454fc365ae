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

//! Extraction-and-validate engine.
//!
//! Gates on trust, then runs a short bounded retry loop around the full
//! probe until it yields a record that passes validation. Success and
//! exhaustion are reflected in the shared [`DeviceRegistry`].
//!
//! [`DeviceRegistry`]: crate::registry::DeviceRegistry

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::color::resolve_color;
use crate::config::{ExtractionPolicy, TrustPolicy};
use crate::logger;
use crate::probe::{parse_key_values, short_id, DeviceProbe, ProbeError, ProbeRequest};
use crate::record::{DeviceRecord, ValidationReport};
use crate::registry::SharedRegistry;
use crate::scheduler::{CancelToken, Clock};
use crate::storage::resolve_storage;
use crate::trust::{TrustClassifier, TrustError, TrustWaiter, WaitOutcome};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("device info probe failed: {0}")]
    ProbeFailed(String),
    #[error("device info probe timed out after {0:?}")]
    ProbeTimedOut(Duration),
    #[error("incomplete record: {0}")]
    Invalid(ValidationReport),
}

impl From<ProbeError> for ExtractionError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::TimedOut(d) => ExtractionError::ProbeTimedOut(d),
            other => ExtractionError::ProbeFailed(other.to_string()),
        }
    }
}

/// Why [`ExtractionEngine::extract`] produced no record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractFailure {
    #[error("device not trusted: {0}")]
    Untrusted(TrustError),
    #[error("extraction failed after retries: {0}")]
    Exhausted(ExtractionError),
    #[error("cancelled")]
    Cancelled,
}

pub struct ExtractionEngine {
    probe: Arc<dyn DeviceProbe>,
    registry: SharedRegistry,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    waiter: TrustWaiter,
    policy: ExtractionPolicy,
}

impl ExtractionEngine {
    pub fn new(
        probe: Arc<dyn DeviceProbe>,
        registry: SharedRegistry,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        cancel: CancelToken,
        trust: &TrustPolicy,
        policy: ExtractionPolicy,
    ) -> Self {
        let waiter = TrustWaiter::new(
            TrustClassifier::new(probe.clone(), trust),
            registry.clone(),
            clock.clone(),
            cancel.clone(),
            trust,
        );
        Self { probe, registry, catalog, clock, cancel, waiter, policy }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn waiter(&self) -> &TrustWaiter {
        &self.waiter
    }

    pub fn extract_with_retry(&self, id: &str) -> Option<DeviceRecord> {
        self.extract(id).ok()
    }

    /// Trust gate followed by the bounded extraction loop.
    pub fn extract(&self, id: &str) -> Result<DeviceRecord, ExtractFailure> {
        self.ensure_trusted(id)?;
        self.extract_trusted(id)
    }

    /// Entry point for the driver, for new connections and sweeps alike.
    ///
    /// A device already marked untrusted gets a single classify call
    /// instead of another full wait; the user has had a whole wait cycle
    /// already and the sweep will come back to it.
    pub fn process(&self, id: &str) -> Result<DeviceRecord, ExtractFailure> {
        if !self.registry.lock().is_untrusted(id) {
            return self.extract(id);
        }
        let state = self.waiter.classifier().classify(id);
        if let Some(reason) = state.error() {
            debug!("{} still untrusted: {}", short_id(id), state);
            return Err(ExtractFailure::Untrusted(reason));
        }
        self.registry.lock().trust_succeeded(id);
        info!("{} is now trusted", short_id(id));
        self.extract_trusted(id)
    }

    fn ensure_trusted(&self, id: &str) -> Result<(), ExtractFailure> {
        let outcome = if self.registry.lock().is_pending(id) {
            self.waiter.join(id)
        } else {
            let state = self.waiter.classifier().classify(id);
            if state.is_trusted() {
                self.registry.lock().trust_succeeded(id);
                return Ok(());
            }
            match self.waiter.wait(id) {
                WaitOutcome::AlreadyPending => self.waiter.join(id),
                other => other,
            }
        };

        match outcome {
            WaitOutcome::Trusted => Ok(()),
            WaitOutcome::Exhausted(reason) => Err(ExtractFailure::Untrusted(reason)),
            WaitOutcome::Cancelled => Err(ExtractFailure::Cancelled),
            WaitOutcome::AlreadyPending => Err(ExtractFailure::Untrusted(TrustError::Unknown)),
        }
    }

    fn extract_trusted(&self, id: &str) -> Result<DeviceRecord, ExtractFailure> {
        let max = self.policy.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=max {
            if self.cancel.is_cancelled() {
                return Err(ExtractFailure::Cancelled);
            }
            match self.attempt(id) {
                Ok(record) => {
                    self.registry.lock().extraction_succeeded(id);
                    debug!("extracted {} on attempt {}", short_id(id), attempt);
                    return Ok(record);
                }
                Err(e) => {
                    warn!("extraction attempt {}/{} for {}: {}", attempt, max, short_id(id), e);
                    last_err = Some(e);
                }
            }
            if attempt < max && !self.clock.sleep(self.policy.delay(), &self.cancel) {
                return Err(ExtractFailure::Cancelled);
            }
        }

        self.registry.lock().extraction_failed(id);
        let err = last_err.unwrap_or_else(|| ExtractionError::ProbeFailed("no attempt made".into()));
        logger::log_event("extraction_failed", json!({ "udid": id, "error": err.to_string() }));
        Err(ExtractFailure::Exhausted(err))
    }

    fn attempt(&self, id: &str) -> Result<DeviceRecord, ExtractionError> {
        let raw = self.probe.query(id, &ProbeRequest::All, self.policy.probe_timeout())?;
        let info = parse_key_values(&raw);
        if info.is_empty() {
            return Err(ExtractionError::ProbeFailed("empty device info".into()));
        }

        let timeout = self.policy.query_timeout();
        let fetch = |req: &ProbeRequest| -> Option<String> {
            self.probe
                .query(id, req, timeout)
                .ok()
                .filter(|out| !out.trim().is_empty())
        };
        let storage = resolve_storage(&info, &fetch);
        let color = resolve_color(&info, &fetch);
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();

        let record = DeviceRecord::from_info(id, &info, &self.catalog, storage, color, timestamp);
        record.validate().map_err(ExtractionError::Invalid)?;
        Ok(record)
    }
}
