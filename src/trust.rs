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

//! Trust classification and the wait-for-trust loop.
//!
//! The device only answers detailed queries after the user taps "Trust" on
//! it. [`TrustClassifier`] turns one cheap probe into a [`TrustState`];
//! [`TrustWaiter`] repeats that on a fixed cadence while the user decides.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TrustPolicy;
use crate::logger;
use crate::probe::{short_id, DeviceProbe, ProbeError, ProbeRequest};
use crate::registry::SharedRegistry;
use crate::scheduler::{CancelToken, Clock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustState {
    Trusted,
    NotPaired,
    NotFound,
    Denied,
    Timeout,
    Unknown,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustError {
    #[error("device is not paired (trust prompt unanswered)")]
    NotPaired,
    #[error("device not found or not responding")]
    NotFound,
    #[error("device denied the host access")]
    Denied,
    #[error("trust check timed out")]
    Timeout,
    #[error("trust state unknown")]
    Unknown,
}

impl TrustState {
    pub fn is_trusted(self) -> bool {
        self == TrustState::Trusted
    }

    /// The failure reason, or None for [`TrustState::Trusted`].
    pub fn error(self) -> Option<TrustError> {
        match self {
            TrustState::Trusted => None,
            TrustState::NotPaired => Some(TrustError::NotPaired),
            TrustState::NotFound => Some(TrustError::NotFound),
            TrustState::Denied => Some(TrustError::Denied),
            TrustState::Timeout => Some(TrustError::Timeout),
            TrustState::Unknown => Some(TrustError::Unknown),
        }
    }
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustState::Trusted => "trusted",
            TrustState::NotPaired => "not paired",
            TrustState::NotFound => "not found",
            TrustState::Denied => "denied",
            TrustState::Timeout => "timeout",
            TrustState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Map tool diagnostics to a trust reason (case-insensitive substrings).
///
/// Kept separate from the probe call so the marker list can follow changes
/// in the tool's wording without touching anything else.
pub fn classify_diagnostic(text: &str) -> TrustState {
    let t = text.to_lowercase();
    if t.contains("not paired") || t.contains("pairing") {
        TrustState::NotPaired
    } else if t.contains("not found") || t.contains("timed out") {
        TrustState::NotFound
    } else if t.contains("denied") || t.contains("lockdown") {
        TrustState::Denied
    } else {
        TrustState::Unknown
    }
}

pub fn classify_failure(err: &ProbeError) -> TrustState {
    match err {
        ProbeError::TimedOut(_) => TrustState::Timeout,
        // The tool never ran, so there is nothing device-related to read.
        ProbeError::Spawn { .. } => TrustState::Unknown,
        ProbeError::Failed { diagnostic, .. } => classify_diagnostic(diagnostic),
    }
}

pub struct TrustClassifier {
    probe: Arc<dyn DeviceProbe>,
    request: ProbeRequest,
    timeout: Duration,
}

impl TrustClassifier {
    pub fn new(probe: Arc<dyn DeviceProbe>, policy: &TrustPolicy) -> Self {
        Self {
            probe,
            request: ProbeRequest::key(&policy.probe_key),
            timeout: policy.check_timeout(),
        }
    }

    /// One lightweight probe. Never fails: every error becomes a state.
    pub fn classify(&self, id: &str) -> TrustState {
        match self.probe.query(id, &self.request, self.timeout) {
            Ok(out) if !out.trim().is_empty() => TrustState::Trusted,
            Ok(_) => {
                debug!("trust check for {}: empty answer", short_id(id));
                TrustState::Unknown
            }
            Err(e) => {
                let state = classify_failure(&e);
                debug!("trust check for {}: {} ({})", short_id(id), state, e);
                state
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Trusted,
    /// Every attempt failed; carries the last observed reason.
    Exhausted(TrustError),
    Cancelled,
    /// Another wait for the same device is already running.
    AlreadyPending,
}

pub struct TrustWaiter {
    classifier: TrustClassifier,
    registry: SharedRegistry,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    max_attempts: u32,
    delay: Duration,
    report_every: u32,
}

impl TrustWaiter {
    pub fn new(
        classifier: TrustClassifier,
        registry: SharedRegistry,
        clock: Arc<dyn Clock>,
        cancel: CancelToken,
        policy: &TrustPolicy,
    ) -> Self {
        Self {
            classifier,
            registry,
            clock,
            cancel,
            max_attempts: policy.max_attempts.max(1),
            delay: policy.delay(),
            report_every: policy.report_every.max(1),
        }
    }

    pub fn classifier(&self) -> &TrustClassifier {
        &self.classifier
    }

    pub fn wait_for_trust(&self, id: &str) -> bool {
        self.wait(id) == WaitOutcome::Trusted
    }

    /// Poll the classifier until the device is trusted or attempts run out.
    pub fn wait(&self, id: &str) -> WaitOutcome {
        if !self.registry.lock().begin_wait(id) {
            return WaitOutcome::AlreadyPending;
        }
        info!("waiting for trust on {} (tap \"Trust\" on the device)", short_id(id));

        let mut last = TrustError::Unknown;
        for attempt in 1..=self.max_attempts {
            if self.cancel.is_cancelled() {
                self.registry.lock().wait_abandoned(id);
                return WaitOutcome::Cancelled;
            }

            let state = self.classifier.classify(id);
            let Some(reason) = state.error() else {
                self.registry.lock().trust_succeeded(id);
                info!("{} trusted after {} attempt(s)", short_id(id), attempt);
                return WaitOutcome::Trusted;
            };
            last = reason;

            if attempt % self.report_every == 0 {
                info!(
                    "still waiting for trust on {}: {} (attempt {}/{})",
                    short_id(id), state, attempt, self.max_attempts
                );
            }

            if attempt < self.max_attempts && !self.clock.sleep(self.delay, &self.cancel) {
                self.registry.lock().wait_abandoned(id);
                return WaitOutcome::Cancelled;
            }
        }

        self.registry.lock().trust_exhausted(id);
        warn!("gave up waiting for trust on {}: {}", short_id(id), last);
        logger::log_event("trust_exhausted", json!({ "udid": id, "reason": last.to_string() }));
        WaitOutcome::Exhausted(last)
    }

    /// Follow a wait that another worker started, on the same cadence,
    /// until it resolves or our own attempt budget runs out.
    pub fn join(&self, id: &str) -> WaitOutcome {
        for _ in 0..=self.max_attempts {
            if self.cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            {
                let reg = self.registry.lock();
                if !reg.is_pending(id) {
                    return if reg.is_untrusted(id) {
                        WaitOutcome::Exhausted(TrustError::Unknown)
                    } else {
                        WaitOutcome::Trusted
                    };
                }
            }
            if !self.clock.sleep(self.delay, &self.cancel) {
                return WaitOutcome::Cancelled;
            }
        }
        WaitOutcome::Exhausted(TrustError::Timeout)
    }
}
