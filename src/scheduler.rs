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

//! Time and cancellation primitives shared by every wait loop.
//!
//! All sleeping goes through a [`Clock`] so tests can run the trust waiter
//! and the retry loops without waiting in real time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of a cancellable sleep on the real clock.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Sleep for up to `duration`, returning early once `cancel` fires.
    /// Returns false when the sleep was cut short by cancellation.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Cloneable stop flag observed between poll ticks and retry attempts.
#[derive(Debug, Default, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fixed-interval cadence. The first call to [`Ticker::due`] always fires.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    last: Option<Instant>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Returns true (and re-arms) when at least one interval elapsed since
    /// the last firing.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
