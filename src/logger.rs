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

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

pub const LOG_ENV: &str = "IDEVSCAN_LOG";

lazy_static! {
    static ref JOURNAL: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Diagnostics to stderr, filtered by `IDEVSCAN_LOG` (default `info`).
/// Console output on stdout stays clean.
pub fn init_tracing() {
    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr)
        .with_env_filter(&log_level)
        .try_init();
}

/// Start appending events to the JSON-lines journal at `path`.
pub fn open_journal(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let f = OpenOptions::new().create(true).append(true).open(path)?;
    if let Ok(mut guard) = JOURNAL.lock() {
        *guard = Some(f);
    }
    Ok(())
}

pub fn close_journal() {
    if let Ok(mut guard) = JOURNAL.lock() {
        *guard = None;
    }
}

pub fn journal_enabled() -> bool {
    JOURNAL.lock().map(|g| g.is_some()).unwrap_or(false)
}

/// Append one `{"ts_ms", "event", "data"}` line. Silent no-op until a
/// journal is opened.
pub fn log_event(event: &str, data: Value) {
    if let Ok(mut guard) = JOURNAL.lock() {
        if let Some(f) = guard.as_mut() {
            let line = json!({
                "ts_ms": now_millis(),
                "event": event,
                "data": data,
            })
            .to_string();
            let _ = writeln!(f, "{}", line);
        }
    }
}
