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

//! Adapter around the libimobiledevice command line tools.
//!
//! Everything the rest of the crate knows about a device comes through the
//! [`DeviceProbe`] trait: a listing of connected identifiers, raw text from
//! a key/domain/all-fields query, and a shutdown request. Each call is
//! bounded by a caller supplied timeout.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::config::ToolPaths;

const WAIT_SLICE: Duration = Duration::from_millis(25);
/// How long output is still collected after the tool itself exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Parsed `Key: Value` output of a probe.
pub type KeyValues = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProbeRequest {
    /// A single key (`ideviceinfo -k`).
    Key(String),
    /// A whole lockdown domain (`ideviceinfo -q`).
    Domain(String),
    /// Every key the device exposes.
    All,
}

impl ProbeRequest {
    pub fn key(key: &str) -> Self {
        ProbeRequest::Key(key.to_string())
    }

    pub fn domain(domain: &str) -> Self {
        ProbeRequest::Domain(domain.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("probe exited with status {status:?}: {diagnostic}")]
    Failed { status: Option<i32>, diagnostic: String },
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
}

#[cfg_attr(test, mockall::automock)]
pub trait DeviceProbe: Send + Sync {
    /// Identifiers of every device currently attached.
    fn list_devices(&self, timeout: Duration) -> Result<BTreeSet<String>, ProbeError>;

    /// Raw stdout of a successful query. Success with empty output is a
    /// found-but-empty field.
    fn query(&self, id: &str, request: &ProbeRequest, timeout: Duration) -> Result<String, ProbeError>;

    fn shutdown(&self, id: &str, timeout: Duration) -> Result<(), ProbeError>;
}

/// [`DeviceProbe`] backed by `idevice_id`, `ideviceinfo` and
/// `idevicediagnostics` found on `PATH` (or configured explicitly).
#[derive(Debug, Clone)]
pub struct IdeviceProbe {
    tools: ToolPaths,
}

impl IdeviceProbe {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }
}

impl DeviceProbe for IdeviceProbe {
    fn list_devices(&self, timeout: Duration) -> Result<BTreeSet<String>, ProbeError> {
        let out = run_with_timeout(&self.tools.device_list, &["-l"], timeout)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn query(&self, id: &str, request: &ProbeRequest, timeout: Duration) -> Result<String, ProbeError> {
        let mut args = vec!["-u", id];
        match request {
            ProbeRequest::Key(k) => args.extend(["-k", k.as_str()]),
            ProbeRequest::Domain(d) => args.extend(["-q", d.as_str()]),
            ProbeRequest::All => {}
        }
        run_with_timeout(&self.tools.device_info, &args, timeout)
    }

    fn shutdown(&self, id: &str, timeout: Duration) -> Result<(), ProbeError> {
        run_with_timeout(&self.tools.diagnostics, &["-u", id, "shutdown"], timeout).map(|_| ())
    }
}

/// First eight characters of a device identifier, for log lines.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Run `program` and collect its stdout, killing it once `timeout` passes.
pub fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    debug!("probe: {} {}", program, args.join(" "));
    let spawn_err = |source| ProbeError::Spawn { tool: program.to_string(), source };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    // Pipes are drained on helper threads while we poll for exit. A
    // grandchild can inherit them, so collection is bounded in time too.
    let out_chunks = spawn_reader(child.stdout.take());
    let err_chunks = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::TimedOut(timeout));
            }
            Ok(None) => thread::sleep(WAIT_SLICE),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_err(e));
            }
        }
    };

    let drain_until = Instant::now() + DRAIN_GRACE;
    let stdout = drain(&out_chunks, drain_until);
    let stderr = drain(&err_chunks, drain_until);

    if status.success() {
        Ok(stdout)
    } else {
        let diagnostic = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(ProbeError::Failed { status: status.code(), diagnostic: diagnostic.trim().to_string() })
    }
}

/// Forward chunks read from `src` until EOF or until the receiver is gone.
fn spawn_reader<R: Read + Send + 'static>(src: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut r) = src {
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match r.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    rx
}

/// Collect chunks until the writer hung up or `until` passed.
fn drain(chunks: &Receiver<Vec<u8>>, until: Instant) -> String {
    let mut bytes = Vec::new();
    while let Ok(chunk) = chunks.recv_timeout(until.saturating_duration_since(Instant::now())) {
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Split `Key: Value` lines on the first `": "`. Lines without the
/// separator are ignored; later duplicates win.
pub fn parse_key_values(output: &str) -> KeyValues {
    let mut out = KeyValues::new();
    for line in output.lines() {
        if let Some((k, v)) = line.split_once(": ") {
            let key = k.trim();
            if !key.is_empty() {
                out.insert(key.to_string(), v.trim().to_string());
            }
        }
    }
    out
}
