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

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound for any single delay, timeout or interval (10 minutes).
const MAX_DURATION_MS: u64 = 600_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_device_info")]
    pub device_info: String,
    #[serde(default = "default_device_list")]
    pub device_list: String,
    #[serde(default = "default_diagnostics")]
    pub diagnostics: String,
}

fn default_device_info() -> String { "ideviceinfo".to_string() }
fn default_device_list() -> String { "idevice_id".to_string() }
fn default_diagnostics() -> String { "idevicediagnostics".to_string() }

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            device_info: default_device_info(),
            device_list: default_device_list(),
            diagnostics: default_diagnostics(),
        }
    }
}

/// Bounds for waiting on the on-device "Trust this computer" prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    #[serde(default = "default_trust_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_trust_delay_ms")]
    pub delay_ms: u64,
    /// Emit the "still waiting" diagnostic on every n-th failed attempt.
    #[serde(default = "default_report_every")]
    pub report_every: u32,
    #[serde(default = "default_trust_check_timeout_ms")]
    pub check_timeout_ms: u64,
    /// Lightweight key requested by a trust check.
    #[serde(default = "default_trust_probe_key")]
    pub probe_key: String,
}

fn default_trust_attempts() -> u32 { 30 }
fn default_trust_delay_ms() -> u64 { 2_000 }
fn default_report_every() -> u32 { 5 }
fn default_trust_check_timeout_ms() -> u64 { 5_000 }
fn default_trust_probe_key() -> String { "DeviceName".to_string() }

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_trust_attempts(),
            delay_ms: default_trust_delay_ms(),
            report_every: default_report_every(),
            check_timeout_ms: default_trust_check_timeout_ms(),
            probe_key: default_trust_probe_key(),
        }
    }
}

impl TrustPolicy {
    pub fn delay(&self) -> Duration { Duration::from_millis(self.delay_ms) }
    pub fn check_timeout(&self) -> Duration { Duration::from_millis(self.check_timeout_ms) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPolicy {
    #[serde(default = "default_extract_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_extract_delay_ms")]
    pub delay_ms: u64,
    /// Timeout of the all-fields probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Timeout of the single-key storage and color fallbacks.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_extract_attempts() -> u32 { 3 }
fn default_extract_delay_ms() -> u64 { 1_000 }
fn default_probe_timeout_ms() -> u64 { 15_000 }
fn default_query_timeout_ms() -> u64 { 10_000 }

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_extract_attempts(),
            delay_ms: default_extract_delay_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl ExtractionPolicy {
    pub fn delay(&self) -> Duration { Duration::from_millis(self.delay_ms) }
    pub fn probe_timeout(&self) -> Duration { Duration::from_millis(self.probe_timeout_ms) }
    pub fn query_timeout(&self) -> Duration { Duration::from_millis(self.query_timeout_ms) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPaths {
    #[serde(default = "default_seen_path")]
    pub seen_imei: PathBuf,
    #[serde(default = "default_csv_path")]
    pub records_csv: PathBuf,
    #[serde(default = "default_summary_path")]
    pub summary_csv: PathBuf,
    #[serde(default = "default_model_mapping_path")]
    pub model_mapping: PathBuf,
    #[serde(default = "default_upc_mapping_path")]
    pub upc_mapping: PathBuf,
    #[serde(default = "default_journal_path")]
    pub journal: PathBuf,
}

fn default_seen_path() -> PathBuf { PathBuf::from("seen_imei.json") }
fn default_csv_path() -> PathBuf { PathBuf::from("iphone_data.csv") }
fn default_summary_path() -> PathBuf { PathBuf::from("BC.csv") }
fn default_model_mapping_path() -> PathBuf { PathBuf::from("model_mapping.json") }
fn default_upc_mapping_path() -> PathBuf { PathBuf::from("upc_mapping.json") }
fn default_journal_path() -> PathBuf { PathBuf::from("idevscan_events.json") }

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            seen_imei: default_seen_path(),
            records_csv: default_csv_path(),
            summary_csv: default_summary_path(),
            model_mapping: default_model_mapping_path(),
            upc_mapping: default_upc_mapping_path(),
            journal: default_journal_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    /// Connection snapshot cadence.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cadence of the untrusted / failed re-check sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_list_timeout_ms")]
    pub list_timeout_ms: u64,
    #[serde(default)]
    pub trust: TrustPolicy,
    #[serde(default)]
    pub extraction: ExtractionPolicy,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub paths: DataPaths,
}

fn default_poll_interval_ms() -> u64 { 2_000 }
fn default_sweep_interval_ms() -> u64 { 10_000 }
fn default_list_timeout_ms() -> u64 { 5_000 }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            list_timeout_ms: default_list_timeout_ms(),
            trust: TrustPolicy::default(),
            extraction: ExtractionPolicy::default(),
            tools: ToolPaths::default(),
            paths: DataPaths::default(),
        }
    }
}

impl ScanConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn sweep_interval(&self) -> Duration { Duration::from_millis(self.sweep_interval_ms) }
    pub fn list_timeout(&self) -> Duration { Duration::from_millis(self.list_timeout_ms) }
}

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("idevscan").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("idevscan")
            .join("config.json");
    }
    PathBuf::from("/etc/idevscan/config.json")
}

/// Load and validate the config at `path`. A missing file means defaults.
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ScanConfig::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let cfg: ScanConfig = serde_json::from_str(&data)
        .with_context(|| format!("parsing {}", path.display()))?;
    validate_config(&cfg).map_err(|e| anyhow!("invalid config {}: {}", path.display(), e))?;
    Ok(cfg)
}

pub fn write_config(path: &Path, cfg: &ScanConfig) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(cfg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, json)
}

fn check_ms(name: &str, v: u64) -> Result<(), String> {
    if v == 0 || v > MAX_DURATION_MS {
        return Err(format!("{} must be between 1 and {} ms", name, MAX_DURATION_MS));
    }
    Ok(())
}

pub fn validate_config(cfg: &ScanConfig) -> Result<(), String> {
    check_ms("poll_interval_ms", cfg.poll_interval_ms)?;
    check_ms("sweep_interval_ms", cfg.sweep_interval_ms)?;
    check_ms("list_timeout_ms", cfg.list_timeout_ms)?;

    let t = &cfg.trust;
    if t.max_attempts == 0 || t.max_attempts > 600 { return Err("trust.max_attempts must be 1..=600".to_string()); }
    if t.report_every == 0 { return Err("trust.report_every must be >= 1".to_string()); }
    check_ms("trust.delay_ms", t.delay_ms)?;
    check_ms("trust.check_timeout_ms", t.check_timeout_ms)?;
    if t.probe_key.trim().is_empty() { return Err("trust.probe_key must not be empty".to_string()); }

    let x = &cfg.extraction;
    if x.max_attempts == 0 || x.max_attempts > 20 { return Err("extraction.max_attempts must be 1..=20".to_string()); }
    check_ms("extraction.delay_ms", x.delay_ms)?;
    check_ms("extraction.probe_timeout_ms", x.probe_timeout_ms)?;
    check_ms("extraction.query_timeout_ms", x.query_timeout_ms)?;

    for (name, tool) in [
        ("tools.device_info", &cfg.tools.device_info),
        ("tools.device_list", &cfg.tools.device_list),
        ("tools.diagnostics", &cfg.tools.diagnostics),
    ] {
        if tool.trim().is_empty() { return Err(format!("{} must not be empty", name)); }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&ScanConfig::default()).is_ok());
    }

    #[test]
    fn test_default_cadences() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(10));
        assert_eq!(cfg.trust.delay(), Duration::from_secs(2));
        assert_eq!(cfg.extraction.max_attempts, 3);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: ScanConfig = serde_json::from_str(r#"{"trust": {"max_attempts": 10}}"#).unwrap();
        assert_eq!(cfg.trust.max_attempts, 10);
        assert_eq!(cfg.trust.delay_ms, 2_000);
        assert_eq!(cfg.tools.device_info, "ideviceinfo");
        assert_eq!(cfg.paths.seen_imei, PathBuf::from("seen_imei.json"));
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        assert!(serde_json::from_str::<ScanConfig>(r#"{"pol_interval_ms": 5}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg = ScanConfig::default();
        cfg.trust.max_attempts = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = ScanConfig::default();
        cfg.extraction.max_attempts = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_waits() {
        let mut cfg = ScanConfig::default();
        cfg.trust.delay_ms = MAX_DURATION_MS + 1;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = ScanConfig::default();
        cfg.poll_interval_ms = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_tool() {
        let mut cfg = ScanConfig::default();
        cfg.tools.device_list = "  ".to_string();
        assert!(validate_config(&cfg).unwrap_err().contains("tools.device_list"));
    }

    #[test]
    fn test_validate_rejects_zero_report_cadence() {
        let mut cfg = ScanConfig::default();
        cfg.trust.report_every = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg, ScanConfig::default());
    }

    #[test]
    fn test_write_then_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = ScanConfig::default();
        cfg.sweep_interval_ms = 30_000;
        write_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn test_load_config_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"extraction": {"max_attempts": 99}}"#).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("extraction.max_attempts"));
    }

    #[test]
    fn test_load_config_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_config_path_with_xdg() {
        let old = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", "/custom/config");
        let path = config_path();
        assert_eq!(path, PathBuf::from("/custom/config/idevscan/config.json"));
        match old {
            Some(v) => env::set_var("XDG_CONFIG_HOME", v),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
    }

    #[test]
    #[serial]
    fn test_config_path_with_home() {
        let old_xdg = env::var("XDG_CONFIG_HOME").ok();
        let old_home = env::var("HOME").ok();
        env::remove_var("XDG_CONFIG_HOME");
        env::set_var("HOME", "/home/testuser");
        assert_eq!(config_path(), PathBuf::from("/home/testuser/.config/idevscan/config.json"));
        if let Some(v) = old_xdg { env::set_var("XDG_CONFIG_HOME", v); }
        match old_home {
            Some(v) => env::set_var("HOME", v),
            None => env::remove_var("HOME"),
        }
    }
}
