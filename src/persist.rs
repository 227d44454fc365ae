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

//! Append-only tabular storage of accepted device records.

use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::DataPaths;
use crate::record::DeviceRecord;

pub const RECORD_HEADER: &[&str] = &[
    "IMEI1", "IMEI2", "Serial", "Part", "Product", "Storage", "Color", "ModelID", "UPC", "DeviceName",
    "iOSVersion", "Timestamp",
];

pub const SUMMARY_HEADER: &[&str] = &["Product Name", "Storage", "Color", "IMEI1", "IMEI2"];

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Destination for validated records. Reports success only when the record
/// is durably stored.
#[cfg_attr(test, mockall::automock)]
pub trait RecordSink: Send {
    fn persist(&mut self, record: &DeviceRecord) -> Result<(), PersistenceError>;
}

/// Writes each record to the detail CSV and to the summary sheet.
#[derive(Debug, Clone)]
pub struct CsvSink {
    records: PathBuf,
    summary: PathBuf,
}

impl CsvSink {
    pub fn new(paths: &DataPaths) -> Self {
        Self { records: paths.records_csv.clone(), summary: paths.summary_csv.clone() }
    }

    pub fn records_path(&self) -> &Path {
        &self.records
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary
    }

    /// Delete both output files. Returns the ones that existed.
    pub fn remove_outputs(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        let mut removed = Vec::new();
        for path in [&self.records, &self.summary] {
            match fs::remove_file(path) {
                Ok(()) => {
                    info!("removed {}", path.display());
                    removed.push(path.clone());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(PersistenceError::Io { path: path.clone(), source }),
            }
        }
        Ok(removed)
    }
}

impl RecordSink for CsvSink {
    fn persist(&mut self, record: &DeviceRecord) -> Result<(), PersistenceError> {
        let detail: [&str; 12] = [
            record.imei1.as_str(),
            &record.imei2,
            &record.serial,
            &record.part,
            &record.product_name,
            &record.storage,
            &record.color,
            &record.model_id,
            &record.upc,
            &record.device_name,
            &record.ios_version,
            &record.timestamp,
        ];
        let detail_len = append_row(&self.records, RECORD_HEADER, &detail)
            .map_err(|source| PersistenceError::Io { path: self.records.clone(), source })?;

        let summary: [&str; 5] = [
            record.product_name.as_str(),
            &record.storage,
            &record.color,
            &record.imei1,
            &record.imei2,
        ];
        if let Err(source) = append_row(&self.summary, SUMMARY_HEADER, &summary) {
            // Both files gain the row or neither does.
            if let Err(e) = truncate_to(&self.records, detail_len) {
                warn!("could not roll back {}: {}", self.records.display(), e);
            }
            return Err(PersistenceError::Io { path: self.summary.clone(), source });
        }
        Ok(())
    }
}

/// Append one row, writing `header` first when the file is new or empty.
/// Returns the file length before the append.
fn append_row(path: &Path, header: &[&str], row: &[&str]) -> io::Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let before = file.metadata()?.len();
    let mut buf = String::new();
    if before == 0 {
        buf.push_str(&csv_line(header));
    }
    buf.push_str(&csv_line(row));
    // Header and row go out in a single write.
    if let Err(e) = file.write_all(buf.as_bytes()).and_then(|_| file.flush()) {
        let _ = file.set_len(before);
        return Err(e);
    }
    Ok(before)
}

fn truncate_to(path: &Path, len: u64) -> io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)
}

fn csv_line(fields: &[&str]) -> String {
    let quoted: Vec<Cow<str>> = fields.iter().map(|f| csv_field(f)).collect();
    format!("{}\n", quoted.join(","))
}

fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
