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

//! Durable set of primary IMEIs that were already saved.
//!
//! Stored as a JSON array of strings. The whole file is rewritten on every
//! change; a missing file is an empty registry.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeenError {
    #[error("seen registry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("seen registry at {path} is not a JSON string list: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SeenRegistry {
    path: PathBuf,
    imeis: BTreeSet<String>,
}

impl SeenRegistry {
    /// An empty registry bound to `path`; nothing is read.
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf(), imeis: BTreeSet::new() }
    }

    pub fn load(path: &Path) -> Result<Self, SeenError> {
        let imeis = match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => BTreeSet::new(),
            Ok(content) => serde_json::from_str::<Vec<String>>(&content)
                .map_err(|source| SeenError::Parse { path: path.to_path_buf(), source })?
                .into_iter()
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => return Err(SeenError::Io { path: path.to_path_buf(), source }),
        };
        Ok(Self { path: path.to_path_buf(), imeis })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, imei: &str) -> bool {
        self.imeis.contains(imei)
    }

    pub fn len(&self) -> usize {
        self.imeis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imeis.is_empty()
    }

    /// Sorted members.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.imeis.iter()
    }

    /// Add `imei` and rewrite the file. Returns false if it was already
    /// present (nothing written). The in-memory set keeps the entry even
    /// when the write fails, so the session does not save it twice.
    pub fn insert_and_save(&mut self, imei: &str) -> Result<bool, SeenError> {
        if !self.imeis.insert(imei.to_string()) {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn clear_and_save(&mut self) -> Result<(), SeenError> {
        self.imeis.clear();
        self.save()
    }

    pub fn save(&self) -> Result<(), SeenError> {
        let io_err = |source| SeenError::Io { path: self.path.clone(), source };
        let list: Vec<&String> = self.imeis.iter().collect();
        let json = serde_json::to_string_pretty(&list)
            .map_err(|source| SeenError::Parse { path: self.path.clone(), source })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Write next to the target and rename so a crash never leaves a
        // truncated list behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}
