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

//! Product naming, model identifiers and UPC lookup.
//!
//! Product names come from a built-in table keyed by the hardware
//! identifier (`iPhone14,5`). Model identifiers and UPC codes come from two
//! optional JSON mapping files; when those are absent the lookups answer
//! `N/A`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::imei::NOT_AVAILABLE;

const UNKNOWN_PREFIX: &str = "Unknown (";
const UPC_LEN: usize = 12;

const PRODUCT_NAMES: &[(&str, &str)] = &[
    ("iPhone7,2", "iPhone 6"),
    ("iPhone7,1", "iPhone 6 Plus"),
    ("iPhone8,1", "iPhone 6s"),
    ("iPhone8,2", "iPhone 6s Plus"),
    ("iPhone8,4", "iPhone SE (1st generation)"),
    ("iPhone9,1", "iPhone 7"),
    ("iPhone9,3", "iPhone 7"),
    ("iPhone9,2", "iPhone 7 Plus"),
    ("iPhone9,4", "iPhone 7 Plus"),
    ("iPhone10,1", "iPhone 8"),
    ("iPhone10,4", "iPhone 8"),
    ("iPhone10,2", "iPhone 8 Plus"),
    ("iPhone10,5", "iPhone 8 Plus"),
    ("iPhone10,3", "iPhone X"),
    ("iPhone10,6", "iPhone X"),
    ("iPhone11,8", "iPhone XR"),
    ("iPhone11,2", "iPhone XS"),
    ("iPhone11,6", "iPhone XS Max"),
    ("iPhone12,1", "iPhone 11"),
    ("iPhone12,3", "iPhone 11 Pro"),
    ("iPhone12,5", "iPhone 11 Pro Max"),
    ("iPhone12,8", "iPhone SE (2nd generation)"),
    ("iPhone13,1", "iPhone 12 mini"),
    ("iPhone13,2", "iPhone 12"),
    ("iPhone13,3", "iPhone 12 Pro"),
    ("iPhone13,4", "iPhone 12 Pro Max"),
    ("iPhone14,4", "iPhone 13 mini"),
    ("iPhone14,5", "iPhone 13"),
    ("iPhone14,2", "iPhone 13 Pro"),
    ("iPhone14,3", "iPhone 13 Pro Max"),
    ("iPhone14,6", "iPhone SE (3rd generation)"),
    ("iPhone14,7", "iPhone 14"),
    ("iPhone14,8", "iPhone 14 Plus"),
    ("iPhone15,2", "iPhone 14 Pro"),
    ("iPhone15,3", "iPhone 14 Pro Max"),
    ("iPhone15,4", "iPhone 15"),
    ("iPhone15,5", "iPhone 15 Plus"),
    ("iPhone16,1", "iPhone 15 Pro"),
    ("iPhone16,2", "iPhone 15 Pro Max"),
    ("iPhone17,1", "iPhone 16"),
    ("iPhone17,2", "iPhone 16 Plus"),
    ("iPhone17,3", "iPhone 16 Pro"),
    ("iPhone17,4", "iPhone 16 Pro Max"),
];

/// Sales region inferred from the part number suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    China,
    Japan,
    Global,
}

impl Region {
    pub fn from_part(part: &str) -> Self {
        if part == NOT_AVAILABLE {
            return Region::Global;
        }
        let p = part.to_uppercase();
        if p.contains("LL/A") || p.contains("US/") {
            Region::Us
        } else if p.contains("CH/A") || p.contains("CN/A") {
            Region::China
        } else if p.contains("J/A") || p.contains("JP/A") {
            Region::Japan
        } else {
            Region::Global
        }
    }

    /// Key used for this region in the UPC mapping file.
    pub fn key(self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::China => "China",
            Region::Japan => "Japan",
            Region::Global => "Global",
        }
    }

    /// Trailing digit of the model identifier sold in this region.
    fn model_suffix(self) -> Option<char> {
        match self {
            Region::Us => Some('4'),
            Region::China => Some('8'),
            Region::Japan => Some('6'),
            Region::Global => None,
        }
    }
}

/// product name -> storage label ("128 GB") -> region -> UPC
pub type UpcTable = HashMap<String, BTreeMap<String, BTreeMap<String, Value>>>;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: HashMap<String, Vec<String>>,
    upcs: UpcTable,
}

impl Catalog {
    /// Product names only, no model or UPC data.
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn with_mappings(models: HashMap<String, Vec<String>>, upcs: UpcTable) -> Self {
        Self { models, upcs }
    }

    /// Load both mapping files. A missing or unreadable file only disables
    /// the lookups that depend on it.
    pub fn load(model_path: &Path, upc_path: &Path) -> Self {
        Self {
            models: load_mapping(model_path),
            upcs: load_mapping(upc_path),
        }
    }

    pub fn product_name(&self, product_type: &str) -> String {
        PRODUCT_NAMES
            .iter()
            .find(|(id, _)| *id == product_type)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| format!("{}{})", UNKNOWN_PREFIX, product_type))
    }

    /// False for the placeholder produced by an unknown hardware identifier.
    pub fn is_resolved(product_name: &str) -> bool {
        !product_name.starts_with(UNKNOWN_PREFIX)
    }

    pub fn model_id(&self, product_name: &str, part: &str) -> String {
        let models = match self.models.get(product_name) {
            Some(m) if !m.is_empty() => m,
            _ => return NOT_AVAILABLE.to_string(),
        };
        if models.len() == 1 || part.is_empty() || part == NOT_AVAILABLE {
            return models[0].clone();
        }
        Region::from_part(part)
            .model_suffix()
            .and_then(|suffix| models.iter().find(|m| m.ends_with(suffix)))
            .unwrap_or(&models[0])
            .clone()
    }

    /// UPC for a product/storage/region. Falls back to the nearest storage
    /// tier, then to the Global region, then to any region listed.
    pub fn upc(&self, product_name: &str, storage: &str, part: &str) -> String {
        let Some(by_storage) = self.upcs.get(product_name) else {
            return NOT_AVAILABLE.to_string();
        };
        let Some(wanted) = leading_number(storage) else {
            return NOT_AVAILABLE.to_string();
        };

        let tier = by_storage
            .iter()
            .filter_map(|(label, regions)| leading_number(label).map(|n| (n, regions)))
            .min_by_key(|(n, _)| n.abs_diff(wanted))
            .map(|(_, regions)| regions);
        let Some(regions) = tier else {
            return NOT_AVAILABLE.to_string();
        };

        let region = Region::from_part(part);
        let value = regions
            .get(region.key())
            .filter(|v| upc_text(v).is_some())
            .or_else(|| regions.get(Region::Global.key()).filter(|v| upc_text(v).is_some()))
            .or_else(|| regions.values().find(|v| upc_text(v).is_some()));

        value
            .and_then(upc_text)
            .map(|s| format_upc(&s))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }
}

fn load_mapping<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("mapping {} not loaded: {}", path.display(), e);
            return T::default();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("ignoring malformed mapping {}: {}", path.display(), e);
        T::default()
    })
}

fn leading_number(label: &str) -> Option<u32> {
    label.split_whitespace().next()?.parse().ok()
}

fn upc_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() && s != NOT_AVAILABLE => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Digits only, left-padded with zeros or cut to twelve.
pub fn format_upc(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return NOT_AVAILABLE.to_string();
    }
    if digits.len() >= UPC_LEN {
        digits[..UPC_LEN].to_string()
    } else {
        format!("{:0>width$}", digits, width = UPC_LEN)
    }
}
