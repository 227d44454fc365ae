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

//! Storage capacity resolution.
//!
//! Devices report raw byte counts that sit below the marketed size (the
//! filesystem takes its share), so the count is snapped to a retail tier.

use crate::imei::NOT_AVAILABLE;
use crate::probe::{parse_key_values, KeyValues, ProbeRequest};

const INFO_KEYS: &[&str] = &[
    "TotalDataCapacity",
    "TotalDiskCapacity",
    "DeviceCapacity",
    "NANDVolumeUsage",
    "DiskUsage",
];

pub const DISK_USAGE_DOMAIN: &str = "com.apple.disk_usage.factory";
const DOMAIN_MARKERS: &[&str] = &["TotalDiskCapacity", "TotalDataCapacity"];

const RETAIL_TIERS_GB: &[u32] = &[16, 32, 64, 128, 256, 512, 1024];
const SNAP_TOLERANCE: f64 = 0.20;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A positive byte count written as plain digits.
fn parse_capacity(value: &str) -> Option<u64> {
    let v = value.trim();
    if v.is_empty() || !v.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    v.parse().ok().filter(|n| *n > 0)
}

/// Storage label ("128 GB") for a device, or `N/A`.
///
/// The full info dump is consulted first; `fetch` is only used for the
/// disk usage domain and the single-key fallback when the dump has no
/// usable count. `fetch` yields stdout of a successful query.
pub fn resolve_storage(info: &KeyValues, fetch: &dyn Fn(&ProbeRequest) -> Option<String>) -> String {
    bytes_from_info(info)
        .or_else(|| {
            let out = fetch(&ProbeRequest::domain(DISK_USAGE_DOMAIN))?;
            parse_key_values(&out)
                .into_iter()
                .filter(|(k, _)| DOMAIN_MARKERS.iter().any(|m| k.contains(m)))
                .find_map(|(_, v)| parse_capacity(&v))
        })
        .or_else(|| fetch(&ProbeRequest::key("TotalDiskCapacity")).and_then(|out| parse_capacity(&out)))
        .map(|bytes| format!("{} GB", snap_capacity_gb(bytes)))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn bytes_from_info(info: &KeyValues) -> Option<u64> {
    INFO_KEYS
        .iter()
        .filter_map(|k| info.get(*k))
        .find_map(|v| parse_capacity(v))
}

/// Map a byte count to the retail tier it was sold as.
pub fn snap_capacity_gb(bytes: u64) -> u32 {
    let gb = bytes as f64 / GIB;

    let mut closest = RETAIL_TIERS_GB[0];
    for &tier in RETAIL_TIERS_GB {
        if (tier as f64 - gb).abs() < (closest as f64 - gb).abs() {
            closest = tier;
        }
    }
    if (gb - closest as f64).abs() <= closest as f64 * SNAP_TOLERANCE {
        return closest;
    }

    if gb > 32.0 && gb < 96.0 {
        64
    } else if gb > 64.0 && gb < 192.0 {
        128
    } else if gb > 192.0 && gb < 384.0 {
        256
    } else if gb > 384.0 && gb < 768.0 {
        512
    } else if gb >= 768.0 {
        1024
    } else {
        closest
    }
}
