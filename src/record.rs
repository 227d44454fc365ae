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

//! The device record produced by a successful extraction.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Catalog;
use crate::imei::{is_canonical_imei, normalize_imei, NOT_AVAILABLE};
use crate::probe::KeyValues;

pub const KEY_IMEI: &str = "InternationalMobileEquipmentIdentity";
pub const KEY_IMEI2: &str = "InternationalMobileEquipmentIdentity2";
pub const KEY_SERIAL: &str = "SerialNumber";
pub const KEY_MODEL_NUMBER: &str = "ModelNumber";
pub const KEY_REGION: &str = "RegionInfo";
pub const KEY_PRODUCT_TYPE: &str = "ProductType";
pub const KEY_DEVICE_NAME: &str = "DeviceName";
pub const KEY_PRODUCT_VERSION: &str = "ProductVersion";
pub const KEY_WIFI: &str = "WiFiAddress";
pub const KEY_BLUETOOTH: &str = "BluetoothAddress";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub imei1: String,
    pub imei2: String,
    pub serial: String,
    /// Model number plus region, e.g. `MLPF3LL/A`.
    pub part: String,
    pub product_name: String,
    pub product_type: String,
    pub storage: String,
    pub color: String,
    pub model_id: String,
    pub upc: String,
    pub device_name: String,
    pub ios_version: String,
    pub wifi_address: String,
    pub bluetooth_address: String,
    pub udid: String,
    pub timestamp: String,
}

fn field(info: &KeyValues, key: &str) -> String {
    info.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_AVAILABLE)
        .to_string()
}

fn is_missing(v: &str) -> bool {
    v.is_empty() || v == NOT_AVAILABLE
}

impl DeviceRecord {
    /// Assemble a record from a full key/value dump plus the separately
    /// resolved storage and color.
    pub fn from_info(
        udid: &str,
        info: &KeyValues,
        catalog: &Catalog,
        storage: String,
        color: String,
        timestamp: String,
    ) -> Self {
        let product_type = field(info, KEY_PRODUCT_TYPE);
        let product_name = catalog.product_name(&product_type);

        let model_number = info.get(KEY_MODEL_NUMBER).map(|s| s.trim()).unwrap_or("");
        let region = info.get(KEY_REGION).map(|s| s.trim()).unwrap_or("");
        let part = if model_number.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            format!("{}{}", model_number, region)
        };

        let model_id = catalog.model_id(&product_name, &part);
        let upc = catalog.upc(&product_name, &storage, &part);

        Self {
            imei1: normalize_imei(info.get(KEY_IMEI).map(String::as_str).unwrap_or("")),
            imei2: normalize_imei(info.get(KEY_IMEI2).map(String::as_str).unwrap_or("")),
            serial: field(info, KEY_SERIAL),
            part,
            product_name,
            product_type,
            storage,
            color,
            model_id,
            upc,
            device_name: field(info, KEY_DEVICE_NAME),
            ios_version: field(info, KEY_PRODUCT_VERSION),
            wifi_address: field(info, KEY_WIFI),
            bluetooth_address: field(info, KEY_BLUETOOTH),
            udid: udid.to_string(),
            timestamp,
        }
    }

    /// Check the fields a record must carry before it may be persisted.
    /// Every problem is reported, not just the first.
    pub fn validate(&self) -> Result<(), ValidationReport> {
        let mut problems = Vec::new();

        if is_missing(&self.imei1) {
            problems.push(ValidationError::MissingField("imei1"));
        } else if !is_canonical_imei(&self.imei1) {
            problems.push(ValidationError::MalformedImei { field: "imei1", value: self.imei1.clone() });
        }
        if !is_missing(&self.imei2) && !is_canonical_imei(&self.imei2) {
            problems.push(ValidationError::MalformedImei { field: "imei2", value: self.imei2.clone() });
        }
        if is_missing(&self.serial) {
            problems.push(ValidationError::MissingField("serial"));
        }
        if is_missing(&self.product_name) || !Catalog::is_resolved(&self.product_name) {
            problems.push(ValidationError::MissingField("product_name"));
        }
        if is_missing(&self.storage) {
            problems.push(ValidationError::MissingField("storage"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationReport(problems))
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("malformed {field} {value:?}")]
    MalformedImei { field: &'static str, value: String },
}

/// All validation problems of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport(pub Vec<ValidationError>);

impl ValidationReport {
    pub fn problems(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.0
            .iter()
            .filter_map(|p| match p {
                ValidationError::MissingField(f) => Some(*f),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        f.write_str(&parts.join(", "))
    }
}

impl std::error::Error for ValidationReport {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{create_full_info, create_mock_record};

    #[test]
    fn test_from_info_builds_complete_record() {
        let info = create_full_info("353012345678901");
        let rec = DeviceRecord::from_info(
            "udid-1",
            &info,
            &Catalog::builtin(),
            "128 GB".into(),
            "Midnight".into(),
            "2025-01-01 10:00:00".into(),
        );
        assert_eq!(rec.imei1, "353012345678901");
        assert_eq!(rec.imei2, NOT_AVAILABLE);
        assert_eq!(rec.product_name, "iPhone 13");
        assert_eq!(rec.part, "MLPF3LL/A");
        assert_eq!(rec.serial, "F2LXK0ABCDEF");
        assert_eq!(rec.udid, "udid-1");
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_from_info_normalizes_imei_fields() {
        let mut info = create_full_info("35 301234 567890 12");
        info.insert(KEY_IMEI2.into(), "1234".into());
        let rec = DeviceRecord::from_info("u", &info, &Catalog::builtin(), "64 GB".into(), "Red".into(), "t".into());
        assert_eq!(rec.imei1, "353012345678901");
        assert_eq!(rec.imei2, NOT_AVAILABLE);
    }

    #[test]
    fn test_from_info_without_model_number_has_no_part() {
        let mut info = create_full_info("353012345678901");
        info.remove(KEY_MODEL_NUMBER);
        let rec = DeviceRecord::from_info("u", &info, &Catalog::builtin(), "64 GB".into(), "Red".into(), "t".into());
        assert_eq!(rec.part, NOT_AVAILABLE);
    }

    #[test]
    fn test_validate_reports_every_missing_field() {
        let mut rec = create_mock_record("353012345678901");
        rec.imei1 = NOT_AVAILABLE.into();
        rec.serial = String::new();
        rec.storage = NOT_AVAILABLE.into();
        let report = rec.validate().unwrap_err();
        assert_eq!(report.missing_fields(), vec!["imei1", "serial", "storage"]);
        assert_eq!(report.to_string(), "missing imei1, missing serial, missing storage");
    }

    #[test]
    fn test_validate_rejects_unresolved_product() {
        let mut rec = create_mock_record("353012345678901");
        rec.product_name = "Unknown (iPhone99,1)".into();
        assert_eq!(rec.validate().unwrap_err().missing_fields(), vec!["product_name"]);
    }

    #[test]
    fn test_validate_rejects_malformed_imei() {
        let mut rec = create_mock_record("353012345678901");
        rec.imei1 = "35301234567890X".into();
        let report = rec.validate().unwrap_err();
        assert!(matches!(report.problems()[0], ValidationError::MalformedImei { field: "imei1", .. }));
    }

    #[test]
    fn test_validate_allows_missing_secondary_imei() {
        let mut rec = create_mock_record("353012345678901");
        rec.imei2 = NOT_AVAILABLE.into();
        rec.color = NOT_AVAILABLE.into();
        assert!(rec.validate().is_ok());
    }
}
