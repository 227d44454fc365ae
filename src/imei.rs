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

//! IMEI normalization.

/// Sentinel used for any attribute the device did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

pub const IMEI_LEN: usize = 15;

/// Reduce a raw IMEI string to its 15-digit canonical form.
///
/// Non-digits are stripped. Sixteen or more digits are cut to the first
/// fifteen (16 covers the IMEISV convention). Fewer than fifteen digits is
/// never padded and yields [`NOT_AVAILABLE`].
pub fn normalize_imei(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < IMEI_LEN {
        return NOT_AVAILABLE.to_string();
    }
    digits[..IMEI_LEN].to_string()
}

pub fn is_canonical_imei(s: &str) -> bool {
    s.len() == IMEI_LEN && s.chars().all(|c| c.is_ascii_digit())
}

/// Shorten an IMEI for display: first 8 digits, an ellipsis, last 4.
pub fn mask_imei(imei: &str) -> String {
    if imei == NOT_AVAILABLE || imei.len() < 8 {
        return imei.to_string();
    }
    let tail = if imei.len() > 12 { &imei[imei.len() - 4..] } else { "" };
    format!("{}...{}", &imei[..8], tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_exact_fifteen() {
        assert_eq!(normalize_imei("353012345678901"), "353012345678901");
    }

    #[test]
    fn test_normalize_sixteen_truncates() {
        assert_eq!(normalize_imei("3530123456789012"), "353012345678901");
    }

    #[test]
    fn test_normalize_too_short() {
        assert_eq!(normalize_imei("ABC-3530-1234"), NOT_AVAILABLE);
        assert_eq!(normalize_imei("35301234567890"), NOT_AVAILABLE);
    }

    #[test]
    fn test_normalize_empty_and_sentinel() {
        assert_eq!(normalize_imei(""), NOT_AVAILABLE);
        assert_eq!(normalize_imei(NOT_AVAILABLE), NOT_AVAILABLE);
    }

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(normalize_imei("35 301234 567890 1"), "353012345678901");
        assert_eq!(normalize_imei("35-301234-567890-1"), "353012345678901");
    }

    #[test]
    fn test_normalize_long_concatenation() {
        assert_eq!(normalize_imei("353012345678901353012345678902"), "353012345678901");
    }

    #[test]
    fn test_normalize_non_ascii_digits_ignored() {
        // Arabic-Indic digits are not ASCII and must not count
        assert_eq!(normalize_imei("٣٥٣٠١٢٣٤٥٦٧٨٩٠١"), NOT_AVAILABLE);
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = [
            "353012345678901",
            "3530123456789012",
            "ABC-3530-1234",
            "",
            "N/A",
            "imei: 35 301234 567890 12345",
            "00000000000000000000",
        ];
        for raw in inputs {
            let once = normalize_imei(raw);
            assert!(once == NOT_AVAILABLE || is_canonical_imei(&once), "bad shape for {:?}", raw);
            assert_eq!(normalize_imei(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_is_canonical_imei() {
        assert!(is_canonical_imei("353012345678901"));
        assert!(!is_canonical_imei("35301234567890"));
        assert!(!is_canonical_imei("35301234567890a"));
        assert!(!is_canonical_imei(NOT_AVAILABLE));
    }

    #[test]
    fn test_mask_imei() {
        assert_eq!(mask_imei("353012345678901"), "35301234...8901");
        assert_eq!(mask_imei(NOT_AVAILABLE), NOT_AVAILABLE);
        assert_eq!(mask_imei("1234"), "1234");
        assert_eq!(mask_imei("1234567890"), "12345678...");
    }
}
