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

//! Enclosure color detection and naming.

use crate::imei::NOT_AVAILABLE;
use crate::probe::{KeyValues, ProbeRequest};

const INFO_KEYS: &[&str] = &[
    "DeviceColor",
    "Color",
    "EnclosureColor",
    "CaseColor",
    "ProductColor",
    "ExternalColor",
];

const MARKETING_DOMAIN: &str = "com.apple.product.model.marketing-name";

// Order matters for the substring pass.
const COLOR_NAMES: &[(&str, &str)] = &[
    ("black", "Black"),
    ("spacegray", "Space Gray"),
    ("spacegrey", "Space Gray"),
    ("silver", "Silver"),
    ("white", "White"),
    ("gold", "Gold"),
    ("rosegold", "Rose Gold"),
    ("rose gold", "Rose Gold"),
    ("purple", "Purple"),
    ("green", "Green"),
    ("yellow", "Yellow"),
    ("red", "Red"),
    ("productred", "Product Red"),
    ("blue", "Blue"),
    ("midnight", "Midnight"),
    ("starlight", "Starlight"),
    ("bluesky", "Blue"),
    ("darkblue", "Blue"),
    ("sierra", "Sierra Blue"),
    ("sierrablue", "Sierra Blue"),
    ("alpinegreen", "Alpine Green"),
    ("alpine", "Alpine Green"),
    ("greenish", "Green"),
    ("deepviolet", "Deep Purple"),
    ("indigo", "Indigo"),
    ("maroon", "Maroon"),
    ("darkred", "Red"),
    ("natural", "Natural Titanium"),
    ("titanium", "Natural Titanium"),
    ("blacktitanium", "Black Titanium"),
    ("whitetitanium", "White Titanium"),
    ("bluetitanium", "Blue Titanium"),
];

/// Shortest raw value allowed to match as a fragment of a known name.
const MIN_FRAGMENT: usize = 3;

/// Color name for a device, or `N/A`. Info keys first, then direct
/// queries through `fetch`.
pub fn resolve_color(info: &KeyValues, fetch: &dyn Fn(&ProbeRequest) -> Option<String>) -> String {
    let from_info = INFO_KEYS
        .iter()
        .filter_map(|k| info.get(*k))
        .map(|v| format_color_name(v))
        .find(|c| c != NOT_AVAILABLE);
    if let Some(color) = from_info {
        return color;
    }

    [
        ProbeRequest::key("DeviceColor"),
        ProbeRequest::key("Color"),
        ProbeRequest::domain(MARKETING_DOMAIN),
    ]
    .iter()
    .filter_map(|req| fetch(req))
    .map(|out| format_color_name(out.trim()))
    .find(|c| c != NOT_AVAILABLE)
    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Turn a raw device color value into a display name.
pub fn format_color_name(raw: &str) -> String {
    let cleaned = raw
        .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
        .trim_end_matches(|c: char| !c.is_ascii_alphabetic() && !c.is_whitespace())
        .trim();
    if cleaned.is_empty() || cleaned == NOT_AVAILABLE {
        return NOT_AVAILABLE.to_string();
    }

    let lower = cleaned.to_lowercase();
    if let Some((_, name)) = COLOR_NAMES.iter().find(|(k, _)| *k == lower) {
        return name.to_string();
    }
    let fragment = lower.len() >= MIN_FRAGMENT;
    if let Some((_, name)) = COLOR_NAMES
        .iter()
        .find(|(k, _)| lower.contains(k) || (fragment && k.contains(lower.as_str())))
    {
        return name.to_string();
    }

    // Hex codes and numeric ids are not names.
    if !cleaned.chars().all(|c| c.is_ascii_alphabetic() || c.is_whitespace()) {
        return NOT_AVAILABLE.to_string();
    }
    let titled: Vec<String> = cleaned.split_whitespace().map(capitalize).collect();
    let formatted = titled.join(" ");
    if formatted.len() >= 2 {
        formatted
    } else {
        NOT_AVAILABLE.to_string()
    }
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_names() {
        assert_eq!(format_color_name("spacegray"), "Space Gray");
        assert_eq!(format_color_name("Midnight"), "Midnight");
        assert_eq!(format_color_name("rose gold"), "Rose Gold");
        assert_eq!(format_color_name("blacktitanium"), "Black Titanium");
    }

    #[test]
    fn test_strips_surrounding_noise() {
        assert_eq!(format_color_name("  #starlight#1 "), "Starlight");
        assert_eq!(format_color_name("2-sierra"), "Sierra Blue");
    }

    #[test]
    fn test_substring_match_uses_table_order() {
        // "black" comes before "blacktitanium"
        assert_eq!(format_color_name("Black Titanium Edition"), "Black");
        assert_eq!(format_color_name("product red"), "Red");
        assert_eq!(format_color_name("sier"), "Sierra Blue");
    }

    #[test]
    fn test_unknown_name_is_title_cased() {
        assert_eq!(format_color_name("desert SAND"), "Desert Sand");
    }

    #[test]
    fn test_numeric_and_hex_values_unavailable() {
        assert_eq!(format_color_name("1"), NOT_AVAILABLE);
        assert_eq!(format_color_name("#e1e4e3"), NOT_AVAILABLE);
        assert_eq!(format_color_name(""), NOT_AVAILABLE);
        assert_eq!(format_color_name("N/A"), NOT_AVAILABLE);
    }

    #[test]
    fn test_resolve_prefers_info_keys() {
        let mut info = KeyValues::new();
        info.insert("DeviceColor".into(), "1".into());
        info.insert("EnclosureColor".into(), "midnight".into());
        let fetch = |_: &ProbeRequest| -> Option<String> { panic!("no query expected") };
        assert_eq!(resolve_color(&info, &fetch), "Midnight");
    }

    #[test]
    fn test_resolve_falls_back_to_queries() {
        let fetch = |req: &ProbeRequest| match req {
            ProbeRequest::Key(k) if k == "Color" => Some("green\n".to_string()),
            _ => None,
        };
        assert_eq!(resolve_color(&KeyValues::new(), &fetch), "Green");
    }

    #[test]
    fn test_resolve_unavailable() {
        let fetch = |_: &ProbeRequest| -> Option<String> { None };
        assert_eq!(resolve_color(&KeyValues::new(), &fetch), NOT_AVAILABLE);
    }
}
