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

//! Operator-facing terminal output.

use crossterm::style::{Color, Stylize};

use crate::imei::mask_imei;
use crate::record::DeviceRecord;
use crate::registry::RegistrySummary;

const RULE_WIDTH: usize = 60;

fn status(icon: &str, message: &str, color: Color) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    println!("{} {} {}", format!("[{}]", ts).dark_grey(), icon, message.with(color));
}

pub fn success(message: &str) {
    status("✓", message, Color::Green);
}

pub fn error(message: &str) {
    status("✗", message, Color::Red);
}

pub fn warning(message: &str) {
    status("!", message, Color::Yellow);
}

pub fn info(message: &str) {
    status("i", message, Color::Cyan);
}

pub fn header(title: &str) {
    let rule = "=".repeat(RULE_WIDTH);
    println!();
    println!("{}", rule.as_str().cyan());
    println!("{}", format!("{:^width$}", title, width = RULE_WIDTH).bold());
    println!("{}", rule.as_str().cyan());
}

/// Label/value pairs shown for a device, IMEIs masked.
pub fn device_lines(record: &DeviceRecord) -> Vec<(&'static str, String)> {
    vec![
        ("Product", record.product_name.clone()),
        ("Model", record.product_type.clone()),
        ("Color", record.color.clone()),
        ("Serial", record.serial.clone()),
        ("Part", record.part.clone()),
        ("Storage", record.storage.clone()),
        ("Model ID", record.model_id.clone()),
        ("UPC", record.upc.clone()),
        ("IMEI 1", mask_imei(&record.imei1)),
        ("IMEI 2", mask_imei(&record.imei2)),
        ("Device Name", record.device_name.clone()),
        ("iOS Version", record.ios_version.clone()),
    ]
}

pub fn device_summary(record: &DeviceRecord) {
    println!();
    println!("{}", format!("{:-^width$}", " DEVICE INFORMATION ", width = RULE_WIDTH).cyan());
    for (label, value) in device_lines(record) {
        println!("{}: {}", format!("{:<14}", label).bold(), value.green());
    }
    println!("{}", "-".repeat(RULE_WIDTH).cyan());
}

pub fn duplicate_notice(record: &DeviceRecord) {
    warning(&format!(
        "Already processed: {} ({})",
        record.product_name,
        mask_imei(&record.imei1)
    ));
}

pub fn registry_summary(summary: &RegistrySummary) {
    if !summary.pending.is_empty() {
        warning(&format!("{} device(s) waiting for trust", summary.pending.len()));
    }
    if !summary.untrusted.is_empty() {
        warning(&format!("{} device(s) not trusted", summary.untrusted.len()));
    }
    if !summary.failed.is_empty() {
        warning(&format!("{} device(s) with failed extraction", summary.failed.len()));
    }
}
