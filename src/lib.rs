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

//! idevscan - iPhone USB scanner
//!
//! This library watches USB-attached iPhones, waits for the host to be
//! trusted, extracts identity and hardware details, and records each device
//! once by primary IMEI.

pub mod imei;
pub mod scheduler;
pub mod config;
pub mod probe;
pub mod registry;
pub mod trust;
pub mod catalog;
pub mod record;
pub mod storage;
pub mod color;
pub mod extract;
pub mod seen;
pub mod persist;
pub mod reconcile;
pub mod logger;
pub mod console;
pub mod service;

#[cfg(test)]
pub mod test_utils;
