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

/*
 * Test utilities for idevscan
 *
 * Scripted fakes for the device probe, the clock and the record sink, plus
 * fixtures for a typical iPhone 13 dump.
 */

#[cfg(test)]
pub mod test_utils {
    use std::collections::{BTreeSet, HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use crate::config::{DataPaths, ScanConfig, TrustPolicy};
    use crate::persist::{PersistenceError, RecordSink};
    use crate::probe::{DeviceProbe, KeyValues, ProbeError, ProbeRequest};
    use crate::record::DeviceRecord;
    use crate::scheduler::{CancelToken, Clock};

    pub const TEST_SERIAL: &str = "F2LXK0ABCDEF";

    type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

    /// Clock whose sleeps return immediately and only move virtual time.
    pub struct ManualClock {
        base: Instant,
        elapsed: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
        hooks: Mutex<Vec<SleepHook>>,
        cancel_after: Mutex<Option<(usize, CancelToken)>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
                hooks: Mutex::new(Vec::new()),
                cancel_after: Mutex::new(None),
            }
        }

        /// Every sleep requested so far, in order.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().clone()
        }

        pub fn advance(&self, by: Duration) {
            *self.elapsed.lock() += by;
        }

        /// Run `hook` with the 1-based sleep count after each sleep.
        pub fn on_sleep<F>(&self, hook: F)
        where
            F: Fn(usize) + Send + Sync + 'static,
        {
            self.hooks.lock().push(Box::new(hook));
        }

        /// Fire `token` once `count` sleeps have happened.
        pub fn cancel_after_sleeps(&self, count: usize, token: CancelToken) {
            *self.cancel_after.lock() = Some((count, token));
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.elapsed.lock()
        }

        fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
            if cancel.is_cancelled() {
                return false;
            }
            let count = {
                let mut sleeps = self.sleeps.lock();
                sleeps.push(duration);
                sleeps.len()
            };
            self.advance(duration);
            for hook in self.hooks.lock().iter() {
                hook(count);
            }
            if let Some((after, token)) = self.cancel_after.lock().as_ref() {
                if count >= *after {
                    token.cancel();
                }
            }
            !cancel.is_cancelled()
        }
    }

    /// One canned answer to a probe query.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Ok(String),
        Fail(String),
        Timeout,
    }

    impl Reply {
        pub fn ok(output: &str) -> Self {
            Reply::Ok(output.to_string())
        }

        pub fn fail(diagnostic: &str) -> Self {
            Reply::Fail(diagnostic.to_string())
        }

        pub fn timeout() -> Self {
            Reply::Timeout
        }

        fn into_result(self, timeout: Duration) -> Result<String, ProbeError> {
            match self {
                Reply::Ok(out) => Ok(out),
                Reply::Fail(diagnostic) => Err(ProbeError::Failed { status: Some(255), diagnostic }),
                Reply::Timeout => Err(ProbeError::TimedOut(timeout)),
            }
        }
    }

    type ScriptKey = (String, ProbeRequest);

    /// [`DeviceProbe`] answering from per-device reply queues. The last reply
    /// of a queue repeats forever.
    #[derive(Default)]
    pub struct ScriptedProbe {
        devices: Mutex<BTreeSet<String>>,
        scripts: Mutex<HashMap<ScriptKey, VecDeque<Reply>>>,
        calls: Mutex<HashMap<ScriptKey, usize>>,
        list_calls: Mutex<usize>,
        shutdowns: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace the replies for `id`/`request`.
        pub fn script(&self, id: &str, request: ProbeRequest, replies: Vec<Reply>) {
            self.scripts.lock().insert((id.to_string(), request), replies.into());
        }

        pub fn set_devices(&self, ids: &[&str]) {
            *self.devices.lock() = ids.iter().map(|s| s.to_string()).collect();
        }

        pub fn calls_for(&self, id: &str, request: &ProbeRequest) -> usize {
            self.calls.lock().get(&(id.to_string(), request.clone())).copied().unwrap_or(0)
        }

        /// Queries only; listings are counted by [`ScriptedProbe::list_calls`].
        pub fn total_calls(&self) -> usize {
            self.calls.lock().values().sum()
        }

        pub fn list_calls(&self) -> usize {
            *self.list_calls.lock()
        }

        pub fn shutdowns(&self) -> Vec<String> {
            self.shutdowns.lock().clone()
        }
    }

    impl DeviceProbe for ScriptedProbe {
        fn list_devices(&self, _timeout: Duration) -> Result<BTreeSet<String>, ProbeError> {
            *self.list_calls.lock() += 1;
            Ok(self.devices.lock().clone())
        }

        fn query(&self, id: &str, request: &ProbeRequest, timeout: Duration) -> Result<String, ProbeError> {
            let key = (id.to_string(), request.clone());
            *self.calls.lock().entry(key.clone()).or_insert(0) += 1;

            let reply = {
                let mut scripts = self.scripts.lock();
                match scripts.get_mut(&key) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };
            match reply {
                Some(reply) => reply.into_result(timeout),
                None => Err(ProbeError::Failed {
                    status: Some(255),
                    diagnostic: format!("ERROR: Device {} not found!", id),
                }),
            }
        }

        fn shutdown(&self, id: &str, _timeout: Duration) -> Result<(), ProbeError> {
            self.shutdowns.lock().push(id.to_string());
            Ok(())
        }
    }

    /// Sink that keeps records in memory. Clones share storage.
    #[derive(Clone, Default)]
    pub struct MemorySink {
        records: Arc<Mutex<Vec<DeviceRecord>>>,
    }

    impl MemorySink {
        pub fn records(&self) -> Arc<Mutex<Vec<DeviceRecord>>> {
            self.records.clone()
        }
    }

    impl RecordSink for MemorySink {
        fn persist(&mut self, record: &DeviceRecord) -> Result<(), PersistenceError> {
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    /// A validated iPhone 13 record with a single IMEI.
    pub fn create_mock_record(imei: &str) -> DeviceRecord {
        DeviceRecord {
            imei1: imei.to_string(),
            imei2: "N/A".to_string(),
            serial: TEST_SERIAL.to_string(),
            part: "MLPF3LL/A".to_string(),
            product_name: "iPhone 13".to_string(),
            product_type: "iPhone14,5".to_string(),
            storage: "128 GB".to_string(),
            color: "Midnight".to_string(),
            model_id: "N/A".to_string(),
            upc: "N/A".to_string(),
            device_name: "Test Phone".to_string(),
            ios_version: "17.5.1".to_string(),
            wifi_address: "a4:83:e7:00:00:01".to_string(),
            bluetooth_address: "a4:83:e7:00:00:02".to_string(),
            udid: "00008110-000A1234ABCD801E".to_string(),
            timestamp: "2025-01-01 10:00:00".to_string(),
        }
    }

    const FULL_INFO: &[(&str, &str)] = &[
        ("ProductType", "iPhone14,5"),
        ("SerialNumber", TEST_SERIAL),
        ("ModelNumber", "MLPF3"),
        ("RegionInfo", "LL/A"),
        ("DeviceName", "Test Phone"),
        ("ProductVersion", "17.5.1"),
        ("WiFiAddress", "a4:83:e7:00:00:01"),
        ("BluetoothAddress", "a4:83:e7:00:00:02"),
        ("TotalDiskCapacity", "128000000000"),
        ("DeviceColor", "midnight"),
    ];

    /// Parsed form of [`full_info_output`]. An empty `imei` leaves the
    /// IMEI key out.
    pub fn create_full_info(imei: &str) -> KeyValues {
        let mut info: KeyValues = FULL_INFO.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        if !imei.is_empty() {
            info.insert("InternationalMobileEquipmentIdentity".to_string(), imei.to_string());
        }
        info
    }

    /// `Key: Value` dump as printed by the info tool.
    pub fn full_info_output(imei: &str) -> String {
        let mut out = String::new();
        if !imei.is_empty() {
            out.push_str(&format!("InternationalMobileEquipmentIdentity: {}\n", imei));
        }
        for (k, v) in FULL_INFO {
            out.push_str(&format!("{}: {}\n", k, v));
        }
        out
    }

    /// Defaults with every data file inside `dir` and a short trust wait.
    pub fn test_config(dir: &Path) -> ScanConfig {
        ScanConfig {
            trust: TrustPolicy { max_attempts: 3, ..TrustPolicy::default() },
            paths: DataPaths {
                seen_imei: dir.join("seen_imei.json"),
                records_csv: dir.join("iphone_data.csv"),
                summary_csv: dir.join("BC.csv"),
                model_mapping: dir.join("model_mapping.json"),
                upc_mapping: dir.join("upc_mapping.json"),
                journal: dir.join("idevscan_events.json"),
            },
            ..ScanConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use crate::probe::{parse_key_values, DeviceProbe, ProbeError, ProbeRequest};
    use crate::scheduler::{CancelToken, Clock};
    use std::time::Duration;

    #[test]
    fn test_full_info_output_parses_to_full_info() {
        assert_eq!(parse_key_values(&full_info_output("353012345678901")), create_full_info("353012345678901"));
        assert!(!full_info_output("").contains("InternationalMobileEquipmentIdentity"));
    }

    #[test]
    fn test_scripted_probe_last_reply_repeats() {
        let probe = ScriptedProbe::new();
        let req = ProbeRequest::key("DeviceName");
        probe.script("a", req.clone(), vec![Reply::timeout(), Reply::ok("Phone")]);
        let t = Duration::from_secs(1);
        assert!(matches!(probe.query("a", &req, t), Err(ProbeError::TimedOut(_))));
        assert_eq!(probe.query("a", &req, t).unwrap(), "Phone");
        assert_eq!(probe.query("a", &req, t).unwrap(), "Phone");
        assert!(probe.query("b", &req, t).is_err());
        assert_eq!(probe.calls_for("a", &req), 3);
        assert_eq!(probe.total_calls(), 4);
    }

    #[test]
    fn test_manual_clock_counts_and_cancels() {
        let clock = ManualClock::new();
        let token = CancelToken::new();
        clock.cancel_after_sleeps(2, token.clone());
        let start = clock.now();
        assert!(clock.sleep(Duration::from_secs(2), &token));
        assert!(!clock.sleep(Duration::from_secs(2), &token));
        assert_eq!(clock.now() - start, Duration::from_secs(4));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn test_mock_record_is_valid() {
        assert!(create_mock_record("353012345678901").validate().is_ok());
    }
}
