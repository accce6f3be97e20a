use std::collections::HashMap;

use log::info;
use serde::Serialize;

use crate::error::RegistryError;

/// Latest energy readings reported by one smart plug.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub last_updated_ms: u64,
    pub power: u32,
    pub today: f64,
    pub yesterday: f64,
    pub total: f64,
    pub time: String,
    pub start_date: String,
}

impl DeviceSnapshot {
    /// Placeholder registered from a last-will message before any telemetry.
    pub fn empty(now_ms: u64) -> Self {
        Self {
            last_updated_ms: now_ms,
            ..Self::default()
        }
    }
}

/// Currently reporting devices keyed by the name parsed from the MQTT topic.
///
/// The device count is always the map size; there is no separate counter.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceSnapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins; no ordering check against `snapshot.time`.
    pub fn ingest(&mut self, device_id: &str, snapshot: DeviceSnapshot) -> Result<(), RegistryError> {
        if device_id.is_empty() {
            return Err(RegistryError::EmptyDeviceId);
        }
        self.devices.insert(device_id.to_string(), snapshot);
        Ok(())
    }

    /// Registers a zeroed entry for an unseen device. Returns whether it was added.
    pub fn register(&mut self, device_id: &str, now_ms: u64) -> Result<bool, RegistryError> {
        if device_id.is_empty() {
            return Err(RegistryError::EmptyDeviceId);
        }
        if self.devices.contains_key(device_id) {
            return Ok(false);
        }
        self.devices
            .insert(device_id.to_string(), DeviceSnapshot::empty(now_ms));
        info!(
            "registered device `{device_id}`, {} device(s) known",
            self.devices.len()
        );
        Ok(true)
    }

    /// Drops every entry with `now - last_updated > stale_window_ms` and returns their ids.
    pub fn evict_stale(&mut self, now_ms: u64, stale_window_ms: u64) -> Vec<String> {
        let mut evicted = Vec::new();
        self.devices.retain(|device_id, snapshot| {
            let keep = now_ms.saturating_sub(snapshot.last_updated_ms) <= stale_window_ms;
            if !keep {
                evicted.push(device_id.clone());
            }
            keep
        });

        if !evicted.is_empty() {
            evicted.sort();
            info!(
                "evicted stale device(s) {evicted:?}, {} device(s) remain",
                self.devices.len()
            );
        }
        evicted
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceSnapshot> {
        self.devices.get(device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Entries sorted by device id.
    pub fn iter_sorted(&self) -> Vec<(&str, &DeviceSnapshot)> {
        let mut entries: Vec<_> = self
            .devices
            .iter()
            .map(|(id, snapshot)| (id.as_str(), snapshot))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn aggregate_power(&self) -> u32 {
        self.devices
            .values()
            .fold(0_u32, |sum, device| sum.saturating_add(device.power))
    }

    pub fn aggregate_total(&self) -> f64 {
        self.devices.values().map(|device| device.total).sum()
    }

    pub fn aggregate_today(&self) -> f64 {
        self.devices.values().map(|device| device.today).sum()
    }

    pub fn aggregate_yesterday(&self) -> f64 {
        self.devices.values().map(|device| device.yesterday).sum()
    }
}
