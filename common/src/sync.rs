use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::{json, Value};

use crate::{
    config::Preferences,
    error::StoreError,
    registry::DeviceRegistry,
    store::{Document, DocumentStore, StructuredQuery},
};

pub const SENSOR_LOCATION: &str = "UCL/OPS/107";
pub const SENSOR_TYPE: &str = "EM";

const OVERALL: &str = "overall";

/// Document layout under `device/<uid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    root: String,
}

impl DocumentPaths {
    pub fn new(user_uid: &str) -> Self {
        Self {
            root: format!("device/{user_uid}"),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn sensor(&self, device_id: &str) -> String {
        format!("{}/sensors/{device_id}", self.root)
    }

    pub fn sensor_live(&self, device_id: &str) -> String {
        format!("{}/live", self.sensor(device_id))
    }

    pub fn sensor_history(&self, device_id: &str) -> String {
        format!("{}/history", self.sensor(device_id))
    }

    pub fn overall(&self) -> String {
        self.sensor(OVERALL)
    }

    pub fn overall_live(&self) -> String {
        self.sensor_live(OVERALL)
    }

    pub fn overall_history(&self) -> String {
        self.sensor_history(OVERALL)
    }
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Loads the `preference` map of the root document, field by field over
/// `defaults`. When absent, writes `defaults` back. Store failures fall back
/// to `defaults`.
pub fn load_preferences<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
    defaults: &Preferences,
) -> Preferences {
    let mut preferences = defaults.clone();

    let root = match store.get_document(paths.root()) {
        Ok(root) => root,
        Err(err) => {
            warn!("preference load failed, using defaults: {err}");
            return preferences;
        }
    };

    let Some(stored) = root
        .as_ref()
        .and_then(|root| root.get("preference"))
        .and_then(Value::as_object)
    else {
        info!("user preference not found, creating defaults");
        let fields = document(json!({
            "preference": {
                "unitCost": defaults.unit_energy_cost,
                "targetCost": defaults.target_cost_per_marble,
                "isLEDOn": defaults.display_enabled,
                "isForceStop": defaults.debug_forced,
            }
        }));
        if let Err(err) = store.patch_document(paths.root(), fields, &["preference"]) {
            warn!("failed to store default preferences: {err}");
        }
        return preferences;
    };

    info!("user preference found");
    if let Some(value) = stored.get("unitCost").and_then(Value::as_f64) {
        preferences.unit_energy_cost = value;
    }
    if let Some(value) = stored.get("targetCost").and_then(Value::as_f64) {
        preferences.target_cost_per_marble = value;
    }
    if let Some(value) = stored.get("isLEDOn").and_then(Value::as_bool) {
        preferences.display_enabled = value;
    }
    if let Some(value) = stored.get("isForceStop").and_then(Value::as_bool) {
        preferences.debug_forced = value;
    }
    preferences.sanitize();
    preferences
}

/// Records one telemetry reading: root `lastUpdated`, sensor metadata, then
/// a new `live` document. Stops at the first failure.
pub fn publish_device_live<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
    device_id: &str,
    power: u32,
    now: DateTime<Utc>,
) -> Result<String, StoreError> {
    let timestamp = format_timestamp(now);

    store.patch_document(
        paths.root(),
        document(json!({ "lastUpdated": timestamp })),
        &["lastUpdated"],
    )?;
    store.patch_document(
        &paths.sensor(device_id),
        document(json!({ "location": SENSOR_LOCATION, "type": SENSOR_TYPE })),
        &["location", "type"],
    )?;
    store.create_document(
        &paths.sensor_live(device_id),
        document(json!({ "power": power, "time": timestamp })),
    )
}

/// Updates the overall document and appends an overall `live` entry.
/// Returns the maximum aggregate power now on record.
pub fn publish_overall_live<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
    power_sum: u32,
    device_count: usize,
    now: DateTime<Utc>,
) -> Result<u32, StoreError> {
    let timestamp = format_timestamp(now);
    let overall_path = paths.overall();

    let max_power = match store.get_document(&overall_path)? {
        None => {
            store.patch_document(
                &overall_path,
                document(json!({ "created": timestamp, "maxPower": power_sum })),
                &[],
            )?;
            power_sum
        }
        Some(overall) => {
            let stored_max = max_power_of(&overall).unwrap_or(0);

            let mut fields = document(json!({ "lastUpdated": timestamp }));
            let mut mask = vec!["lastUpdated"];
            if power_sum > stored_max {
                fields.insert("maxPower".to_string(), json!(power_sum));
                mask.push("maxPower");
            }
            store.patch_document(&overall_path, fields, &mask)?;
            stored_max.max(power_sum)
        }
    };

    store.create_document(
        &paths.overall_live(),
        document(json!({
            "time": timestamp,
            "devices": device_count,
            "power": power_sum,
        })),
    )?;

    Ok(max_power)
}

#[derive(Debug, Default)]
pub struct HistoryReport {
    pub stored: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
    pub overall: Option<StoreError>,
}

impl HistoryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.overall.is_none()
    }
}

/// Appends one `history` document per device plus the summed overall entry.
/// A failing device does not stop the others.
pub fn publish_history<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
    registry: &DeviceRegistry,
    now: DateTime<Utc>,
) -> HistoryReport {
    let timestamp = format_timestamp(now);
    let mut report = HistoryReport::default();

    for (device_id, snapshot) in registry.iter_sorted() {
        let fields = document(json!({
            "time": timestamp,
            "total": snapshot.total,
            "today": snapshot.today,
            "yesterday": snapshot.yesterday,
            "startDate": snapshot.start_date,
        }));
        match store.create_document(&paths.sensor_history(device_id), fields) {
            Ok(_) => report.stored.push(device_id.to_string()),
            Err(err) => report.failed.push((device_id.to_string(), err)),
        }
    }

    let overall = document(json!({
        "total": registry.aggregate_total(),
        "today": registry.aggregate_today(),
        "yesterday": registry.aggregate_yesterday(),
        "time": timestamp,
    }));
    if let Err(err) = store.create_document(&paths.overall_history(), overall) {
        report.overall = Some(err);
    }

    report
}

/// Power of the newest overall `live` entry.
pub fn latest_live_power<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
) -> Result<Option<u32>, StoreError> {
    let result = store.run_query(
        &paths.overall(),
        &StructuredQuery::latest("live", &["power", "time"]),
    )?;
    Ok(result
        .first()
        .and_then(|document| document.get("power"))
        .and_then(Value::as_u64)
        .map(|power| power.min(u32::MAX as u64) as u32))
}

/// `maxPower` recorded on the overall document.
pub fn stored_max_power<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
) -> Result<Option<u32>, StoreError> {
    Ok(store
        .get_document(&paths.overall())?
        .as_ref()
        .and_then(max_power_of))
}

fn max_power_of(overall: &Document) -> Option<u32> {
    overall
        .get("maxPower")
        .and_then(Value::as_u64)
        .map(|value| value.min(u32::MAX as u64) as u32)
}

/// Today's usage of the newest overall `history` entry.
pub fn latest_today_usage<S: DocumentStore>(
    store: &mut S,
    paths: &DocumentPaths,
) -> Result<Option<f64>, StoreError> {
    let result = store.run_query(
        &paths.overall(),
        &StructuredQuery::latest("history", &["today", "time"]),
    )?;
    Ok(result
        .first()
        .and_then(|document| document.get("today"))
        .and_then(Value::as_f64))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{registry::DeviceSnapshot, store::MemoryDocumentStore};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 7, 11, hour, minute, 0).unwrap()
    }

    fn paths() -> DocumentPaths {
        DocumentPaths::new("uid-1")
    }

    #[test]
    fn paths_follow_device_layout() {
        let paths = paths();
        assert_eq!(paths.root(), "device/uid-1");
        assert_eq!(paths.sensor_live("plug"), "device/uid-1/sensors/plug/live");
        assert_eq!(paths.overall_history(), "device/uid-1/sensors/overall/history");
    }

    #[test]
    fn missing_preferences_are_written_back() {
        let mut store = MemoryDocumentStore::new();
        let defaults = Preferences::default();

        let loaded = load_preferences(&mut store, &paths(), &defaults);

        assert_eq!(loaded, defaults);
        let root = store.get_document("device/uid-1").unwrap().unwrap();
        assert_eq!(root["preference"]["unitCost"], json!(33.2));
        assert_eq!(root["preference"]["isLEDOn"], json!(true));
    }

    #[test]
    fn stored_preferences_override_field_by_field() {
        let mut store = MemoryDocumentStore::new();
        store
            .patch_document(
                "device/uid-1",
                document(json!({ "preference": { "targetCost": 20, "isForceStop": true } })),
                &[],
            )
            .unwrap();

        let loaded = load_preferences(&mut store, &paths(), &Preferences::default());

        assert_eq!(
            loaded,
            Preferences {
                unit_energy_cost: 33.2,
                target_cost_per_marble: 20.0,
                display_enabled: true,
                debug_forced: true,
            }
        );
    }

    #[test]
    fn unreachable_store_yields_defaults() {
        let mut store = MemoryDocumentStore::new();
        store.set_offline(true);
        let loaded = load_preferences(&mut store, &paths(), &Preferences::default());
        assert_eq!(loaded, Preferences::default());
    }

    #[test]
    fn device_live_chain_writes_three_documents() {
        let mut store = MemoryDocumentStore::new();
        let created = publish_device_live(&mut store, &paths(), "plug", 87, at(10, 0)).unwrap();

        assert!(created.starts_with("device/uid-1/sensors/plug/live/"));
        let root = store.get_document("device/uid-1").unwrap().unwrap();
        assert_eq!(root["lastUpdated"], json!("2023-07-11T10:00:00Z"));
        let sensor = store.get_document("device/uid-1/sensors/plug").unwrap().unwrap();
        assert_eq!(sensor["location"], json!("UCL/OPS/107"));
        let live = store.get_document(&created).unwrap().unwrap();
        assert_eq!(live, document(json!({ "power": 87, "time": "2023-07-11T10:00:00Z" })));
    }

    #[test]
    fn overall_live_tracks_running_maximum() {
        let mut store = MemoryDocumentStore::new();
        let paths = paths();

        assert_eq!(publish_overall_live(&mut store, &paths, 120, 1, at(10, 0)).unwrap(), 120);
        assert_eq!(publish_overall_live(&mut store, &paths, 80, 1, at(10, 1)).unwrap(), 120);
        assert_eq!(publish_overall_live(&mut store, &paths, 260, 2, at(10, 2)).unwrap(), 260);

        let overall = store.get_document(&paths.overall()).unwrap().unwrap();
        assert_eq!(overall["maxPower"], json!(260));
        assert_eq!(overall["created"], json!("2023-07-11T10:00:00Z"));
        assert_eq!(overall["lastUpdated"], json!("2023-07-11T10:02:00Z"));
        assert_eq!(store.list(&paths.overall_live()).len(), 3);
        assert_eq!(latest_live_power(&mut store, &paths).unwrap(), Some(260));
        assert_eq!(stored_max_power(&mut store, &paths).unwrap(), Some(260));
    }

    #[test]
    fn history_writes_device_and_overall_entries() {
        let mut store = MemoryDocumentStore::new();
        let paths = paths();
        let mut registry = DeviceRegistry::new();
        for (id, today) in [("a", 0.5), ("b", 0.25)] {
            registry
                .ingest(
                    id,
                    DeviceSnapshot {
                        today,
                        total: 4.0,
                        start_date: "2023-01-01T00:00:00Z".to_string(),
                        ..DeviceSnapshot::default()
                    },
                )
                .unwrap();
        }

        let report = publish_history(&mut store, &paths, &registry, at(12, 30));

        assert!(report.is_complete());
        assert_eq!(report.stored, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.list(&paths.sensor_history("a")).len(), 1);
        assert_eq!(latest_today_usage(&mut store, &paths).unwrap(), Some(0.75));
    }

    #[test]
    fn queries_on_empty_store_return_none() {
        let mut store = MemoryDocumentStore::new();
        assert_eq!(latest_live_power(&mut store, &paths()).unwrap(), None);
        assert_eq!(latest_today_usage(&mut store, &paths()).unwrap(), None);
        assert_eq!(stored_max_power(&mut store, &paths()).unwrap(), None);
    }
}
