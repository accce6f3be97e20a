use serde::{Deserialize, Serialize};

use crate::{
    error::PayloadError,
    registry::DeviceSnapshot,
    topics::{device_id_from_topic, TOPIC_MARKER_LAST_WILL, TOPIC_MARKER_TELEMETRY},
};

/// Tasmota `SENSOR` telemetry as published by the smart plugs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "ENERGY")]
    pub energy: EnergyReading,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    #[serde(rename = "TotalStartTime", default)]
    pub total_start_time: String,
    #[serde(rename = "Total", default)]
    pub total: f64,
    #[serde(rename = "Yesterday", default)]
    pub yesterday: f64,
    #[serde(rename = "Today", default)]
    pub today: f64,
    #[serde(rename = "Power", default)]
    pub power: u32,
}

impl TelemetryPayload {
    pub fn into_snapshot(self, now_ms: u64) -> DeviceSnapshot {
        let mut start_date = self.energy.total_start_time;
        if !start_date.is_empty() && !start_date.ends_with('Z') {
            start_date.push('Z');
        }

        DeviceSnapshot {
            last_updated_ms: now_ms,
            power: self.energy.power,
            today: self.energy.today,
            yesterday: self.energy.yesterday,
            total: self.energy.total,
            time: self.time,
            start_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorMessage {
    LastWill {
        device_id: String,
    },
    Telemetry {
        device_id: String,
        payload: TelemetryPayload,
    },
    Ignored,
}

pub fn parse_sensor_message(topic: &str, payload: &[u8]) -> Result<SensorMessage, PayloadError> {
    let is_last_will = topic.contains(TOPIC_MARKER_LAST_WILL);
    let is_telemetry = topic.contains(TOPIC_MARKER_TELEMETRY);
    if !is_last_will && !is_telemetry {
        return Ok(SensorMessage::Ignored);
    }

    let device_id = device_id_from_topic(topic)
        .ok_or_else(|| PayloadError::MissingDeviceId(topic.to_string()))?
        .to_string();

    if is_last_will {
        return Ok(SensorMessage::LastWill { device_id });
    }

    let text = std::str::from_utf8(payload)?;
    let payload = serde_json::from_str::<TelemetryPayload>(text)?;
    Ok(SensorMessage::Telemetry { device_id, payload })
}
