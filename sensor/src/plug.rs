use chrono::{DateTime, NaiveDate, Utc};

use marble_common::{EnergyReading, TelemetryPayload, TOPIC_SENSOR_PREFIX};

const TASMOTA_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One simulated Tasmota smart plug with an energy meter.
#[derive(Debug, Clone)]
pub struct SimulatedPlug {
    id: String,
    base_watts: f64,
    swing_watts: f64,
    total_kwh: f64,
    today_kwh: f64,
    yesterday_kwh: f64,
    start_time: String,
    day: NaiveDate,
    last_sample: Option<DateTime<Utc>>,
}

impl SimulatedPlug {
    pub fn new(id: &str, slot: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            base_watts: 60.0 + 45.0 * slot as f64,
            swing_watts: 25.0 + 10.0 * slot as f64,
            total_kwh: 0.0,
            today_kwh: 0.0,
            yesterday_kwh: 0.0,
            start_time: now.format(TASMOTA_TIME_FORMAT).to_string(),
            day: now.date_naive(),
            last_sample: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_will_topic(&self) -> String {
        format!("{TOPIC_SENSOR_PREFIX}/tele/{}/LWT", self.id)
    }

    pub fn telemetry_topic(&self) -> String {
        format!("{TOPIC_SENSOR_PREFIX}/tele/{}/SENSOR", self.id)
    }

    /// Slow sinusoidal load; `tick` advances the phase.
    pub fn power_at(&self, tick: u64) -> u32 {
        let phase = tick as f64 / 12.0 + self.base_watts / 100.0;
        (self.base_watts + self.swing_watts * phase.sin()).max(0.0).round() as u32
    }

    /// Integrates energy since the previous sample and returns the reading.
    pub fn sample(&mut self, tick: u64, now: DateTime<Utc>) -> TelemetryPayload {
        let power = self.power_at(tick);

        if now.date_naive() != self.day {
            self.yesterday_kwh = self.today_kwh;
            self.today_kwh = 0.0;
            self.day = now.date_naive();
        }

        if let Some(last) = self.last_sample {
            let elapsed_s = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
            let kwh = f64::from(power) * elapsed_s / 3_600_000.0;
            self.today_kwh += kwh;
            self.total_kwh += kwh;
        }
        self.last_sample = Some(now);

        TelemetryPayload {
            time: now.format(TASMOTA_TIME_FORMAT).to_string(),
            energy: EnergyReading {
                total_start_time: self.start_time.clone(),
                total: round3(self.total_kwh),
                yesterday: round3(self.yesterday_kwh),
                today: round3(self.today_kwh),
                power,
            },
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn parse_plug_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use marble_common::{parse_sensor_message, SensorMessage};

    use super::*;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 7, 11, 12, 0, 0).unwrap()
    }

    #[test]
    fn energy_accumulates_between_samples() {
        let mut plug = SimulatedPlug::new("plug-a", 0, noon());
        let first = plug.sample(0, noon());
        assert_eq!(first.energy.today, 0.0);

        let second = plug.sample(1, noon() + Duration::hours(1));
        let expected = f64::from(plug.power_at(1)) / 1000.0;
        assert!((second.energy.today - expected).abs() < 0.001);
        assert_eq!(second.energy.total, second.energy.today);
        assert_eq!(second.time, "2023-07-11T13:00:00");
    }

    #[test]
    fn midnight_moves_today_into_yesterday() {
        let mut plug = SimulatedPlug::new("plug-a", 0, noon());
        plug.sample(0, noon());
        let before = plug.sample(1, noon() + Duration::hours(6));
        let after = plug.sample(2, noon() + Duration::hours(13));

        assert_eq!(after.energy.yesterday, before.energy.today);
        assert!(after.energy.total > before.energy.total);
        assert!(after.energy.today < after.energy.total);
    }

    #[test]
    fn payload_is_accepted_by_the_machine_parser() {
        let mut plug = SimulatedPlug::new("plug-b", 1, noon());
        let payload = serde_json::to_vec(&plug.sample(3, noon())).unwrap();
        let message = parse_sensor_message(&plug.telemetry_topic(), &payload).unwrap();
        let SensorMessage::Telemetry { device_id, payload } = message else {
            panic!("expected telemetry");
        };
        assert_eq!(device_id, "plug-b");
        assert_eq!(payload.energy.power, plug.power_at(3));
        assert_eq!(
            parse_sensor_message(&plug.last_will_topic(), b"Online").unwrap(),
            SensorMessage::LastWill {
                device_id: "plug-b".to_string()
            }
        );
    }

    #[test]
    fn plug_list_skips_blank_and_nested_ids() {
        assert_eq!(
            parse_plug_list(" plug-a, ,plug-b,bad/id "),
            vec!["plug-a".to_string(), "plug-b".to_string()]
        );
    }
}
