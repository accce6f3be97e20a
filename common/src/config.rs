use serde::{Deserialize, Serialize};

use crate::types::Rgb;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub stale_window_ms: u64,
    pub live_update_interval_ms: u64,
    pub history_push_interval_ms: u64,
    pub live_refresh_interval_ms: u64,
    pub history_refresh_interval_ms: u64,
    pub transition_wait_ms: u64,
    pub save_window_ms: u64,
    pub settle_factor: f64,
    pub debounce_ms: u64,
    pub max_marbles: u32,
    pub history_full_scale_kwh: f64,
    pub min_motor_speed: u8,
    pub max_motor_speed: u8,
    pub saving_motor_speed: u8,
    pub debug_motor_speed: u8,
    pub debug_speed_step: u8,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            stale_window_ms: 60_000,
            live_update_interval_ms: 60_000,
            history_push_interval_ms: 1_800_000,
            live_refresh_interval_ms: 60_000,
            history_refresh_interval_ms: 600_000,
            transition_wait_ms: 250,
            save_window_ms: 3_000,
            settle_factor: 1.3,
            debounce_ms: 10,
            max_marbles: 10,
            history_full_scale_kwh: 2.0,
            min_motor_speed: 20,
            max_motor_speed: 50,
            saving_motor_speed: 30,
            debug_motor_speed: 20,
            debug_speed_step: 5,
        }
    }
}

impl MachineConfig {
    pub fn settle_window_ms(&self) -> u64 {
        (self.save_window_ms as f64 * self.settle_factor).round() as u64
    }

    pub fn animation_frame_ms(&self) -> u64 {
        (self.transition_wait_ms / 5).max(1)
    }
}

/// Physical layout of the LED ring. The live arc starts at `centre` and runs
/// upward; the history arc fills downward from `centre - 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedLayout {
    pub pixel_count: usize,
    pub centre: usize,
    pub max_live_index: usize,
    pub brightness: u8,
    pub centre_color: Rgb,
    pub arc_color: Rgb,
    pub comet_colors: [Rgb; 3],
}

impl Default for LedLayout {
    fn default() -> Self {
        Self {
            pixel_count: 40,
            centre: 19,
            max_live_index: 19,
            brightness: 50,
            centre_color: Rgb::new(255, 0, 0),
            arc_color: Rgb::new(232, 229, 88),
            comet_colors: [
                Rgb::new(232, 239, 247),
                Rgb::new(133, 186, 247),
                Rgb::new(10, 120, 247),
            ],
        }
    }
}

impl LedLayout {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.pixel_count < 3 {
            self.pixel_count = defaults.pixel_count;
        }
        if self.centre == 0 || self.centre >= self.pixel_count {
            self.centre = self.pixel_count / 2;
        }
        self.max_live_index = self
            .max_live_index
            .min(self.pixel_count - 1 - self.centre);
    }

    pub fn max_history_index(&self) -> usize {
        self.centre.saturating_sub(1)
    }
}

/// Preferences stored under the user's root document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub unit_energy_cost: f64,
    pub target_cost_per_marble: f64,
    pub display_enabled: bool,
    pub debug_forced: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            unit_energy_cost: 33.2,
            target_cost_per_marble: 50.0,
            display_enabled: true,
            debug_forced: false,
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if !self.unit_energy_cost.is_finite() || self.unit_energy_cost < 0.0 {
            self.unit_energy_cost = defaults.unit_energy_cost;
        }
        if !self.target_cost_per_marble.is_finite() || self.target_cost_per_marble <= 0.0 {
            self.target_cost_per_marble = defaults.target_cost_per_marble;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
    pub topic_filter: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "mqtt.cetools.org".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "marble-machine".to_string(),
            topic_filter: crate::topics::TOPIC_SENSOR_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub layout: LedLayout,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_user_uid")]
    pub user_uid: String,
}

fn default_user_uid() -> String {
    "local".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            layout: LedLayout::default(),
            preferences: Preferences::default(),
            network: NetworkConfig::default(),
            user_uid: default_user_uid(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.layout.sanitize();
        self.preferences.sanitize();
        if self.user_uid.trim().is_empty() {
            self.user_uid = default_user_uid();
        }
    }
}
