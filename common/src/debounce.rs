use serde::{Deserialize, Serialize};

/// Raw digital level of an input pin. Inputs are wired active-low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn is_pressed(self) -> bool {
        self == Self::Low
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "press" | "pressed" | "down" | "on" | "0" => Some(Self::Low),
            "high" | "release" | "released" | "up" | "off" | "1" => Some(Self::High),
            _ => None,
        }
    }
}

/// Debounce state for one push button.
#[derive(Debug, Clone)]
pub struct InputDebouncer {
    pressed: bool,
    last_change_ms: u64,
    window_ms: u64,
}

impl InputDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            pressed: false,
            last_change_ms: 0,
            window_ms,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Returns `true` exactly once on the committed edge into the pressed level.
    pub fn update(&mut self, raw: PinLevel, now_ms: u64) -> bool {
        let raw_pressed = raw.is_pressed();
        if raw_pressed == self.pressed
            || now_ms.saturating_sub(self.last_change_ms) <= self.window_ms
        {
            return false;
        }

        self.pressed = raw_pressed;
        self.last_change_ms = now_ms;
        self.pressed
    }
}

/// Edge detector for the touch sensor. No debounce; the save timer gates it.
#[derive(Debug, Clone, Default)]
pub struct TouchSensor {
    was_touched: bool,
}

impl TouchSensor {
    pub fn update(&mut self, raw: PinLevel) -> bool {
        let touched = raw.is_pressed();
        let edge = touched && !self.was_touched;
        self.was_touched = touched;
        edge
    }
}
