use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MotorDirection {
    Forward,
    Backward,
    Release,
}

impl MotorDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
            Self::Release => "RELEASE",
        }
    }
}

/// Output commands emitted by one scheduler tick, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineAction {
    SetPixel { index: usize, color: Rgb },
    ClearPixels,
    ShowPixels,
    MotorRun(MotorDirection),
    MotorSpeed(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    Normal,
    Debug,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardPhase {
    Idle,
    SavingAnimating,
    SavingSettling,
}

impl RewardPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::SavingAnimating => "SAVING_ANIMATING",
            Self::SavingSettling => "SAVING_SETTLING",
        }
    }

    pub fn is_saving(self) -> bool {
        self != Self::Idle
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub mode: &'static str,
    pub reward_phase: &'static str,
    pub saved_marbles: u32,
    pub target_marbles: u32,
    pub device_count: usize,
    pub power_sum: u32,
    pub today_sum: f64,
    pub yesterday_sum: f64,
    pub total_sum: f64,
    pub live_power: u32,
    pub power_baseline: Option<u32>,
    pub live_index: Option<usize>,
    pub rendered_live_index: usize,
    pub history_index: usize,
    pub display_on: bool,
    pub motor_direction: &'static str,
    pub motor_speed: u8,
}
