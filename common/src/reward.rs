use log::info;

use crate::{
    config::{LedLayout, MachineConfig, Preferences},
    types::{MachineAction, MotorDirection, RewardPhase},
};

/// Why a saving episode was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Policy,
    Button,
}

/// Outcome of one reward tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardTick {
    pub actions: Vec<MachineAction>,
    /// Set on the tick that returned the machine to [`RewardPhase::Idle`].
    pub settled: bool,
}

/// Marble reward tracking: target derivation, the save policy and the
/// animate/settle episode.
#[derive(Debug, Clone)]
pub struct RewardController {
    phase: RewardPhase,
    saved_marbles: u32,
    target_marbles: u32,
    last_save_ms: u64,
    last_frame_ms: Option<u64>,
    comet_head: usize,
    save_window_ms: u64,
    settle_window_ms: u64,
    frame_ms: u64,
    max_marbles: u32,
    saving_motor_speed: u8,
}

/// `round(unit_cost * today_usage / cost_per_marble)`; 0 for non-positive results.
pub fn compute_target_marbles(unit_energy_cost: f64, today_usage: f64, cost_per_marble: f64) -> u32 {
    if cost_per_marble <= 0.0 {
        return 0;
    }
    let target = (unit_energy_cost * today_usage / cost_per_marble).round();
    if !target.is_finite() || target <= 0.0 {
        return 0;
    }
    target.min(u32::MAX as f64) as u32
}

impl RewardController {
    pub fn new(config: &MachineConfig, layout: &LedLayout) -> Self {
        Self {
            phase: RewardPhase::Idle,
            saved_marbles: 0,
            target_marbles: 0,
            last_save_ms: 0,
            last_frame_ms: None,
            comet_head: layout.pixel_count.saturating_sub(1),
            save_window_ms: config.save_window_ms,
            settle_window_ms: config.settle_window_ms(),
            frame_ms: config.animation_frame_ms(),
            max_marbles: config.max_marbles,
            saving_motor_speed: config.saving_motor_speed,
        }
    }

    pub fn phase(&self) -> RewardPhase {
        self.phase
    }

    pub fn is_saving(&self) -> bool {
        self.phase.is_saving()
    }

    pub fn saved_marbles(&self) -> u32 {
        self.saved_marbles
    }

    pub fn target_marbles(&self) -> u32 {
        self.target_marbles
    }

    /// Recomputes the target from today's usage. Ignored during an episode.
    pub fn update_target(&mut self, preferences: &Preferences, today_usage: f64) -> u32 {
        if !self.is_saving() {
            self.target_marbles = compute_target_marbles(
                preferences.unit_energy_cost,
                today_usage,
                preferences.target_cost_per_marble,
            );
        }
        self.target_marbles
    }

    pub fn should_start_saving(&self) -> bool {
        if self.target_marbles >= self.max_marbles {
            info!(
                "saving marble: false (target {} too large)",
                self.target_marbles
            );
            return false;
        }
        if self.saved_marbles >= self.target_marbles {
            info!(
                "saving marble: false (saved {} of {})",
                self.saved_marbles, self.target_marbles
            );
            return false;
        }
        info!(
            "saving marble: true (saved {} of {})",
            self.saved_marbles, self.target_marbles
        );
        true
    }

    /// Policy evaluation for the periodic live update: refresh the target and,
    /// when allowed, start an episode.
    pub fn evaluate(
        &mut self,
        preferences: &Preferences,
        today_usage: f64,
        layout: &LedLayout,
    ) -> Option<Vec<MachineAction>> {
        if self.is_saving() {
            return None;
        }
        self.update_target(preferences, today_usage);
        if !self.should_start_saving() {
            return None;
        }
        self.begin_episode(preferences, today_usage, SaveTrigger::Policy, layout)
    }

    /// `Idle -> SavingAnimating`. Returns `None` if an episode is already running.
    pub fn begin_episode(
        &mut self,
        preferences: &Preferences,
        today_usage: f64,
        trigger: SaveTrigger,
        layout: &LedLayout,
    ) -> Option<Vec<MachineAction>> {
        if self.is_saving() {
            return None;
        }

        self.update_target(preferences, today_usage);
        self.saved_marbles = 0;
        self.phase = RewardPhase::SavingAnimating;
        self.last_frame_ms = None;
        self.comet_head = layout.pixel_count.saturating_sub(1);

        info!(
            "saving episode started by {:?}: saved {} / target {}",
            trigger, self.saved_marbles, self.target_marbles
        );

        Some(vec![
            MachineAction::MotorRun(MotorDirection::Release),
            MachineAction::ClearPixels,
            MachineAction::ShowPixels,
        ])
    }

    pub fn tick(
        &mut self,
        now_ms: u64,
        touch_edge: bool,
        display_on: bool,
        layout: &LedLayout,
    ) -> RewardTick {
        match self.phase {
            RewardPhase::Idle => RewardTick::default(),
            RewardPhase::SavingAnimating => self.tick_animating(now_ms, touch_edge, display_on, layout),
            RewardPhase::SavingSettling => self.tick_settling(now_ms),
        }
    }

    /// Debug mode counts every touch edge without target or settling.
    pub fn record_debug_marble(&mut self) -> u32 {
        self.saved_marbles = self.saved_marbles.saturating_add(1);
        info!(
            "saved marble: {} / target marble: {}",
            self.saved_marbles, self.target_marbles
        );
        self.saved_marbles
    }

    fn tick_animating(
        &mut self,
        now_ms: u64,
        touch_edge: bool,
        display_on: bool,
        layout: &LedLayout,
    ) -> RewardTick {
        let mut actions = Vec::new();

        let frame_due = self
            .last_frame_ms
            .map(|last| now_ms.saturating_sub(last) > self.frame_ms)
            .unwrap_or(true);
        if display_on && frame_due {
            self.push_comet_frame(layout, &mut actions);
            self.last_frame_ms = Some(now_ms);
        }

        actions.push(MachineAction::MotorRun(MotorDirection::Backward));
        actions.push(MachineAction::MotorSpeed(self.saving_motor_speed));

        if touch_edge && now_ms.saturating_sub(self.last_save_ms) > self.save_window_ms {
            self.saved_marbles = self.saved_marbles.saturating_add(1);
            self.last_save_ms = now_ms;
            info!(
                "touch sensor pressed: saved {} / target {}",
                self.saved_marbles, self.target_marbles
            );
        }

        if self.saved_marbles >= self.target_marbles {
            info!("saving is finished");
            self.phase = RewardPhase::SavingSettling;
        }

        RewardTick {
            actions,
            settled: false,
        }
    }

    fn tick_settling(&mut self, now_ms: u64) -> RewardTick {
        if now_ms.saturating_sub(self.last_save_ms) <= self.settle_window_ms {
            return RewardTick::default();
        }

        info!("stopping saving sequence");
        self.phase = RewardPhase::Idle;
        RewardTick {
            actions: vec![MachineAction::MotorRun(MotorDirection::Release)],
            settled: true,
        }
    }

    // Three pixel comet moving down the ring, wrapping at index 0.
    fn push_comet_frame(&mut self, layout: &LedLayout, actions: &mut Vec<MachineAction>) {
        let count = layout.pixel_count.max(1);
        let head = self.comet_head % count;

        actions.push(MachineAction::ClearPixels);
        for (offset, color) in [2_usize, 1, 0].into_iter().zip(layout.comet_colors) {
            let index = (head + count - offset % count) % count;
            actions.push(MachineAction::SetPixel { index, color });
        }
        actions.push(MachineAction::ShowPixels);

        self.comet_head = if head == 0 { count - 1 } else { head - 1 };
    }
}
