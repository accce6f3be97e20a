//! Top-level cooperative loop of the marble machine.
//!
//! [`ModeScheduler::tick`] is called once per poll with the sampled inputs and
//! the current time. It runs both debouncers, then either the debug tick or
//! the normal tick, and returns the actuator commands for the host to execute.
//! Within a normal tick aggregation runs before rendering, and rendering
//! before actuation.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::{
    config::{LedLayout, MachineConfig, Preferences, RuntimeConfig},
    debounce::{InputDebouncer, PinLevel, TouchSensor},
    display::{compute_history_index, compute_live_index, compute_motor_speed, DisplayController},
    error::PayloadError,
    registry::DeviceRegistry,
    reward::{RewardController, SaveTrigger},
    store::DocumentStore,
    sync::{
        latest_live_power, latest_today_usage, publish_device_live, publish_history,
        publish_overall_live, stored_max_power, DocumentPaths,
    },
    telemetry::{parse_sensor_message, SensorMessage},
    timing::PeriodicGate,
    types::{MachineAction, MachineStatus, MotorDirection, OperatingMode},
};

const MAX_MOTOR_SPEED: u8 = 100;

/// Raw inputs sampled at the start of one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInputs {
    pub now_ms: u64,
    pub wall_clock: DateTime<Utc>,
    pub button1: PinLevel,
    pub button2: PinLevel,
    pub touch: PinLevel,
}

impl TickInputs {
    /// Nothing pressed.
    pub fn idle(now_ms: u64, wall_clock: DateTime<Utc>) -> Self {
        Self {
            now_ms,
            wall_clock,
            button1: PinLevel::High,
            button2: PinLevel::High,
            touch: PinLevel::High,
        }
    }
}

/// All mutable machine state, owned by the scheduler.
#[derive(Debug, Clone)]
pub struct MachineContext {
    pub registry: DeviceRegistry,
    pub reward: RewardController,
    pub display: DisplayController,
    pub preferences: Preferences,
    /// Latest overall power read back from the store.
    pub live_power: u32,
    /// Stored maximum of the overall power; `None` until first observed.
    pub power_baseline: Option<u32>,
    pub motor_direction: MotorDirection,
    pub motor_speed: u8,
    /// Speed last commanded in normal operation, restored after an episode.
    pub live_motor_speed: u8,
}

#[derive(Debug, Clone)]
pub struct ModeScheduler {
    config: MachineConfig,
    layout: LedLayout,
    paths: DocumentPaths,
    context: MachineContext,
    mode: OperatingMode,
    debug_speed: u8,

    button1: InputDebouncer,
    button2: InputDebouncer,
    touch: TouchSensor,

    live_update: PeriodicGate,
    history_push: PeriodicGate,
    live_refresh: PeriodicGate,
    history_refresh: PeriodicGate,
    transition: PeriodicGate,
}

impl ModeScheduler {
    pub fn new(runtime: &RuntimeConfig, preferences: Preferences) -> Self {
        let config = runtime.machine.clone();
        let layout = runtime.layout.clone();

        let mode = if preferences.debug_forced {
            info!("debug mode forced by preference");
            OperatingMode::Debug
        } else {
            OperatingMode::Normal
        };

        let context = MachineContext {
            registry: DeviceRegistry::new(),
            reward: RewardController::new(&config, &layout),
            display: DisplayController::new(preferences.display_enabled),
            preferences,
            live_power: 0,
            power_baseline: None,
            motor_direction: MotorDirection::Release,
            motor_speed: 0,
            live_motor_speed: config.min_motor_speed,
        };

        Self {
            paths: DocumentPaths::new(&runtime.user_uid),
            mode,
            debug_speed: config.debug_motor_speed,
            button1: InputDebouncer::new(config.debounce_ms),
            button2: InputDebouncer::new(config.debounce_ms),
            touch: TouchSensor::default(),
            live_update: PeriodicGate::new(config.live_update_interval_ms),
            history_push: PeriodicGate::new(config.history_push_interval_ms),
            live_refresh: PeriodicGate::immediate(config.live_refresh_interval_ms),
            history_refresh: PeriodicGate::immediate(config.history_refresh_interval_ms),
            transition: PeriodicGate::immediate(config.transition_wait_ms),
            config,
            layout,
            context,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    pub fn layout(&self) -> &LedLayout {
        &self.layout
    }

    /// Sensor ingestion callback. Parse failures are returned to the caller
    /// and leave all state untouched; store failures are logged and skipped.
    pub fn handle_sensor_message<S: DocumentStore>(
        &mut self,
        topic: &str,
        payload: &[u8],
        now_ms: u64,
        wall_clock: DateTime<Utc>,
        store: &mut S,
    ) -> Result<(), PayloadError> {
        if self.mode == OperatingMode::Debug {
            debug!("debug mode, ignoring message on {topic}");
            return Ok(());
        }

        match parse_sensor_message(topic, payload)? {
            SensorMessage::LastWill { device_id } => {
                if let Err(err) = self.context.registry.register(&device_id, now_ms) {
                    warn!("cannot register device from {topic}: {err}");
                }
            }
            SensorMessage::Telemetry { device_id, payload } => {
                let power = payload.energy.power;
                if let Err(err) = self
                    .context
                    .registry
                    .ingest(&device_id, payload.into_snapshot(now_ms))
                {
                    warn!("cannot ingest telemetry from {topic}: {err}");
                    return Ok(());
                }
                match publish_device_live(store, &self.paths, &device_id, power, wall_clock) {
                    Ok(path) => debug!("stored live reading {path}"),
                    Err(err) => warn!("live update for `{device_id}` failed: {err}"),
                }
            }
            SensorMessage::Ignored => {}
        }
        Ok(())
    }

    pub fn tick<S: DocumentStore>(&mut self, inputs: &TickInputs, store: &mut S) -> Vec<MachineAction> {
        let now_ms = inputs.now_ms;
        let button1_edge = self.button1.update(inputs.button1, now_ms);
        let button2_edge = self.button2.update(inputs.button2, now_ms);
        let touch_edge = self.touch.update(inputs.touch);

        if button1_edge {
            self.enter_debug();
        }

        let actions = match self.mode {
            OperatingMode::Debug => self.tick_debug(button2_edge, touch_edge),
            OperatingMode::Normal => self.tick_normal(inputs, button2_edge, touch_edge, store),
        };
        self.commit(actions)
    }

    pub fn status(&self) -> MachineStatus {
        let context = &self.context;
        MachineStatus {
            mode: self.mode.as_str(),
            reward_phase: context.reward.phase().as_str(),
            saved_marbles: context.reward.saved_marbles(),
            target_marbles: context.reward.target_marbles(),
            device_count: context.registry.device_count(),
            power_sum: context.registry.aggregate_power(),
            today_sum: context.registry.aggregate_today(),
            yesterday_sum: context.registry.aggregate_yesterday(),
            total_sum: context.registry.aggregate_total(),
            live_power: context.live_power,
            power_baseline: context.power_baseline,
            live_index: context.display.live_index(),
            rendered_live_index: context.display.rendered_live_index(),
            history_index: context.display.history_index(),
            display_on: context.display.is_on(),
            motor_direction: context.motor_direction.as_str(),
            motor_speed: context.motor_speed,
        }
    }

    // Debug mode is sticky: nothing in the scheduler leaves it.
    fn enter_debug(&mut self) {
        if self.mode == OperatingMode::Debug {
            return;
        }
        info!("button 1 pressed: debug mode");
        self.mode = OperatingMode::Debug;
        self.debug_speed = self.config.debug_motor_speed;
    }

    fn tick_debug(&mut self, button2_edge: bool, touch_edge: bool) -> Vec<MachineAction> {
        if button2_edge {
            self.debug_speed = self
                .debug_speed
                .saturating_add(self.config.debug_speed_step)
                .min(MAX_MOTOR_SPEED);
            info!("debug motor speed {}", self.debug_speed);
        }
        if touch_edge {
            self.context.reward.record_debug_marble();
        }
        vec![
            MachineAction::MotorRun(MotorDirection::Backward),
            MachineAction::MotorSpeed(self.debug_speed),
        ]
    }

    fn tick_normal<S: DocumentStore>(
        &mut self,
        inputs: &TickInputs,
        button2_edge: bool,
        touch_edge: bool,
        store: &mut S,
    ) -> Vec<MachineAction> {
        let now_ms = inputs.now_ms;
        let mut actions = Vec::new();

        self.context
            .registry
            .evict_stale(now_ms, self.config.stale_window_ms);

        if button2_edge {
            let today = self.context.registry.aggregate_today();
            if let Some(entry) = self.context.reward.begin_episode(
                &self.context.preferences,
                today,
                SaveTrigger::Button,
                &self.layout,
            ) {
                info!("button 2 pressed: saving marbles");
                actions.extend(entry);
            }
        }

        if !self.is_saving() && self.live_update.poll(now_ms) {
            actions.extend(self.update_live(inputs.wall_clock, store));
        }

        if !self.is_saving() && self.history_push.poll(now_ms) {
            self.push_history(inputs.wall_clock, store);
        }

        if !self.is_saving() && self.live_refresh.poll(now_ms) {
            self.refresh_live_power(store);
        }

        let reward = self.context.reward.tick(
            now_ms,
            touch_edge,
            self.context.display.is_on(),
            &self.layout,
        );
        actions.extend(reward.actions);
        if reward.settled {
            actions.push(MachineAction::MotorRun(MotorDirection::Forward));
            actions.push(MachineAction::MotorSpeed(self.context.live_motor_speed));
            actions.extend(self.context.display.reset_after_episode(&self.layout));
        }

        let transition_due = !self.is_saving() && self.transition.poll(now_ms);
        if !self.is_saving() {
            self.render(now_ms, transition_due, store, &mut actions);
        }

        if transition_due {
            let speed = compute_motor_speed(
                self.context.live_power,
                self.context.power_baseline,
                &self.config,
            );
            self.context.live_motor_speed = speed;
            actions.push(MachineAction::MotorRun(MotorDirection::Forward));
            actions.push(MachineAction::MotorSpeed(speed));
        }

        actions.extend(self.context.display.blank_once());
        actions
    }

    fn is_saving(&self) -> bool {
        self.context.reward.is_saving()
    }

    /// Pushes the overall live aggregate, adopts the stored maximum as the
    /// power baseline and evaluates the save policy.
    fn update_live<S: DocumentStore>(
        &mut self,
        wall_clock: DateTime<Utc>,
        store: &mut S,
    ) -> Vec<MachineAction> {
        let registry = &self.context.registry;
        let power_sum = registry.aggregate_power();
        let device_count = registry.device_count();
        let today = registry.aggregate_today();

        match publish_overall_live(store, &self.paths, power_sum, device_count, wall_clock) {
            Ok(max_power) => {
                info!("overall live: {power_sum} W over {device_count} device(s), max {max_power} W");
                self.context.power_baseline = Some(max_power);
            }
            Err(err) => warn!("overall live update failed: {err}"),
        }

        self.context
            .reward
            .evaluate(&self.context.preferences, today, &self.layout)
            .unwrap_or_default()
    }

    fn push_history<S: DocumentStore>(&mut self, wall_clock: DateTime<Utc>, store: &mut S) {
        let report = publish_history(store, &self.paths, &self.context.registry, wall_clock);
        if report.is_complete() {
            info!("history stored for {} device(s)", report.stored.len());
            return;
        }
        for (device_id, err) in &report.failed {
            warn!("history update for `{device_id}` failed: {err}");
        }
        if let Some(err) = &report.overall {
            warn!("overall history update failed: {err}");
        }
    }

    /// Reads back the stored maximum and the newest overall power.
    fn refresh_live_power<S: DocumentStore>(&mut self, store: &mut S) {
        match stored_max_power(store, &self.paths) {
            Ok(Some(max_power)) => {
                debug!("stored max power {max_power} W");
                self.context.power_baseline = Some(max_power);
            }
            Ok(None) => debug!("no overall document yet"),
            Err(err) => warn!("max power query failed: {err}"),
        }

        match latest_live_power(store, &self.paths) {
            Ok(Some(power)) => {
                debug!("live power {power} W");
                self.context.live_power = power;
            }
            Ok(None) => debug!("no overall live entry yet"),
            Err(err) => warn!("live power query failed: {err}"),
        }
    }

    fn refresh_history_index<S: DocumentStore>(&mut self, store: &mut S) {
        match latest_today_usage(store, &self.paths) {
            Ok(Some(today)) => {
                let index = compute_history_index(
                    today,
                    self.config.history_full_scale_kwh,
                    self.layout.max_history_index(),
                );
                debug!("today {today} kWh, history index {index}");
                self.context.display.set_history_index(index, &self.layout);
            }
            Ok(None) => debug!("no overall history entry yet"),
            Err(err) => warn!("history query failed: {err}"),
        }
    }

    fn render<S: DocumentStore>(
        &mut self,
        now_ms: u64,
        transition_due: bool,
        store: &mut S,
        actions: &mut Vec<MachineAction>,
    ) {
        let live_index = compute_live_index(
            self.context.live_power,
            self.context.power_baseline,
            self.layout.max_live_index,
        );
        self.context.display.set_live_index(live_index);
        if !self.context.display.is_on() {
            return;
        }

        if transition_due {
            actions.extend(self.context.display.step_live(&self.layout));
        }

        if self.history_refresh.poll(now_ms) {
            self.refresh_history_index(store);
            actions.extend(self.context.display.render_history(&self.layout));
        }
    }

    // Records motor state and drops commands that would not change it.
    fn commit(&mut self, actions: Vec<MachineAction>) -> Vec<MachineAction> {
        let context = &mut self.context;
        actions
            .into_iter()
            .filter(|action| match *action {
                MachineAction::MotorRun(direction) => {
                    let changed = direction != context.motor_direction;
                    context.motor_direction = direction;
                    changed
                }
                MachineAction::MotorSpeed(speed) => {
                    let changed = speed != context.motor_speed;
                    context.motor_speed = speed;
                    changed
                }
                _ => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        store::{Document, MemoryDocumentStore},
        types::{RewardPhase, Rgb},
    };

    const BOOT_MS: i64 = 1_689_076_800_000;
    const PLUG_A: &str = "UCL/OPS/107/EM/gosund/tele/plug-a/SENSOR";

    fn wall(now_ms: u64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(BOOT_MS + now_ms as i64).unwrap()
    }

    fn idle(now_ms: u64) -> TickInputs {
        TickInputs::idle(now_ms, wall(now_ms))
    }

    fn telemetry(power: u32, today: f64) -> Vec<u8> {
        format!(
            r#"{{"Time":"2023-07-11T12:00:00","ENERGY":{{"TotalStartTime":"2023-03-01T00:00:00","Total":10.0,"Yesterday":1.0,"Today":{today},"Power":{power}}}}}"#
        )
        .into_bytes()
    }

    fn machine(preferences: Preferences) -> ModeScheduler {
        ModeScheduler::new(&RuntimeConfig::default(), preferences)
    }

    fn cheap_marbles() -> Preferences {
        Preferences {
            unit_energy_cost: 50.0,
            target_cost_per_marble: 50.0,
            ..Preferences::default()
        }
    }

    fn ingest(machine: &mut ModeScheduler, store: &mut MemoryDocumentStore, now_ms: u64, power: u32, today: f64) {
        machine
            .handle_sensor_message(PLUG_A, &telemetry(power, today), now_ms, wall(now_ms), store)
            .unwrap();
    }

    fn motor(actions: &[MachineAction]) -> Vec<MachineAction> {
        actions
            .iter()
            .filter(|action| {
                matches!(
                    action,
                    MachineAction::MotorRun(_) | MachineAction::MotorSpeed(_)
                )
            })
            .cloned()
            .collect()
    }

    #[test]
    fn telemetry_updates_registry_and_store() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        ingest(&mut machine, &mut store, 1_000, 120, 0.5);

        assert_eq!(machine.context().registry.aggregate_power(), 120);
        assert_eq!(store.list("device/local/sensors/plug-a/live").len(), 1);
        let sensor = store
            .get_document("device/local/sensors/plug-a")
            .unwrap()
            .unwrap();
        assert_eq!(sensor.get("type"), Some(&json!("EM")));
    }

    #[test]
    fn last_will_registers_unseen_device_only() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        ingest(&mut machine, &mut store, 1_000, 120, 0.5);
        machine
            .handle_sensor_message(
                "UCL/OPS/107/EM/gosund/tele/plug-a/LWT",
                b"Online",
                2_000,
                wall(2_000),
                &mut store,
            )
            .unwrap();
        machine
            .handle_sensor_message(
                "UCL/OPS/107/EM/gosund/tele/plug-b/LWT",
                b"Online",
                2_000,
                wall(2_000),
                &mut store,
            )
            .unwrap();

        let registry = &machine.context().registry;
        assert_eq!(registry.device_count(), 2);
        assert_eq!(registry.get("plug-a").map(|device| device.power), Some(120));
        assert_eq!(registry.get("plug-b").map(|device| device.power), Some(0));
    }

    #[test]
    fn malformed_payload_leaves_state_untouched() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        let result = machine.handle_sensor_message(PLUG_A, b"{not json", 1_000, wall(1_000), &mut store);
        assert!(result.is_err());
        assert!(machine.context().registry.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn live_update_sets_baseline_then_refresh_drives_arc_and_motor() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        ingest(&mut machine, &mut store, 1_000, 120, 0.5);

        let first = machine.tick(&idle(1_000), &mut store);
        assert_eq!(
            motor(&first),
            vec![
                MachineAction::MotorRun(MotorDirection::Forward),
                MachineAction::MotorSpeed(20),
            ]
        );
        assert_eq!(machine.context().power_baseline, None);
        assert_eq!(machine.status().live_index, None);

        ingest(&mut machine, &mut store, 60_000, 120, 0.5);
        machine.tick(&idle(60_001), &mut store);
        assert_eq!(machine.context().power_baseline, Some(120));
        assert_eq!(store.list("device/local/sensors/overall/live").len(), 1);

        let refreshed = machine.tick(&idle(61_002), &mut store);
        assert_eq!(motor(&refreshed), vec![MachineAction::MotorSpeed(38)]);

        let status = machine.status();
        assert_eq!(status.live_power, 120);
        assert_eq!(status.live_index, Some(11));
        assert_eq!(status.rendered_live_index, 1);
        assert_eq!(status.motor_direction, "FORWARD");
        assert_eq!(status.motor_speed, 38);
    }

    #[test]
    fn first_tick_adopts_stored_max_power() {
        let mut store = MemoryDocumentStore::new();
        let mut overall = Document::new();
        overall.insert("maxPower".to_string(), json!(300));
        store
            .patch_document("device/local/sensors/overall", overall, &[])
            .unwrap();
        let mut live = Document::new();
        live.insert("time".to_string(), json!("2023-07-11T11:59:00Z"));
        live.insert("power".to_string(), json!(150));
        store
            .create_document("device/local/sensors/overall/live", live)
            .unwrap();

        let mut machine = machine(Preferences::default());
        let first = machine.tick(&idle(0), &mut store);

        assert_eq!(machine.context().power_baseline, Some(300));
        assert_eq!(
            motor(&first),
            vec![
                MachineAction::MotorRun(MotorDirection::Forward),
                MachineAction::MotorSpeed(35),
            ]
        );
        let status = machine.status();
        assert_eq!(status.live_power, 150);
        assert_eq!(status.live_index, Some(9));
        assert_eq!(status.rendered_live_index, 1);
    }

    #[test]
    fn silent_device_is_evicted() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        ingest(&mut machine, &mut store, 1_000, 120, 0.5);
        machine.tick(&idle(1_000), &mut store);
        assert_eq!(machine.status().power_sum, 120);

        machine.tick(&idle(61_001), &mut store);
        let status = machine.status();
        assert_eq!(status.device_count, 0);
        assert_eq!(status.power_sum, 0);
    }

    #[test]
    fn button_episode_counts_touches_and_restores_motor() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(cheap_marbles());
        machine.tick(&idle(100), &mut store);
        ingest(&mut machine, &mut store, 1_000, 80, 2.0);

        let start = machine.tick(
            &TickInputs {
                button2: PinLevel::Low,
                ..idle(1_000)
            },
            &mut store,
        );
        assert_eq!(
            motor(&start),
            vec![
                MachineAction::MotorRun(MotorDirection::Release),
                MachineAction::MotorRun(MotorDirection::Backward),
                MachineAction::MotorSpeed(30),
            ]
        );
        assert_eq!(machine.context().reward.phase(), RewardPhase::SavingAnimating);
        assert_eq!(machine.status().target_marbles, 2);

        machine.tick(&idle(1_020), &mut store);
        let touch = |now_ms| TickInputs {
            touch: PinLevel::Low,
            ..idle(now_ms)
        };

        machine.tick(&touch(4_001), &mut store);
        machine.tick(&idle(4_100), &mut store);
        assert_eq!(machine.status().saved_marbles, 1);

        machine.tick(&touch(7_100), &mut store);
        machine.tick(&idle(7_200), &mut store);
        assert_eq!(machine.context().reward.phase(), RewardPhase::SavingSettling);

        let settled = machine.tick(&idle(7_100 + 3_901), &mut store);
        assert_eq!(
            motor(&settled),
            vec![
                MachineAction::MotorRun(MotorDirection::Release),
                MachineAction::MotorRun(MotorDirection::Forward),
                MachineAction::MotorSpeed(20),
            ]
        );
        let status = machine.status();
        assert_eq!(status.reward_phase, "IDLE");
        assert_eq!(status.saved_marbles, 2);
        assert_eq!(status.target_marbles, 2);
    }

    #[test]
    fn live_update_policy_starts_small_episode() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(cheap_marbles());
        ingest(&mut machine, &mut store, 60_000, 80, 3.0);
        machine.tick(&idle(60_001), &mut store);

        let status = machine.status();
        assert_eq!(status.reward_phase, "SAVING_ANIMATING");
        assert_eq!(status.target_marbles, 3);
    }

    #[test]
    fn large_target_does_not_start_episode() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        ingest(&mut machine, &mut store, 60_000, 80, 100.0);
        machine.tick(&idle(60_001), &mut store);

        let status = machine.status();
        assert_eq!(status.reward_phase, "IDLE");
        assert_eq!(status.target_marbles, 66);
    }

    #[test]
    fn debug_mode_is_sticky_and_counts_raw_touches() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences::default());
        let press = |now_ms| TickInputs {
            button1: PinLevel::Low,
            ..idle(now_ms)
        };

        let entry = machine.tick(&press(100), &mut store);
        assert_eq!(machine.mode(), OperatingMode::Debug);
        assert_eq!(
            entry,
            vec![
                MachineAction::MotorRun(MotorDirection::Backward),
                MachineAction::MotorSpeed(20),
            ]
        );
        assert!(machine.tick(&idle(120), &mut store).is_empty());

        let faster = machine.tick(
            &TickInputs {
                button2: PinLevel::Low,
                ..idle(200)
            },
            &mut store,
        );
        assert_eq!(faster, vec![MachineAction::MotorSpeed(25)]);
        machine.tick(&idle(220), &mut store);

        for now_ms in [300, 340] {
            machine.tick(
                &TickInputs {
                    touch: PinLevel::Low,
                    ..idle(now_ms)
                },
                &mut store,
            );
            machine.tick(&idle(now_ms + 20), &mut store);
        }
        assert_eq!(machine.status().saved_marbles, 2);

        ingest(&mut machine, &mut store, 400, 120, 0.5);
        assert!(machine.context().registry.is_empty());

        machine.tick(&press(500), &mut store);
        machine.tick(&idle(520), &mut store);
        assert_eq!(machine.mode(), OperatingMode::Debug);
    }

    #[test]
    fn forced_debug_preference_starts_in_debug() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences {
            debug_forced: true,
            ..Preferences::default()
        });
        assert_eq!(machine.mode(), OperatingMode::Debug);
        let actions = machine.tick(&idle(100), &mut store);
        assert_eq!(
            actions[0],
            MachineAction::MotorRun(MotorDirection::Backward)
        );
    }

    #[test]
    fn store_outage_is_not_fatal() {
        let mut store = MemoryDocumentStore::new();
        store.set_offline(true);
        let mut machine = machine(Preferences::default());

        ingest(&mut machine, &mut store, 1_000, 150, 0.5);
        assert_eq!(machine.context().registry.device_count(), 1);
        machine.tick(&idle(1_000), &mut store);
        ingest(&mut machine, &mut store, 60_000, 150, 0.5);
        machine.tick(&idle(60_001), &mut store);
        assert_eq!(machine.context().power_baseline, None);
        assert_eq!(machine.status().motor_speed, 20);

        store.set_offline(false);
        ingest(&mut machine, &mut store, 120_000, 150, 0.5);
        machine.tick(&idle(120_002), &mut store);
        assert_eq!(machine.context().power_baseline, Some(150));
    }

    #[test]
    fn disabled_display_blanks_once_and_draws_nothing() {
        let mut store = MemoryDocumentStore::new();
        let mut machine = machine(Preferences {
            display_enabled: false,
            ..Preferences::default()
        });

        let first = machine.tick(&idle(100), &mut store);
        let pixels: Vec<_> = first
            .iter()
            .filter(|action| !matches!(action, MachineAction::MotorRun(_) | MachineAction::MotorSpeed(_)))
            .cloned()
            .collect();
        assert_eq!(pixels, vec![MachineAction::ClearPixels, MachineAction::ShowPixels]);

        let second = machine.tick(&idle(400), &mut store);
        assert!(second
            .iter()
            .all(|action| matches!(action, MachineAction::MotorRun(_) | MachineAction::MotorSpeed(_))));
    }

    #[test]
    fn first_tick_draws_history_arc_from_store() {
        let mut store = MemoryDocumentStore::new();
        let mut history = Document::new();
        history.insert("time".to_string(), json!("2023-07-11T11:30:00Z"));
        history.insert("today".to_string(), json!(1.0));
        store
            .create_document("device/local/sensors/overall/history", history)
            .unwrap();

        let mut machine = machine(Preferences::default());
        let actions = machine.tick(&idle(100), &mut store);

        assert_eq!(machine.status().history_index, 9);
        let arc_color = machine.layout().arc_color;
        assert!(actions.contains(&MachineAction::SetPixel {
            index: 18,
            color: arc_color,
        }));
        assert!(actions.contains(&MachineAction::SetPixel {
            index: 10,
            color: arc_color,
        }));
        assert!(actions.contains(&MachineAction::SetPixel {
            index: 9,
            color: Rgb::OFF,
        }));
    }
}
