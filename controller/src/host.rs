use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use marble_common::{
    sync::load_preferences, DocumentPaths, MachineAction, ModeScheduler, PinLevel, RuntimeConfig,
    TickInputs, TOPIC_CMD_BUTTON1, TOPIC_CMD_BUTTON2, TOPIC_CMD_TOUCH, TOPIC_MACHINE_STATE,
};

use crate::{
    hardware::SimulatedHardware,
    store::{write_snapshot, FileDocumentStore, DEFAULT_RETENTION},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const CONTROL_PERIOD_MS: u64 = 20;
const STATE_PUBLISH_PERIOD: Duration = Duration::from_secs(10);
const STORE_FLUSH_PERIOD: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    machine: Arc<Mutex<ModeScheduler>>,
    store: Arc<Mutex<FileDocumentStore>>,
    hardware: Arc<Mutex<SimulatedHardware>>,
    inputs: Arc<Mutex<InputLevels>>,
    mqtt: AsyncClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct InputLevels {
    button1: PinLevel,
    button2: PinLevel,
    touch: PinLevel,
}

impl Default for InputLevels {
    fn default() -> Self {
        Self {
            button1: PinLevel::High,
            button2: PinLevel::High,
            touch: PinLevel::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputPin {
    Button1,
    Button2,
    Touch,
}

impl InputPin {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "button1" => Some(Self::Button1),
            "button2" => Some(Self::Button2),
            "touch" => Some(Self::Touch),
            _ => None,
        }
    }

    fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            TOPIC_CMD_BUTTON1 => Some(Self::Button1),
            TOPIC_CMD_BUTTON2 => Some(Self::Button2),
            TOPIC_CMD_TOUCH => Some(Self::Touch),
            _ => None,
        }
    }
}

impl InputLevels {
    fn set(&mut self, pin: InputPin, level: PinLevel) {
        match pin {
            InputPin::Button1 => self.button1 = level,
            InputPin::Button2 => self.button2 = level,
            InputPin::Touch => self.touch = level,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("MARBLE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.marble"));

    let mut runtime = load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let shield_present = std::env::var("MARBLE_MOTOR_SHIELD")
        .map(|value| value != "absent")
        .unwrap_or(true);
    let hardware = SimulatedHardware::probe(&runtime.layout, shield_present)
        .context("actuator probe failed")?;

    let retention = std::env::var("MARBLE_STORE_RETENTION")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(DEFAULT_RETENTION);
    let mut store = FileDocumentStore::open(data_dir.join("documents.json"))
        .await
        .context("failed to open document store")?
        .with_retention(retention);
    info!(
        "document store {} ({} documents)",
        store.path().display(),
        store.len()
    );

    let paths = DocumentPaths::new(&runtime.user_uid);
    let preferences = load_preferences(&mut store, &paths, &runtime.preferences);
    info!(
        "preferences: unit cost {}, cost per marble {}, display {}, debug {}",
        preferences.unit_energy_cost,
        preferences.target_cost_per_marble,
        preferences.display_enabled,
        preferences.debug_forced
    );
    let machine = ModeScheduler::new(&runtime, preferences);

    let network = &runtime.network;
    let mut mqtt_options = MqttOptions::new(
        network.client_id.clone(),
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        machine: Arc::new(Mutex::new(machine)),
        store: Arc::new(Mutex::new(store)),
        hardware: Arc::new(Mutex::new(hardware)),
        inputs: Arc::new(Mutex::new(InputLevels::default())),
        mqtt,
    };

    subscribe_topics(&app_state.mqtt, &network.topic_filter).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());
    spawn_store_flush_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/leds", get(handle_get_leds))
        .route("/api/input", post(handle_post_input))
        .with_state(app_state.clone());

    let port = std::env::var("MARBLE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    flush_store(&app_state).await.context("final document flush failed")?;
    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config {}", path.display()))?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let network = &mut runtime.network;
    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(uid) = lookup("MARBLE_USER_UID") {
        runtime.user_uid = uid;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient, sensor_filter: &str) -> anyhow::Result<()> {
    mqtt.subscribe(sensor_filter, QoS::AtMostOnce).await?;
    for topic in [TOPIC_CMD_BUTTON1, TOPIC_CMD_BUTTON2, TOPIC_CMD_TOUCH] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(CONTROL_PERIOD_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let levels = *app_state.inputs.lock().await;
            let inputs = TickInputs {
                now_ms: monotonic_ms(),
                wall_clock: Utc::now(),
                button1: levels.button1,
                button2: levels.button2,
                touch: levels.touch,
            };

            let actions = {
                let mut machine = app_state.machine.lock().await;
                let mut store = app_state.store.lock().await;
                machine.tick(&inputs, &mut *store)
            };

            if !actions.is_empty() {
                execute_machine_actions(&app_state, &actions).await;
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_PERIOD);
        loop {
            interval.tick().await;

            let payload = {
                let machine = app_state.machine.lock().await;
                serde_json::to_vec(&machine.status())
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_MACHINE_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("machine state publish failed: {err}");
                    }
                }
                Err(err) => warn!("machine state serialization failed: {err}"),
            }
        }
    });
}

fn spawn_store_flush_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STORE_FLUSH_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = flush_store(&app_state).await {
                warn!("document flush failed: {err:#}");
            }
        }
    });
}

/// Serializes the store under its lock and writes the file after releasing it.
async fn flush_store(app_state: &AppState) -> anyhow::Result<()> {
    let (path, payload) = {
        let mut store = app_state.store.lock().await;
        (store.path().to_path_buf(), store.take_snapshot()?)
    };
    let Some(payload) = payload else {
        return Ok(());
    };

    if let Err(err) = write_snapshot(&path, payload).await {
        app_state.store.lock().await.mark_dirty();
        return Err(err);
    }
    debug!("documents flushed to {}", path.display());
    Ok(())
}

async fn execute_machine_actions(app_state: &AppState, actions: &[MachineAction]) {
    debug!("executing {} machine action(s)", actions.len());
    app_state.hardware.lock().await.apply(actions);
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    if let Some(pin) = InputPin::from_topic(&topic) {
        let message = std::str::from_utf8(&payload).context("non utf8 command payload")?;
        let Some(level) = PinLevel::parse(message) else {
            warn!("unknown input level {message:?} on {topic}");
            return Ok(());
        };
        app_state.inputs.lock().await.set(pin, level);
        return Ok(());
    }

    let now_ms = monotonic_ms();
    let mut machine = app_state.machine.lock().await;
    let mut store = app_state.store.lock().await;
    machine
        .handle_sensor_message(&topic, &payload, now_ms, Utc::now(), &mut *store)
        .with_context(|| format!("dropping sensor message on {topic}"))
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.machine.lock().await.status();
    Json(status)
}

async fn handle_get_leds(State(state): State<AppState>) -> impl IntoResponse {
    let frame = state.hardware.lock().await.ring.frame();
    Json(frame)
}

async fn handle_post_input(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(pin) = params.get("pin").and_then(|value| InputPin::parse(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'pin' parameter");
    };
    let Some(level) = params.get("level").and_then(|value| PinLevel::parse(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'level' parameter");
    };

    let levels = {
        let mut inputs = state.inputs.lock().await;
        inputs.set(pin, level);
        *inputs
    };
    Json(levels).into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
