use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

use crate::plug::{parse_plug_list, SimulatedPlug};

const PUBLISH_PERIOD: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("marble-plug-simulator", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let plug_ids = parse_plug_list(
        &std::env::var("SIM_PLUGS").unwrap_or_else(|_| "plug-a,plug-b".to_string()),
    );
    anyhow::ensure!(!plug_ids.is_empty(), "SIM_PLUGS names no plugs");

    let started = Utc::now();
    let mut plugs: Vec<SimulatedPlug> = plug_ids
        .iter()
        .enumerate()
        .map(|(slot, id)| SimulatedPlug::new(id, slot, started))
        .collect();

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    for plug in &plugs {
        mqtt.publish(plug.last_will_topic(), QoS::AtLeastOnce, true, "Online")
            .await
            .with_context(|| format!("failed to publish online status for {}", plug.id()))?;
    }

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("plug simulator started for {plug_ids:?}");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(PUBLISH_PERIOD);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        tick = tick.saturating_add(1);
        let now = Utc::now();

        for plug in &mut plugs {
            let reading = plug.sample(tick, now);
            let payload = serde_json::to_vec(&reading).context("failed to encode telemetry")?;
            debug!("{} -> {} W", plug.id(), reading.energy.power);
            mqtt.publish(plug.telemetry_topic(), QoS::AtLeastOnce, false, payload)
                .await
                .with_context(|| format!("failed to publish telemetry for {}", plug.id()))?;
        }
    }

    for plug in &plugs {
        if let Err(err) = mqtt
            .publish(plug.last_will_topic(), QoS::AtLeastOnce, true, "Offline")
            .await
        {
            warn!("failed to publish offline status for {}: {err}", plug.id());
        }
    }
    info!("plug simulator stopped");
    Ok(())
}
