//! Device mode — runs on the feeder itself.
//!
//! 1. Opens the durable feed buffer under `data_dir`
//! 2. Starts the broker link with an offline last will
//! 3. Dispatches feed commands until Ctrl-C; every (re)connect announces
//!    the feeder online and flushes the buffered backlog
//! 4. Shuts down actuator, buffer and session in that order

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use feeder_core::DeviceConfig;
use feeder_device::{FeedOrchestrator, LoggingActuator};
use feeder_mqtt::{DeviceSession, MqttLink};
use feeder_state::FeedBuffer;
use feeder_state::buffer::BUFFER_FILE;

pub async fn run_device(config_path: PathBuf) -> anyhow::Result<()> {
    let config = DeviceConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let client_id = config.mqtt.client_id.clone();
    info!(%client_id, version = %config.software_version, "feeder daemon starting in device mode");

    // ── Feed buffer ──────────────────────────────────────────────
    std::fs::create_dir_all(&config.data_dir)?;
    let buffer_path = config.data_dir.join(BUFFER_FILE);
    let buffer = FeedBuffer::open(&buffer_path)?;
    info!(path = ?buffer_path, backlog = buffer.len()?, "feed buffer opened");

    // ── Broker session ───────────────────────────────────────────
    let will = DeviceSession::last_will(&client_id, &config.software_version)?;
    let (link, mut events) = MqttLink::connect(&config.mqtt, Some(will))?;
    let session = DeviceSession::new(Arc::new(link), client_id, config.software_version.clone());

    // ── Orchestrator ─────────────────────────────────────────────
    let shutdown = crate::shutdown_on_ctrl_c();
    let mut orchestrator = FeedOrchestrator::new(
        session.clone(),
        buffer,
        LoggingActuator::new(config.servo_pin),
        config.portion_duration(),
        shutdown.clone(),
    );

    session.run(&mut events, &mut orchestrator, shutdown).await;

    orchestrator.shutdown().await?;
    info!("device stopped");
    Ok(())
}
