//! Backend mode — the registry of all feeders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use feeder_backend::Reconciler;
use feeder_core::BackendConfig;
use feeder_mqtt::{BackendSession, MqttLink};
use feeder_state::registry::REGISTRY_FILE;
use feeder_state::{FeedLogRepository, FeederRepository, RegistryStore};

fn load(config_path: &Path) -> anyhow::Result<BackendConfig> {
    BackendConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))
}

fn open_registry(config: &BackendConfig) -> anyhow::Result<RegistryStore> {
    std::fs::create_dir_all(&config.data_dir)?;
    let path = config.data_dir.join(REGISTRY_FILE);
    let store = RegistryStore::open(&path)?;
    info!(path = ?path, "registry opened");
    Ok(store)
}

pub async fn run_backend(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load(&config_path)?;
    info!(client_id = %config.mqtt.client_id, "feeder daemon starting in backend mode");

    let store = open_registry(&config)?;
    info!(feeders = store.list_feeders()?.len(), "registry loaded");

    let (link, mut events) = MqttLink::connect(&config.mqtt, None)?;
    let session = BackendSession::new(Arc::new(link));
    let reconciler = Reconciler::new(store, session.clone());

    let shutdown = crate::shutdown_on_ctrl_c();
    session.run(&mut events, &reconciler, shutdown).await;

    session.stop().await?;
    info!("backend stopped");
    Ok(())
}

pub fn print_registry(config_path: PathBuf, client_id: Option<&str>) -> anyhow::Result<()> {
    let config = load(&config_path)?;
    let store = open_registry(&config)?;

    let output = match client_id {
        Some(id) => {
            let feeder = store
                .get_feeder(id)?
                .with_context(|| format!("feeder with client id {id} does not exist"))?;
            let history = store.list_feed_logs(id)?;
            serde_json::json!({ "feeder": feeder, "history": history })
        }
        None => serde_json::to_value(store.list_feeders()?)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
