mod applier;
mod config;
mod dispatcher;
mod domain;
mod engine;
mod error;
mod kafka;
mod logging;
mod notifier;
mod recovery;
mod store;

use config::EngineConfig;
use engine::LeaderboardEngine;
use kafka::RdKafkaLogClient;
use log::error;
use notifier::KafkaNotifier;
use std::sync::Arc;
use store::{RedisConnectionManager, RedisStoreGateway};

/// Game modes are seeded and owned outside this engine (§3 "GameMode is
/// read-only here"); the ids below are only used to probe `needsReplay`
/// and should track whatever `game_modes` actually holds in the store.
const KNOWN_GAME_MODES: &[u32] = &[1, 2, 3];

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        error!("fatal error, exiting: {err}");
        std::process::exit(1);
    }
}

async fn run() -> error::EngineResult<()> {
    let config = EngineConfig::from_env()?;

    let redis_url = match &config.redis_password {
        Some(password) => format!("redis://:{password}@{}:{}", config.redis_host, config.redis_port),
        None => format!("redis://{}:{}", config.redis_host, config.redis_port),
    };
    let manager = RedisConnectionManager::new(&redis_url)?;
    let pool = mobc::Pool::new(manager);
    let store: Arc<dyn store::StoreGateway> = Arc::new(RedisStoreGateway::new(pool));

    let log_client: Arc<dyn kafka::EventLogClient> = Arc::new(RdKafkaLogClient::new(
        &config.kafka_brokers,
        &config.kafka_client_id,
        &config.kafka_group_id,
    )?);

    let notifier: Arc<dyn notifier::Notifier> = Arc::new(KafkaNotifier::new(&config)?);

    let engine = LeaderboardEngine::new(config, store, log_client, notifier, KNOWN_GAME_MODES.to_vec());
    engine.run().await
}
