//! Production `Notifier`: a Kafka producer for `leaderboard-updated` plus
//! a small `reqwest` client for the CDN purge surface, grounded on the
//! plain `reqwest::get`/response-handling shape the pack uses for
//! outbound HTTP calls (`PocketRelay-Server`'s `utils::ip::public_address`).

use super::Notifier;
use crate::config::{EngineConfig, PurgeProvider};
use crate::domain::RankChange;
use async_trait::async_trait;
use log::warn;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::json;
use std::time::Duration;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const PURGE_TIMEOUT: Duration = Duration::from_secs(5);
const OUTPUT_TOPIC: &str = "leaderboard-updated";

pub struct KafkaNotifier {
    producer: FutureProducer,
    http: reqwest::Client,
    purge_url: Option<String>,
    purge_provider: PurgeProvider,
    purge_key: Option<String>,
}

impl KafkaNotifier {
    pub fn new(config: &EngineConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.kafka_brokers.join(","))
            .set("client.id", &config.kafka_client_id)
            .create()?;
        let http = reqwest::Client::builder()
            .timeout(PURGE_TIMEOUT)
            .build()
            .expect("reqwest client builds with a static config");
        Ok(Self {
            producer,
            http,
            purge_url: config.purge_url.clone(),
            purge_provider: config.purge_provider,
            purge_key: config.purge_key.clone(),
        })
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn publish_rank_change(&self, change: &RankChange) {
        let payload = match serde_json::to_string(change) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to serialize rank change for {}: {err}", change.player_id);
                return;
            }
        };
        let record = FutureRecord::to(OUTPUT_TOPIC)
            .key(&change.player_id)
            .payload(&payload);
        if let Err((err, _)) = self.producer.send(record, PUBLISH_TIMEOUT).await {
            warn!(
                "failed to publish rank change for player {} / game mode {}: {err}",
                change.player_id, change.game_mode
            );
        }
    }

    async fn purge_cache(&self, paths: &[String]) -> bool {
        let Some(url) = self.purge_url.as_ref() else {
            return false;
        };
        let mut request = self.http.post(url);
        request = match self.purge_provider {
            PurgeProvider::Cloudflare => {
                let body = json!({ "files": paths });
                let mut request = request.json(&body);
                if let Some(key) = &self.purge_key {
                    request = request.bearer_auth(key);
                }
                request
            }
            PurgeProvider::Fastly => {
                let body = json!({ "paths": paths });
                let mut request = request.json(&body);
                if let Some(key) = &self.purge_key {
                    request = request.header("Fastly-Key", key);
                }
                request
            }
        };

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("cache purge returned non-2xx status: {}", response.status());
                false
            }
            Err(err) => {
                warn!("cache purge request failed: {err}");
                false
            }
        }
    }
}
