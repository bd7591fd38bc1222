//! Engine configuration (§4.7 / §6 "Configuration").
//!
//! Parsed once at startup from the environment. A validation failure here
//! is fatal before any I/O is attempted, same as any other `LogFatal`.

use crate::error::{EngineError, EngineResult};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeProvider {
    Cloudflare,
    Fastly,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kafka_brokers: Vec<String>,
    pub kafka_client_id: String,
    pub kafka_group_id: String,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,

    pub purge_url: Option<String>,
    pub purge_provider: PurgeProvider,
    pub purge_key: Option<String>,

    pub empty_batch_threshold: u32,
    pub idle_timeout: Duration,
}

impl EngineConfig {
    pub fn from_env() -> EngineResult<Self> {
        // A missing .env (the production default, where config comes from
        // the real environment) is not an error — only malformed contents are.
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(EngineError::Config(format!("failed to load .env: {err}")));
            }
        }

        let kafka_brokers = env_required("KAFKA_BROKERS")?
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if kafka_brokers.is_empty() {
            return Err(EngineError::Config(
                "KAFKA_BROKERS must list at least one broker".into(),
            ));
        }

        let purge_provider = match env::var("PURGE_PROVIDER")
            .unwrap_or_else(|_| "cloudflare".into())
            .to_lowercase()
            .as_str()
        {
            "cloudflare" => PurgeProvider::Cloudflare,
            "fastly" => PurgeProvider::Fastly,
            other => {
                return Err(EngineError::Config(format!(
                    "unknown PURGE_PROVIDER '{other}', expected cloudflare or fastly"
                )))
            }
        };

        let redis_port = env::var("REDIS_PORT")
            .unwrap_or_else(|_| "6379".into())
            .parse::<u16>()
            .map_err(|e| EngineError::Config(format!("invalid REDIS_PORT: {e}")))?;

        let empty_batch_threshold = env::var("EMPTY_BATCH_THRESHOLD")
            .unwrap_or_else(|_| "3".into())
            .parse::<u32>()
            .map_err(|e| EngineError::Config(format!("invalid EMPTY_BATCH_THRESHOLD: {e}")))?;

        let idle_timeout_ms = env::var("IDLE_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".into())
            .parse::<u64>()
            .map_err(|e| EngineError::Config(format!("invalid IDLE_TIMEOUT_MS: {e}")))?;

        Ok(EngineConfig {
            kafka_brokers,
            kafka_client_id: env::var("KAFKA_CLIENT_ID")
                .unwrap_or_else(|_| "leaderboard-updater".into()),
            kafka_group_id: env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "leaderboard-updater".into()),
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            redis_port,
            redis_password: env::var("REDIS_PASSWORD").ok(),
            purge_url: env::var("PURGE_URL").ok(),
            purge_provider,
            purge_key: env::var("PURGE_KEY").ok(),
            empty_batch_threshold,
            idle_timeout: Duration::from_millis(idle_timeout_ms),
        })
    }
}

fn env_required(key: &str) -> EngineResult<String> {
    env::var(key).map_err(|_| EngineError::Config(format!("{key} must be set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_purge_provider() {
        env::set_var("KAFKA_BROKERS", "localhost:9092");
        env::set_var("PURGE_PROVIDER", "akamai");
        let result = EngineConfig::from_env();
        assert!(result.is_err());
        env::remove_var("PURGE_PROVIDER");
        env::remove_var("KAFKA_BROKERS");
    }

    #[test]
    fn defaults_group_id_to_leaderboard_updater() {
        env::set_var("KAFKA_BROKERS", "localhost:9092");
        env::remove_var("KAFKA_GROUP_ID");
        let cfg = EngineConfig::from_env().expect("valid config");
        assert_eq!(cfg.kafka_group_id, "leaderboard-updater");
        env::remove_var("KAFKA_BROKERS");
    }
}
