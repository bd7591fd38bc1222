//! Engine / Runtime (C9, §4.9, §9 Design Note 1): owns every long-lived
//! resource and drives the `Starting → Replaying|Tailing → Stopping`
//! state machine of §4.6, wiring the signal-driven shutdown the teacher's
//! own binary sets up with `tokio::signal::ctrl_c` in its HTTP server.

use crate::config::EngineConfig;
use crate::dispatcher::BatchDispatcher;
use crate::domain::GameModeId;
use crate::error::{EngineError, EngineResult};
use crate::kafka::{BatchHandler, EventLogClient};
use crate::notifier::Notifier;
use crate::recovery::{needs_replay, ReplayState};
use crate::store::StoreGateway;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const SCORE_SUBMITTED_TOPIC: &str = "score-submitted";
const IDLE_WATCHER_TICK: Duration = Duration::from_secs(1);

pub struct LeaderboardEngine {
    config: EngineConfig,
    store: Arc<dyn StoreGateway>,
    log_client: Arc<dyn EventLogClient>,
    notifier: Arc<dyn Notifier>,
    known_game_modes: Vec<GameModeId>,
}

impl LeaderboardEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StoreGateway>,
        log_client: Arc<dyn EventLogClient>,
        notifier: Arc<dyn Notifier>,
        known_game_modes: Vec<GameModeId>,
    ) -> Self {
        Self {
            config,
            store,
            log_client,
            notifier,
            known_game_modes,
        }
    }

    pub async fn run(self) -> EngineResult<()> {
        let is_replaying = needs_replay(self.store.as_ref(), &self.known_game_modes).await;

        if is_replaying {
            info!("store looks empty, entering replay");
            if !self.log_client.reset_group_to_earliest(&self.config.kafka_group_id).await? {
                warn!("failed to reset consumer group offsets, falling back to fromBeginning subscribe");
            }
            self.log_client.subscribe(SCORE_SUBMITTED_TOPIC, true).await?;
        } else {
            info!("store already populated, tailing from the current offset");
            self.log_client.subscribe(SCORE_SUBMITTED_TOPIC, false).await?;
        }

        let replay_state = Arc::new(ReplayState::new(is_replaying));
        let dispatcher = Arc::new(BatchDispatcher::new(
            self.store.clone(),
            self.notifier.clone(),
            replay_state.clone(),
            self.config.empty_batch_threshold,
        ));

        let idle_timeout = self.config.idle_timeout;
        let watcher_state = replay_state.clone();
        let idle_watcher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_WATCHER_TICK);
            loop {
                ticker.tick().await;
                if !watcher_state.is_replaying() {
                    return;
                }
                if watcher_state.idle_for().await >= idle_timeout {
                    info!("no batch delivered for {:?}, ending replay via idle timeout", idle_timeout);
                    watcher_state.end_replay();
                    return;
                }
            }
        });

        let handler_dispatcher = dispatcher.clone();
        let handler: BatchHandler = Box::new(move |batch| {
            let dispatcher = handler_dispatcher.clone();
            Box::pin(async move { dispatcher.handle_batch(batch).await })
        });

        let log_client = self.log_client.clone();
        let consume_loop = tokio::spawn(async move { log_client.consume_batches(handler).await });

        let result = tokio::select! {
            outcome = consume_loop => {
                match outcome {
                    Ok(inner) => inner,
                    Err(join_err) => Err(EngineError::Config(format!("consume loop panicked: {join_err}"))),
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received, stopping");
                Ok(())
            }
        };

        idle_watcher.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PurgeProvider;
    use crate::domain::Scope;
    use crate::kafka::memory::InMemoryLogClient;
    use crate::notifier::memory::InMemoryNotifier;
    use crate::store::memory::InMemoryStoreGateway;
    use crate::store::leaderboard_key;

    fn test_config() -> EngineConfig {
        EngineConfig {
            kafka_brokers: vec!["localhost:9092".into()],
            kafka_client_id: "leaderboard-updater".into(),
            kafka_group_id: "leaderboard-updater".into(),
            redis_host: "127.0.0.1".into(),
            redis_port: 6379,
            redis_password: None,
            purge_url: None,
            purge_provider: PurgeProvider::Cloudflare,
            purge_key: None,
            empty_batch_threshold: 3,
            idle_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn empty_store_triggers_reset_and_subscribes_from_beginning() {
        let store = Arc::new(InMemoryStoreGateway::new());
        let log_client = Arc::new(InMemoryLogClient::new(vec![]));
        let notifier = Arc::new(InMemoryNotifier::new());

        let engine = LeaderboardEngine::new(
            test_config(),
            store,
            log_client.clone(),
            notifier,
            vec![1, 2],
        );
        engine.run().await.unwrap();

        assert_eq!(log_client.reset_calls().await, 1);
        assert_eq!(
            log_client.subscriptions().await,
            vec![(SCORE_SUBMITTED_TOPIC.to_owned(), true)]
        );
    }

    #[tokio::test]
    async fn populated_store_skips_reset_and_subscribes_from_current_offset() {
        let store = Arc::new(InMemoryStoreGateway::new());
        store
            .z_incr_by(&leaderboard_key(1, &Scope::Global), "p1", 10)
            .await
            .unwrap();
        let log_client = Arc::new(InMemoryLogClient::new(vec![]));
        let notifier = Arc::new(InMemoryNotifier::new());

        let engine = LeaderboardEngine::new(
            test_config(),
            store,
            log_client.clone(),
            notifier,
            vec![1, 2],
        );
        engine.run().await.unwrap();

        assert_eq!(log_client.reset_calls().await, 0);
        assert_eq!(
            log_client.subscriptions().await,
            vec![(SCORE_SUBMITTED_TOPIC.to_owned(), false)]
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!("failed to install SIGTERM handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
