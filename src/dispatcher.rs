//! Batch Dispatcher (C6, §4.6): the orchestrator. Parses and validates a
//! raw batch, snapshots old ranks, partitions into hot groups and
//! singletons, drives the applier, and emits rank-change notifications in
//! tailing mode.

use crate::applier;
use crate::domain::{GameModeId, RankChange, Scope, ScoreEvent};
use crate::error::EngineResult;
use crate::kafka::{ConsumedMessage, MessageBatch};
use crate::notifier::{crosses_top_100, top_100_paths, Notifier};
use crate::recovery::ReplayState;
use crate::store::{leaderboard_key, PipelineBuilder, StoreGateway};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

type GroupKey = (String, GameModeId);

pub struct BatchDispatcher {
    store: Arc<dyn StoreGateway>,
    notifier: Arc<dyn Notifier>,
    replay: Arc<ReplayState>,
    empty_batch_threshold: u32,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        notifier: Arc<dyn Notifier>,
        replay: Arc<ReplayState>,
        empty_batch_threshold: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            replay,
            empty_batch_threshold,
        }
    }

    pub async fn handle_batch(&self, batch: MessageBatch) -> EngineResult<()> {
        let now = Utc::now();
        let events = parse_and_validate(&batch.messages);

        self.replay.record_batch(!events.is_empty(), self.empty_batch_threshold).await;

        if events.is_empty() {
            return Ok(());
        }

        let is_replaying = self.replay.is_replaying();

        let mut initial_rank: HashMap<GroupKey, Option<u64>> = HashMap::new();
        for event in &events {
            let key = (event.player_id.clone(), event.game_mode);
            if initial_rank.contains_key(&key) {
                continue;
            }
            let global_key = leaderboard_key(event.game_mode, &Scope::Global);
            let rank = self
                .store
                .z_rev_rank_and_score(&global_key, &event.player_id)
                .await?
                .map(|(rank, _)| rank);
            initial_rank.insert(key, rank);
        }

        let mut groups: HashMap<GroupKey, Vec<ScoreEvent>> = HashMap::new();
        for event in events {
            groups.entry((event.player_id.clone(), event.game_mode)).or_default().push(event);
        }

        let hot_keys: Vec<GroupKey> = groups
            .iter()
            .filter(|(_, events)| events.len() >= 2)
            .map(|(key, _)| key.clone())
            .collect();

        let hot_futures: Vec<_> = hot_keys
            .into_iter()
            .map(|key| {
                let events = groups.remove(&key).expect("key came from groups");
                let previous = initial_rank.get(&key).copied().flatten();
                self.process_hot_group(key, events, previous, now, is_replaying)
            })
            .collect();
        for result in join_all(hot_futures).await {
            result?;
        }

        // What's left in `groups` is exactly the singletons: one pipelined
        // round trip for all of them (§4.6 step 7).
        if !groups.is_empty() {
            let mut pipeline = PipelineBuilder::new();
            for events in groups.values() {
                applier::queue(&mut pipeline, &events[0], now);
            }
            self.store.execute_pipeline(pipeline).await?;

            if !is_replaying {
                for key in groups.keys() {
                    let (player_id, game_mode) = key;
                    let previous = initial_rank.get(key).copied().flatten();
                    let global_key = leaderboard_key(*game_mode, &Scope::Global);
                    if let Some((new_rank, score)) =
                        self.store.z_rev_rank_and_score(&global_key, player_id).await?
                    {
                        self.maybe_notify(*game_mode, player_id, previous, new_rank, score, now).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn process_hot_group(
        &self,
        key: GroupKey,
        events: Vec<ScoreEvent>,
        initial: Option<u64>,
        now: DateTime<Utc>,
        is_replaying: bool,
    ) -> EngineResult<()> {
        let (player_id, game_mode) = key;
        let global_key = leaderboard_key(game_mode, &Scope::Global);
        let mut current_rank = initial;

        for event in events {
            let previous_rank = current_rank;
            let mut pipeline = PipelineBuilder::new();
            applier::queue(&mut pipeline, &event, now);
            self.store.execute_pipeline(pipeline).await?;

            let Some((new_rank, score)) = self.store.z_rev_rank_and_score(&global_key, &player_id).await? else {
                continue;
            };
            current_rank = Some(new_rank);

            if !is_replaying {
                self.maybe_notify(game_mode, &player_id, previous_rank, new_rank, score, now).await;
            }
        }
        Ok(())
    }

    async fn maybe_notify(
        &self,
        game_mode: GameModeId,
        player_id: &str,
        old_rank: Option<u64>,
        new_rank: u64,
        score: i64,
        now: DateTime<Utc>,
    ) {
        if old_rank == Some(new_rank) {
            return;
        }
        let change = RankChange {
            game_mode,
            player_id: player_id.to_owned(),
            old_rank,
            new_rank,
            score,
            timestamp: now.to_rfc3339(),
        };
        self.notifier.publish_rank_change(&change).await;
        if crosses_top_100(old_rank, new_rank) {
            self.notifier.purge_cache(&top_100_paths(game_mode)).await;
        }
    }
}

/// Decodes each message as a `ScoreEvent`, logging and skipping whatever
/// fails. `ScoreEvent`'s required fields already reject a missing
/// `playerId` or a missing/null/non-numeric `score` the moment serde
/// tries to build the struct, so there's no separate ad hoc validation
/// pass here.
fn parse_and_validate(messages: &[ConsumedMessage]) -> Vec<ScoreEvent> {
    let mut events = Vec::with_capacity(messages.len());
    for message in messages {
        match serde_json::from_slice::<ScoreEvent>(&message.payload) {
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(
                    "skipping malformed event at partition {} offset {}: {err}",
                    message.partition, message.offset
                );
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::memory::InMemoryNotifier;
    use crate::store::memory::InMemoryStoreGateway;

    fn message(json: &str) -> ConsumedMessage {
        ConsumedMessage {
            payload: json.as_bytes().to_vec(),
            topic: "score-submitted".to_owned(),
            partition: 0,
            offset: 0,
        }
    }

    fn harness(replaying: bool) -> (BatchDispatcher, Arc<InMemoryStoreGateway>, Arc<InMemoryNotifier>) {
        let store = Arc::new(InMemoryStoreGateway::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let replay = Arc::new(ReplayState::new(replaying));
        let dispatcher = BatchDispatcher::new(store.clone(), notifier.clone(), replay, 3);
        (dispatcher, store, notifier)
    }

    #[tokio::test]
    async fn fresh_system_single_event_notifies_and_purges() {
        let (dispatcher, store, notifier) = harness(false);
        let batch = MessageBatch {
            messages: vec![message(
                r#"{"playerId":"p1","username":"alice","gameMode":1,"score":100,"timestamp":"2024-06-01T00:00:00Z"}"#,
            )],
        };
        dispatcher.handle_batch(batch).await.unwrap();

        let player = store.get_player("p1").await.unwrap().unwrap();
        assert_eq!(player.total_score, 100);
        assert_eq!(player.games_played, 1);

        let published = notifier.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].old_rank, None);
        assert_eq!(published[0].new_rank, 1);
        assert_eq!(notifier.purged().await.len(), 1);
    }

    #[tokio::test]
    async fn three_players_establish_ranks_in_one_score_order() {
        let (dispatcher, store, notifier) = harness(false);
        let batch = MessageBatch {
            messages: vec![
                message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":10,"timestamp":"2024-06-01T00:00:00Z"}"#),
                message(r#"{"playerId":"p2","username":"b","gameMode":1,"score":20,"timestamp":"2024-06-01T00:00:00Z"}"#),
                message(r#"{"playerId":"p3","username":"c","gameMode":1,"score":15,"timestamp":"2024-06-01T00:00:00Z"}"#),
            ],
        };
        dispatcher.handle_batch(batch).await.unwrap();

        let global_key = leaderboard_key(1, &Scope::Global);
        let (rank_p2, _) = store.z_rev_rank_and_score(&global_key, "p2").await.unwrap().unwrap();
        let (rank_p3, _) = store.z_rev_rank_and_score(&global_key, "p3").await.unwrap().unwrap();
        let (rank_p1, _) = store.z_rev_rank_and_score(&global_key, "p1").await.unwrap().unwrap();
        assert_eq!((rank_p2, rank_p3, rank_p1), (1, 2, 3));
        assert_eq!(notifier.published().await.len(), 3);
    }

    #[tokio::test]
    async fn rank_swap_reports_old_and_new_rank() {
        let (dispatcher, store, notifier) = harness(false);
        dispatcher
            .handle_batch(MessageBatch {
                messages: vec![
                    message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":10,"timestamp":"2024-06-01T00:00:00Z"}"#),
                    message(r#"{"playerId":"p2","username":"b","gameMode":1,"score":20,"timestamp":"2024-06-01T00:00:00Z"}"#),
                    message(r#"{"playerId":"p3","username":"c","gameMode":1,"score":15,"timestamp":"2024-06-01T00:00:00Z"}"#),
                ],
            })
            .await
            .unwrap();

        dispatcher
            .handle_batch(MessageBatch {
                messages: vec![message(
                    r#"{"playerId":"p1","username":"a","gameMode":1,"score":100,"timestamp":"2024-06-01T01:00:00Z"}"#,
                )],
            })
            .await
            .unwrap();

        let global_key = leaderboard_key(1, &Scope::Global);
        let (rank, score) = store.z_rev_rank_and_score(&global_key, "p1").await.unwrap().unwrap();
        assert_eq!((rank, score), (1, 110));

        let published = notifier.published().await;
        let swap = published.last().unwrap();
        assert_eq!(swap.old_rank, Some(3));
        assert_eq!(swap.new_rank, 1);
        assert_eq!(swap.score, 110);
    }

    #[tokio::test]
    async fn hot_group_applies_every_event_sequentially() {
        let (dispatcher, store, _notifier) = harness(false);
        let batch = MessageBatch {
            messages: vec![
                message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":5,"timestamp":"2024-06-01T00:00:00Z"}"#),
                message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":5,"timestamp":"2024-06-01T00:00:01Z"}"#),
                message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":5,"timestamp":"2024-06-01T00:00:02Z"}"#),
            ],
        };
        dispatcher.handle_batch(batch).await.unwrap();

        let player = store.get_player("p1").await.unwrap().unwrap();
        assert_eq!(player.total_score, 15);
        assert_eq!(player.games_played, 3);
    }

    #[tokio::test]
    async fn replay_mode_suppresses_all_notifications() {
        let (dispatcher, store, notifier) = harness(true);
        let batch = MessageBatch {
            messages: vec![
                message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":10,"timestamp":"2024-06-01T00:00:00Z"}"#),
                message(r#"{"playerId":"p2","username":"b","gameMode":1,"score":20,"timestamp":"2024-06-01T00:00:00Z"}"#),
            ],
        };
        dispatcher.handle_batch(batch).await.unwrap();

        assert!(notifier.published().await.is_empty());
        assert!(notifier.purged().await.is_empty());
        let player = store.get_player("p1").await.unwrap().unwrap();
        assert_eq!(player.total_score, 10);
    }

    #[tokio::test]
    async fn malformed_event_is_skipped_without_gapping_its_neighbors() {
        let (dispatcher, store, _notifier) = harness(false);
        let batch = MessageBatch {
            messages: vec![
                message(r#"{"playerId":"p1","username":"a","gameMode":1,"score":10,"timestamp":"2024-06-01T00:00:00Z"}"#),
                message(r#"{"playerId":"p2","username":"b","gameMode":1,"score":null,"timestamp":"2024-06-01T00:00:00Z"}"#),
                message(r#"{"playerId":"p3","username":"c","gameMode":1,"score":15,"timestamp":"2024-06-01T00:00:00Z"}"#),
            ],
        };
        dispatcher.handle_batch(batch).await.unwrap();

        assert!(store.get_player("p1").await.unwrap().is_some());
        assert!(store.get_player("p2").await.unwrap().is_none());
        assert!(store.get_player("p3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn an_empty_batch_advances_the_replay_counter() {
        let (dispatcher, _store, _notifier) = harness(true);
        dispatcher.handle_batch(MessageBatch { messages: vec![] }).await.unwrap();
        dispatcher.handle_batch(MessageBatch { messages: vec![] }).await.unwrap();
        assert!(dispatcher.replay.is_replaying());
        dispatcher.handle_batch(MessageBatch { messages: vec![] }).await.unwrap();
        assert!(!dispatcher.replay.is_replaying());
    }
}
