//! In-memory `StoreGateway` test double.
//!
//! Mirrors Redis semantics closely enough to exercise the applier and
//! dispatcher without a live broker/store, matching the pack's convention
//! of testing orchestration logic directly rather than through a live
//! integration harness (no `tests/` directory drives a real Redis here).

use super::{player_key, PipelineBuilder, PipelineOp, PipelineResult, StoreGateway};
use crate::domain::Player;
use crate::error::EngineResult;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStoreGateway {
    players: Mutex<HashMap<String, Player>>,
    zsets: Mutex<HashMap<String, HashMap<String, i64>>>,
    ttls: Mutex<HashMap<String, i64>>,
}

impl InMemoryStoreGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn ranked(members: &HashMap<String, i64>) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = members.iter().map(|(m, s)| (m.clone(), *s)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    async fn apply_op(&self, op: &PipelineOp) -> PipelineResult {
        match op {
            PipelineOp::UpsertPlayerIfMissing { id, username, now } => {
                let mut players = self.players.lock().await;
                players.entry(id.clone()).or_insert_with(|| Player {
                    username: username.clone(),
                    total_score: 0,
                    games_played: 0,
                    created_at: now.clone(),
                });
                PipelineResult::Unit
            }
            PipelineOp::SetUsername { id, username } => {
                let mut players = self.players.lock().await;
                if let Some(player) = players.get_mut(id) {
                    player.username = username.clone();
                }
                PipelineResult::Unit
            }
            PipelineOp::ZIncrBy { key, member, delta } => {
                let mut zsets = self.zsets.lock().await;
                let set = zsets.entry(key.clone()).or_default();
                let entry = set.entry(member.clone()).or_insert(0);
                *entry += delta;
                PipelineResult::NewScore(*entry)
            }
            PipelineOp::Expire { key, ttl_seconds } => {
                let mut ttls = self.ttls.lock().await;
                ttls.insert(key.clone(), *ttl_seconds);
                PipelineResult::Unit
            }
            PipelineOp::IncPlayerStats { id, score_delta } => {
                let mut players = self.players.lock().await;
                if let Some(player) = players.get_mut(id) {
                    player.total_score += score_delta;
                    player.games_played += 1;
                }
                PipelineResult::Unit
            }
        }
    }
}

#[async_trait]
impl StoreGateway for InMemoryStoreGateway {
    async fn get_player(&self, id: &str) -> EngineResult<Option<Player>> {
        Ok(self.players.lock().await.get(id).cloned())
    }

    async fn upsert_player_if_missing(&self, id: &str, username: &str, now: &str) -> EngineResult<()> {
        self.apply_op(&PipelineOp::UpsertPlayerIfMissing {
            id: id.to_owned(),
            username: username.to_owned(),
            now: now.to_owned(),
        })
        .await;
        Ok(())
    }

    async fn inc_player_stats(&self, id: &str, score_delta: i64) -> EngineResult<()> {
        self.apply_op(&PipelineOp::IncPlayerStats {
            id: id.to_owned(),
            score_delta,
        })
        .await;
        Ok(())
    }

    async fn z_incr_by(&self, key: &str, member: &str, delta: i64) -> EngineResult<i64> {
        match self
            .apply_op(&PipelineOp::ZIncrBy {
                key: key.to_owned(),
                member: member.to_owned(),
                delta,
            })
            .await
        {
            PipelineResult::NewScore(score) => Ok(score),
            PipelineResult::Unit => unreachable!(),
        }
    }

    async fn z_rev_rank_and_score(&self, key: &str, member: &str) -> EngineResult<Option<(u64, i64)>> {
        let zsets = self.zsets.lock().await;
        let Some(set) = zsets.get(key) else {
            return Ok(None);
        };
        let ranked = Self::ranked(set);
        Ok(ranked
            .iter()
            .position(|(m, _)| m == member)
            .map(|idx| (idx as u64 + 1, ranked[idx].1)))
    }

    async fn z_card(&self, key: &str) -> EngineResult<u64> {
        let zsets = self.zsets.lock().await;
        Ok(zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn z_rev_range(&self, key: &str, offset: isize, limit: isize) -> EngineResult<Vec<(String, i64)>> {
        let zsets = self.zsets.lock().await;
        let Some(set) = zsets.get(key) else {
            return Ok(Vec::new());
        };
        let ranked = Self::ranked(set);
        let start = offset.max(0) as usize;
        let end = (start + limit.max(0) as usize).min(ranked.len());
        Ok(if start >= ranked.len() {
            Vec::new()
        } else {
            ranked[start..end].to_vec()
        })
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> EngineResult<()> {
        self.ttls.lock().await.insert(key.to_owned(), ttl_seconds);
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> EngineResult<Vec<String>> {
        let players = self.players.lock().await;
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(players
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn execute_pipeline(&self, pipeline: PipelineBuilder) -> EngineResult<Vec<PipelineResult>> {
        let mut results = Vec::with_capacity(pipeline.ops().len());
        for op in pipeline.ops() {
            results.push(self.apply_op(op).await);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zincrby_creates_and_accumulates() {
        let store = InMemoryStoreGateway::new();
        assert_eq!(store.z_incr_by("lb", "p1", 10).await.unwrap(), 10);
        assert_eq!(store.z_incr_by("lb", "p1", 5).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn rank_is_one_indexed_and_descending() {
        let store = InMemoryStoreGateway::new();
        store.z_incr_by("lb", "p1", 10).await.unwrap();
        store.z_incr_by("lb", "p2", 20).await.unwrap();
        let (rank, score) = store.z_rev_rank_and_score("lb", "p2").await.unwrap().unwrap();
        assert_eq!(rank, 1);
        assert_eq!(score, 20);
        let (rank, _) = store.z_rev_rank_and_score("lb", "p1").await.unwrap().unwrap();
        assert_eq!(rank, 2);
    }

    #[tokio::test]
    async fn missing_member_has_no_rank() {
        let store = InMemoryStoreGateway::new();
        assert!(store.z_rev_rank_and_score("lb", "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_player_if_missing_does_not_clobber_existing_stats() {
        let store = InMemoryStoreGateway::new();
        store.upsert_player_if_missing("p1", "alice", "t0").await.unwrap();
        store.inc_player_stats("p1", 100).await.unwrap();
        store.upsert_player_if_missing("p1", "alice2", "t1").await.unwrap();
        let player = store.get_player("p1").await.unwrap().unwrap();
        assert_eq!(player.total_score, 100);
        assert_eq!(player.username, "alice");
    }

    #[test]
    fn player_key_matches_spec_layout() {
        assert_eq!(player_key("p1"), "player:p1");
    }
}
