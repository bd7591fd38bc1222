//! Store Gateway (C1, §4.1): a small typed surface over the Redis-shaped
//! fast store, shared process-wide through one pooled connection.

mod manager;
pub mod memory;
pub mod redis_gateway;

pub use manager::RedisConnectionManager;
pub use redis_gateway::RedisStoreGateway;

use crate::domain::Player;
use crate::error::EngineResult;
use async_trait::async_trait;

/// One accumulated command in a pipeline (§4.1 `pipeline()`, Design Note 5).
///
/// `PipelineBuilder` only records intent; nothing touches the network until
/// [`StoreGateway::execute_pipeline`] runs the whole batch as one
/// round-trip. Ordering is preserved end to end.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    UpsertPlayerIfMissing {
        id: String,
        username: String,
        now: String,
    },
    SetUsername {
        id: String,
        username: String,
    },
    ZIncrBy {
        key: String,
        member: String,
        delta: i64,
    },
    Expire {
        key: String,
        ttl_seconds: i64,
    },
    IncPlayerStats {
        id: String,
        score_delta: i64,
    },
}

/// Per-command result, positionally aligned with the ops that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    Unit,
    NewScore(i64),
}

#[derive(Debug, Default, Clone)]
pub struct PipelineBuilder {
    ops: Vec<PipelineOp>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn upsert_player_if_missing(
        &mut self,
        id: impl Into<String>,
        username: impl Into<String>,
        now: impl Into<String>,
    ) -> &mut Self {
        self.ops.push(PipelineOp::UpsertPlayerIfMissing {
            id: id.into(),
            username: username.into(),
            now: now.into(),
        });
        self
    }

    pub fn set_username(&mut self, id: impl Into<String>, username: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::SetUsername {
            id: id.into(),
            username: username.into(),
        });
        self
    }

    pub fn z_incr_by(&mut self, key: impl Into<String>, member: impl Into<String>, delta: i64) -> &mut Self {
        self.ops.push(PipelineOp::ZIncrBy {
            key: key.into(),
            member: member.into(),
            delta,
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl_seconds: i64) -> &mut Self {
        self.ops.push(PipelineOp::Expire {
            key: key.into(),
            ttl_seconds,
        });
        self
    }

    pub fn inc_player_stats(&mut self, id: impl Into<String>, score_delta: i64) -> &mut Self {
        self.ops.push(PipelineOp::IncPlayerStats {
            id: id.into(),
            score_delta,
        });
        self
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn get_player(&self, id: &str) -> EngineResult<Option<Player>>;

    async fn upsert_player_if_missing(&self, id: &str, username: &str, now: &str) -> EngineResult<()>;

    async fn inc_player_stats(&self, id: &str, score_delta: i64) -> EngineResult<()>;

    async fn z_incr_by(&self, key: &str, member: &str, delta: i64) -> EngineResult<i64>;

    /// `None` if `member` is absent from the set. Rank is 1-indexed.
    async fn z_rev_rank_and_score(&self, key: &str, member: &str) -> EngineResult<Option<(u64, i64)>>;

    async fn z_card(&self, key: &str) -> EngineResult<u64>;

    async fn z_rev_range(&self, key: &str, offset: isize, limit: isize) -> EngineResult<Vec<(String, i64)>>;

    async fn expire(&self, key: &str, ttl_seconds: i64) -> EngineResult<()>;

    /// Non-blocking cursor-based key scan. Collected eagerly here since the
    /// only caller (`needsReplay`, §4.4) needs a simple existence check over
    /// a bounded `player:*` keyspace, not a long-lived lazy iterator.
    async fn scan_keys(&self, pattern: &str) -> EngineResult<Vec<String>>;

    async fn execute_pipeline(&self, pipeline: PipelineBuilder) -> EngineResult<Vec<PipelineResult>>;
}

pub fn player_key(id: &str) -> String {
    format!("player:{id}")
}

pub fn leaderboard_key(game_mode: u32, scope: &crate::domain::Scope) -> String {
    format!("leaderboard:{game_mode}:{scope}")
}
