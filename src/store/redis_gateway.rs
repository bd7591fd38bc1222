//! Production `StoreGateway` backed by Redis through a pooled connection.
//!
//! Retry policy (§4.1): initial 50ms backoff, doubling, capped at 2s, at
//! most 3 attempts per op. Once the budget is exhausted the call surfaces
//! as `EngineError::StoreUnavailable` — nothing here swallows a failure.

use super::manager::RedisConnectionManager;
use super::{player_key, PipelineBuilder, PipelineOp, PipelineResult, StoreGateway};
use crate::domain::Player;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use log::warn;
use mobc::Pool;
use redis::AsyncCommands;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

pub struct RedisStoreGateway {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStoreGateway {
    pub fn new(pool: Pool<RedisConnectionManager>) -> Self {
        Self { pool }
    }

    async fn with_retry<T>(
        &self,
        op_name: &str,
        make_fut: impl Fn(Pool<RedisConnectionManager>) -> BoxFuture<'static, Result<T, String>>,
    ) -> EngineResult<T> {
        let mut delay = INITIAL_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            match make_fut(self.pool.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "transient store error on {op_name} (attempt {attempt}/{MAX_ATTEMPTS}): {err}"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(err) => {
                    return Err(EngineError::StoreUnavailable(format!("{op_name}: {err}")));
                }
            }
        }
        unreachable!("loop always returns within MAX_ATTEMPTS iterations")
    }
}

#[async_trait]
impl StoreGateway for RedisStoreGateway {
    async fn get_player(&self, id: &str) -> EngineResult<Option<Player>> {
        let id = id.to_owned();
        self.with_retry("get_player", move |pool| {
            let id = id.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let fields: Vec<(String, String)> = conn
                    .hgetall(player_key(&id))
                    .await
                    .map_err(|e| e.to_string())?;
                if fields.is_empty() {
                    return Ok(None);
                }
                let get = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
                Ok(Some(Player {
                    username: get("username").unwrap_or_default(),
                    total_score: get("total_score").and_then(|v| v.parse().ok()).unwrap_or(0),
                    games_played: get("games_played").and_then(|v| v.parse().ok()).unwrap_or(0),
                    created_at: get("created_at").unwrap_or_default(),
                }))
            })
        })
        .await
    }

    async fn upsert_player_if_missing(&self, id: &str, username: &str, now: &str) -> EngineResult<()> {
        let (id, username, now) = (id.to_owned(), username.to_owned(), now.to_owned());
        self.with_retry("upsert_player_if_missing", move |pool| {
            let (id, username, now) = (id.clone(), username.clone(), now.clone());
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let key = player_key(&id);
                let _: () = redis::pipe()
                    .cmd("HSETNX").arg(&key).arg("username").arg(&username).ignore()
                    .cmd("HSETNX").arg(&key).arg("total_score").arg(0i64).ignore()
                    .cmd("HSETNX").arg(&key).arg("games_played").arg(0i64).ignore()
                    .cmd("HSETNX").arg(&key).arg("created_at").arg(&now).ignore()
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(())
            })
        })
        .await
    }

    async fn inc_player_stats(&self, id: &str, score_delta: i64) -> EngineResult<()> {
        let id = id.to_owned();
        self.with_retry("inc_player_stats", move |pool| {
            let id = id.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let key = player_key(&id);
                let _: () = redis::pipe()
                    .cmd("HINCRBY").arg(&key).arg("total_score").arg(score_delta).ignore()
                    .cmd("HINCRBY").arg(&key).arg("games_played").arg(1i64).ignore()
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(())
            })
        })
        .await
    }

    async fn z_incr_by(&self, key: &str, member: &str, delta: i64) -> EngineResult<i64> {
        let (key, member) = (key.to_owned(), member.to_owned());
        self.with_retry("z_incr_by", move |pool| {
            let (key, member) = (key.clone(), member.clone());
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let new_score: f64 = conn
                    .zincr(&key, &member, delta)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(new_score.round() as i64)
            })
        })
        .await
    }

    async fn z_rev_rank_and_score(&self, key: &str, member: &str) -> EngineResult<Option<(u64, i64)>> {
        let (key, member) = (key.to_owned(), member.to_owned());
        self.with_retry("z_rev_rank_and_score", move |pool| {
            let (key, member) = (key.clone(), member.clone());
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let (rank, score): (Option<u64>, Option<f64>) = redis::pipe()
                    .cmd("ZREVRANK").arg(&key).arg(&member)
                    .cmd("ZSCORE").arg(&key).arg(&member)
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| e.to_string())?;
                match (rank, score) {
                    (Some(rank), Some(score)) => Ok(Some((rank + 1, score.round() as i64))),
                    _ => Ok(None),
                }
            })
        })
        .await
    }

    async fn z_card(&self, key: &str) -> EngineResult<u64> {
        let key = key.to_owned();
        self.with_retry("z_card", move |pool| {
            let key = key.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                conn.zcard(&key).await.map_err(|e| e.to_string())
            })
        })
        .await
    }

    async fn z_rev_range(&self, key: &str, offset: isize, limit: isize) -> EngineResult<Vec<(String, i64)>> {
        let key = key.to_owned();
        self.with_retry("z_rev_range", move |pool| {
            let key = key.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let stop = offset + limit - 1;
                let raw: Vec<(String, f64)> = conn
                    .zrevrange_withscores(&key, offset as isize, stop as isize)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(raw.into_iter().map(|(m, s)| (m, s.round() as i64)).collect())
            })
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> EngineResult<()> {
        let key = key.to_owned();
        self.with_retry("expire", move |pool| {
            let key = key.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                conn.expire(&key, ttl_seconds as usize)
                    .await
                    .map_err(|e| e.to_string())
            })
        })
        .await
    }

    async fn scan_keys(&self, pattern: &str) -> EngineResult<Vec<String>> {
        let pattern = pattern.to_owned();
        self.with_retry("scan_keys", move |pool| {
            let pattern = pattern.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let mut cursor: u64 = 0;
                let mut keys = Vec::new();
                loop {
                    let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(500)
                        .query_async(&mut *conn)
                        .await
                        .map_err(|e| e.to_string())?;
                    keys.extend(batch);
                    cursor = next_cursor;
                    if cursor == 0 {
                        break;
                    }
                }
                Ok(keys)
            })
        })
        .await
    }

    async fn execute_pipeline(&self, pipeline: PipelineBuilder) -> EngineResult<Vec<PipelineResult>> {
        let ops: Vec<PipelineOp> = pipeline.ops().to_vec();
        self.with_retry("execute_pipeline", move |pool| {
            let ops = ops.clone();
            Box::pin(async move {
                let mut conn = pool.get().await.map_err(|e| e.to_string())?;
                let mut pipe = redis::pipe();
                let mut kept_for_op = Vec::with_capacity(ops.len());
                for op in &ops {
                    match op {
                        PipelineOp::UpsertPlayerIfMissing { id, username, now } => {
                            let key = player_key(id);
                            pipe.cmd("HSETNX").arg(&key).arg("username").arg(username).ignore()
                                .cmd("HSETNX").arg(&key).arg("total_score").arg(0i64).ignore()
                                .cmd("HSETNX").arg(&key).arg("games_played").arg(0i64).ignore()
                                .cmd("HSETNX").arg(&key).arg("created_at").arg(now).ignore();
                            kept_for_op.push(0);
                        }
                        PipelineOp::SetUsername { id, username } => {
                            let key = player_key(id);
                            pipe.cmd("HSET").arg(&key).arg("username").arg(username).ignore();
                            kept_for_op.push(0);
                        }
                        PipelineOp::ZIncrBy { key, member, delta } => {
                            pipe.cmd("ZINCRBY").arg(key).arg(*delta).arg(member);
                            kept_for_op.push(1);
                        }
                        PipelineOp::Expire { key, ttl_seconds } => {
                            pipe.cmd("EXPIRE").arg(key).arg(*ttl_seconds as usize).ignore();
                            kept_for_op.push(0);
                        }
                        PipelineOp::IncPlayerStats { id, score_delta } => {
                            let key = player_key(id);
                            pipe.cmd("HINCRBY").arg(&key).arg("total_score").arg(*score_delta).ignore()
                                .cmd("HINCRBY").arg(&key).arg("games_played").arg(1i64).ignore();
                            kept_for_op.push(0);
                        }
                    }
                }

                let raw: Vec<f64> = pipe.query_async(&mut *conn).await.map_err(|e| e.to_string())?;
                let mut raw_iter = raw.into_iter();
                let mut results = Vec::with_capacity(ops.len());
                for kept in kept_for_op {
                    if kept == 1 {
                        let score = raw_iter.next().unwrap_or(0.0);
                        results.push(PipelineResult::NewScore(score.round() as i64));
                    } else {
                        results.push(PipelineResult::Unit);
                    }
                }
                Ok(results)
            })
        })
        .await
    }
}
