//! Event Log Client (C2, §4.2): a partitioned consumer over
//! `score-submitted`, plus the admin operation used to force a replay.

mod client;
pub mod memory;

pub use client::RdKafkaLogClient;

use crate::error::EngineResult;
use futures::future::BoxFuture;

/// One consumed record, payload still raw — decoding is the dispatcher's job.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub payload: Vec<u8>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A batch handed to the dispatcher's handler. Messages may span several
/// partitions; the dispatcher groups by `(playerId, gameMode)`, not by
/// partition, so no partition-level grouping happens here.
#[derive(Debug, Clone, Default)]
pub struct MessageBatch {
    pub messages: Vec<ConsumedMessage>,
}

pub type BatchHandler = Box<dyn Fn(MessageBatch) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

#[async_trait::async_trait]
pub trait EventLogClient: Send + Sync {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> EngineResult<()>;

    /// Runs until cancelled or a fatal error terminates the loop. The
    /// consumer does not advance its committed offset until `handler`
    /// returns `Ok` for the batch just delivered.
    async fn consume_batches(&self, handler: BatchHandler) -> EngineResult<()>;

    /// Disconnects, deletes the group's stored offsets, reconnects.
    /// Idempotent: a missing group is treated as success. Returns `false`
    /// only when the delete itself failed for some other reason; the
    /// caller still falls back to `subscribe(topic, true)`.
    async fn reset_group_to_earliest(&self, group: &str) -> EngineResult<bool>;
}
