//! In-memory `EventLogClient` test double — feeds a fixed sequence of
//! batches through `consume_batches`, recording subscribe/reset calls so
//! dispatcher and engine tests can assert on them without a broker.

use super::{BatchHandler, EventLogClient, MessageBatch};
use crate::error::EngineResult;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

pub struct InMemoryLogClient {
    batches: Mutex<VecDeque<MessageBatch>>,
    subscriptions: Mutex<Vec<(String, bool)>>,
    reset_calls: Mutex<u32>,
}

impl InMemoryLogClient {
    pub fn new(batches: Vec<MessageBatch>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
            subscriptions: Mutex::new(Vec::new()),
            reset_calls: Mutex::new(0),
        }
    }

    pub async fn subscriptions(&self) -> Vec<(String, bool)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn reset_calls(&self) -> u32 {
        *self.reset_calls.lock().await
    }
}

#[async_trait]
impl EventLogClient for InMemoryLogClient {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> EngineResult<()> {
        self.subscriptions.lock().await.push((topic.to_owned(), from_beginning));
        Ok(())
    }

    async fn consume_batches(&self, handler: BatchHandler) -> EngineResult<()> {
        loop {
            let next = self.batches.lock().await.pop_front();
            match next {
                Some(batch) => handler(batch).await?,
                None => return Ok(()),
            }
        }
    }

    async fn reset_group_to_earliest(&self, _group: &str) -> EngineResult<bool> {
        *self.reset_calls.lock().await += 1;
        Ok(true)
    }
}
