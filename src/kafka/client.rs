//! `rdkafka`-backed `EventLogClient`.
//!
//! Grounded on the StreamConsumer + `consumer.stream()` poll pattern used
//! by the pack's Kafka-consuming services (audit-consumer, the Materialize
//! source reader) — the teacher itself has no log client of its own.

use super::{BatchHandler, ConsumedMessage, EventLogClient, MessageBatch};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use futures::StreamExt;
use log::warn;
use rdkafka::admin::{AdminClient, AdminOptions};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Message, TopicPartitionList};
use std::time::Duration;
use tokio::sync::OnceCell;

const ADMIN_RETRIES: u32 = 8;
const ADMIN_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const ADMIN_MAX_BACKOFF: Duration = Duration::from_secs(2);

const BATCH_MAX_SIZE: usize = 500;
const BATCH_MAX_WAIT: Duration = Duration::from_millis(250);

pub struct RdKafkaLogClient {
    brokers: String,
    client_id: String,
    group_id: String,
    consumer: OnceCell<StreamConsumer>,
    admin: AdminClient<DefaultClientContext>,
}

impl RdKafkaLogClient {
    pub fn new(brokers: &[String], client_id: &str, group_id: &str) -> EngineResult<Self> {
        let broker_list = brokers.join(",");
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &broker_list)
            .create()
            .map_err(EngineError::LogFatal)?;
        Ok(Self {
            brokers: broker_list,
            client_id: client_id.to_owned(),
            group_id: group_id.to_owned(),
            consumer: OnceCell::new(),
            admin,
        })
    }

    async fn consumer(&self, from_beginning: bool) -> EngineResult<&StreamConsumer> {
        self.consumer
            .get_or_try_init(|| async {
                ClientConfig::new()
                    .set("bootstrap.servers", &self.brokers)
                    .set("group.id", &self.group_id)
                    .set("client.id", &self.client_id)
                    .set("session.timeout.ms", "30000")
                    .set("heartbeat.interval.ms", "3000")
                    .set("enable.auto.commit", "false")
                    .set("enable.auto.offset.store", "false")
                    .set("enable.partition.eof", "false")
                    .set("auto.offset.reset", if from_beginning { "earliest" } else { "latest" })
                    .create::<StreamConsumer>()
                    .map_err(EngineError::LogFatal)
            })
            .await
    }
}

/// One offset past the highest consumed offset per topic/partition in the
/// batch — the position the next `poll` should resume from, and what gets
/// committed once `handler` returns `Ok` (§4.2: never before).
fn highest_offset_per_partition(messages: &[ConsumedMessage]) -> TopicPartitionList {
    let mut highest: std::collections::HashMap<(&str, i32), i64> = std::collections::HashMap::new();
    for message in messages {
        let key = (message.topic.as_str(), message.partition);
        let entry = highest.entry(key).or_insert(message.offset);
        if message.offset > *entry {
            *entry = message.offset;
        }
    }
    let mut tpl = TopicPartitionList::with_capacity(highest.len());
    for ((topic, partition), offset) in highest {
        tpl.add_partition_offset(topic, partition, rdkafka::Offset::Offset(offset + 1))
            .expect("topic/partition/offset are all well-formed");
    }
    tpl
}

/// Errors with these codes mean the connection itself is unusable; every
/// other poll error is transient broker noise librdkafka will recover
/// from on its own.
fn is_fatal(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Authentication) | Some(RDKafkaErrorCode::SaslAuthenticationFailed)
    )
}

#[async_trait]
impl EventLogClient for RdKafkaLogClient {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> EngineResult<()> {
        let consumer = self.consumer(from_beginning).await?;
        consumer.subscribe(&[topic]).map_err(EngineError::LogFatal)
    }

    async fn consume_batches(&self, handler: BatchHandler) -> EngineResult<()> {
        let consumer = self
            .consumer
            .get()
            .ok_or_else(|| EngineError::Config("consume_batches called before subscribe".into()))?;
        let mut stream = consumer.stream();
        loop {
            let mut messages = Vec::new();
            let wait = tokio::time::sleep(BATCH_MAX_WAIT);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    biased;
                    next = stream.next() => {
                        match next {
                            Some(Ok(borrowed)) => {
                                messages.push(ConsumedMessage {
                                    payload: borrowed.payload().map(|p| p.to_vec()).unwrap_or_default(),
                                    topic: borrowed.topic().to_owned(),
                                    partition: borrowed.partition(),
                                    offset: borrowed.offset(),
                                });
                                if messages.len() >= BATCH_MAX_SIZE {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                if is_fatal(&err) {
                                    return Err(EngineError::LogFatal(err));
                                }
                                warn!("transient kafka consumer error: {err}");
                            }
                            None => return Ok(()),
                        }
                    }
                    _ = &mut wait => break,
                }
            }
            if messages.is_empty() {
                handler(MessageBatch { messages }).await?;
                continue;
            }
            let offsets = highest_offset_per_partition(&messages);
            handler(MessageBatch { messages }).await?;
            consumer.commit(&offsets, CommitMode::Sync).map_err(EngineError::LogFatal)?;
        }
    }

    async fn reset_group_to_earliest(&self, group: &str) -> EngineResult<bool> {
        let opts = AdminOptions::new();
        let mut delay = ADMIN_INITIAL_BACKOFF;
        for attempt in 1..=ADMIN_RETRIES {
            match self.admin.delete_groups(&[group], &opts).await {
                Ok(results) => {
                    for result in results {
                        if let Err((group, code)) = result {
                            if code != RDKafkaErrorCode::GroupIdNotFound {
                                warn!("failed to delete consumer group {group}: {code:?}");
                                return Ok(false);
                            }
                        }
                    }
                    return Ok(true);
                }
                Err(err) if attempt < ADMIN_RETRIES => {
                    warn!("transient error resetting group {group} (attempt {attempt}/{ADMIN_RETRIES}): {err}");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(ADMIN_MAX_BACKOFF);
                }
                Err(err) => {
                    warn!("failed to reset consumer group {group}: {err}");
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, partition: i32, offset: i64) -> ConsumedMessage {
        ConsumedMessage {
            payload: Vec::new(),
            topic: topic.to_owned(),
            partition,
            offset,
        }
    }

    #[test]
    fn commits_one_past_the_highest_offset_seen_per_partition() {
        let messages = vec![
            msg("score-submitted", 0, 5),
            msg("score-submitted", 0, 7),
            msg("score-submitted", 1, 2),
        ];
        let tpl = highest_offset_per_partition(&messages);
        let elements = tpl.elements();
        let find = |partition: i32| {
            elements
                .iter()
                .find(|e| e.partition() == partition)
                .map(|e| e.offset())
        };
        assert_eq!(find(0), Some(rdkafka::Offset::Offset(8)));
        assert_eq!(find(1), Some(rdkafka::Offset::Offset(3)));
    }
}
