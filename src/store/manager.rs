//! `mobc` pool manager for async Redis connections.
//!
//! The teacher pairs `mobc` with `redis` but keeps its own adapter out of
//! the retrieved source; this is the minimal manager the pairing needs —
//! `mobc::Manager` only asks for `connect`/`check`.

use async_trait::async_trait;
use redis::aio::Connection;
use redis::{Client, RedisError};

pub struct RedisConnectionManager {
    client: Client,
}

impl RedisConnectionManager {
    pub fn new(url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
        })
    }
}

#[async_trait]
impl mobc::Manager for RedisConnectionManager {
    type Connection = Connection;
    type Error = RedisError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.client.get_async_connection().await
    }

    async fn check(&self, mut conn: Self::Connection) -> Result<Self::Connection, Self::Error> {
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(conn)
    }
}
