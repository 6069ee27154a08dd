// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Deduplication Store
//!
//! The narrow key-value interface the idempotency interceptor needs, plus two backends:
//! a Redis adapter for shared deployments and an in-process map for single-node use.
//! Per-key operations are assumed atomic at the store; nothing is ordered across keys.

use crate::errors::StoreError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

/// Key-value store holding deduplication records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeduplicationStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key` for `ttl_secs` seconds.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Redis-backed deduplication store.
#[derive(Clone)]
pub struct RedisDeduplicationStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisDeduplicationStore {
    /// Connects to Redis and checks the connection with a `PING`.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|err| {
            error!(error = err.to_string(), "failure to create redis client");
            StoreError::Unavailable(err.to_string())
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|err| {
            error!(error = err.to_string(), "failure to connect to redis");
            StoreError::Unavailable(err.to_string())
        })?;

        let mut ping = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut ping)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "redis connection test failed");
                StoreError::Unavailable(err.to_string())
            })?;

        debug!("redis deduplication store connected");

        Ok(RedisDeduplicationStore {
            connection,
            key_prefix: None,
        })
    }

    /// Namespaces every key as `<prefix>:<key>`.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = Some(prefix.to_owned());
        self
    }

    fn key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_owned(),
        }
    }
}

#[async_trait]
impl DeduplicationStore for RedisDeduplicationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(self.key(key))
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

/// Process-local deduplication store with per-entry expiry.
///
/// Expired entries are dropped when read, and swept from the whole map on every write.
#[derive(Default)]
pub struct InMemoryDeduplicationStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryDeduplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|(_, exp)| *exp > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeduplicationStore for InMemoryDeduplicationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(
            key.to_owned(),
            (value.to_owned(), now + Duration::from_secs(ttl_secs)),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
