// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Process-level settings, read from an optional TOML file and overlaid with
//! environment variables:
//!
//! - `RMQ_RELIABILITY_CONFIG` points at the file, `config/rabbitmq.toml` by default
//! - `RMQ_RELIABILITY__REDIS_URL=redis://cache:6379` style variables override any
//!   field, `__` separating nested keys

use crate::{
    errors::StoreError,
    options::{ReceiversConfig, SenderOptions},
    store::{DeduplicationStore, InMemoryDeduplicationStore, RedisDeduplicationStore},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable holding the configuration file path
pub const CONFIG_PATH_ENV: &str = "RMQ_RELIABILITY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/rabbitmq.toml";
/// Prefix of the environment overrides
pub const ENV_PREFIX: &str = "RMQ_RELIABILITY";

fn default_app_name() -> String {
    "rabbitmq-reliability".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Connection name reported to the broker
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Redis deduplication store; [`ReliabilityConfig::dedup_store`] falls back to the
    /// in-memory store when absent
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default)]
    pub sender: Option<SenderOptions>,

    #[serde(default)]
    pub receivers: Option<ReceiversConfig>,
}

impl ReliabilityConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses a TOML document, without environment overrides.
    pub fn from_toml(document: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Builds the deduplication store selected by `redis_url`.
    ///
    /// # Returns
    /// A Redis-backed store when `redis_url` is set, otherwise a process-local
    /// [`InMemoryDeduplicationStore`]. Fails with `StoreError` when Redis is unreachable.
    pub async fn dedup_store(&self) -> Result<Arc<dyn DeduplicationStore>, StoreError> {
        match &self.redis_url {
            Some(url) => {
                info!("using redis deduplication store");
                Ok(Arc::new(RedisDeduplicationStore::connect(url).await?))
            }
            None => {
                warn!("redis_url not set, deduplication is local to this process");
                Ok(Arc::new(InMemoryDeduplicationStore::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;

    const DOCUMENT: &str = r#"
app_name = "billing"
redis_url = "redis://localhost:6379"

[sender]
url = "amqp://localhost:5672"
exchange = "events"
exchange_kind = "topic"

[sender.routing_keys]
create_invoice = "invoices.create"

[receivers]
url = "amqp://localhost:5672"
exchange = "events"
exchange_kind = "topic"
retry_ttl = 2000

[[receivers.subscriptions]]
name = "invoices"
queue = "invoices.queue"
pattern = "invoices.*"
prefetch_count = 4
"#;

    #[test]
    fn parses_full_document() {
        let config = ReliabilityConfig::from_toml(DOCUMENT).unwrap();

        assert_eq!(config.app_name, "billing");
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));

        let sender = config.sender.unwrap();
        assert_eq!(sender.exchange_kind, ExchangeKind::Topic);
        assert_eq!(
            sender
                .routing_keys
                .unwrap()
                .get("create_invoice")
                .map(String::as_str),
            Some("invoices.create")
        );

        let subs = config.receivers.unwrap().subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].queue, "invoices.queue");
        assert_eq!(subs[0].prefetch_count, Some(4));
        assert_eq!(subs[0].retry_ttl, Some(2000));
    }

    #[test]
    fn every_section_is_optional() {
        let config = ReliabilityConfig::from_toml("").unwrap();

        assert_eq!(config.app_name, "rabbitmq-reliability");
        assert_eq!(config.redis_url, None);
        assert_eq!(config.sender, None);
        assert_eq!(config.receivers, None);
    }

    #[tokio::test]
    async fn missing_redis_url_selects_in_memory_store() {
        let config = ReliabilityConfig::from_toml("").unwrap();
        let store = config.dedup_store().await.unwrap();

        store.set_with_ttl("idempotency:abc", "1000", 60).await.unwrap();

        assert_eq!(
            store.get("idempotency:abc").await.unwrap().as_deref(),
            Some("1000")
        );
    }
}
