// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription and Sender Options
//!
//! The caller-owned inputs of the topology builder. `SubscriptionOptions` identifies one
//! logical consumer and carries optional overrides for every derived name, while
//! `SenderOptions` describes the outbound side and its routing-key table.

use crate::exchange::ExchangeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical key -> wire routing key.
pub type RoutingKeys = BTreeMap<String, String>;

/// Options describing one logical consumer.
///
/// Every `Option` field is an override; when absent the topology builder derives a
/// value from the required fields. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionOptions {
    pub url: String,
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub queue: String,
    pub pattern: String,

    #[serde(default)]
    pub prefetch_count: Option<u16>,
    #[serde(default)]
    pub no_ack: Option<bool>,

    #[serde(default)]
    pub retry_queue: Option<String>,
    #[serde(default)]
    pub retry_exchange: Option<String>,
    #[serde(default)]
    pub retry_exchange_kind: Option<ExchangeKind>,
    #[serde(default)]
    pub retry_ttl: Option<i32>,

    #[serde(default)]
    pub dlx_queue: Option<String>,
    #[serde(default)]
    pub dlx_exchange: Option<String>,
    #[serde(default)]
    pub dlx_exchange_kind: Option<ExchangeKind>,
}

impl SubscriptionOptions {
    pub fn new(
        url: &str,
        exchange: &str,
        exchange_kind: ExchangeKind,
        queue: &str,
        pattern: &str,
    ) -> Self {
        SubscriptionOptions {
            url: url.to_owned(),
            exchange: exchange.to_owned(),
            exchange_kind,
            queue: queue.to_owned(),
            pattern: pattern.to_owned(),
            ..Default::default()
        }
    }

    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = Some(count);
        self
    }

    pub fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = Some(no_ack);
        self
    }

    pub fn retry_queue(mut self, name: &str) -> Self {
        self.retry_queue = Some(name.to_owned());
        self
    }

    pub fn retry_exchange(mut self, name: &str) -> Self {
        self.retry_exchange = Some(name.to_owned());
        self
    }

    pub fn retry_exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.retry_exchange_kind = Some(kind);
        self
    }

    /// Delay in milliseconds before a failed message returns to the main queue.
    pub fn retry_ttl(mut self, ttl: i32) -> Self {
        self.retry_ttl = Some(ttl);
        self
    }

    pub fn dlx_queue(mut self, name: &str) -> Self {
        self.dlx_queue = Some(name.to_owned());
        self
    }

    pub fn dlx_exchange(mut self, name: &str) -> Self {
        self.dlx_exchange = Some(name.to_owned());
        self
    }

    pub fn dlx_exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.dlx_exchange_kind = Some(kind);
        self
    }
}

/// Reply queue overrides for request/response sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyQueueOverrides {
    #[serde(default)]
    pub durable: Option<bool>,
    #[serde(default)]
    pub auto_delete: Option<bool>,
}

/// Options describing the outbound side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderOptions {
    pub url: String,
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    #[serde(default)]
    pub reply_queue_options: Option<ReplyQueueOverrides>,
    #[serde(default)]
    pub routing_keys: Option<RoutingKeys>,
}

impl SenderOptions {
    pub fn new(url: &str, exchange: &str, exchange_kind: ExchangeKind) -> Self {
        SenderOptions {
            url: url.to_owned(),
            exchange: exchange.to_owned(),
            exchange_kind,
            ..Default::default()
        }
    }

    pub fn routing_keys(mut self, keys: RoutingKeys) -> Self {
        self.routing_keys = Some(keys);
        self
    }

    pub fn reply_queue_options(mut self, overrides: ReplyQueueOverrides) -> Self {
        self.reply_queue_options = Some(overrides);
        self
    }
}

/// One entry of a multi-subscription configuration.
///
/// `name` only identifies the subscription in logs. Every optional field overrides the
/// matching base value of [`ReceiversConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverSubscription {
    pub name: String,
    pub queue: String,
    pub pattern: String,
    #[serde(default)]
    pub prefetch_count: Option<u16>,
    #[serde(default)]
    pub no_ack: Option<bool>,
    #[serde(default)]
    pub retry_queue: Option<String>,
    #[serde(default)]
    pub retry_exchange: Option<String>,
    #[serde(default)]
    pub retry_exchange_kind: Option<ExchangeKind>,
    #[serde(default)]
    pub retry_ttl: Option<i32>,
    #[serde(default)]
    pub dlx_queue: Option<String>,
    #[serde(default)]
    pub dlx_exchange: Option<String>,
    #[serde(default)]
    pub dlx_exchange_kind: Option<ExchangeKind>,
}

/// Base parameters shared by a list of subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiversConfig {
    pub url: String,
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    #[serde(default)]
    pub prefetch_count: Option<u16>,
    #[serde(default)]
    pub no_ack: Option<bool>,
    #[serde(default)]
    pub retry_ttl: Option<i32>,
    #[serde(default)]
    pub dlx_queue: Option<String>,
    #[serde(default)]
    pub dlx_exchange: Option<String>,
    #[serde(default)]
    pub dlx_exchange_kind: Option<ExchangeKind>,
    #[serde(default)]
    pub subscriptions: Vec<ReceiverSubscription>,
}

impl ReceiversConfig {
    /// Expands every subscription into full options, in declaration order.
    pub fn subscriptions(&self) -> Vec<SubscriptionOptions> {
        self.subscriptions
            .iter()
            .map(|sub| SubscriptionOptions {
                url: self.url.clone(),
                exchange: self.exchange.clone(),
                exchange_kind: self.exchange_kind,
                queue: sub.queue.clone(),
                pattern: sub.pattern.clone(),
                prefetch_count: sub.prefetch_count.or(self.prefetch_count),
                no_ack: sub.no_ack.or(self.no_ack),
                retry_queue: sub.retry_queue.clone(),
                retry_exchange: sub.retry_exchange.clone(),
                retry_exchange_kind: sub.retry_exchange_kind,
                retry_ttl: sub.retry_ttl.or(self.retry_ttl),
                dlx_queue: sub.dlx_queue.clone().or_else(|| self.dlx_queue.clone()),
                dlx_exchange: sub.dlx_exchange.clone().or_else(|| self.dlx_exchange.clone()),
                dlx_exchange_kind: sub.dlx_exchange_kind.or(self.dlx_exchange_kind),
            })
            .collect()
    }
}
