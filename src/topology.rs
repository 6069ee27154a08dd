// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry / Dead-Letter Topology Builder
//!
//! Pure functions deriving the wire-level configuration of the four endpoints used by
//! a service: the sender, the main (receiver) queue, its retry queue and the
//! process-wide dead-letter queue.
//!
//! The flow they describe:
//! - a message rejected by the receiver queue is dead-lettered to the retry exchange
//!   with the receiver pattern as routing key;
//! - the retry queue holds it for `x-message-ttl` milliseconds and then dead-letters it
//!   back to the original exchange with the original pattern;
//! - the global dead-letter queue is shared by every subscription of the process.
//!
//! Nothing here is cached: every call reads the options it is given.

use crate::{
    errors::AmqpError,
    exchange::ExchangeKind,
    options::{RoutingKeys, SenderOptions, SubscriptionOptions},
    queue::{QueueArguments, QueueOptions},
};

/// Prefetch count used when a subscription does not set one
pub const DEFAULT_PREFETCH_COUNT: u16 = 10;
/// Delay, in milliseconds, a failed message spends in the retry queue
pub const DEFAULT_RETRY_TTL: i32 = 5000;
/// Name of the dead-letter queue shared by every subscription of the process
pub const DEFAULT_DLX_QUEUE: &str = "global.dlx";
/// Name of the dead-letter exchange shared by every subscription of the process
pub const DEFAULT_DLX_EXCHANGE: &str = "events_exchange.dlx";
/// Suffix appended to the queue and exchange names of the retry endpoint
pub const RETRY_SUFFIX: &str = ".retry";

/// Transport discriminator of a derived configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    #[default]
    Rmq,
}

/// Which of the three consumer endpoints a configuration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Receiver,
    Retry,
    DeadLetter,
}

/// Wire-level configuration of one consumer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub transport: Transport,
    pub role: EndpointRole,
    pub urls: Vec<String>,
    pub queue: String,
    pub queue_options: QueueOptions,
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub wildcards: bool,
    /// Binding pattern; receiver endpoints only.
    pub pattern: Option<String>,
    /// Receiver endpoints only.
    pub prefetch_count: Option<u16>,
    /// Receiver endpoints only. `false` means explicit acknowledgement.
    pub no_ack: Option<bool>,
}

impl ConsumerConfig {
    /// Routing key the endpoint queue is bound with, if any.
    ///
    /// Receivers bind with their pattern. Retry queues bind with the key the receiver
    /// dead-letters with, which is the original pattern. The global dead-letter queue
    /// is declared but left unbound.
    pub fn binding_key(&self) -> Option<&str> {
        match self.role {
            EndpointRole::Receiver => self.pattern.as_deref(),
            EndpointRole::Retry => self
                .queue_options
                .arguments
                .as_ref()
                .map(|args| args.dead_letter_routing_key.as_str()),
            EndpointRole::DeadLetter => None,
        }
    }
}

/// Declaration options of the reply queue used by request/response sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyQueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

/// Wire-level configuration of the outbound side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    pub transport: Transport,
    pub urls: Vec<String>,
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub wildcards: bool,
    pub durable: bool,
    pub reply_queue_options: ReplyQueueOptions,
    pub routing_keys: RoutingKeys,
}

/// Empty overrides count as absent.
fn name_or(value: &Option<String>, default: impl FnOnce() -> String) -> String {
    match value.as_deref() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => default(),
    }
}

fn retry_exchange(options: &SubscriptionOptions) -> String {
    name_or(&options.retry_exchange, || {
        format!("{}{}", options.exchange, RETRY_SUFFIX)
    })
}

/// Builds the sender configuration.
///
/// Fails with `AmqpError::ConfigurationError` when no routing-key table is supplied:
/// every send resolves its logical key through that table.
///
/// # Parameters
/// * `options` - Sender URL, exchange and routing-key table
///
/// # Returns
/// A durable exchange with wildcards enabled, and a reply queue that is non-durable
/// and auto-deleted unless `reply_queue_options` says otherwise.
pub fn create_sender_config(options: &SenderOptions) -> Result<SenderConfig, AmqpError> {
    let Some(routing_keys) = options.routing_keys.clone() else {
        return Err(AmqpError::ConfigurationError(
            "routing keys are required in the sender configuration".to_owned(),
        ));
    };

    let overrides = options.reply_queue_options.clone().unwrap_or_default();

    Ok(SenderConfig {
        transport: Transport::Rmq,
        urls: vec![options.url.clone()],
        exchange: options.exchange.clone(),
        exchange_kind: options.exchange_kind,
        wildcards: true,
        durable: true,
        reply_queue_options: ReplyQueueOptions {
            durable: overrides.durable.unwrap_or(false),
            auto_delete: overrides.auto_delete.unwrap_or(true),
        },
        routing_keys,
    })
}

/// Builds the main queue configuration.
///
/// `pattern` overrides `options.pattern` for both the binding and the dead-letter
/// routing key.
///
/// # Parameters
/// * `options` - The subscription being connected
/// * `pattern` - Optional binding override; empty counts as absent
///
/// # Returns
/// A durable queue dead-lettering to the retry exchange, with a prefetch of
/// `DEFAULT_PREFETCH_COUNT` unless overridden.
pub fn create_receiver_config(
    options: &SubscriptionOptions,
    pattern: Option<&str>,
) -> ConsumerConfig {
    let pattern = match pattern {
        Some(p) if !p.is_empty() => p.to_owned(),
        _ => options.pattern.clone(),
    };

    let prefetch_count = match options.prefetch_count {
        Some(count) if count > 0 => count,
        _ => DEFAULT_PREFETCH_COUNT,
    };

    ConsumerConfig {
        transport: Transport::Rmq,
        role: EndpointRole::Receiver,
        urls: vec![options.url.clone()],
        queue: options.queue.clone(),
        queue_options: QueueOptions::durable().with_arguments(QueueArguments {
            dead_letter_exchange: retry_exchange(options),
            dead_letter_routing_key: pattern.clone(),
            message_ttl: None,
        }),
        exchange: options.exchange.clone(),
        exchange_kind: options.exchange_kind,
        wildcards: true,
        pattern: Some(pattern),
        prefetch_count: Some(prefetch_count),
        no_ack: Some(options.no_ack.unwrap_or(false)),
    }
}

/// Builds the retry queue configuration.
///
/// The retry queue dead-letters to the original exchange with the original pattern,
/// which is what returns a message to the main flow once its TTL expires.
///
/// # Parameters
/// * `options` - The subscription whose retry cycle is built
///
/// # Returns
/// A queue named `<queue>.retry` on `<exchange>.retry` by default, holding messages for
/// `retry_ttl` milliseconds (`DEFAULT_RETRY_TTL` when unset or zero).
pub fn create_retry_config(options: &SubscriptionOptions) -> ConsumerConfig {
    let queue = name_or(&options.retry_queue, || {
        format!("{}{}", options.queue, RETRY_SUFFIX)
    });

    let ttl = match options.retry_ttl {
        Some(ttl) if ttl > 0 => ttl,
        _ => DEFAULT_RETRY_TTL,
    };

    ConsumerConfig {
        transport: Transport::Rmq,
        role: EndpointRole::Retry,
        urls: vec![options.url.clone()],
        queue,
        queue_options: QueueOptions::durable().with_arguments(QueueArguments {
            dead_letter_exchange: options.exchange.clone(),
            dead_letter_routing_key: options.pattern.clone(),
            message_ttl: Some(ttl),
        }),
        exchange: retry_exchange(options),
        exchange_kind: options.retry_exchange_kind.unwrap_or(options.exchange_kind),
        wildcards: true,
        pattern: None,
        prefetch_count: None,
        no_ack: None,
    }
}

/// Builds the process-wide dead-letter queue configuration.
///
/// # Returns
/// `DEFAULT_DLX_QUEUE` on `DEFAULT_DLX_EXCHANGE` unless `dlx_queue` / `dlx_exchange` are set.
pub fn create_dlx_config(options: &SubscriptionOptions) -> ConsumerConfig {
    ConsumerConfig {
        transport: Transport::Rmq,
        role: EndpointRole::DeadLetter,
        urls: vec![options.url.clone()],
        queue: name_or(&options.dlx_queue, || DEFAULT_DLX_QUEUE.to_owned()),
        queue_options: QueueOptions::durable(),
        exchange: name_or(&options.dlx_exchange, || DEFAULT_DLX_EXCHANGE.to_owned()),
        exchange_kind: options.dlx_exchange_kind.unwrap_or(options.exchange_kind),
        wildcards: true,
        pattern: None,
        prefetch_count: None,
        no_ack: None,
    }
}
