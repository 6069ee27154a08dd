// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Reliability
//!
//! Retry and dead-letter topology for RabbitMQ consumers, plus an idempotency guard
//! that suppresses duplicate request/response deliveries through a shared store.
//!
//! A typical receiver setup:
//!
//! ```ignore
//! let (_conn, channel) = new_amqp_channel(&[url], "billing").await?;
//! let mut broker = AmqpBroker::new(channel, handler);
//! let mut registry = ConsumerRegistry::new();
//! let store = config.dedup_store().await?;
//!
//! connect_receivers(&mut broker, &mut registry, store, &receivers.subscriptions()).await?;
//! broker.consume_blocking().await?;
//! ```

mod consumer;
mod otel;

pub mod broker;
pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod interceptor;
pub mod message;
pub mod options;
pub mod publisher;
pub mod queue;
pub mod receiver;
pub mod store;
pub mod topology;
