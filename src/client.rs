// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Client
//!
//! Sends messages by logical key. The key is resolved through the sender's routing-key
//! table before anything reaches the broker, so a misconfigured key never produces a
//! partial send.
//!
//! `send` attaches a fresh [`CorrelationEnvelope`] to the payload, which is what makes
//! the receiving side deduplicate it. `emit` publishes the payload as is.

use crate::{
    channel::new_amqp_channel,
    errors::AmqpError,
    message::CorrelationEnvelope,
    options::{RoutingKeys, SenderOptions},
    publisher::{AmqpPublisher, PublishTransport, RecordOptions},
    topology::{create_sender_config, SenderConfig},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct MessageClient {
    routing_keys: RoutingKeys,
    transport: Arc<dyn PublishTransport>,
}

impl MessageClient {
    /// Builds a client over an existing transport.
    ///
    /// Fails with `AmqpError::ConfigurationError` when `options` has no routing-key
    /// table.
    pub fn new(
        options: &SenderOptions,
        transport: Arc<dyn PublishTransport>,
    ) -> Result<Self, AmqpError> {
        let config = create_sender_config(options)?;
        Ok(Self::from_config(&config, transport))
    }

    pub fn from_config(config: &SenderConfig, transport: Arc<dyn PublishTransport>) -> Self {
        info!(
            "RabbitMQ routing keys initialized [count: {}]",
            config.routing_keys.len()
        );

        MessageClient {
            routing_keys: config.routing_keys.clone(),
            transport,
        }
    }

    /// Opens a broker connection and builds a client publishing through it.
    ///
    /// # Parameters
    /// * `options` - Sender URL, exchange and routing-key table
    /// * `connection_name` - Name reported to the broker, usually the app name
    ///
    /// # Returns
    /// A client over an [`AmqpPublisher`]. Fails with `ConfigurationError` when the
    /// routing-key table is missing, or with a connection error when no URL answers.
    pub async fn connect(options: &SenderOptions, connection_name: &str) -> Result<Self, AmqpError> {
        let config = create_sender_config(options)?;
        let (_conn, channel) = new_amqp_channel(&config.urls, connection_name).await?;
        let publisher = AmqpPublisher::new(channel, &config).await?;

        Ok(Self::from_config(&config, publisher))
    }

    /// Wire routing key configured for `key`.
    pub fn resolve(&self, key: &str) -> Result<&str, AmqpError> {
        match self.routing_keys.get(key) {
            Some(routing_key) => Ok(routing_key.as_str()),
            None => {
                error!(key = key, "routing key not found in configuration");
                Err(AmqpError::RoutingKeyNotFound(key.to_owned()))
            }
        }
    }

    /// Publishes `data` without a correlation envelope and without waiting for a reply.
    pub async fn emit<T>(&self, key: &str, data: &T) -> Result<(), AmqpError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let routing_key = self.resolve(key)?;
        let payload = to_value(data)?;

        debug!("emitting to {}", routing_key);
        self.transport.emit(routing_key, &payload).await
    }

    /// Publishes `data` sealed in a new correlation envelope and waits for the reply.
    pub async fn send<T, R>(&self, key: &str, data: &T) -> Result<R, AmqpError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.send_with(key, data, &RecordOptions::default()).await
    }

    /// Same as [`send`](Self::send), attaching per-message AMQP options.
    ///
    /// # Parameters
    /// * `key` - Logical key looked up in the routing-key table
    /// * `data` - Request payload; non-object values are wrapped as `{"data": ...}`
    /// * `options` - Headers, priority, expiration and other properties of the message
    ///
    /// # Returns
    /// The reply deserialized as `R`, or `AmqpError::RoutingKeyNotFound` when `key` is not
    /// configured.
    pub async fn send_with<T, R>(
        &self,
        key: &str,
        data: &T,
        options: &RecordOptions,
    ) -> Result<R, AmqpError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let routing_key = self.resolve(key)?;
        let envelope = CorrelationEnvelope::generate();
        let payload = envelope.seal(to_value(data)?);

        debug!(
            correlation_id = envelope.correlation_id,
            "sending to {}", routing_key
        );
        let reply = self.transport.send(routing_key, &payload, options).await?;

        serde_json::from_value(reply).map_err(|err| {
            error!(error = err.to_string(), "failure to deserialize reply");
            AmqpError::ReplyError(envelope.correlation_id)
        })
    }
}

fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value, AmqpError> {
    serde_json::to_value(data).map_err(|err| {
        error!(error = err.to_string(), "failure to serialize payload");
        AmqpError::SerializationError
    })
}
