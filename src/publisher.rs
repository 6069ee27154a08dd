// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Raw outbound transport: `emit` publishes and returns, `send` publishes with a
//! `reply_to` address and waits for the reply carrying the same AMQP correlation id.
//! Replies arrive on a server-named queue declared with the sender's reply-queue options
//! and are routed to the waiting caller by correlation id.
//!
//! Routing-key resolution and the correlation envelope live one level up, in
//! [`MessageClient`](crate::client::MessageClient).

use crate::{errors::AmqpError, otel, topology::SenderConfig};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::Context;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode of messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>>;

/// Per-message AMQP options attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOptions {
    /// Application headers. The trace context headers are written after these.
    pub headers: BTreeMap<String, String>,
    pub priority: Option<u8>,
    /// Per-message TTL in milliseconds.
    pub expiration: Option<u64>,
    pub persistent: bool,
    /// Replaces the generated message id.
    pub message_id: Option<String>,
    pub kind: Option<String>,
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn expiration(mut self, millis: u64) -> Self {
        self.expiration = Some(millis);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_owned());
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_owned());
        self
    }

    /// Writes the options into `props` and the header table.
    pub(crate) fn apply(
        &self,
        mut props: BasicProperties,
        headers: &mut BTreeMap<ShortString, AMQPValue>,
    ) -> BasicProperties {
        for (name, value) in &self.headers {
            headers.insert(
                ShortString::from(name.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }

        if let Some(priority) = self.priority {
            props = props.with_priority(priority);
        }
        if let Some(millis) = self.expiration {
            props = props.with_expiration(ShortString::from(millis.to_string()));
        }
        if self.persistent {
            props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }
        if let Some(id) = &self.message_id {
            props = props.with_message_id(ShortString::from(id.clone()));
        }
        if let Some(kind) = &self.kind {
            props = props.with_kind(ShortString::from(kind.clone()));
        }

        props
    }
}

/// Outbound side of the broker, addressed by wire routing key.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PublishTransport: Send + Sync {
    /// Publishes without waiting for any reply.
    async fn emit(&self, routing_key: &str, payload: &Value) -> Result<(), AmqpError>;

    /// Publishes with `options` and waits for the reply.
    async fn send(
        &self,
        routing_key: &str,
        payload: &Value,
        options: &RecordOptions,
    ) -> Result<Value, AmqpError>;
}

/// RabbitMQ implementation of [`PublishTransport`].
pub struct AmqpPublisher {
    channel: Arc<Channel>,
    exchange: String,
    reply_queue: String,
    pending: PendingReplies,
    reply_consumer: JoinHandle<()>,
}

impl AmqpPublisher {
    /// Declares the sender exchange and the reply queue, then starts listening for
    /// replies.
    ///
    /// # Parameters
    /// * `channel` - Channel shared by publishing and the reply consumer
    /// * `config` - Output of [`create_sender_config`](crate::topology::create_sender_config)
    ///
    /// # Returns
    /// The publisher, or a declare/consume error when the broker rejects the setup.
    pub async fn new(channel: Arc<Channel>, config: &SenderConfig) -> Result<Arc<Self>, AmqpError> {
        channel
            .exchange_declare(
                &config.exchange,
                config.exchange_kind.into(),
                ExchangeDeclareOptions {
                    durable: config.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to declare the exchange");
                AmqpError::DeclareExchangeError(config.exchange.clone())
            })?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: config.reply_queue_options.durable,
                    auto_delete: config.reply_queue_options.auto_delete,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to declare the reply queue");
                AmqpError::DeclareQueueError("reply".to_owned())
            })?;
        let reply_queue = queue.name().as_str().to_owned();

        let mut consumer = channel
            .basic_consume(
                &reply_queue,
                &format!("{reply_queue}-replies"),
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to consume the reply queue");
                AmqpError::BindingConsumerError(reply_queue.clone())
            })?;

        let pending: PendingReplies = Arc::default();
        let waiting = pending.clone();

        let reply_consumer = tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(error = err.to_string(), "errors consume reply");
                        continue;
                    }
                };

                let Some(id) = delivery.properties.correlation_id() else {
                    warn!("reply without correlation id dropped");
                    continue;
                };

                match waiting.lock().await.remove(id.as_str()) {
                    Some(tx) => {
                        let _ = tx.send(delivery.data);
                    }
                    None => warn!(correlation_id = id.as_str(), "unexpected reply dropped"),
                }
            }
        });

        debug!("publisher ready, replies on {}", reply_queue);

        Ok(Arc::new(AmqpPublisher {
            channel,
            exchange: config.exchange.clone(),
            reply_queue,
            pending,
            reply_consumer,
        }))
    }

    async fn publish(
        &self,
        routing_key: &str,
        payload: &Value,
        props: BasicProperties,
        options: &RecordOptions,
    ) -> Result<(), AmqpError> {
        let data = serde_json::to_vec(payload).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize payload");
            AmqpError::SerializationError
        })?;

        let mut headers = BTreeMap::new();
        let mut props = options.apply(props, &mut headers);
        otel::inject(&Context::current(), &mut headers);

        if props.message_id().is_none() {
            props = props.with_message_id(ShortString::from(Uuid::new_v4().to_string()));
        }

        match self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &data,
                props
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PublishTransport for AmqpPublisher {
    async fn emit(&self, routing_key: &str, payload: &Value) -> Result<(), AmqpError> {
        self.publish(
            routing_key,
            payload,
            BasicProperties::default(),
            &RecordOptions::default(),
        )
        .await
    }

    async fn send(
        &self,
        routing_key: &str,
        payload: &Value,
        options: &RecordOptions,
    ) -> Result<Value, AmqpError> {
        let correlation_id = Uuid::new_v4().to_string();
        let rx = track_reply(&mut *self.pending.lock().await, &correlation_id);

        let props = BasicProperties::default()
            .with_reply_to(ShortString::from(self.reply_queue.clone()))
            .with_correlation_id(ShortString::from(correlation_id.clone()));

        if let Err(err) = self.publish(routing_key, payload, props, options).await {
            self.pending.lock().await.remove(&correlation_id);
            return Err(err);
        }

        let data = rx.await.map_err(|_| {
            error!(correlation_id = correlation_id, "reply channel closed");
            AmqpError::ReplyError(correlation_id.clone())
        })?;

        serde_json::from_slice(&data).map_err(|err| {
            error!(error = err.to_string(), "failure to parse reply");
            AmqpError::ReplyError(correlation_id)
        })
    }
}

/// Registers a reply slot for `correlation_id`.
///
/// Slots whose caller stopped waiting, e.g. a `send` future dropped by an outer timeout,
/// are removed first.
fn track_reply(
    pending: &mut HashMap<String, oneshot::Sender<Vec<u8>>>,
    correlation_id: &str,
) -> oneshot::Receiver<Vec<u8>> {
    pending.retain(|_, tx| !tx.is_closed());

    let (tx, rx) = oneshot::channel();
    pending.insert(correlation_id.to_owned(), tx);
    rx
}

impl Drop for AmqpPublisher {
    fn drop(&mut self) {
        self.reply_consumer.abort();
    }
}
