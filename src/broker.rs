// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Broker Connection
//!
//! `AmqpBroker` implements [`BrokerConnection`] on top of a lapin channel. Connecting a
//! consumer endpoint:
//! 1. declares its exchange (durable)
//! 2. declares its queue with the dead-letter arguments derived by the topology builder
//! 3. binds the queue: receivers with their pattern, retry queues with the key the
//!    receiver dead-letters with; the global dead-letter queue stays unbound
//! 4. for receivers only, sets the prefetch and starts a consumer whose deliveries are
//!    processed concurrently, each in its own task
//!
//! Retry queues are never consumed: messages must sit there until their TTL expires.

use crate::{
    consumer::{consume, Endpoint},
    errors::AmqpError,
    handler::MessageHandler,
    interceptor::IdempotencyInterceptor,
    receiver::BrokerConnection,
    topology::{ConsumerConfig, EndpointRole, DEFAULT_PREFETCH_COUNT},
};
use async_trait::async_trait;
use futures_util::{future::join_all, StreamExt};
use lapin::{
    options::{
        BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// RabbitMQ implementation of [`BrokerConnection`].
pub struct AmqpBroker {
    channel: Arc<Channel>,
    handler: Arc<dyn MessageHandler>,
    interceptor: Option<Arc<IdempotencyInterceptor>>,
    consumers: Vec<JoinHandle<()>>,
}

impl AmqpBroker {
    /// Creates a broker connection dispatching every delivery to `handler`.
    pub fn new(channel: Arc<Channel>, handler: Arc<dyn MessageHandler>) -> Self {
        AmqpBroker {
            channel,
            handler,
            interceptor: None,
            consumers: vec![],
        }
    }

    /// Blocks until every started consumer stops.
    pub async fn consume_blocking(self) -> Result<(), AmqpError> {
        let spawned = join_all(self.consumers).await;
        for res in spawned {
            if res.is_err() {
                error!("tokio process error");
                return Err(AmqpError::InternalError);
            }
        }

        Ok(())
    }

    async fn declare(&self, config: &ConsumerConfig) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", config.exchange);
        self.channel
            .exchange_declare(
                &config.exchange,
                config.exchange_kind.into(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = config.exchange,
                    "error to declare the exchange"
                );
                AmqpError::DeclareExchangeError(config.exchange.clone())
            })?;

        debug!("creating queue: {}", config.queue);
        self.channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: config.queue_options.durable,
                    ..Default::default()
                },
                config.queue_options.field_table(),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = config.queue,
                    "error to declare the queue"
                );
                AmqpError::DeclareQueueError(config.queue.clone())
            })?;

        let Some(key) = config.binding_key() else {
            debug!("queue: {} left unbound", config.queue);
            return Ok(());
        };

        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            config.queue, config.exchange, key
        );
        self.channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError(
                    config.exchange.clone(),
                    config.queue.clone(),
                )
            })
    }

    async fn start_consumer(&mut self, config: &ConsumerConfig) -> Result<(), AmqpError> {
        let prefetch = config.prefetch_count.unwrap_or(DEFAULT_PREFETCH_COUNT);
        let no_ack = config.no_ack.unwrap_or(false);

        self.channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AmqpError::QoSDeclarationError(config.queue.clone())
            })?;

        let tag = format!("{}-{}", config.queue, Uuid::new_v4());
        let mut consumer = self
            .channel
            .basic_consume(
                &config.queue,
                &tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create the consumer");
                AmqpError::BindingConsumerError(config.queue.clone())
            })?;

        let queue = config.queue.clone();
        let handler = self.handler.clone();
        let interceptor = self.interceptor.clone();
        let channel = self.channel.clone();

        self.consumers.push(tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(error = err.to_string(), "errors consume msg");
                        continue;
                    }
                };

                let queue = queue.clone();
                let handler = handler.clone();
                let interceptor = interceptor.clone();
                let channel = channel.clone();

                tokio::spawn(async move {
                    let endpoint = Endpoint {
                        queue: &queue,
                        no_ack,
                    };

                    if let Err(err) = consume(
                        &global::tracer("amqp consumer"),
                        &delivery,
                        &endpoint,
                        handler.as_ref(),
                        interceptor.as_deref(),
                        &channel,
                    )
                    .await
                    {
                        error!(error = err.to_string(), "error consume msg");
                    }
                });
            }
        }));

        debug!("consumer {} started", tag);
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for AmqpBroker {
    fn use_global_interceptor(&mut self, interceptor: Arc<IdempotencyInterceptor>) {
        self.interceptor = Some(interceptor);
    }

    async fn connect_consumer(&mut self, config: ConsumerConfig) -> Result<(), AmqpError> {
        self.declare(&config).await?;

        if config.role == EndpointRole::Receiver {
            self.start_consumer(&config).await?;
        }

        Ok(())
    }
}
