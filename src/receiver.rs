// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Receiver Wiring
//!
//! Connects logical subscriptions to the broker. For each subscription three consumer
//! endpoints are derived (main, retry and the process-wide dead-letter queue); the
//! idempotency interceptor and the dead-letter queue are set up once per process, on
//! the first subscription.
//!
//! Setup is sequential: the interceptor is installed before any queue is connected and
//! the registry of connected queues is only mutated from one place.

use crate::{
    errors::AmqpError,
    interceptor::IdempotencyInterceptor,
    options::SubscriptionOptions,
    store::DeduplicationStore,
    topology::{create_dlx_config, create_receiver_config, create_retry_config, ConsumerConfig},
};
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Broker-side operations needed to wire consumers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send {
    /// Installs the interceptor run around every delivery of every consumer connected
    /// afterwards.
    fn use_global_interceptor(&mut self, interceptor: Arc<IdempotencyInterceptor>);

    /// Declares the endpoint topology and starts consuming when the endpoint is a
    /// receiver.
    async fn connect_consumer(&mut self, config: ConsumerConfig) -> Result<(), AmqpError>;
}

/// Names of the queues already connected by this process.
#[derive(Debug, Clone, Default)]
pub struct ConsumerRegistry {
    queues: HashSet<String>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the queue was already registered.
    pub fn register(&mut self, queue: &str) -> bool {
        self.queues.insert(queue.to_owned())
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.queues.contains(queue)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

async fn connect<B>(
    broker: &mut B,
    registry: &mut ConsumerRegistry,
    config: ConsumerConfig,
) -> Result<(), AmqpError>
where
    B: BrokerConnection + ?Sized,
{
    let queue = config.queue.clone();
    broker.connect_consumer(config).await?;
    registry.register(&queue);
    debug!(queue = queue, "consumer endpoint connected");
    Ok(())
}

/// Connects the main, retry and (once) dead-letter endpoints of one subscription.
///
/// When `skip_global_setup` is `false` this call also installs the idempotency
/// interceptor and connects the global dead-letter queue, unless the registry already
/// holds it.
///
/// # Parameters
/// * `broker` - Connection the endpoints are declared and consumed on
/// * `registry` - Queues already connected; updated as each endpoint succeeds
/// * `store` - Deduplication store handed to the interceptor
/// * `options` - The subscription to connect
/// * `skip_global_setup` - `true` for every subscription after the first
///
/// # Returns
/// The first endpoint failure. Endpoints connected before it stay connected.
pub async fn connect_receiver<B>(
    broker: &mut B,
    registry: &mut ConsumerRegistry,
    store: Arc<dyn DeduplicationStore>,
    options: &SubscriptionOptions,
    skip_global_setup: bool,
) -> Result<(), AmqpError>
where
    B: BrokerConnection + ?Sized,
{
    let receiver = create_receiver_config(options, None);
    let retry = create_retry_config(options);
    let dlx = create_dlx_config(options);

    if !skip_global_setup {
        broker.use_global_interceptor(Arc::new(IdempotencyInterceptor::new(store)));
    }

    connect(broker, registry, receiver).await?;
    connect(broker, registry, retry).await?;

    if !skip_global_setup && !registry.contains(&dlx.queue) {
        connect(broker, registry, dlx).await?;
    }

    info!(
        "RabbitMQ receiver connected [queue: {}, pattern: {}, exchange: {}, exchangeType: {}]",
        options.queue, options.pattern, options.exchange, options.exchange_kind
    );

    Ok(())
}

/// Connects every subscription in order. Only the first one performs the global
/// setup. The first failure stops the sequence.
///
/// # Parameters
/// * `subscriptions` - Usually [`ReceiversConfig::subscriptions`](crate::options::ReceiversConfig::subscriptions)
pub async fn connect_receivers<B>(
    broker: &mut B,
    registry: &mut ConsumerRegistry,
    store: Arc<dyn DeduplicationStore>,
    subscriptions: &[SubscriptionOptions],
) -> Result<(), AmqpError>
where
    B: BrokerConnection + ?Sized,
{
    for (index, options) in subscriptions.iter().enumerate() {
        connect_receiver(broker, registry, store.clone(), options, index != 0).await?;

        info!(
            "RabbitMQ subscription connected [queue: {}, pattern: {}, exchange: {}, exchangeType: {}]",
            options.queue, options.pattern, options.exchange, options.exchange_kind
        );
    }

    info!(
        "All RabbitMQ subscriptions connected [count: {}]",
        subscriptions.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exchange::ExchangeKind, store::MockDeduplicationStore, topology::EndpointRole};
    use mockall::Sequence;

    fn store() -> Arc<dyn DeduplicationStore> {
        Arc::new(MockDeduplicationStore::new())
    }

    fn subscription(queue: &str) -> SubscriptionOptions {
        SubscriptionOptions::new(
            "amqp://localhost:5672",
            "test_exchange",
            ExchangeKind::Topic,
            queue,
            "test.*",
        )
    }

    #[tokio::test]
    async fn global_setup_installs_interceptor_before_connecting() {
        let mut seq = Sequence::new();
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker
            .expect_use_global_interceptor()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        broker
            .expect_connect_consumer()
            .withf(|c| c.role == EndpointRole::Receiver && c.queue == "test.queue")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        broker
            .expect_connect_consumer()
            .withf(|c| c.role == EndpointRole::Retry && c.queue == "test.queue.retry")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        broker
            .expect_connect_consumer()
            .withf(|c| c.role == EndpointRole::DeadLetter && c.queue == "global.dlx")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        connect_receiver(
            &mut broker,
            &mut registry,
            store(),
            &subscription("test.queue"),
            false,
        )
        .await
        .unwrap();

        assert!(registry.contains("test.queue"));
        assert!(registry.contains("test.queue.retry"));
        assert!(registry.contains("global.dlx"));
    }

    #[tokio::test]
    async fn skipping_global_setup_connects_main_and_retry_only() {
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker.expect_use_global_interceptor().never();
        broker
            .expect_connect_consumer()
            .withf(|c| c.role != EndpointRole::DeadLetter)
            .times(2)
            .returning(|_| Ok(()));

        connect_receiver(
            &mut broker,
            &mut registry,
            store(),
            &subscription("test.queue"),
            true,
        )
        .await
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("global.dlx"));
    }

    #[tokio::test]
    async fn registered_dlx_is_not_connected_twice() {
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();
        registry.register("global.dlx");

        broker.expect_use_global_interceptor().times(1).return_const(());
        broker
            .expect_connect_consumer()
            .withf(|c| c.role != EndpointRole::DeadLetter)
            .times(2)
            .returning(|_| Ok(()));

        connect_receiver(
            &mut broker,
            &mut registry,
            store(),
            &subscription("test.queue"),
            false,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn connection_failure_is_returned() {
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker.expect_use_global_interceptor().return_const(());
        broker
            .expect_connect_consumer()
            .times(1)
            .returning(|c| Err(AmqpError::DeclareQueueError(c.queue)));

        let result = connect_receiver(
            &mut broker,
            &mut registry,
            store(),
            &subscription("test.queue"),
            false,
        )
        .await;

        assert_eq!(
            result,
            Err(AmqpError::DeclareQueueError("test.queue".to_owned()))
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn many_subscriptions_share_one_global_setup() {
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker.expect_use_global_interceptor().times(1).return_const(());
        broker
            .expect_connect_consumer()
            .withf(|c| c.role == EndpointRole::DeadLetter)
            .times(1)
            .returning(|_| Ok(()));
        broker
            .expect_connect_consumer()
            .withf(|c| c.role != EndpointRole::DeadLetter)
            .times(6)
            .returning(|_| Ok(()));

        let subs = vec![
            subscription("test.queue1"),
            subscription("test.queue2"),
            subscription("test.queue3"),
        ];

        connect_receivers(&mut broker, &mut registry, store(), &subs)
            .await
            .unwrap();

        assert_eq!(registry.len(), 7);
    }

    #[tokio::test]
    async fn subscriptions_connect_in_order() {
        let mut seq = Sequence::new();
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker.expect_use_global_interceptor().return_const(());
        for queue in ["a", "a.retry", "global.dlx", "b", "b.retry"] {
            broker
                .expect_connect_consumer()
                .withf(move |c| c.queue == queue)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        connect_receivers(
            &mut broker,
            &mut registry,
            store(),
            &[subscription("a"), subscription("b")],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_subscription_list_connects_nothing() {
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker.expect_use_global_interceptor().never();
        broker.expect_connect_consumer().never();

        connect_receivers(&mut broker, &mut registry, store(), &[])
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failing_subscription_stops_the_sequence() {
        let mut broker = MockBrokerConnection::new();
        let mut registry = ConsumerRegistry::new();

        broker.expect_use_global_interceptor().return_const(());
        broker
            .expect_connect_consumer()
            .times(1)
            .returning(|_| Err(AmqpError::ConnectionError));

        let result = connect_receivers(
            &mut broker,
            &mut registry,
            store(),
            &[subscription("a"), subscription("b")],
        )
        .await;

        assert_eq!(result, Err(AmqpError::ConnectionError));
    }
}
