// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use async_trait::async_trait;
use rabbitmq_reliability::{
    errors::{AmqpError, HandlerError, StoreError},
    handler::{Acknowledger, ExecutionContext, MessageHandler},
    interceptor::{IdempotencyInterceptor, InterceptOutcome},
    store::{DeduplicationStore, InMemoryDeduplicationStore},
};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Counts calls and fails while `failing` is set.
#[derive(Default)]
struct CountingHandler {
    calls: AtomicUsize,
    failing: bool,
}

impl CountingHandler {
    fn failing() -> Self {
        CountingHandler {
            failing: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _routing_key: &str, payload: &Value) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(HandlerError::Failure("boom".to_owned()));
        }
        Ok(json!({"echo": payload.clone()}))
    }
}

#[derive(Default)]
struct CountingAcknowledger {
    acks: AtomicUsize,
}

#[async_trait]
impl Acknowledger for CountingAcknowledger {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store whose every operation fails.
struct UnavailableStore;

#[async_trait]
impl DeduplicationStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_owned()))
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_owned()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_owned()))
    }
}

fn message() -> Value {
    json!({"correlationId": "abc", "correlationTimestamp": 1000, "amount": 12})
}

#[tokio::test]
async fn first_delivery_claims_and_runs_handler() {
    let store = Arc::new(InMemoryDeduplicationStore::new());
    let interceptor = IdempotencyInterceptor::new(store.clone());
    let handler = CountingHandler::default();
    let payload = message();

    let outcome = interceptor
        .intercept(&ExecutionContext::rpc("payments.charge", &payload), &handler)
        .await
        .unwrap();

    assert_eq!(handler.calls(), 1);
    assert!(!outcome.is_duplicate());
    assert_eq!(
        store.get("idempotency:abc").await.unwrap(),
        Some("1000".to_owned())
    );
}

#[tokio::test]
async fn redelivery_is_skipped_and_acknowledged_once() {
    let store = Arc::new(InMemoryDeduplicationStore::new());
    let interceptor = IdempotencyInterceptor::new(store);
    let handler = CountingHandler::default();
    let acker = CountingAcknowledger::default();
    let payload = message();

    let ctx = ExecutionContext::rpc("payments.charge", &payload).with_acknowledger(&acker);
    interceptor.intercept(&ctx, &handler).await.unwrap();
    let second = interceptor.intercept(&ctx, &handler).await.unwrap();

    assert_eq!(handler.calls(), 1);
    assert_eq!(acker.acks.load(Ordering::SeqCst), 1);
    assert!(second.is_duplicate());
    assert_eq!(
        second.into_reply(),
        json!({"duplicate": true, "correlationId": "abc"})
    );
}

#[tokio::test]
async fn handler_failure_releases_claim_and_allows_retry() {
    let store = Arc::new(InMemoryDeduplicationStore::new());
    let interceptor = IdempotencyInterceptor::new(store.clone());
    let payload = message();
    let ctx = ExecutionContext::rpc("payments.charge", &payload);

    let failing = CountingHandler::failing();
    let result = interceptor.intercept(&ctx, &failing).await;

    assert_eq!(result, Err(HandlerError::Failure("boom".to_owned())));
    assert!(store.is_empty().await);

    // the redelivery from the retry queue is processed again
    let healthy = CountingHandler::default();
    let outcome = interceptor.intercept(&ctx, &healthy).await.unwrap();

    assert_eq!(healthy.calls(), 1);
    assert!(!outcome.is_duplicate());
}

#[tokio::test]
async fn unavailable_store_fails_open() {
    let interceptor = IdempotencyInterceptor::new(Arc::new(UnavailableStore));
    let handler = CountingHandler::default();
    let payload = message();

    let outcome = interceptor
        .intercept(&ExecutionContext::rpc("payments.charge", &payload), &handler)
        .await
        .unwrap();

    assert_eq!(handler.calls(), 1);
    assert_eq!(
        outcome,
        InterceptOutcome::Handled(json!({"echo": message()}))
    );
}

#[tokio::test]
async fn unavailable_store_propagates_handler_error_once() {
    let interceptor = IdempotencyInterceptor::new(Arc::new(UnavailableStore));
    let handler = CountingHandler::failing();
    let payload = message();

    let result = interceptor
        .intercept(&ExecutionContext::rpc("payments.charge", &payload), &handler)
        .await;

    assert!(result.is_err());
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn uncorrelated_messages_are_never_recorded() {
    let store = Arc::new(InMemoryDeduplicationStore::new());
    let interceptor = IdempotencyInterceptor::new(store.clone());
    let handler = CountingHandler::default();
    let payload = json!({"amount": 12});
    let ctx = ExecutionContext::rpc("payments.charge", &payload);

    interceptor.intercept(&ctx, &handler).await.unwrap();
    interceptor.intercept(&ctx, &handler).await.unwrap();

    assert_eq!(handler.calls(), 2);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn non_broker_calls_bypass_deduplication() {
    let store = Arc::new(InMemoryDeduplicationStore::new());
    let interceptor = IdempotencyInterceptor::new(store.clone());
    let handler = CountingHandler::default();
    let payload = message();
    let ctx = ExecutionContext::other("payments.charge", &payload);

    interceptor.intercept(&ctx, &handler).await.unwrap();
    interceptor.intercept(&ctx, &handler).await.unwrap();

    assert_eq!(handler.calls(), 2);
    assert!(store.is_empty().await);
}
