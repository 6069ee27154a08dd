// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Idempotency Interceptor
//!
//! Middleware run around every broker delivery. Messages carrying a correlation
//! identifier are checked against the deduplication store:
//!
//! 1. a present record means the message was already claimed: the handler is skipped,
//!    the delivery is acknowledged and a [`DuplicateReceipt`] is returned;
//! 2. an absent record is claimed (written with a 24 hour TTL) before the handler runs,
//!    so a concurrent redelivery of the same identifier is seen as a duplicate;
//! 3. a handler failure removes the claim so the retry topology can reprocess the
//!    message, and the handler error is returned as is.
//!
//! Store failures never block processing: the interceptor logs them and runs the
//! handler.

use crate::{
    errors::HandlerError,
    handler::{ExecutionContext, InvocationKind, MessageHandler},
    message::{decode, Decoded, DuplicateReceipt},
    store::DeduplicationStore,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Prefix of every deduplication key
pub const IDEMPOTENCY_KEY_PREFIX: &str = "idempotency:";
/// Lifetime of a deduplication record: 24 hours
pub const IDEMPOTENCY_TTL_SECS: u64 = 24 * 60 * 60;
/// Stored when a correlated message has no timestamp
pub const UNKNOWN_TIMESTAMP: &str = "unknown";

/// What the interceptor produced for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptOutcome {
    /// The handler ran and returned this reply.
    Handled(Value),
    /// The message had already been claimed; the handler did not run.
    Duplicate(DuplicateReceipt),
}

impl InterceptOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, InterceptOutcome::Duplicate(_))
    }

    /// The value replied to the caller.
    pub fn into_reply(self) -> Value {
        match self {
            InterceptOutcome::Handled(value) => value,
            InterceptOutcome::Duplicate(receipt) => receipt.to_value(),
        }
    }
}

pub fn idempotency_key(correlation_id: &str) -> String {
    format!("{IDEMPOTENCY_KEY_PREFIX}{correlation_id}")
}

/// Deduplicating middleware shared by every consumer of the process.
pub struct IdempotencyInterceptor {
    store: Arc<dyn DeduplicationStore>,
}

impl IdempotencyInterceptor {
    pub fn new(store: Arc<dyn DeduplicationStore>) -> Self {
        IdempotencyInterceptor { store }
    }

    /// Runs `handler` for the message in `ctx` unless it is a duplicate.
    pub async fn intercept<H>(
        &self,
        ctx: &ExecutionContext<'_>,
        handler: &H,
    ) -> Result<InterceptOutcome, HandlerError>
    where
        H: MessageHandler + ?Sized,
    {
        if ctx.kind() != InvocationKind::Rpc {
            return passthrough(ctx, handler).await;
        }

        let Decoded::HasCorrelation { id, timestamp, .. } = decode(ctx.payload()) else {
            return passthrough(ctx, handler).await;
        };

        let key = idempotency_key(id);

        match self.store.get(&key).await {
            Err(err) => {
                error!(
                    correlation_id = id,
                    error = err.to_string(),
                    "failure to check idempotency, processing anyway"
                );
                passthrough(ctx, handler).await
            }

            Ok(Some(_)) => {
                warn!(
                    correlation_id = id,
                    correlation_timestamp = timestamp.as_deref(),
                    "duplicate message detected and skipped"
                );
                acknowledge(ctx).await;
                Ok(InterceptOutcome::Duplicate(DuplicateReceipt::new(id)))
            }

            Ok(None) => {
                let claimed = timestamp.unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_owned());

                if let Err(err) = self
                    .store
                    .set_with_ttl(&key, &claimed, IDEMPOTENCY_TTL_SECS)
                    .await
                {
                    error!(
                        correlation_id = id,
                        error = err.to_string(),
                        "failure to claim message, processing anyway"
                    );
                    return passthrough(ctx, handler).await;
                }

                match handler.handle(ctx.routing_key(), ctx.payload()).await {
                    Ok(reply) => {
                        info!(correlation_id = id, "message processed successfully");
                        Ok(InterceptOutcome::Handled(reply))
                    }
                    Err(handler_err) => {
                        if let Err(err) = self.store.delete(&key).await {
                            error!(
                                correlation_id = id,
                                error = err.to_string(),
                                "failure to delete idempotency key"
                            );
                        }
                        Err(handler_err)
                    }
                }
            }
        }
    }
}

async fn passthrough<H>(
    ctx: &ExecutionContext<'_>,
    handler: &H,
) -> Result<InterceptOutcome, HandlerError>
where
    H: MessageHandler + ?Sized,
{
    handler
        .handle(ctx.routing_key(), ctx.payload())
        .await
        .map(InterceptOutcome::Handled)
}

/// Acknowledges a duplicate delivery. Failures are logged, never returned.
async fn acknowledge(ctx: &ExecutionContext<'_>) {
    let Some(acknowledger) = ctx.acknowledger() else {
        warn!("duplicate message has no acknowledgement capability");
        return;
    };

    if let Err(err) = acknowledger.ack().await {
        error!(
            error = err.to_string(),
            "failure to acknowledge duplicate message"
        );
    }
}
