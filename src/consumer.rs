// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Processing of a single delivery taken from a receiver queue:
//! 1. Decodes the JSON payload and opens a consumer span
//! 2. Runs the handler, through the idempotency interceptor when one is installed
//! 3. Publishes the reply when the delivery carries a `reply_to` address
//! 4. Acknowledges on success, or rejects without requeue so the queue dead-letters the
//!    message to the retry exchange
//!
//! Duplicates are acknowledged by the interceptor itself and are not acknowledged again
//! here.

use crate::{
    errors::{AmqpError, HandlerError},
    handler::{Acknowledger, ExecutionContext, MessageHandler},
    interceptor::{IdempotencyInterceptor, InterceptOutcome},
    otel,
    publisher::JSON_CONTENT_TYPE,
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
    types::ShortString,
    BasicProperties, Channel,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{FutureExt, Status, TraceContextExt},
    Context,
};
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, error};

/// Acknowledges the delivery it wraps.
pub(crate) struct DeliveryAcknowledger<'a>(pub(crate) &'a Delivery);

#[async_trait]
impl Acknowledger for DeliveryAcknowledger<'_> {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }
}

/// Settings of the queue a delivery was taken from.
pub(crate) struct Endpoint<'a> {
    pub(crate) queue: &'a str,
    pub(crate) no_ack: bool,
}

/// What the consumer still owes the broker for a processed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack,
    /// Nack without requeue, so the queue dead-letters the message to the retry exchange.
    Reject,
    /// Auto-ack consumers, and duplicates already acknowledged by the interceptor.
    Settled,
}

pub(crate) fn settlement(
    result: &Result<InterceptOutcome, HandlerError>,
    no_ack: bool,
) -> Settlement {
    match result {
        _ if no_ack => Settlement::Settled,
        Ok(InterceptOutcome::Duplicate(_)) => Settlement::Settled,
        Ok(InterceptOutcome::Handled(_)) => Settlement::Ack,
        Err(_) => Settlement::Reject,
    }
}

pub(crate) fn reject_options() -> BasicNackOptions {
    BasicNackOptions {
        multiple: false,
        requeue: false,
    }
}

/// Runs `handler` for `ctx` with `trace_cx` attached, through the interceptor when one
/// is installed.
pub(crate) async fn run_handler(
    ctx: &ExecutionContext<'_>,
    handler: &dyn MessageHandler,
    interceptor: Option<&IdempotencyInterceptor>,
    trace_cx: Context,
) -> Result<InterceptOutcome, HandlerError> {
    match interceptor {
        Some(interceptor) => interceptor.intercept(ctx, handler).with_context(trace_cx).await,
        None => handler
            .handle(ctx.routing_key(), ctx.payload())
            .with_context(trace_cx)
            .await
            .map(InterceptOutcome::Handled),
    }
}

/// Consumes and processes one delivery.
///
/// The handler runs inside the consumer span's context, so messages it publishes carry
/// the inbound trace.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    endpoint: &Endpoint<'_>,
    handler: &dyn MessageHandler,
    interceptor: Option<&IdempotencyInterceptor>,
    channel: &Channel,
) -> Result<(), AmqpError> {
    let routing_key = delivery.routing_key.as_str();
    let (parent_cx, consumer_span) =
        otel::new_span(&delivery.properties, tracer, routing_key, endpoint.queue);
    let trace_cx = parent_cx.with_span(consumer_span);
    let span = trace_cx.span();

    debug!(
        "received: {} - exchange: {} - queue: {}",
        routing_key,
        delivery.exchange.as_str(),
        endpoint.queue
    );

    let acker = DeliveryAcknowledger(delivery);

    let payload: Value = match serde_json::from_slice(&delivery.data) {
        Ok(value) => value,
        Err(err) => {
            let msg = "removing message from queue - reason: payload is not json";
            error!(error = err.to_string(), "{}", msg);
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(msg),
            });

            if !endpoint.no_ack {
                acker.ack().await?;
            }
            return Ok(());
        }
    };

    let mut ctx = ExecutionContext::rpc(routing_key, &payload);
    if !endpoint.no_ack {
        ctx = ctx.with_acknowledger(&acker);
    }

    let result = run_handler(&ctx, handler, interceptor, trace_cx.clone()).await;

    if let Err(err) = &result {
        error!(
            error = err.to_string(),
            queue = endpoint.queue,
            "error whiling handling msg"
        );
        span.record_error(err);
        span.set_status(Status::Error {
            description: Cow::from(err.to_string()),
        });
    }

    let settle = settlement(&result, endpoint.no_ack);

    if settle == Settlement::Reject {
        debug!("sending message to retry");
        return delivery.nack(reject_options()).await.map_err(|e| {
            error!(error = e.to_string(), "error whiling nack msg");
            AmqpError::NackMessageError
        });
    }

    let Ok(processed) = result else {
        return Ok(());
    };

    debug!("message successfully processed");
    reply(channel, delivery, &processed.into_reply()).await;

    if settle == Settlement::Ack {
        if let Err(err) = acker.ack().await {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
            return Err(err);
        }
    }

    span.set_status(Status::Ok);
    Ok(())
}

/// Publishes `body` to the delivery's `reply_to` address, if any. Failures are logged.
async fn reply(channel: &Channel, delivery: &Delivery, body: &Value) {
    let Some(reply_to) = delivery.properties.reply_to() else {
        return;
    };

    let data = match serde_json::to_vec(body) {
        Ok(data) => data,
        Err(err) => {
            error!(error = err.to_string(), "failure to serialize reply");
            return;
        }
    };

    let mut props =
        BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE));
    if let Some(correlation_id) = delivery.properties.correlation_id() {
        props = props.with_correlation_id(correlation_id.clone());
    }

    if let Err(err) = channel
        .basic_publish(
            "",
            reply_to.as_str(),
            BasicPublishOptions::default(),
            &data,
            props,
        )
        .await
    {
        error!(
            error = err.to_string(),
            reply_to = reply_to.as_str(),
            "failure to publish reply"
        );
    }
}
