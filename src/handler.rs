// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers and Execution Context
//!
//! A `MessageHandler` holds the business logic behind a queue. Each delivery reaches it
//! through an `ExecutionContext` describing how the call was made, what it carries, and
//! whether the underlying delivery can be acknowledged from the outside.

use crate::errors::{AmqpError, HandlerError};
use async_trait::async_trait;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

/// Business logic invoked for every inbound message.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message and returns the reply payload.
    ///
    /// An error leaves the message unacknowledged so the broker routes it to the retry
    /// queue.
    async fn handle(&self, routing_key: &str, payload: &Value) -> Result<Value, HandlerError>;
}

/// Capability to acknowledge the delivery behind an execution context.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;
}

/// How a handler was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// Broker-originated delivery.
    Rpc,
    /// Any other caller, e.g. a direct in-process invocation.
    Other,
}

/// Per-message execution context.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    kind: InvocationKind,
    routing_key: &'a str,
    payload: &'a Value,
    acknowledger: Option<&'a dyn Acknowledger>,
}

impl<'a> ExecutionContext<'a> {
    /// Context for a delivery received from the broker.
    pub fn rpc(routing_key: &'a str, payload: &'a Value) -> Self {
        ExecutionContext {
            kind: InvocationKind::Rpc,
            routing_key,
            payload,
            acknowledger: None,
        }
    }

    /// Context for a call that did not come from the broker.
    pub fn other(routing_key: &'a str, payload: &'a Value) -> Self {
        ExecutionContext {
            kind: InvocationKind::Other,
            routing_key,
            payload,
            acknowledger: None,
        }
    }

    pub fn with_acknowledger(mut self, acknowledger: &'a dyn Acknowledger) -> Self {
        self.acknowledger = Some(acknowledger);
        self
    }

    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    pub fn routing_key(&self) -> &'a str {
        self.routing_key
    }

    pub fn payload(&self) -> &'a Value {
        self.payload
    }

    /// `None` when the delivery cannot be acknowledged from here, e.g. auto-ack
    /// consumers.
    pub fn acknowledger(&self) -> Option<&'a dyn Acknowledger> {
        self.acknowledger
    }
}
