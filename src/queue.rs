// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Options and Dead-Letter Arguments
//!
//! Every consumer endpoint declares its queue with a durability flag and, for the
//! receiver and retry queues, a set of dead-letter arguments. Those argument names are
//! the wire contract that makes the broker move a rejected message to the retry
//! exchange and, once the TTL expires, back to the original exchange.

use lapin::types::{AMQPValue, FieldTable, LongInt, LongString, ShortString};
use std::collections::BTreeMap;

/// Queue argument naming the exchange a dead-lettered message is republished to
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the routing key used when a message is dead-lettered
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Queue argument holding the per-message TTL in milliseconds
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";

/// Dead-letter arguments attached to a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueArguments {
    pub dead_letter_exchange: String,
    pub dead_letter_routing_key: String,
    /// Message TTL in milliseconds. Only the retry queue carries one.
    pub message_ttl: Option<i32>,
}

impl QueueArguments {
    /// Renders the arguments as the field table sent with `queue.declare`.
    pub fn to_field_table(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange.clone())),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(self.dead_letter_routing_key.clone())),
        );

        if let Some(ttl) = self.message_ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        FieldTable::from(args)
    }
}

/// Declaration options for a consumer queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub arguments: Option<QueueArguments>,
}

impl QueueOptions {
    /// A durable queue without dead-letter arguments.
    pub fn durable() -> Self {
        QueueOptions {
            durable: true,
            arguments: None,
        }
    }

    /// Attaches dead-letter arguments to the queue.
    pub fn with_arguments(mut self, arguments: QueueArguments) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn field_table(&self) -> FieldTable {
        match &self.arguments {
            Some(args) => args.to_field_table(),
            None => FieldTable::default(),
        }
    }
}
