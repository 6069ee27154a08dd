// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Reliability Layer
//!
//! This module groups the error types raised while building the retry/dead-letter
//! topology, talking to the broker, consulting the deduplication store and running
//! business handlers.
//!
//! - `AmqpError`: setup, publishing and acknowledgement failures
//! - `StoreError`: deduplication store failures, always recovered by the interceptor
//! - `HandlerError`: business handler failures, propagated unchanged

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Configuration errors are raised at setup time and are never retried. The
/// remaining variants map a failed broker call to the operation that failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// A required piece of configuration is missing or invalid
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    /// A logical routing key is not present in the sender routing-key table
    #[error("routing key `{0}` not found in configuration")]
    RoutingKeyNotFound(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error serializing or parsing a message payload
    #[error("failure to serialize payload")]
    SerializationError,

    /// The reply for a request/response call never arrived or was unreadable
    #[error("failure to receive reply `{0}`")]
    ReplyError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,
}

/// Errors reported by a deduplication store.
///
/// The idempotency interceptor treats every variant as data: it logs the
/// condition and keeps processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("deduplication store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by a business message handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler ran and failed; the message should go through the retry path
    #[error("handler failure: {0}")]
    Failure(String),

    /// The payload could not be interpreted by the handler
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_names_both_sides() {
        let err = AmqpError::BindingExchangeToQueueError("ex".to_owned(), "q".to_owned());
        assert_eq!(err.to_string(), "failure to bind queue `q` to exchange `ex`");
    }

    #[test]
    fn routing_key_not_found_names_the_key() {
        let err = AmqpError::RoutingKeyNotFound("TOKENS_FETCH_ALL".to_owned());
        assert_eq!(
            err.to_string(),
            "routing key `TOKENS_FETCH_ALL` not found in configuration"
        );
    }
}
