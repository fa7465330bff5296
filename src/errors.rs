// src/errors.rs

use std::time::Duration;

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Failures raised by the broker worker while handling a command.
///
/// These travel back to the issuing channel over the command's reply slot and
/// are re-raised there as [`MqError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("consumer queue not found: {0}")]
    ConsumerQueueNotFound(String),

    #[error("bad exchange: {0}")]
    BadExchange(String),

    #[error("broker internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Consumer queue not found: {0}")]
    ConsumerQueueNotFound(String),

    #[error("Bad exchange: {0}")]
    BadExchange(String),

    #[error("Broker internal error: {0}")]
    BrokerInternal(String),

    #[error("Resource not available after {0:?}")]
    ResourceNotAvailable(Duration),

    #[error("Resource was not returned in time")]
    ReturnTimeout,

    #[error("No broker registered as {0}")]
    BrokerNotFound(String),

    #[error("Broker {0} is not running")]
    BrokerClosed(String),

    #[error("No broker response after {0:?}")]
    ResponseTimeout(Duration),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("AMQP error: {0}")]
    Amqp(#[from] LapinError),

    #[error("Message serialization error: {0}")]
    Serialization(#[from] SerdeError),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Custom Result type for broker operations
pub type Result<T> = std::result::Result<T, MqError>;

impl From<BrokerError> for MqError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::ExchangeNotFound(name) => MqError::ExchangeNotFound(name),
            BrokerError::ConsumerQueueNotFound(name) => MqError::ConsumerQueueNotFound(name),
            BrokerError::BadExchange(msg) => MqError::BadExchange(msg),
            BrokerError::Internal(msg) => MqError::BrokerInternal(msg),
        }
    }
}

impl From<anyhow::Error> for MqError {
    fn from(error: anyhow::Error) -> Self {
        MqError::Config(format!("{:#}", error))
    }
}
