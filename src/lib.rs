//! In-memory stand-in for an AMQP broker.
//!
//! Direct, topic and fanout routing run on a broker worker thread that is
//! driven entirely by commands; clients talk to it through the same
//! [`MqConnection`] / [`MqChannel`] traits the RabbitMQ adapter implements, so
//! code under test can switch backends with [`Backend`].

pub mod client;
pub mod config;
pub mod errors;
pub mod in_memory;
pub mod message;
pub mod rabbitmq;
pub mod resource;

pub use client::{connect, connect_with_config, Backend, Channel, Connection, MqChannel, MqConnection};
pub use config::MqConfig;
pub use errors::{BrokerError, MqError, Result};
pub use in_memory::{BrokerId, BrokerRegistry, InMemoryBroker, InMemoryChannel, InMemoryConnection};
pub use message::{callback, Callback, Delivery, ExchangeType};
pub use resource::{channel_resource, connection_resource, Resource, ResourceGuard};
