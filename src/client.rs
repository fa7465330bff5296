//! Backend-neutral client surface.
//!
//! Both the in-memory engine and the RabbitMQ adapter implement
//! [`MqConnection`] and [`MqChannel`]; [`connect`] picks one at runtime and
//! hands back the [`Connection`] / [`Channel`] enums that delegate to it.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{info, trace};

use crate::config::MqConfig;
use crate::errors::{MqError, Result};
use crate::in_memory::{BrokerRegistry, InMemoryChannel, InMemoryConnection};
use crate::message::{Callback, Delivery, ExchangeType};
use crate::rabbitmq::{RabbitChannel, RabbitConnection};

#[async_trait]
pub trait MqChannel: Send + Sync {
    /// Declares the exchange this channel is going to publish to.
    async fn register_producer(&self, exchange_name: &str, exchange_type: ExchangeType) -> Result<()>;

    /// Declares the exchange and queue, binds `routing_keys` and installs
    /// `callback` for the queue. Returns the queue name, which is generated
    /// when `queue_name` is `None`.
    async fn register_consumer(
        &self,
        exchange_name: &str,
        exchange_type: ExchangeType,
        queue_name: Option<&str>,
        routing_keys: &[&str],
        callback: Callback,
    ) -> Result<String>;

    async fn publish(&self, exchange_name: &str, payload: Vec<u8>, routing_key: &str) -> Result<()>;

    async fn publish_json<T>(&self, exchange_name: &str, message: &T, routing_key: &str) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_vec(message)?;
        self.publish(exchange_name, payload, routing_key).await
    }
}

#[async_trait]
pub trait MqConnection: Send + Sync {
    type Channel: MqChannel;

    async fn create_channel(&self) -> Result<Self::Channel>;

    /// Delivers pending messages to the registered callbacks. `None` runs
    /// until the connection is closed, `Some(n)` stops after `n` cycles.
    async fn process_events(&self, num_cycles: Option<u64>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Which engine a [`Connection`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    InMemory,
    RabbitMq,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::InMemory => f.write_str("in_memory"),
            Backend::RabbitMq => f.write_str("rabbit"),
        }
    }
}

impl FromStr for Backend {
    type Err = MqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_memory" => Ok(Backend::InMemory),
            "rabbit" | "rabbitmq" => Ok(Backend::RabbitMq),
            other => Err(MqError::Config(format!("unknown backend {:?}", other))),
        }
    }
}

pub async fn connect(registry: &BrokerRegistry, host: &str, port: u16, backend: Backend) -> Result<Connection> {
    connect_with_config(registry, host, port, backend, MqConfig::default()).await
}

pub async fn connect_with_config(
    registry: &BrokerRegistry,
    host: &str,
    port: u16,
    backend: Backend,
    config: MqConfig,
) -> Result<Connection> {
    info!(%backend, host, port, "Connecting");
    match backend {
        Backend::InMemory => Ok(Connection::InMemory(InMemoryConnection::connect_with_config(
            registry, host, port, config,
        )?)),
        Backend::RabbitMq => Ok(Connection::RabbitMq(RabbitConnection::connect(host, port, config).await?)),
    }
}

#[derive(Clone)]
pub enum Connection {
    InMemory(InMemoryConnection),
    RabbitMq(RabbitConnection),
}

#[derive(Clone)]
pub enum Channel {
    InMemory(InMemoryChannel),
    RabbitMq(RabbitChannel),
}

#[async_trait]
impl MqConnection for Connection {
    type Channel = Channel;

    async fn create_channel(&self) -> Result<Channel> {
        match self {
            Connection::InMemory(conn) => Ok(Channel::InMemory(conn.create_channel().await?)),
            Connection::RabbitMq(conn) => Ok(Channel::RabbitMq(conn.create_channel().await?)),
        }
    }

    async fn process_events(&self, num_cycles: Option<u64>) -> Result<()> {
        match self {
            Connection::InMemory(conn) => conn.process_events(num_cycles).await,
            Connection::RabbitMq(conn) => conn.process_events(num_cycles).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Connection::InMemory(conn) => MqConnection::close(conn).await,
            Connection::RabbitMq(conn) => MqConnection::close(conn).await,
        }
    }
}

#[async_trait]
impl MqChannel for Channel {
    async fn register_producer(&self, exchange_name: &str, exchange_type: ExchangeType) -> Result<()> {
        match self {
            Channel::InMemory(chan) => chan.register_producer(exchange_name, exchange_type).await,
            Channel::RabbitMq(chan) => chan.register_producer(exchange_name, exchange_type).await,
        }
    }

    async fn register_consumer(
        &self,
        exchange_name: &str,
        exchange_type: ExchangeType,
        queue_name: Option<&str>,
        routing_keys: &[&str],
        callback: Callback,
    ) -> Result<String> {
        match self {
            Channel::InMemory(chan) => {
                chan.register_consumer(exchange_name, exchange_type, queue_name, routing_keys, callback)
                    .await
            }
            Channel::RabbitMq(chan) => {
                chan.register_consumer(exchange_name, exchange_type, queue_name, routing_keys, callback)
                    .await
            }
        }
    }

    async fn publish(&self, exchange_name: &str, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        match self {
            Channel::InMemory(chan) => chan.publish(exchange_name, payload, routing_key).await,
            Channel::RabbitMq(chan) => chan.publish(exchange_name, payload, routing_key).await,
        }
    }
}

/// Spawns `callback` for `delivery` and returns once the callback has started
/// running, without waiting for it to finish.
pub(crate) async fn dispatch(callback: Callback, delivery: Delivery) {
    let (started_tx, started_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let _ = started_tx.send(());
        callback(delivery).await;
    });

    if started_rx.await.is_err() {
        trace!("Callback task ended before signalling its start");
    }
}
