use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::{Connection, ConnectionProperties};
use tracing::{debug, error, info};

use super::channel::RabbitChannel;
use crate::client::{dispatch, MqConnection};
use crate::config::MqConfig;
use crate::errors::{MqError, Result};
use crate::message::Delivery;

// How long one event cycle waits on each consumer.
const CONSUME_WAIT: Duration = Duration::from_millis(50);

/// Connection to a real RabbitMQ server.
#[derive(Clone)]
pub struct RabbitConnection {
    inner: Arc<RabbitInner>,
}

struct RabbitInner {
    connection: Connection,
    channels: Mutex<Vec<RabbitChannel>>,
    open: AtomicBool,
}

impl RabbitConnection {
    pub async fn connect(host: &str, port: u16, config: MqConfig) -> Result<Self> {
        info!("Attempting to connect to RabbitMQ at {}:{}", host, port);

        let connection = Connection::connect(&config.amqp_uri(host, port), ConnectionProperties::default())
            .await
            .map_err(|err| {
                error!("Failed to connect to RabbitMQ at {}:{}: {:?}", host, port, err);
                MqError::from(err)
            })?;

        info!("Successfully connected to RabbitMQ");
        Ok(Self {
            inner: Arc::new(RabbitInner {
                connection,
                channels: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire) && self.inner.connection.status().connected()
    }

    fn channels(&self) -> Vec<RabbitChannel> {
        self.inner.channels.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn run_cycle(&self) -> Result<()> {
        for channel in self.channels() {
            for (mut consumer, callback) in channel.consumers() {
                match tokio::time::timeout(CONSUME_WAIT, consumer.next()).await {
                    Ok(Some(Ok(delivery))) => {
                        let delivery = Delivery::new(
                            delivery.exchange.as_str(),
                            delivery.routing_key.as_str(),
                            delivery.data,
                        );
                        dispatch(callback, delivery).await;
                    }
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(None) => debug!("Consumer stream ended"),
                    Err(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MqConnection for RabbitConnection {
    type Channel = RabbitChannel;

    async fn create_channel(&self) -> Result<RabbitChannel> {
        if !self.is_open() {
            return Err(MqError::ConnectionClosed);
        }

        let channel = RabbitChannel::new(self.inner.connection.create_channel().await?);
        self.inner
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(channel.clone());
        Ok(channel)
    }

    async fn process_events(&self, num_cycles: Option<u64>) -> Result<()> {
        let mut remaining = num_cycles;

        while remaining != Some(0) && self.is_open() {
            self.run_cycle().await?;
            if let Some(n) = remaining.as_mut() {
                *n -= 1;
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            info!("Closing RabbitMQ connection gracefully");
            self.inner.connection.close(0, "Closing connection").await?;
        }
        Ok(())
    }
}
