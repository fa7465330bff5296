use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lapin::{options::*, types::FieldTable, BasicProperties, Consumer, ExchangeKind};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::MqChannel;
use crate::errors::Result;
use crate::message::{Callback, ExchangeType};

pub(crate) fn exchange_kind(exchange_type: ExchangeType) -> ExchangeKind {
    match exchange_type {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Fanout => ExchangeKind::Fanout,
    }
}

/// Channel on a real RabbitMQ server.
#[derive(Clone)]
pub struct RabbitChannel {
    channel: lapin::Channel,
    consumers: Arc<Mutex<Vec<(Consumer, Callback)>>>,
}

impl RabbitChannel {
    pub(crate) fn new(channel: lapin::Channel) -> Self {
        Self {
            channel,
            consumers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn consumers(&self) -> Vec<(Consumer, Callback)> {
        self.consumers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn declare_exchange(&self, exchange_name: &str, exchange_type: ExchangeType) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange_name,
                exchange_kind(exchange_type),
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MqChannel for RabbitChannel {
    async fn register_producer(&self, exchange_name: &str, exchange_type: ExchangeType) -> Result<()> {
        self.declare_exchange(exchange_name, exchange_type).await?;
        info!(channel_id = self.channel.id(), exchange = %exchange_name, "Producer registered");
        Ok(())
    }

    async fn register_consumer(
        &self,
        exchange_name: &str,
        exchange_type: ExchangeType,
        queue_name: Option<&str>,
        routing_keys: &[&str],
        callback: Callback,
    ) -> Result<String> {
        self.declare_exchange(exchange_name, exchange_type).await?;

        // Anonymous queues are server-named and private to this channel.
        let exclusive = queue_name.is_none();
        let queue = self
            .channel
            .queue_declare(
                queue_name.unwrap_or(""),
                QueueDeclareOptions {
                    exclusive,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue_name = queue.name().as_str().to_string();

        let keys: Vec<&str> = match exchange_type {
            ExchangeType::Fanout => vec![""],
            _ => routing_keys.to_vec(),
        };
        for key in keys {
            self.channel
                .queue_bind(
                    &queue_name,
                    exchange_name,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer = self
            .channel
            .basic_consume(
                &queue_name,
                &format!("consumer-{}", Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((consumer, callback));

        info!(
            channel_id = self.channel.id(),
            exchange = %exchange_name,
            queue = %queue_name,
            "Consumer registered"
        );
        Ok(queue_name)
    }

    async fn publish(&self, exchange_name: &str, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        let _confirm = self
            .channel
            .basic_publish(
                exchange_name,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_message_id(Uuid::new_v4().to_string().into())
                    .with_timestamp(chrono::Utc::now().timestamp() as u64),
            )
            .await?;

        debug!(
            "Published message to exchange '{}' with routing key '{}'",
            exchange_name, routing_key
        );
        Ok(())
    }
}
