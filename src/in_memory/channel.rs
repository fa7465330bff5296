use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::broker::{Command, InMemoryBroker};
use crate::client::MqChannel;
use crate::errors::Result;
use crate::message::{Callback, ExchangeType};

/// Pub/sub handle on an in-memory broker.
///
/// Commands go to the broker's inbox in the order they are issued on this
/// channel. Clones share the callback table.
#[derive(Clone)]
pub struct InMemoryChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: String,
    broker: InMemoryBroker,
    callbacks: Mutex<HashMap<String, Callback>>,
    response_timeout: Duration,
}

impl InMemoryChannel {
    pub(crate) fn new(broker: InMemoryBroker, response_timeout: Duration) -> Self {
        let id = format!("channel-{}", &Uuid::new_v4().to_string()[..8]);
        debug!(channel_id = %id, broker = %broker.id(), "Creating channel");

        Self {
            inner: Arc::new(ChannelInner {
                id,
                broker,
                callbacks: Mutex::new(HashMap::new()),
                response_timeout,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Queue names this channel has callbacks for.
    pub fn queue_names(&self) -> Vec<String> {
        let callbacks = self.inner.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        callbacks.keys().cloned().collect()
    }

    /// Snapshot of the callback table, so dispatch never holds the lock.
    pub(crate) fn callbacks(&self) -> Vec<(String, Callback)> {
        let callbacks = self.inner.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        callbacks
            .iter()
            .map(|(queue, callback)| (queue.clone(), callback.clone()))
            .collect()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.inner
            .broker
            .request(command, self.inner.response_timeout)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl MqChannel for InMemoryChannel {
    async fn register_producer(&self, exchange_name: &str, exchange_type: ExchangeType) -> Result<()> {
        self.send(Command::RegisterProducer {
            exchange_name: exchange_name.to_string(),
            exchange_type,
        })
        .await?;

        info!(channel_id = %self.inner.id, exchange = %exchange_name, "Producer registered");
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
        let queue_name = match queue_name {
            Some(name) => name.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let outcome = self.inner.broker.submit(Command::RegisterConsumer {
            exchange_name: exchange_name.to_string(),
            exchange_type,
            queue_name: queue_name.clone(),
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
        })?;

        // Installed before the broker answers. A rejection puts back whatever
        // was registered for the queue before.
        let previous = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(queue_name.clone(), callback);

        if let Err(e) = self.inner.broker.await_reply(outcome, self.inner.response_timeout).await {
            let mut callbacks = self.inner.callbacks.lock().unwrap_or_else(|e| e.into_inner());
            match previous {
                Some(earlier) => {
                    callbacks.insert(queue_name.clone(), earlier);
                }
                None => {
                    callbacks.remove(&queue_name);
                }
            }
            debug!(channel_id = %self.inner.id, queue = %queue_name, error = %e, "Consumer rejected");
            return Err(e);
        }

        info!(
            channel_id = %self.inner.id,
            exchange = %exchange_name,
            queue = %queue_name,
            "Consumer registered"
        );
        Ok(queue_name)
    }

    async fn publish(&self, exchange_name: &str, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        self.send(Command::Publish {
            exchange_name: exchange_name.to_string(),
            payload,
            routing_key: routing_key.to_string(),
        })
        .await?;

        debug!(
            channel_id = %self.inner.id,
            exchange = %exchange_name,
            routing_key = %routing_key,
            "Published message"
        );
        Ok(())
    }
}
