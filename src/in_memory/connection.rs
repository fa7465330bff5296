use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, trace};

use super::broker::InMemoryBroker;
use super::channel::InMemoryChannel;
use super::registry::BrokerRegistry;
use crate::client::{dispatch, MqConnection};
use crate::config::MqConfig;
use crate::errors::{MqError, Result};

/// Client connection to an in-memory broker.
///
/// Clones share the channel list and the open/closed state, so one clone can
/// run `process_events` in a background task while another creates channels
/// or closes the connection.
#[derive(Clone)]
pub struct InMemoryConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    broker: InMemoryBroker,
    channels: Mutex<Vec<InMemoryChannel>>,
    open: AtomicBool,
    config: MqConfig,
}

impl InMemoryConnection {
    pub fn connect(registry: &BrokerRegistry, host: &str, port: u16) -> Result<Self> {
        Self::connect_with_config(registry, host, port, MqConfig::default())
    }

    pub fn connect_with_config(registry: &BrokerRegistry, host: &str, port: u16, config: MqConfig) -> Result<Self> {
        let broker = registry.get(host, port)?;
        info!(broker = %broker.id(), "Connected to in-memory broker");

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                broker,
                channels: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
                config,
            }),
        })
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.inner.broker
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Creates a channel and records it for event processing.
    pub fn open_channel(&self) -> Result<InMemoryChannel> {
        if !self.is_open() {
            return Err(MqError::ConnectionClosed);
        }

        let channel = InMemoryChannel::new(self.inner.broker.clone(), self.inner.config.response_timeout());
        self.inner
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(channel.clone());
        Ok(channel)
    }

    /// Marks the connection non-operational; a running `process_events`
    /// returns at its next cycle.
    pub fn shutdown(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            info!(broker = %self.inner.broker.id(), "Connection closed");
        }
    }

    fn channels(&self) -> Vec<InMemoryChannel> {
        self.inner.channels.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One pass over every channel's callbacks, delivering at most one
    /// message per queue. Returns how many callbacks were started.
    async fn run_cycle(&self) -> usize {
        let mut started = 0;

        for channel in self.channels() {
            for (queue_name, callback) in channel.callbacks() {
                let Some(queue) = self.inner.broker.consumer_queue(&queue_name) else {
                    trace!(queue = %queue_name, "No consumer queue yet");
                    continue;
                };

                if let Some(delivery) = queue.try_next() {
                    trace!(queue = %queue_name, routing_key = %delivery.routing_key, "Dispatching delivery");
                    dispatch(callback, delivery).await;
                    started += 1;
                }
            }
        }

        started
    }
}

#[async_trait]
impl MqConnection for InMemoryConnection {
    type Channel = InMemoryChannel;

    async fn create_channel(&self) -> Result<InMemoryChannel> {
        self.open_channel()
    }

    async fn process_events(&self, num_cycles: Option<u64>) -> Result<()> {
        let mut remaining = num_cycles;
        let pause = self.inner.config.event_poll_interval();

        loop {
            if remaining == Some(0) {
                break;
            }
            if !self.is_open() {
                debug!("Connection closed, leaving event loop");
                break;
            }

            self.run_cycle().await;

            if let Some(n) = remaining.as_mut() {
                *n -= 1;
                if *n == 0 {
                    break;
                }
            }

            if pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(pause).await;
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}
