use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use super::consumer_queue::{ConsumerQueue, QueueTable};
use super::exchange::Exchange;
use super::registry::{BrokerId, BrokerRegistry};
use crate::config::MqConfig;
use crate::errors::{BrokerError, MqError, Result};
use crate::message::{Delivery, ExchangeType};

#[derive(Debug)]
pub(crate) enum Command {
    RegisterProducer {
        exchange_name: String,
        exchange_type: ExchangeType,
    },
    RegisterConsumer {
        exchange_name: String,
        exchange_type: ExchangeType,
        queue_name: String,
        routing_keys: Vec<String>,
    },
    Publish {
        exchange_name: String,
        payload: Vec<u8>,
        routing_key: String,
    },
    QueryExchange {
        exchange_name: String,
    },
    QueryQueue {
        queue_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Done,
    Exchange(Option<ExchangeType>),
    QueueDepth(Option<usize>),
}

type ReplySlot = oneshot::Sender<std::result::Result<Reply, BrokerError>>;

#[derive(Debug)]
pub(crate) struct Request {
    command: Command,
    reply: ReplySlot,
}

#[derive(Debug)]
enum Control {
    Close,
}

/// Handle on a running in-memory broker.
///
/// The exchange and queue state lives on the broker's own worker thread and is
/// only reached through commands. Clones refer to the same broker.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    id: BrokerId,
    commands: Sender<Request>,
    control: Sender<Control>,
    queues: QueueTable,
    running: watch::Receiver<bool>,
}

impl InMemoryBroker {
    /// Starts a broker for `(host, port)` and registers it in `registry`.
    pub fn start(registry: &BrokerRegistry, host: &str, port: u16) -> Result<Self> {
        Self::start_with_config(registry, host, port, &MqConfig::default())
    }

    pub fn start_with_config(
        registry: &BrokerRegistry,
        host: &str,
        port: u16,
        config: &MqConfig,
    ) -> Result<Self> {
        let id = BrokerId::new(host, port);
        let (commands_tx, commands_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let (running_tx, running_rx) = watch::channel(true);
        let queues = QueueTable::default();

        let worker = BrokerWorker {
            id: id.clone(),
            exchanges: HashMap::new(),
            queues: queues.clone(),
        };
        let poll = config.broker_poll_interval();

        thread::Builder::new()
            .name(format!("broker-{}", id))
            .spawn(move || worker.run(commands_rx, control_rx, poll, running_tx))
            .map_err(|e| MqError::BrokerInternal(format!("Failed to spawn broker thread: {}", e)))?;

        let broker = Self {
            id,
            commands: commands_tx,
            control: control_tx,
            queues,
            running: running_rx,
        };
        registry.register(broker.clone());
        Ok(broker)
    }

    pub fn id(&self) -> &BrokerId {
        &self.id
    }

    /// Asks the broker to stop. The worker exits at its next loop iteration.
    pub fn close(&self) {
        if self.control.send(Control::Close).is_err() {
            debug!(broker = %self.id, "Close requested on a broker that already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolves once the broker loop has exited.
    pub async fn stopped(&self) {
        let mut running = self.running.clone();
        // An error means the worker is gone, which is what we wait for anyway.
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Declared type of `exchange_name`, as seen by the broker worker.
    pub async fn exchange_type(&self, exchange_name: &str, timeout: Duration) -> Result<Option<ExchangeType>> {
        let command = Command::QueryExchange {
            exchange_name: exchange_name.to_string(),
        };
        match self.request(command, timeout).await? {
            Reply::Exchange(kind) => Ok(kind),
            other => Err(MqError::BrokerInternal(format!("unexpected reply {:?}", other))),
        }
    }

    /// Number of deliveries waiting in `queue_name`, if the queue exists.
    pub async fn queue_depth(&self, queue_name: &str, timeout: Duration) -> Result<Option<usize>> {
        let command = Command::QueryQueue {
            queue_name: queue_name.to_string(),
        };
        match self.request(command, timeout).await? {
            Reply::QueueDepth(depth) => Ok(depth),
            other => Err(MqError::BrokerInternal(format!("unexpected reply {:?}", other))),
        }
    }

    pub(crate) fn consumer_queue(&self, queue_name: &str) -> Option<ConsumerQueue> {
        self.queues.get(queue_name)
    }

    /// Enqueues `command` and hands back the slot its outcome will arrive on.
    pub(crate) fn submit(
        &self,
        command: Command,
    ) -> Result<oneshot::Receiver<std::result::Result<Reply, BrokerError>>> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .map_err(|_| MqError::BrokerClosed(self.id.to_string()))?;
        Ok(outcome)
    }

    /// Waits for the outcome of a submitted command.
    pub(crate) async fn await_reply(
        &self,
        outcome: oneshot::Receiver<std::result::Result<Reply, BrokerError>>,
        timeout: Duration,
    ) -> Result<Reply> {
        match tokio::time::timeout(timeout, outcome).await {
            Err(_) => Err(MqError::ResponseTimeout(timeout)),
            // The broker dropped the request without answering: it stopped.
            Ok(Err(_)) => Err(MqError::BrokerClosed(self.id.to_string())),
            Ok(Ok(result)) => result.map_err(MqError::from),
        }
    }

    pub(crate) async fn request(&self, command: Command, timeout: Duration) -> Result<Reply> {
        let outcome = self.submit(command)?;
        self.await_reply(outcome, timeout).await
    }
}

/// Broker state, owned by the worker thread.
struct BrokerWorker {
    id: BrokerId,
    exchanges: HashMap<String, Exchange>,
    queues: QueueTable,
}

impl BrokerWorker {
    fn run(
        mut self,
        commands: Receiver<Request>,
        control: Receiver<Control>,
        poll: Duration,
        running: watch::Sender<bool>,
    ) {
        info!(broker = %self.id, "In-memory broker running");

        loop {
            match control.try_recv() {
                Ok(Control::Close) => {
                    debug!(broker = %self.id, "Close directive received");
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match commands.recv_timeout(poll) {
                Ok(Request { command, reply }) => {
                    let outcome = self.handle(command);
                    if let Err(e) = &outcome {
                        warn!(broker = %self.id, error = %e, "Command rejected");
                    }
                    if reply.send(outcome).is_err() {
                        trace!(broker = %self.id, "Issuer stopped waiting for the reply");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        running.send_replace(false);
        info!(broker = %self.id, "In-memory broker stopped");
    }

    /// Runs one command; a panic while doing so becomes an internal error
    /// instead of taking the loop down.
    fn handle(&mut self, command: Command) -> std::result::Result<Reply, BrokerError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(command))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(broker = %self.id, %detail, "Command handling panicked");
                Err(BrokerError::Internal(detail))
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> std::result::Result<Reply, BrokerError> {
        match command {
            Command::RegisterProducer {
                exchange_name,
                exchange_type,
            } => {
                self.declare_exchange(&exchange_name, exchange_type)?;
                Ok(Reply::Done)
            }
            Command::RegisterConsumer {
                exchange_name,
                exchange_type,
                queue_name,
                routing_keys,
            } => {
                self.declare_exchange(&exchange_name, exchange_type)?;
                if self.queues.declare(&queue_name) {
                    debug!(broker = %self.id, queue = %queue_name, "Consumer queue created");
                }

                // Fanout ignores keys, so every binding is the empty key.
                let routing_keys = match exchange_type {
                    ExchangeType::Fanout => vec![String::new()],
                    _ => routing_keys,
                };

                let exchange = self
                    .exchanges
                    .get_mut(&exchange_name)
                    .ok_or_else(|| BrokerError::ExchangeNotFound(exchange_name.clone()))?;
                exchange.bind(&queue_name, &routing_keys);
                debug!(
                    broker = %self.id,
                    exchange = %exchange_name,
                    queue = %queue_name,
                    keys = ?routing_keys,
                    "Queue bound"
                );
                Ok(Reply::Done)
            }
            Command::Publish {
                exchange_name,
                payload,
                routing_key,
            } => {
                self.route(&exchange_name, payload, &routing_key)?;
                Ok(Reply::Done)
            }
            Command::QueryExchange { exchange_name } => Ok(Reply::Exchange(
                self.exchanges.get(&exchange_name).map(Exchange::kind),
            )),
            Command::QueryQueue { queue_name } => {
                Ok(Reply::QueueDepth(self.queues.get(&queue_name).map(|q| q.len())))
            }
        }
    }

    fn declare_exchange(&mut self, name: &str, kind: ExchangeType) -> std::result::Result<(), BrokerError> {
        match self.exchanges.get(name) {
            Some(existing) if existing.kind() != kind => Err(BrokerError::BadExchange(format!(
                "tried to declare exchange {:?} as {} when it is already declared as {}",
                name,
                kind,
                existing.kind()
            ))),
            Some(_) => Ok(()),
            None => {
                self.exchanges.insert(name.to_string(), Exchange::new(name, kind));
                info!(broker = %self.id, exchange = %name, kind = %kind, "Exchange declared");
                Ok(())
            }
        }
    }

    fn route(
        &self,
        exchange_name: &str,
        payload: Vec<u8>,
        routing_key: &str,
    ) -> std::result::Result<usize, BrokerError> {
        let exchange = self.exchanges.get(exchange_name).ok_or_else(|| {
            BrokerError::BadExchange(format!("exchange {:?} has not been declared", exchange_name))
        })?;

        let targets = exchange.route(routing_key);
        let mut queues = Vec::with_capacity(targets.len());
        for (queue_name, delivered_key) in targets {
            let queue = self.queues.get(queue_name).ok_or_else(|| {
                BrokerError::Internal(format!("queue {:?} is bound but was never created", queue_name))
            })?;
            queues.push((queue, delivered_key));
        }

        for (queue, delivered_key) in &queues {
            queue.put(Delivery::new(exchange_name, delivered_key.as_str(), payload.clone()));
        }

        trace!(
            broker = %self.id,
            exchange = %exchange_name,
            routing_key = %routing_key,
            deliveries = queues.len(),
            "Message routed"
        );
        Ok(queues.len())
    }
}
