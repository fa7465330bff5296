use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::message::Delivery;

/// Unbounded FIFO of deliveries for one named queue.
///
/// Cloning yields another handle on the same FIFO.
#[derive(Debug, Clone)]
pub struct ConsumerQueue {
    name: Arc<str>,
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
}

impl ConsumerQueue {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: Arc::from(name),
            tx,
            rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, delivery: Delivery) {
        // Cannot fail: this handle keeps the receiving side alive.
        let _ = self.tx.send(delivery);
    }

    /// Pops the oldest delivery without waiting.
    pub fn try_next(&self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// The broker's queue table.
///
/// Only the broker worker inserts; connections look queues up to drain them.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueueTable {
    queues: Arc<RwLock<HashMap<String, ConsumerQueue>>>,
}

impl QueueTable {
    /// Returns `true` when a new queue was created.
    pub(crate) fn declare(&self, name: &str) -> bool {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(name) {
            return false;
        }
        queues.insert(name.to_string(), ConsumerQueue::new(name));
        true
    }

    pub(crate) fn get(&self, name: &str) -> Option<ConsumerQueue> {
        self.queues
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}
