use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::broker::InMemoryBroker;
use crate::errors::{MqError, Result};

/// Identity of an in-memory broker, rendered as `host_port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerId {
    pub host: String,
    pub port: u16,
}

impl BrokerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.host, self.port)
    }
}

/// Lookup table from broker identity to a running broker.
///
/// Held by whatever builds connections; clones share the same table. Entries
/// are never removed, a closed broker simply rejects further commands.
#[derive(Debug, Clone, Default)]
pub struct BrokerRegistry {
    brokers: Arc<Mutex<HashMap<BrokerId, InMemoryBroker>>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, broker: InMemoryBroker) {
        let id = broker.id().clone();
        let mut brokers = self.brokers.lock().unwrap_or_else(|e| e.into_inner());
        if brokers.insert(id.clone(), broker).is_some() {
            warn!(broker = %id, "Replacing an existing broker registration");
        } else {
            debug!(broker = %id, "Broker registered");
        }
    }

    pub fn get(&self, host: &str, port: u16) -> Result<InMemoryBroker> {
        let id = BrokerId::new(host, port);
        self.brokers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or_else(|| MqError::BrokerNotFound(id.to_string()))
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        self.get(host, port).is_ok()
    }

    pub fn len(&self) -> usize {
        self.brokers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
