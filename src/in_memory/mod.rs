// src/in_memory/mod.rs
// In-process broker with direct, topic and fanout routing

mod broker;
mod channel;
mod connection;
mod consumer_queue;
mod exchange;
mod registry;

pub use broker::InMemoryBroker;
pub use channel::InMemoryChannel;
pub use connection::InMemoryConnection;
pub use consumer_queue::ConsumerQueue;
pub use exchange::{Exchange, TopicPattern};
pub use registry::{BrokerId, BrokerRegistry};
