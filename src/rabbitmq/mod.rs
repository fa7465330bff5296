// src/rabbitmq/mod.rs
// RabbitMQ implementation of the client traits

mod channel;
mod connection;

pub use channel::RabbitChannel;
pub use connection::RabbitConnection;
