use std::error::Error;

use mockmq::{callback, connect_with_config, Backend, BrokerRegistry, InMemoryBroker, MqChannel, MqConfig, MqConnection};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MqConfig::load()?;
    let registry = BrokerRegistry::new();
    let broker = InMemoryBroker::start_with_config(&registry, "localhost", 5672, &config)?;

    let connection = connect_with_config(&registry, "localhost", 5672, Backend::InMemory, config).await?;
    let channel = connection.create_channel().await?;

    channel
        .register_consumer(
            "balls",
            mockmq::ExchangeType::Topic,
            None,
            &["ball.*", "*.red"],
            callback(|delivery| async move {
                info!(routing_key = %delivery.routing_key, payload = %delivery.payload_str(), "Received");
            }),
        )
        .await?;

    for key in ["ball.yellow", "apple.red", "apple.yellow"] {
        channel.publish("balls", key.as_bytes().to_vec(), key).await?;
    }

    connection.process_events(Some(3)).await?;
    connection.close().await?;

    broker.close();
    broker.stopped().await;
    Ok(())
}
