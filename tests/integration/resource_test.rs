// Access guard behaviour across threads, and guarded connections/channels.

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mockmq::{
    callback, channel_resource, connection_resource, Backend, BrokerRegistry, ExchangeType, InMemoryBroker,
    MqChannel, MqConfig, MqConnection, MqError, Resource,
};

const WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq)]
struct Counter {
    hits: u32,
}

#[test]
fn test_second_holder_waits_for_release() {
    common::init_tracing();
    let resource = Arc::new(Resource::new(|| Counter { hits: 0 }).unwrap());
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = {
        let resource = resource.clone();
        thread::spawn(move || {
            let mut guard = resource.access(WAIT).unwrap();
            guard.hits += 1;
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };

    held_rx.recv().unwrap();
    let blocked = resource.access(Duration::from_millis(100));
    assert!(matches!(blocked, Err(MqError::ResourceNotAvailable(_))));

    release_tx.send(()).unwrap();
    holder.join().unwrap();

    let guard = resource.access(WAIT).unwrap();
    assert_eq!(guard.hits, 1);
}

#[test]
fn test_concurrent_increments_are_serialized() {
    common::init_tracing();
    let resource = Arc::new(Resource::new(|| Counter { hits: 0 }).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let resource = resource.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let mut guard = resource.access(Duration::from_secs(5)).unwrap();
                    let current = guard.hits;
                    thread::yield_now();
                    guard.hits = current + 1;
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(resource.access(WAIT).unwrap().hits, 40);
}

#[test]
fn test_error_inside_scope_releases_value() {
    common::init_tracing();
    fn failing_step(resource: &Resource<Counter>) -> Result<(), MqError> {
        let _guard = resource.access(WAIT)?;
        Err(MqError::Config("step failed".to_string()))
    }

    let resource = Resource::new(|| Counter { hits: 0 }).unwrap();
    assert!(failing_step(&resource).is_err());
    assert!(resource.access(WAIT).is_ok());
}

#[tokio::test]
async fn test_guarded_connection_and_channel() {
    common::init_tracing();
    let registry = BrokerRegistry::new();
    let broker = InMemoryBroker::start(&registry, "guarded", 1).unwrap();

    let connection = connection_resource(&registry, "guarded", 1, Backend::InMemory, MqConfig::default())
        .await
        .unwrap();
    let channel = channel_resource(&connection).await.unwrap();
    assert_eq!(channel.access_timeout(), connection.access_timeout());

    // Clones of the guarded handles can be used across awaits.
    let chan = channel.access(WAIT).unwrap().clone();
    let conn = connection.access(WAIT).unwrap().clone();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    chan.register_consumer(
        "exch",
        ExchangeType::Direct,
        Some("queue"),
        &["k"],
        callback(move |delivery| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(delivery.payload_str());
            }
        }),
    )
    .await
    .unwrap();
    chan.publish("exch", b"hello".to_vec(), "k").await.unwrap();
    conn.process_events(Some(1)).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), "hello");

    channel.close();
    connection.close();
    broker.close();
}

#[tokio::test]
async fn test_connection_resource_needs_a_broker() {
    common::init_tracing();
    let registry = BrokerRegistry::new();
    let result = connection_resource(&registry, "nowhere", 1, Backend::InMemory, MqConfig::default()).await;
    assert!(matches!(result, Err(MqError::BrokerNotFound(_))));
}

#[tokio::test]
async fn test_channel_resource_waits_for_a_held_connection() {
    common::init_tracing();
    let registry = BrokerRegistry::new();
    let broker = InMemoryBroker::start(&registry, "held", 1).unwrap();
    let config = MqConfig {
        resource_access_timeout_ms: 50,
        ..MqConfig::default()
    };
    let connection = connection_resource(&registry, "held", 1, Backend::InMemory, config)
        .await
        .unwrap();

    {
        let _held = connection.access(WAIT).unwrap();
        let result = channel_resource(&connection).await;
        assert!(matches!(result, Err(MqError::ResourceNotAvailable(_))));
    }
    assert!(channel_resource(&connection).await.is_ok());
    broker.close();
}

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_guarded_rabbitmq_connection() {
    common::init_tracing();
    let registry = BrokerRegistry::new();
    let connection = connection_resource(&registry, "localhost", 5672, Backend::RabbitMq, MqConfig::default())
        .await
        .unwrap();
    let channel = channel_resource(&connection).await.unwrap();

    let chan = channel.access_default().unwrap().clone();
    chan.register_producer("mockmq_test_guarded", ExchangeType::Fanout)
        .await
        .unwrap();

    let conn = connection.access_default().unwrap().clone();
    conn.close().await.unwrap();
}
