// End-to-end routing through the public client API.
// Each test runs its own broker in its own registry.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockmq::{
    callback, connect, Backend, BrokerRegistry, Callback, Channel, Connection, Delivery, ExchangeType, InMemoryBroker,
    MqChannel, MqConnection, MqError,
};
use serde::{Deserialize, Serialize};

const HOST: &str = "routing";

struct Harness {
    broker: InMemoryBroker,
    connection: Connection,
    channel: Channel,
}

impl Harness {
    async fn start(port: u16) -> Self {
        let registry = BrokerRegistry::new();
        let broker = InMemoryBroker::start(&registry, HOST, port).unwrap();
        let connection = connect(&registry, HOST, port, Backend::InMemory).await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        Self {
            broker,
            connection,
            channel,
        }
    }

    async fn stop(self) {
        self.connection.close().await.unwrap();
        self.broker.close();
        tokio::time::timeout(Duration::from_secs(2), self.broker.stopped())
            .await
            .expect("broker should stop");
    }
}

fn recorder() -> (Arc<Mutex<Vec<Delivery>>>, Callback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb = callback(move |delivery| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(delivery);
        }
    });
    (seen, cb)
}

fn payloads(seen: &Arc<Mutex<Vec<Delivery>>>) -> Vec<String> {
    seen.lock().unwrap().iter().map(Delivery::payload_str).collect()
}

#[tokio::test]
async fn test_direct_delivers_on_exact_key_only() {
    common::init_tracing();
    let h = Harness::start(1).await;
    let (seen, cb) = recorder();

    h.channel.register_producer("exch", ExchangeType::Direct).await.unwrap();
    h.channel
        .register_consumer("exch", ExchangeType::Direct, Some("queue"), &["fake_routing_key"], cb)
        .await
        .unwrap();

    h.channel.publish("exch", b"miss".to_vec(), "another_routing_key").await.unwrap();
    h.channel.publish("exch", b"hit".to_vec(), "fake_routing_key").await.unwrap();
    h.connection.process_events(Some(2)).await.unwrap();

    assert_eq!(payloads(&seen), vec!["hit"]);
    assert_eq!(seen.lock().unwrap()[0].routing_key, "fake_routing_key");
    h.stop().await;
}

#[tokio::test]
async fn test_direct_with_multiple_keys() {
    common::init_tracing();
    let h = Harness::start(2).await;
    let (seen, cb) = recorder();

    h.channel
        .register_consumer("exch", ExchangeType::Direct, Some("queue"), &["key1", "key2"], cb)
        .await
        .unwrap();
    h.channel.publish("exch", b"m".to_vec(), "key2").await.unwrap();
    h.connection.process_events(Some(1)).await.unwrap();

    assert_eq!(payloads(&seen), vec!["m"]);
    h.stop().await;
}

#[tokio::test]
async fn test_two_anonymous_queues_each_receive() {
    common::init_tracing();
    let h = Harness::start(3).await;
    let (seen1, cb1) = recorder();
    let (seen2, cb2) = recorder();

    let q1 = h
        .channel
        .register_consumer("exch", ExchangeType::Direct, None, &["k"], cb1)
        .await
        .unwrap();
    let q2 = h
        .channel
        .register_consumer("exch", ExchangeType::Direct, None, &["k"], cb2)
        .await
        .unwrap();
    assert_ne!(q1, q2);

    h.channel.publish("exch", b"m".to_vec(), "k").await.unwrap();
    h.connection.process_events(Some(1)).await.unwrap();

    assert_eq!(payloads(&seen1), vec!["m"]);
    assert_eq!(payloads(&seen2), vec!["m"]);
    h.stop().await;
}

#[tokio::test]
async fn test_topic_ball_colours() {
    common::init_tracing();
    let h = Harness::start(4).await;
    let (seen, cb) = recorder();

    h.channel.register_producer("exch", ExchangeType::Topic).await.unwrap();
    h.channel
        .register_consumer("exch", ExchangeType::Topic, Some("queue"), &["ball.*", "*.red"], cb)
        .await
        .unwrap();

    for key in ["ball.yellow", "apple.yellow", "apple.red"] {
        h.channel.publish("exch", key.as_bytes().to_vec(), key).await.unwrap();
    }
    h.connection.process_events(Some(3)).await.unwrap();

    assert_eq!(payloads(&seen), vec!["ball.yellow", "apple.red"]);
    h.stop().await;
}

#[tokio::test]
async fn test_topic_overlapping_patterns_deliver_twice() {
    common::init_tracing();
    let h = Harness::start(5).await;
    let (seen, cb) = recorder();

    h.channel
        .register_consumer("exch", ExchangeType::Topic, Some("queue"), &["ball.*", "*.red"], cb)
        .await
        .unwrap();
    h.channel.publish("exch", b"m".to_vec(), "ball.red").await.unwrap();
    h.connection.process_events(Some(3)).await.unwrap();

    assert_eq!(payloads(&seen), vec!["m", "m"]);
    h.stop().await;
}

#[tokio::test]
async fn test_topic_all_wildcards() {
    common::init_tracing();
    let h = Harness::start(6).await;
    let (seen, cb) = recorder();

    h.channel
        .register_consumer("exch", ExchangeType::Topic, Some("queue"), &["*.*"], cb)
        .await
        .unwrap();
    h.channel.publish("exch", b"m".to_vec(), "absolutely.everything").await.unwrap();
    h.connection.process_events(Some(1)).await.unwrap();

    assert_eq!(payloads(&seen).len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn test_topic_match_is_prefix_only() {
    common::init_tracing();
    let h = Harness::start(7).await;
    let (seen, cb) = recorder();

    h.channel
        .register_consumer("exch", ExchangeType::Topic, Some("queue"), &["ball.*"], cb)
        .await
        .unwrap();
    h.channel.publish("exch", b"m".to_vec(), "ball.red.extra").await.unwrap();
    h.connection.process_events(Some(1)).await.unwrap();

    assert_eq!(payloads(&seen), vec!["m"]);
    h.stop().await;
}

#[tokio::test]
async fn test_fanout_reaches_every_queue_with_empty_key() {
    common::init_tracing();
    let h = Harness::start(8).await;
    let (seen1, cb1) = recorder();
    let (seen2, cb2) = recorder();

    h.channel.register_producer("exch", ExchangeType::Fanout).await.unwrap();
    h.channel
        .register_consumer("exch", ExchangeType::Fanout, Some("q1"), &[""], cb1)
        .await
        .unwrap();
    h.channel
        .register_consumer("exch", ExchangeType::Fanout, Some("q2"), &["ignored"], cb2)
        .await
        .unwrap();
    h.channel.publish("exch", b"m".to_vec(), "some.key").await.unwrap();
    h.connection.process_events(Some(1)).await.unwrap();

    for seen in [&seen1, &seen2] {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].routing_key, "");
    }
    h.stop().await;
}

#[tokio::test]
async fn test_conflicting_declaration_is_bad_exchange() {
    common::init_tracing();
    let h = Harness::start(9).await;

    h.channel.register_producer("x", ExchangeType::Direct).await.unwrap();
    let err = h.channel.register_producer("x", ExchangeType::Fanout).await.unwrap_err();

    assert!(matches!(err, MqError::BadExchange(_)));
    assert_eq!(
        h.broker.exchange_type("x", Duration::from_secs(1)).await.unwrap(),
        Some(ExchangeType::Direct)
    );
    h.stop().await;
}

#[tokio::test]
async fn test_consumer_with_conflicting_type_is_bad_exchange() {
    common::init_tracing();
    let h = Harness::start(10).await;
    let (_seen, cb) = recorder();

    h.channel.register_producer("exch", ExchangeType::Direct).await.unwrap();
    let err = h
        .channel
        .register_consumer("exch", ExchangeType::Fanout, Some("queue"), &["k"], cb)
        .await
        .unwrap_err();

    assert!(matches!(err, MqError::BadExchange(_)));
    h.stop().await;
}

#[tokio::test]
async fn test_publish_to_undeclared_exchange() {
    common::init_tracing();
    let h = Harness::start(11).await;
    let (seen, cb) = recorder();

    h.channel
        .register_consumer("other", ExchangeType::Direct, Some("queue"), &["k"], cb)
        .await
        .unwrap();
    let err = h.channel.publish("missing", b"m".to_vec(), "k").await.unwrap_err();
    h.connection.process_events(Some(1)).await.unwrap();

    assert!(matches!(err, MqError::BadExchange(_)));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(h.broker.queue_depth("queue", Duration::from_secs(1)).await.unwrap(), Some(0));
    h.stop().await;
}

#[tokio::test]
async fn test_channels_on_separate_connections_share_the_broker() {
    common::init_tracing();
    let registry = BrokerRegistry::new();
    let broker = InMemoryBroker::start(&registry, HOST, 12).unwrap();
    let consumer_conn = connect(&registry, HOST, 12, Backend::InMemory).await.unwrap();
    let producer_conn = connect(&registry, HOST, 12, Backend::InMemory).await.unwrap();
    let (seen, cb) = recorder();

    consumer_conn
        .create_channel()
        .await
        .unwrap()
        .register_consumer("exch", ExchangeType::Direct, Some("queue"), &["k"], cb)
        .await
        .unwrap();
    producer_conn
        .create_channel()
        .await
        .unwrap()
        .publish("exch", b"m".to_vec(), "k")
        .await
        .unwrap();

    // Only the connection that registered the callback delivers it.
    producer_conn.process_events(Some(1)).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());
    consumer_conn.process_events(Some(1)).await.unwrap();
    assert_eq!(payloads(&seen), vec!["m"]);

    broker.close();
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    item: String,
}

#[tokio::test]
async fn test_json_round_trip_through_broker() {
    common::init_tracing();
    let h = Harness::start(13).await;
    let (seen, cb) = recorder();

    h.channel
        .register_consumer("orders", ExchangeType::Direct, Some("queue"), &["new"], cb)
        .await
        .unwrap();
    let order = Order {
        id: 7,
        item: "ball".to_string(),
    };
    h.channel.publish_json("orders", &order, "new").await.unwrap();
    h.connection.process_events(Some(1)).await.unwrap();

    let received: Order = seen.lock().unwrap()[0].json().unwrap();
    assert_eq!(received, order);
    h.stop().await;
}

#[tokio::test]
async fn test_operations_fail_after_broker_close() {
    common::init_tracing();
    let h = Harness::start(14).await;
    h.broker.close();
    h.broker.stopped().await;

    let err = h.channel.register_producer("exch", ExchangeType::Direct).await.unwrap_err();
    assert!(matches!(err, MqError::BrokerClosed(_)));
}
