//! Broker client lifecycle and reconnect behaviour.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use uamqtt_bridge::{BrokerClient, BrokerConfig, TopicPublisher};
use uamqtt_core::{
    BrokerEvent, ClientStatus, ConnectionError, Error, QualityOfService, ReconnectExhausted,
    RunState,
};

const WAIT: Duration = Duration::from_secs(5);

fn client(broker: &Arc<ScriptedBroker>, config: BrokerConfig) -> BrokerClient {
    init_tracing();
    BrokerClient::new(broker.connector(), config)
}

#[test]
fn publishes_with_configured_qos_and_retain() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());

    assert!(client.connect("broker.local", 1884));
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);

    client.publish("opcuamqtt/2/Temperature", b"23.5");

    assert_eq!(
        broker.messages(),
        [Published {
            topic: "opcuamqtt/2/Temperature".to_string(),
            payload: "23.5".to_string(),
            qos: QualityOfService::AtLeastOnce,
            retain: true,
        }]
    );
    let options = broker.options.lock().clone();
    assert_eq!(options[0].host, "broker.local");
    assert_eq!(options[0].port, 1884);
    assert_eq!(client.published(), 1);
}

#[test]
fn retain_is_configurable() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());
    client.set_retain(false);

    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);
    client.publish("opcuamqtt/2/Pressure", b"3");

    assert!(!broker.messages()[0].retain);
}

#[test]
fn publish_is_dropped_while_disconnected() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());

    client.publish("opcuamqtt/2/Temperature", b"23.5");

    assert!(broker.messages().is_empty());
    assert_eq!(client.dropped(), 1);
}

#[test]
fn start_is_noop_while_running() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());

    assert!(client.start());
    assert!(!client.start());
    assert!(!client.connect("elsewhere", 1883));
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);
    assert_eq!(broker.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn setters_apply_on_next_connect() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());
    let handle = client.handle();

    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);

    client.set_topic("plant");
    client.set_host("mqtt.plant");
    client.set_port(8883);
    assert_eq!(handle.base_topic(), "opcuamqtt");

    client.shutdown();
    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);

    assert_eq!(handle.base_topic(), "plant");
    let options = broker.options.lock().clone();
    assert_eq!(options.len(), 2);
    assert_eq!(options[1].host, "mqtt.plant");
    assert_eq!(options[1].port, 8883);
}

#[test]
fn transient_initial_failure_enters_reconnect_loop() {
    let broker = ScriptedBroker::new();
    broker
        .connect_script
        .lock()
        .push_back(Err(ConnectionError::Unreachable("refused by network".into())));
    broker
        .reconnect_script
        .lock()
        .push_back(Err(ConnectionError::Io("reset".into())));
    let client = client(&broker, fast_broker_config());

    assert!(client.start());
    assert!(eventually(|| client.status() == ClientStatus::Connected));

    assert_eq!(broker.reconnects.load(Ordering::SeqCst), 2);
    assert_eq!(client.reconnect_attempts(), 0);
}

#[test]
fn reconnect_attempts_are_bounded() {
    let broker = ScriptedBroker::unreachable();
    let client = client(
        &broker,
        BrokerConfig {
            max_reconnect_attempts: 5,
            ..fast_broker_config()
        },
    );

    assert!(client.start());
    assert!(eventually(|| client.run_state() == RunState::Finished));

    assert_eq!(broker.reconnects.load(Ordering::SeqCst), 5);
    assert_eq!(client.status(), ClientStatus::Disconnected);
    assert_eq!(
        client.last_error(),
        Some(Error::ReconnectExhausted(ReconnectExhausted { attempts: 5 }))
    );
    assert_eq!(broker.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn default_bound_is_one_hundred_attempts() {
    let broker = ScriptedBroker::unreachable();
    let client = client(&broker, fast_broker_config());

    assert!(client.start());
    assert!(eventually(|| client.run_state() == RunState::Finished));

    assert_eq!(broker.reconnects.load(Ordering::SeqCst), 100);
    assert_ne!(client.status(), ClientStatus::Connected);
}

#[test]
fn fatal_connect_stops_without_retry() {
    let broker = ScriptedBroker::new();
    broker
        .connect_script
        .lock()
        .push_back(Err(ConnectionError::Refused("not authorized".into())));
    let client = client(&broker, fast_broker_config());

    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Error);
    assert!(eventually(|| client.run_state() == RunState::Finished));

    assert_eq!(broker.reconnects.load(Ordering::SeqCst), 0);
    assert!(matches!(
        client.last_error(),
        Some(Error::Connection(ConnectionError::Refused(_)))
    ));
}

#[test]
fn dropped_connection_is_reestablished() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());
    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);

    broker
        .reconnect_script
        .lock()
        .push_back(Err(ConnectionError::Io("broken pipe".into())));
    broker.push_event(BrokerEvent::Disconnected("keep-alive timeout".into()));

    assert!(eventually(|| broker.reconnects.load(Ordering::SeqCst) == 2));
    assert!(eventually(|| client.status() == ClientStatus::Connected));
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(client.run_state(), RunState::Running);
}

#[test]
fn refusal_event_stops_worker() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());
    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);

    broker.push_event(BrokerEvent::Refused("session taken over".into()));

    assert!(eventually(|| client.run_state() == RunState::Finished));
    assert_eq!(client.status(), ClientStatus::Error);
    assert_eq!(broker.reconnects.load(Ordering::SeqCst), 0);

    client.publish("opcuamqtt/2/Temperature", b"1");
    assert!(broker.messages().is_empty());
}

#[test]
fn shutdown_disconnects_once() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());
    assert!(client.start());
    assert_eq!(client.wait_for_connection(WAIT), ClientStatus::Connected);

    client.shutdown();
    client.shutdown();
    drop(client);

    assert_eq!(broker.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_of_idle_client_returns() {
    let broker = ScriptedBroker::new();
    let client = client(&broker, fast_broker_config());
    client.shutdown();
    assert_eq!(client.run_state(), RunState::NotStarted);
    assert_eq!(broker.connects.load(Ordering::SeqCst), 0);
}
