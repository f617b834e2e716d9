//! MQTT broker connection wrapper.
//!
//! Owns the rumqttc event loop: publishes the retained bridge availability
//! topic (`online` on ConnAck, `offline` as LWT and on graceful
//! disconnect), re-subscribes registered command topics after every
//! reconnect, and dispatches inbound command messages to per-device
//! handlers. Broker unavailability is never fatal; publishes while
//! disconnected are dropped and repaired by the next poll cycle.

use crate::config::MqttConfig;
use log::{info, warn};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Timeout for the initial ConnAck after `connect`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect backoff bounds.
const RECONNECT_MIN: Duration = Duration::from_secs(5);
const RECONNECT_MAX: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("not connected to MQTT broker")]
    NotConnected,

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker did not answer within {0:?}")]
    ConnectTimeout(Duration),
}

pub type MqttResult<T> = Result<T, MqttError>;

/// Handler for a raw subscription: (topic, payload).
pub type MessageHandler = Arc<dyn Fn(String, Vec<u8>) + Send + Sync>;

/// Handler for a device command: (device_id, entity_id, payload).
pub type CommandHandler = Arc<dyn Fn(String, String, Vec<u8>) + Send + Sync>;

struct ActiveConnection {
    client: AsyncClient,
    loop_token: CancellationToken,
}

struct MqttInner {
    connected: AtomicBool,
    topic_prefix: RwLock<String>,
    /// Subscriptions by topic filter; replayed after every reconnect.
    handlers: RwLock<HashMap<String, MessageHandler>>,
    active: RwLock<Option<ActiveConnection>>,
}

/// Cheaply cloneable MQTT client handle.
#[derive(Clone)]
pub struct MqttClient {
    inner: Arc<MqttInner>,
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MqttInner {
                connected: AtomicBool::new(false),
                topic_prefix: RwLock::new(String::from("snmp-bridge")),
                handlers: RwLock::new(HashMap::new()),
                active: RwLock::new(None),
            }),
        }
    }

    /// Connect to the broker. The event loop keeps retrying in the
    /// background even when this returns `ConnectTimeout`, so a missing
    /// broker at startup is a warning, not a failure.
    pub async fn connect(&self, cfg: &MqttConfig) -> MqttResult<()> {
        *self.inner.topic_prefix.write().unwrap() = cfg.topic_prefix.clone();
        let status_topic = self.status_topic();

        let mut options = MqttOptions::new(&cfg.client_id, &cfg.broker, cfg.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !cfg.username.is_empty() {
            options.set_credentials(&cfg.username, cfg.password.expose());
        }
        options.set_last_will(LastWill::new(
            &status_topic,
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, 64);
        let loop_token = CancellationToken::new();

        *self.inner.active.write().unwrap() = Some(ActiveConnection {
            client: client.clone(),
            loop_token: loop_token.clone(),
        });

        let (connack_tx, mut connack_rx) = watch::channel(false);
        tokio::spawn(run_event_loop(
            self.inner.clone(),
            client,
            eventloop,
            status_topic,
            loop_token,
            connack_tx,
            format!("{}:{}", cfg.broker, cfg.port),
        ));

        let wait = async {
            while !*connack_rx.borrow() {
                if connack_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, wait).await {
            Ok(()) if self.is_connected() => Ok(()),
            _ => Err(MqttError::ConnectTimeout(CONNECT_TIMEOUT)),
        }
    }

    /// Publish retained `offline`, stop the event loop, and drop the
    /// connection.
    pub async fn disconnect(&self) {
        let _ = self
            .publish(&self.status_topic(), "offline", true)
            .await;

        let active = self.inner.active.write().unwrap().take();
        if let Some(active) = active {
            let _ = active.client.disconnect().await;
            // Grace period so the event loop can flush the queued offline
            // publish and the DISCONNECT packet.
            tokio::time::sleep(Duration::from_millis(250)).await;
            active.loop_token.cancel();
        }
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Disconnect and reconnect with a new configuration. Registered
    /// command handlers survive and are re-subscribed on ConnAck.
    pub async fn reconnect(&self, cfg: &MqttConfig) -> MqttResult<()> {
        self.disconnect().await;
        self.connect(cfg).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn topic_prefix(&self) -> String {
        self.inner.topic_prefix.read().unwrap().clone()
    }

    /// The retained bridge availability topic.
    pub fn status_topic(&self) -> String {
        format!("{}/bridge/status", self.topic_prefix())
    }

    fn client(&self) -> Option<AsyncClient> {
        self.inner
            .active
            .read()
            .unwrap()
            .as_ref()
            .map(|a| a.client.clone())
    }

    /// Publish a string payload at QoS 0.
    pub async fn publish(&self, topic: &str, payload: &str, retain: bool) -> MqttResult<()> {
        self.publish_bytes(topic, payload.as_bytes().to_vec(), retain)
            .await
    }

    /// Publish a JSON-serialized payload at QoS 0.
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        retain: bool,
    ) -> MqttResult<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.publish_bytes(topic, bytes, retain).await
    }

    async fn publish_bytes(&self, topic: &str, payload: Vec<u8>, retain: bool) -> MqttResult<()> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let client = self.client().ok_or(MqttError::NotConnected)?;
        client
            .publish(topic.to_string(), QoS::AtMostOnce, retain, payload)
            .await?;
        Ok(())
    }

    /// Register a raw subscription. The handler is kept for re-subscribe
    /// on reconnect.
    pub async fn subscribe(&self, topic_filter: &str, handler: MessageHandler) -> MqttResult<()> {
        self.inner
            .handlers
            .write()
            .unwrap()
            .insert(topic_filter.to_string(), handler);

        if let Some(client) = self.client() {
            client
                .subscribe(topic_filter.to_string(), QoS::AtMostOnce)
                .await?;
        }
        Ok(())
    }

    /// Subscribe to `<prefix>/<deviceId>/+/set` and dispatch the extracted
    /// entity id to the handler.
    pub async fn subscribe_commands(
        &self,
        device_id: &str,
        handler: CommandHandler,
    ) -> MqttResult<()> {
        let prefix = self.topic_prefix();
        let topic = command_topic_filter(&prefix, device_id);
        let device = device_id.to_string();

        self.subscribe(
            &topic,
            Arc::new(move |topic, payload| {
                if let Some(entity_id) = extract_entity_id(&topic, &prefix, &device) {
                    handler(device.clone(), entity_id, payload);
                }
            }),
        )
        .await
    }

    pub async fn unsubscribe_commands(&self, device_id: &str) {
        let topic = command_topic_filter(&self.topic_prefix(), device_id);
        self.inner.handlers.write().unwrap().remove(&topic);
        if let Some(client) = self.client() {
            let _ = client.unsubscribe(topic).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    inner: Arc<MqttInner>,
    client: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    status_topic: String,
    token: CancellationToken,
    connack_tx: watch::Sender<bool>,
    broker: String,
) {
    let mut reconnect_delay = RECONNECT_MIN;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    inner.connected.store(true, Ordering::SeqCst);
                    reconnect_delay = RECONNECT_MIN;
                    info!("MQTT connected to {}", broker);
                    let _ = connack_tx.send(true);

                    if let Err(e) = client
                        .publish(status_topic.clone(), QoS::AtMostOnce, true, "online".as_bytes().to_vec())
                        .await
                    {
                        warn!("Failed to publish bridge status: {}", e);
                    }

                    resubscribe(&inner, &client).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatch(&inner, &publish.topic, publish.payload.to_vec());
                }
                Ok(_) => {}
                Err(e) => {
                    if inner.connected.swap(false, Ordering::SeqCst) {
                        warn!("MQTT connection lost: {}", e);
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                    reconnect_delay = std::cmp::min(reconnect_delay * 2, RECONNECT_MAX);
                }
            }
        }
    }
}

async fn resubscribe(inner: &Arc<MqttInner>, client: &AsyncClient) {
    let topics: Vec<String> = inner.handlers.read().unwrap().keys().cloned().collect();
    for topic in topics {
        if let Err(e) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
            warn!("Failed to re-subscribe to {}: {}", topic, e);
        }
    }
}

fn dispatch(inner: &Arc<MqttInner>, topic: &str, payload: Vec<u8>) {
    let handler = {
        let handlers = inner.handlers.read().unwrap();
        handlers
            .iter()
            .find(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| handler.clone())
    };

    if let Some(handler) = handler {
        handler(topic.to_string(), payload);
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (rest).
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            _ => return false,
        }
    }
}

fn command_topic_filter(prefix: &str, device_id: &str) -> String {
    format!("{}/{}/+/set", prefix, device_id)
}

/// Extract the entity id from `<prefix>/<deviceId>/<entityId>/set`.
fn extract_entity_id(topic: &str, prefix: &str, device_id: &str) -> Option<String> {
    let rest = topic
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_prefix(device_id)?
        .strip_prefix('/')?;
    let (entity_id, tail) = rest.split_once('/')?;
    if tail != "set" || entity_id.is_empty() {
        return None;
    }
    Some(entity_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_wildcards() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("snmp-bridge/dev-1/+/set", "snmp-bridge/dev-1/outlet_1/set"));
        assert!(!topic_matches("snmp-bridge/dev-1/+/set", "snmp-bridge/dev-2/outlet_1/set"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+/c", "a/b"));
        assert!(topic_matches("a/#", "a/b/c/d"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_extract_entity_id() {
        assert_eq!(
            extract_entity_id("snmp-bridge/dev-1/outlet_1/set", "snmp-bridge", "dev-1"),
            Some("outlet_1".to_string())
        );
        assert_eq!(
            extract_entity_id("snmp-bridge/dev-1/outlet_1/state", "snmp-bridge", "dev-1"),
            None
        );
        assert_eq!(
            extract_entity_id("snmp-bridge/dev-1/set", "snmp-bridge", "dev-1"),
            None
        );
        assert_eq!(
            extract_entity_id("other/dev-1/outlet_1/set", "snmp-bridge", "dev-1"),
            None
        );
    }

    #[test]
    fn test_command_topic_filter_shape() {
        assert_eq!(
            command_topic_filter("snmp-bridge", "dev-1"),
            "snmp-bridge/dev-1/+/set"
        );
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_matching_handler() {
        let client = MqttClient::new();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = received.clone();
        let handler: CommandHandler = Arc::new(move |device, entity, payload| {
            sink.lock()
                .unwrap()
                .push((device, entity, String::from_utf8_lossy(&payload).into_owned()));
        });

        // No active connection: the subscription is still registered and
        // dispatchable (the broker subscribe happens on connect).
        client.subscribe_commands("dev-1", handler).await.unwrap();

        dispatch(
            &client.inner,
            "snmp-bridge/dev-1/outlet_1/set",
            b"OFF".to_vec(),
        );
        dispatch(
            &client.inner,
            "snmp-bridge/dev-2/outlet_1/set",
            b"ON".to_vec(),
        );

        let received = received.lock().unwrap();
        assert_eq!(
            received.as_slice(),
            &[(
                "dev-1".to_string(),
                "outlet_1".to_string(),
                "OFF".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_publish_without_connection_is_not_connected() {
        let client = MqttClient::new();
        let err = client
            .publish("snmp-bridge/bridge/status", "online", true)
            .await
            .unwrap_err();
        assert!(matches!(err, MqttError::NotConnected));
    }

    #[tokio::test]
    async fn test_unsubscribe_commands_removes_handler() {
        let client = MqttClient::new();
        let handler: CommandHandler = Arc::new(|_, _, _| {});
        client.subscribe_commands("dev-1", handler).await.unwrap();
        assert_eq!(client.inner.handlers.read().unwrap().len(), 1);

        client.unsubscribe_commands("dev-1").await;
        assert!(client.inner.handlers.read().unwrap().is_empty());
    }
}
