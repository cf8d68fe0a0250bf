//! MQTT bridge
//!
//! Publishes per-object payloads and serves JSON-RPC over MQTT: every
//! message on a subscribed topic is dispatched like an HTTP request and
//! the response goes to `<topic>/response`.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ObjectPublisher;
use crate::api::RpcDispatcher;
use crate::error::{GatewaySrvError, Result};

const DEFAULT_MQTT_PORT: u16 = 1883;
const RESPONSE_SUFFIX: &str = "/response";
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Broker settings (`mqtt.*`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// `mqtt://host:port`, `host:port` or `host`; empty disables the bridge
    pub url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    pub retain: bool,
    #[serde(with = "crate::config::duration_secs")]
    pub keepalive: Duration,
    pub topic_pub: String,
    #[serde(deserialize_with = "crate::config::string_list")]
    pub topics_sub: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            client_id: "gatewaysrv".to_string(),
            username: None,
            password: None,
            qos: 0,
            retain: false,
            keepalive: Duration::from_secs(60),
            topic_pub: "gateway/objects".to_string(),
            topics_sub: Vec::new(),
        }
    }
}

impl MqttConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    /// Broker host and port from `url`
    pub fn broker(&self) -> Result<(String, u16)> {
        let url = self.url.trim();
        let rest = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .unwrap_or(url)
            .trim_end_matches('/');
        if rest.is_empty() {
            return Err(GatewaySrvError::config("mqtt.url is empty"));
        }

        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    GatewaySrvError::config(format!("Invalid MQTT port in '{}'", url))
                })?;
                Ok((host.to_string(), port))
            },
            None => Ok((rest.to_string(), DEFAULT_MQTT_PORT)),
        }
    }
}

/// Publisher half of the bridge; the event loop is driven by [`MqttBridge::run`]
#[derive(Clone)]
pub struct MqttBridge {
    client: AsyncClient,
    config: MqttConfig,
}

impl std::fmt::Debug for MqttBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBridge")
            .field("url", &self.config.url)
            .field("topic_pub", &self.config.topic_pub)
            .finish()
    }
}

impl MqttBridge {
    pub fn new(config: MqttConfig) -> Result<(Self, EventLoop)> {
        let (host, port) = config.broker()?;
        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(config.keepalive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Ok((Self { client, config }, eventloop))
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Drive the connection until `cancel` fires
    ///
    /// Subscriptions are (re)issued on every CONNACK so they survive
    /// broker reconnects.
    pub async fn run(
        &self,
        mut eventloop: EventLoop,
        dispatcher: Arc<RpcDispatcher>,
        cancel: CancellationToken,
    ) {
        info!("MQTT bridge started for {}", self.config.url);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker {}", self.config.url);
                    self.subscribe_all().await;
                },
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic.ends_with(RESPONSE_SUFFIX) {
                        continue;
                    }
                    let bridge = self.clone();
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let response = dispatcher.handle_bytes(&publish.payload).await;
                        bridge.respond(&publish.topic, &response).await;
                    });
                },
                Ok(other) => debug!("MQTT event: {:?}", other),
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {},
                    }
                },
            }
        }

        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {}", e);
        }
        info!("MQTT bridge stopped");
    }

    async fn subscribe_all(&self) {
        for topic in &self.config.topics_sub {
            match self.client.subscribe(topic.as_str(), self.config.qos()).await {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => warn!("Subscribe to {} failed: {}", topic, e),
            }
        }
    }

    async fn respond(&self, topic: &str, response: &crate::api::RpcResponse) {
        let payload = match serde_json::to_vec(response) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to encode JSON-RPC response: {}", e);
                return;
            },
        };
        let topic = response_topic(topic);
        if let Err(e) = self
            .client
            .publish(topic.as_str(), self.config.qos(), false, payload)
            .await
        {
            warn!("Publish to {} failed: {}", topic, e);
        }
    }
}

pub fn response_topic(topic: &str) -> String {
    format!("{}{}", topic, RESPONSE_SUFFIX)
}

#[async_trait]
impl ObjectPublisher for MqttBridge {
    async fn publish(&self, payload: String) {
        // Never block polling on a slow broker
        if let Err(e) = self.client.try_publish(
            self.config.topic_pub.as_str(),
            self.config.qos(),
            self.config.retain,
            payload,
        ) {
            debug!("MQTT publish dropped: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn config(url: &str) -> MqttConfig {
        MqttConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_broker_parsing() {
        assert_eq!(
            config("mqtt://broker.local:1884").broker().unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            config("10.0.0.2").broker().unwrap(),
            ("10.0.0.2".to_string(), 1883)
        );
        assert!(config("host:port").broker().unwrap_err().is_config());
        assert!(!config("").is_enabled());
    }

    #[test]
    fn test_qos_mapping() {
        let mut cfg = config("h");
        assert_eq!(cfg.qos(), QoS::AtMostOnce);
        cfg.qos = 2;
        assert_eq!(cfg.qos(), QoS::ExactlyOnce);
    }

    #[test]
    fn test_response_topic() {
        assert_eq!(response_topic("gw/rpc"), "gw/rpc/response");
    }

    #[tokio::test]
    async fn test_publish_never_blocks_without_broker() {
        let (bridge, _eventloop) = MqttBridge::new(config("127.0.0.1:1")).unwrap();
        for i in 0..(REQUEST_CAPACITY + 10) {
            bridge.publish(format!("1 {} 0 1.0 0", i)).await;
        }
    }
}
