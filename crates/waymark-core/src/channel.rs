//! IoT Hub MQTT channel implementation.
//!
//! Authenticates with a SAS token derived from the device's symmetric
//! key, publishes telemetry to the device event topic, and dispatches
//! inbound direct-method invocations. Every invocation is acknowledged
//! with a fixed body: status 200 when a method name is present in the
//! topic, 400 otherwise.
//!
//! There is no automatic reconnect: when the event loop errors out it
//! emits `Disconnected` and stops, leaving reconnection to a
//! caller-triggered login.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sha2::Sha256;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waymark_types::wire::LocationPayload;
use waymark_types::DeviceIdentity;

use crate::error::{Error, Result};
use crate::traits::{Channel, ChannelEvent, MethodInvocation};

const API_VERSION: &str = "2021-04-12";
const METHOD_TOPIC_PREFIX: &str = "$iothub/methods/POST/";
const SAS_TTL: Duration = Duration::from_secs(3600);

/// Fixed acknowledgement body returned for every method invocation.
pub const ACK_BODY: &str = r#"{ "Response": "All Good." }"#;

struct Connection {
    client: AsyncClient,
    device_id: String,
    cancel: CancellationToken,
}

/// MQTT-backed persistent channel.
pub struct IotHubChannel {
    events: broadcast::Sender<ChannelEvent>,
    connected: Arc<AtomicBool>,
    connection: Mutex<Option<Connection>>,
}

impl IotHubChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            events,
            connected: Arc::new(AtomicBool::new(false)),
            connection: Mutex::new(None),
        }
    }

    fn take_connection(&self) -> Option<Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Default for IotHubChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for IotHubChannel {
    async fn connect(&self, host: &str, identity: &DeviceIdentity) -> Result<()> {
        // Tear down any previous connection first
        if let Some(previous) = self.take_connection() {
            previous.cancel.cancel();
            let _ = previous.client.disconnect().await;
        }
        self.connected.store(false, Ordering::SeqCst);

        let token = sas_token(host, &identity.id, &identity.symmetric_key, SAS_TTL)?;
        let username = format!("{host}/{}/?api-version={API_VERSION}", identity.id);

        let mut options = MqttOptions::new(&identity.id, host, 8883);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_credentials(username, token);
        options.set_transport(rumqttc::Transport::Tls(rumqttc::TlsConfiguration::Native));

        let (client, eventloop) = AsyncClient::new(options, 64);
        let cancel = CancellationToken::new();

        info!(host, device_id = %identity.id, "Connecting channel");
        tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            identity.id.clone(),
            self.events.clone(),
            Arc::clone(&self.connected),
            cancel.clone(),
        ));

        *self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Connection {
            client,
            device_id: identity.id.clone(),
            cancel,
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(connection) = self.take_connection() {
            connection.cancel.cancel();
            if let Err(e) = connection.client.disconnect().await {
                debug!(error = %e, "Error disconnecting channel client");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: &LocationPayload) -> Result<()> {
        let (client, device_id) = {
            let guard = self
                .connection
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let connection = guard.as_ref().ok_or(Error::ChannelNotConnected)?;
            (connection.client.clone(), connection.device_id.clone())
        };
        if !self.is_connected() {
            return Err(Error::ChannelNotConnected);
        }

        let body = serde_json::to_vec(payload)?;
        let topic = format!("devices/{device_id}/messages/events/");
        client.publish(topic, QoS::AtLeastOnce, false, body).await?;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    device_id: String,
    events: broadcast::Sender<ChannelEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(device_id, "Channel event loop cancelled");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(device_id, ?ack.code, "Channel ConnAck");
                    if ack.code == rumqttc::ConnectReturnCode::Success {
                        connected.store(true, Ordering::SeqCst);
                        if let Err(e) = client
                            .subscribe(format!("{METHOD_TOPIC_PREFIX}#"), QoS::AtLeastOnce)
                            .await
                        {
                            warn!(error = %e, "Method subscription failed");
                        }
                        let _ = events.send(ChannelEvent::Connected);
                    } else {
                        let _ = events.send(ChannelEvent::Disconnected {
                            reason: format!("connection refused: {:?}", ack.code),
                        });
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some((method, request_id)) = parse_method_topic(&publish.topic) {
                        let status = if method.is_empty() { 400 } else { 200 };
                        let response_topic =
                            format!("$iothub/methods/res/{status}/?$rid={request_id}");
                        if let Err(e) = client
                            .publish(response_topic, QoS::AtLeastOnce, false, ACK_BODY)
                            .await
                        {
                            warn!(error = %e, "Method acknowledgement failed");
                        }
                        if status == 200 {
                            let payload =
                                String::from_utf8_lossy(&publish.payload).into_owned();
                            let _ = events.send(ChannelEvent::MethodInvoked(MethodInvocation {
                                method,
                                payload,
                            }));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(device_id, error = %e, "Channel connection lost");
                    connected.store(false, Ordering::SeqCst);
                    let _ = events.send(ChannelEvent::Disconnected {
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// Build a SAS token for the device endpoint:
/// `SharedAccessSignature sr=<resource>&sig=<signature>&se=<expiry>`.
fn sas_token(host: &str, device_id: &str, symmetric_key: &str, ttl: Duration) -> Result<String> {
    let resource = percent_encode(&format!("{host}/devices/{device_id}"));
    let expiry = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl.as_secs();

    let key = base64::engine::general_purpose::STANDARD
        .decode(symmetric_key)
        .map_err(|e| Error::invalid_config(format!("symmetric key is not base64: {e}")))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|e| Error::invalid_config(format!("symmetric key rejected: {e}")))?;
    mac.update(format!("{resource}\n{expiry}").as_bytes());
    let signature =
        percent_encode(&base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()));

    Ok(format!(
        "SharedAccessSignature sr={resource}&sig={signature}&se={expiry}"
    ))
}

/// Percent-encode everything but RFC 3986 unreserved characters.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

/// Extract `(method, request_id)` from a direct-method topic of the
/// form `$iothub/methods/POST/{method}/?$rid={id}`.
fn parse_method_topic(topic: &str) -> Option<(String, String)> {
    let rest = topic.strip_prefix(METHOD_TOPIC_PREFIX)?;
    let (method, query) = rest.split_once("/?")?;
    let request_id = query.strip_prefix("$rid=")?;
    Some((method.to_string(), request_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("abc-123._~"), "abc-123._~");
        assert_eq!(
            percent_encode("hub.example.net/devices/dev 1"),
            "hub.example.net%2Fdevices%2Fdev%201"
        );
        assert_eq!(percent_encode("a+b="), "a%2Bb%3D");
    }

    #[test]
    fn test_parse_method_topic() {
        let (method, rid) =
            parse_method_topic("$iothub/methods/POST/setLocationBeingViewed/?$rid=42").unwrap();
        assert_eq!(method, "setLocationBeingViewed");
        assert_eq!(rid, "42");
    }

    #[test]
    fn test_parse_method_topic_empty_method() {
        let (method, rid) = parse_method_topic("$iothub/methods/POST//?$rid=7").unwrap();
        assert!(method.is_empty());
        assert_eq!(rid, "7");
    }

    #[test]
    fn test_parse_method_topic_rejects_other_topics() {
        assert!(parse_method_topic("devices/dev-1/messages/events/").is_none());
        assert!(parse_method_topic("$iothub/methods/POST/name").is_none());
    }

    #[test]
    fn test_sas_token_shape() {
        let token = sas_token(
            "hub.example.net",
            "dev-1",
            &base64::engine::general_purpose::STANDARD.encode(b"secret"),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(token.starts_with("SharedAccessSignature sr=hub.example.net%2Fdevices%2Fdev-1"));
        assert!(token.contains("&sig="));
        assert!(token.contains("&se="));
    }

    #[test]
    fn test_sas_token_rejects_bad_key() {
        assert!(sas_token("hub.example.net", "dev-1", "not base64!!", SAS_TTL).is_err());
    }
}
