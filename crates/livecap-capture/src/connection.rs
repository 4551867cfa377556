//! One live provider socket per stream: heartbeats, bounded reconnection, event forwarding.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use livecap_core::security::redact_url;
use livecap_core::{ApiKey, CaptureError, Event, EventPayload, StreamId, UniqueId};
use livecap_protocol::{decode_binary, decode_text, normalize_all, Decoded};
use livecap_settings::ProviderSettings;

use crate::broadcast::EventBroadcaster;
use crate::registry::ConnectionLease;
use crate::task::ChildHandle;
use crate::transport::{Connector, Frame, Transport};

/// Upper bound on sending a close frame during an explicit stop.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Provider connection parameters.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub api_key: Option<ApiKey>,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            host: settings.host.clone(),
            api_key: ApiKey::from_optional(settings.api_key.as_deref()),
            heartbeat_interval: settings.heartbeat_interval(),
            reconnect_delay: settings.reconnect_delay(),
            max_reconnect_attempts: settings.max_reconnect_attempts,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&ProviderSettings::default())
    }
}

/// Build the provider URL for a broadcaster handle.
///
/// `host` is a bare host (`ws.example.com`), which gets `wss://`, or a full `ws://`/`wss://` URL.
pub fn build_url(host: &str, unique_id: &UniqueId, api_key: &ApiKey) -> Result<Url, CaptureError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(CaptureError::Configuration("provider host is empty".into()));
    }
    let base = if host.contains("://") {
        host.to_owned()
    } else {
        format!("wss://{host}/")
    };
    let mut url = Url::parse(&base)
        .map_err(|e| CaptureError::Configuration(format!("invalid provider host '{host}': {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(CaptureError::Configuration(format!(
            "unsupported provider scheme '{}'",
            url.scheme()
        )));
    }
    let _ = url
        .query_pairs_mut()
        .append_pair("uniqueId", unique_id.normalized())
        .append_pair("apiKey", api_key.expose());
    Ok(url)
}

/// Lifecycle phase of a connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closing,
}

/// Observable state of one managed connection.
#[derive(Clone, Debug)]
pub struct ConnectionState {
    pub stream_id: StreamId,
    pub unique_id: UniqueId,
    /// Provider URL with the credential redacted.
    pub websocket_url: String,
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub heartbeat_active: bool,
}

/// How a connection manager task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Stopped on request.
    Stopped,
    /// Reconnect budget exhausted.
    Failed { attempts: u32 },
}

/// Owns one provider socket for a stream.
pub struct ConnectionManager {
    stream_id: StreamId,
    unique_id: UniqueId,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    broadcaster: Arc<EventBroadcaster>,
    lease: Option<ConnectionLease>,
}

impl ConnectionManager {
    pub fn new(
        stream_id: StreamId,
        unique_id: UniqueId,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            stream_id,
            unique_id,
            config,
            connector,
            broadcaster,
            lease: None,
        }
    }

    /// Hold `lease` for the lifetime of the socket task.
    pub fn with_lease(mut self, lease: ConnectionLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Validate configuration and spawn the connection task.
    ///
    /// A missing credential or unusable host fails here without any connection attempt.
    pub fn start(self, cancel: CancellationToken) -> Result<ConnectionHandle, CaptureError> {
        let api_key = self
            .config
            .api_key
            .clone()
            .ok_or_else(|| CaptureError::Configuration("provider API key is not set".into()))?;
        let url = build_url(&self.config.host, &self.unique_id, &api_key)?;

        let state = Arc::new(RwLock::new(ConnectionState {
            stream_id: self.stream_id.clone(),
            unique_id: self.unique_id.clone(),
            websocket_url: redact_url(url.as_str()),
            phase: ConnectionPhase::Disconnected,
            reconnect_attempts: 0,
            connected_at: None,
            last_event_at: None,
            heartbeat_active: false,
        }));

        let task = ConnectionTask {
            stream_id: self.stream_id,
            url: url.to_string(),
            config: self.config,
            connector: self.connector,
            broadcaster: self.broadcaster,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            _lease: self.lease,
        };
        let child = ChildHandle::spawn(cancel, task.run());
        Ok(ConnectionHandle { state, child })
    }
}

/// Handle to a running connection manager.
pub struct ConnectionHandle {
    state: Arc<RwLock<ConnectionState>>,
    child: ChildHandle<ConnectionOutcome>,
}

impl ConnectionHandle {
    pub fn snapshot(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Wait for the manager to end on its own. `None` if the task panicked.
    pub async fn wait(&mut self) -> Option<ConnectionOutcome> {
        self.child.wait().await
    }

    /// Stop the manager: cancels heartbeat and any pending reconnect, closes the socket.
    pub async fn stop(&mut self, timeout: Duration) -> Option<ConnectionOutcome> {
        self.child.stop(timeout).await
    }

    pub fn is_finished(&self) -> bool {
        self.child.is_finished()
    }
}

enum PumpEnd {
    Stopped,
    Disconnected(Option<String>),
}

struct ConnectionTask {
    stream_id: StreamId,
    url: String,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    broadcaster: Arc<EventBroadcaster>,
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
    _lease: Option<ConnectionLease>,
}

impl ConnectionTask {
    async fn run(self) -> ConnectionOutcome {
        let redacted = redact_url(&self.url);
        loop {
            self.set_phase(ConnectionPhase::Connecting);
            let attempt = self.state.read().reconnect_attempts;
            tracing::debug!(stream_id = %self.stream_id, url = %redacted, attempt, "connecting");

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.finish_stopped(),
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(transport) => {
                    self.on_connected();
                    let end = self.pump(transport).await;
                    self.state.write().heartbeat_active = false;
                    match end {
                        PumpEnd::Stopped => return self.finish_stopped(),
                        PumpEnd::Disconnected(reason) => {
                            tracing::warn!(
                                stream_id = %self.stream_id,
                                reason = reason.as_deref().unwrap_or("unknown"),
                                "provider connection lost"
                            );
                            self.set_phase(ConnectionPhase::Disconnected);
                            self.publish(Event::lifecycle(EventPayload::Disconnected { reason }));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(stream_id = %self.stream_id, attempt, error = %e, "connect failed");
                    self.set_phase(ConnectionPhase::Disconnected);
                }
            }

            let attempts = self.state.read().reconnect_attempts;
            if attempts >= self.config.max_reconnect_attempts {
                self.set_phase(ConnectionPhase::Failed);
                tracing::error!(stream_id = %self.stream_id, attempts, "reconnect attempts exhausted");
                self.publish(Event::lifecycle(EventPayload::ConnectionFailed { attempts }));
                return ConnectionOutcome::Failed { attempts };
            }

            self.set_phase(ConnectionPhase::Reconnecting);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.finish_stopped(),
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
            self.state.write().reconnect_attempts += 1;
        }
    }

    /// Forward frames until the socket ends or a stop is requested.
    async fn pump(&self, transport: Transport) -> PumpEnd {
        let Transport {
            mut sink,
            mut stream,
        } = transport;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.set_phase(ConnectionPhase::Closing);
                    let close = async {
                        let _ = sink.send(Frame::Close(None)).await;
                        let _ = sink.close().await;
                    };
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, close).await;
                    return PumpEnd::Stopped;
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(Frame::Ping(Vec::new())).await {
                        return PumpEnd::Disconnected(Some(e.to_string()));
                    }
                    tracing::trace!(stream_id = %self.stream_id, "heartbeat sent");
                }
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => match decode_text(&text) {
                        Ok(decoded) => self.dispatch(decoded),
                        Err(e) => tracing::warn!(stream_id = %self.stream_id, error = %e, "discarding text frame"),
                    },
                    Some(Ok(Frame::Binary(bytes))) => match decode_binary(&bytes) {
                        Ok(decoded) => self.dispatch(decoded),
                        Err(e) => tracing::debug!(stream_id = %self.stream_id, error = %e, "discarding binary frame"),
                    },
                    Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => {}
                    Some(Ok(Frame::Close(reason))) => {
                        return PumpEnd::Disconnected(reason.or_else(|| Some("closed by provider".into())));
                    }
                    Some(Err(e)) => return PumpEnd::Disconnected(Some(e.to_string())),
                    None => return PumpEnd::Disconnected(Some("stream ended".into())),
                },
            }
        }
    }

    fn dispatch(&self, decoded: Decoded) {
        for event in normalize_all(decoded) {
            self.state.write().last_event_at = Some(Utc::now());
            self.publish(event);
        }
    }

    fn on_connected(&self) {
        {
            let mut state = self.state.write();
            state.phase = ConnectionPhase::Connected;
            state.reconnect_attempts = 0;
            state.connected_at = Some(Utc::now());
            state.heartbeat_active = true;
        }
        tracing::info!(stream_id = %self.stream_id, "connected to provider");
        self.publish(Event::lifecycle(EventPayload::Connected));
    }

    fn finish_stopped(&self) -> ConnectionOutcome {
        {
            let mut state = self.state.write();
            state.heartbeat_active = false;
            state.phase = ConnectionPhase::Disconnected;
        }
        tracing::info!(stream_id = %self.stream_id, "connection stopped");
        ConnectionOutcome::Stopped
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.state.write().phase = phase;
    }

    fn publish(&self, event: Event) {
        let _ = self.broadcaster.publish(&self.stream_id, event);
    }
}
