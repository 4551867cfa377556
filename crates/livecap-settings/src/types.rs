//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section implements [`Default`] with production
//! values and is marked `#[serde(default)]`, so partial files are accepted.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivecapSettings {
    /// Upstream event provider connection.
    pub provider: ProviderSettings,
    /// Per-stream supervision policy.
    pub supervisor: SupervisorSettings,
    /// Subscriber fan-out.
    pub broadcast: BroadcastSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl LivecapSettings {
    /// Reject values that would make the capture loop spin or never fire.
    pub fn validate(&self) -> Result<()> {
        if self.provider.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("provider host is empty".into()));
        }
        if self.provider.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.provider.connect_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "connect timeout must be positive".into(),
            ));
        }
        if self.supervisor.status_check_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "status check interval must be positive".into(),
            ));
        }
        if self.broadcast.subscriber_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "subscriber queue must hold at least one event".into(),
            ));
        }
        Ok(())
    }
}

/// Provider connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Host of the provider's WebSocket endpoint.
    pub host: String,
    /// API credential. Capture refuses to start without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Upper bound on one connect attempt, including the WebSocket handshake.
    pub connect_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: "ws.eulerstream.com".to_string(),
            api_key: None,
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 5,
            connect_timeout_secs: 10,
        }
    }
}

impl ProviderSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Supervision policy for one captured stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Delay before restarting children after an unexpected exit.
    pub restart_delay_secs: u64,
    /// How often the stream status is re-checked while idle.
    pub status_check_interval_secs: u64,
    /// Restarts allowed before the stream is marked failed.
    pub max_restarts: u32,
    /// Upper bound on waiting for a child to wind down.
    pub stop_timeout_secs: u64,
    /// Back-off requested from the job queue when status can't be read at startup.
    pub startup_retry_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_delay_secs: 30,
            status_check_interval_secs: 300,
            max_restarts: 3,
            stop_timeout_secs: 10,
            startup_retry_secs: 30,
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Per-subscriber queue depth; events beyond it are dropped for that subscriber.
    pub subscriber_queue: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            subscriber_queue: 1024,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"livecap_protocol": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
