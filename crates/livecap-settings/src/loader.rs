//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LivecapSettings::default()`]
//! 2. If `~/.livecap/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LIVECAP_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::LivecapSettings;

/// Resolve the path to the settings file (`~/.livecap/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livecap").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LivecapSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LivecapSettings> {
    let defaults = serde_json::to_value(LivecapSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LivecapSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut LivecapSettings) {
    apply_overrides_from(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_overrides_from(settings: &mut LivecapSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Provider ────────────────────────────────────────────────────
    if let Some(v) = env.string("LIVECAP_API_KEY") {
        settings.provider.api_key = Some(v);
    }
    if let Some(v) = env.string("LIVECAP_PROVIDER_HOST") {
        settings.provider.host = v;
    }
    if let Some(v) = env.u64("LIVECAP_HEARTBEAT_SECS", 1, 3_600) {
        settings.provider.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("LIVECAP_CONNECT_TIMEOUT_SECS", 1, 300) {
        settings.provider.connect_timeout_secs = v;
    }
    if let Some(v) = env.u64("LIVECAP_RECONNECT_DELAY_SECS", 0, 3_600) {
        settings.provider.reconnect_delay_secs = v;
    }
    if let Some(v) = env.u64("LIVECAP_MAX_RECONNECT_ATTEMPTS", 0, 100) {
        settings.provider.max_reconnect_attempts = v as u32;
    }

    // ── Supervisor ──────────────────────────────────────────────────
    if let Some(v) = env.u64("LIVECAP_RESTART_DELAY_SECS", 0, 3_600) {
        settings.supervisor.restart_delay_secs = v;
    }
    if let Some(v) = env.u64("LIVECAP_STATUS_CHECK_SECS", 1, 86_400) {
        settings.supervisor.status_check_interval_secs = v;
    }
    if let Some(v) = env.u64("LIVECAP_MAX_RESTARTS", 0, 100) {
        settings.supervisor.max_restarts = v as u32;
    }

    // ── Broadcast / logging ─────────────────────────────────────────
    if let Some(v) = env.usize("LIVECAP_SUBSCRIBER_QUEUE", 1, 1_000_000) {
        settings.broadcast.subscriber_queue = v;
    }
    if let Some(v) = env.string("LIVECAP_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("LIVECAP_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
