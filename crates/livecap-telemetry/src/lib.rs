//! Tracing initialization for the livecap binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use livecap_settings::LoggingSettings;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "livecap_protocol" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from the `logging` settings section. Unparseable levels are skipped.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let module_levels = settings
            .module_levels
            .iter()
            .filter_map(|(module, level)| Some((module.clone(), parse_level(level)?)))
            .collect();
        Self {
            log_level: parse_level(&settings.level).unwrap_or(Level::INFO),
            module_levels,
            json: settings.json,
        }
    }

    /// Filter directives in `EnvFilter` syntax, e.g. `info,livecap_capture=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Returned by [`init_telemetry`]; records whether this call installed the global subscriber.
#[derive(Debug)]
pub struct TelemetryGuard {
    installed: bool,
    directives: String,
}

impl TelemetryGuard {
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Directives used when RUST_LOG is not set.
    pub fn directives(&self) -> &str {
        &self.directives
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// A second call leaves the existing subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = config.filter_directives();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = match tracing_subscriber::registry().with(fmt_layer).try_init() {
        Ok(()) => true,
        Err(e) => {
            eprintln!("livecap-telemetry: subscriber already set: {e}");
            false
        }
    };

    TelemetryGuard {
        installed,
        directives,
    }
}

/// Parse a level name (`trace`..`error`, case-insensitive).
pub fn parse_level(value: &str) -> Option<Level> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parse_level_names() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level(" error "), Some(Level::ERROR));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("livecap_capture".into(), Level::DEBUG)],
            json: false,
        };
        assert_eq!(config.filter_directives(), "warn,livecap_capture=debug");
    }

    #[test]
    fn from_settings_skips_bad_levels() {
        let mut module_levels = BTreeMap::new();
        let _ = module_levels.insert("livecap_protocol".to_string(), "trace".to_string());
        let _ = module_levels.insert("livecap_core".to_string(), "chatty".to_string());
        let settings = LoggingSettings {
            level: "nonsense".into(),
            json: true,
            module_levels,
        };
        let config = TelemetryConfig::from_settings(&settings);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.json);
        assert_eq!(
            config.module_levels,
            vec![("livecap_protocol".to_string(), Level::TRACE)]
        );
    }

    #[test]
    fn second_init_does_not_panic() {
        let _first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig::default());
        assert!(!second.installed());
        assert_eq!(second.directives(), "info");
    }
}
