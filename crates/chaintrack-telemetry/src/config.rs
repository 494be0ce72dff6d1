//! Telemetry configuration from environment variables.

use std::env;

use serde::Deserialize;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name stamped on log lines
    pub service_name: String,

    /// Log filter directive (trace, debug, info, warn, error, or full
    /// `EnvFilter` syntax)
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// Whether to format logs as JSON instead of human-readable lines
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "chaintrack".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CT_SERVICE_NAME`: Service name (default: chaintrack)
    /// - `CT_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `CT_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `CT_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();
        let defaults = Self::default();

        Self {
            service_name: lookup("CT_SERVICE_NAME").unwrap_or(defaults.service_name),

            log_level: lookup("CT_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            console_output: lookup("CT_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.console_output),

            json_logs: lookup("CT_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "chaintrack");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("CT_SERVICE_NAME", "dashboard"),
            ("RUST_LOG", "debug"),
            ("CT_CONSOLE_OUTPUT", "0"),
            ("CT_JSON_LOGS", "TRUE"),
        ]));
        assert_eq!(config.service_name, "dashboard");
        assert_eq!(config.log_level, "debug");
        assert!(!config.console_output);
        assert!(config.json_logs);
    }

    #[test]
    fn test_ct_log_level_wins_over_rust_log() {
        let config =
            TelemetryConfig::from_lookup(lookup(&[("CT_LOG_LEVEL", "warn"), ("RUST_LOG", "trace")]));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_partial_file_config_keeps_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{"log_level": "chaintrack=debug", "json_logs": true}"#).unwrap();
        assert_eq!(config.log_level, "chaintrack=debug");
        assert!(config.json_logs);
        assert_eq!(config.service_name, "chaintrack");
        assert!(config.console_output);

        let empty: TelemetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, TelemetryConfig::default());
    }

    #[test]
    fn test_container_defaults_to_json() {
        let config = TelemetryConfig::from_lookup(lookup(&[("DOCKER_CONTAINER", "1")]));
        assert!(config.json_logs);
    }
}
