//! # Coordinator Configuration
//!
//! Built once at startup and passed by value into each component. Nothing
//! in the core reads the environment on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{CoordinatorError, CoordinatorResult, DEFAULT_MAX_DELIVERY_COUNT};

/// Environment variable holding the namespace connection string.
pub const ENV_CONNECTION_STRING: &str = "SERVICEBUS_CONNECTION_STRING";
/// Environment variable overriding the tap subscription name.
pub const ENV_TAP_SUBSCRIPTION: &str = "SERVICEBUS_TAP_SUBSCRIPTION";
/// Environment variable overriding the administrative call timeout.
pub const ENV_OPERATION_TIMEOUT: &str = "SERVICEBUS_OPERATION_TIMEOUT_SECS";
/// Environment variable overriding the shutdown drain timeout.
pub const ENV_DRAIN_TIMEOUT: &str = "SERVICEBUS_DRAIN_TIMEOUT_SECS";

/// Complete coordinator configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Namespace credential, `Endpoint=sb://...;SharedAccessKey...`.
    pub connection_string: String,
    /// Name used for auto-created tap subscriptions.
    pub tap_subscription: String,
    /// Upper bound for each administrative broker call.
    pub operation_timeout_secs: u64,
    /// Upper bound for the shutdown wait over all listeners.
    pub drain_timeout_secs: u64,
    /// Max delivery count for entities created without one.
    pub max_delivery_count: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            tap_subscription: "tap".to_string(),
            operation_timeout_secs: 40,
            drain_timeout_secs: 40,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
        }
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("connection_string", &"<redacted>")
            .field("tap_subscription", &self.tap_subscription)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .field("max_delivery_count", &self.max_delivery_count)
            .finish()
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by the `SERVICEBUS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_CONNECTION_STRING) {
            config.connection_string = value;
        }
        if let Ok(value) = std::env::var(ENV_TAP_SUBSCRIPTION) {
            if !value.trim().is_empty() {
                config.tap_subscription = value.trim().to_string();
            }
        }
        if let Ok(value) = std::env::var(ENV_OPERATION_TIMEOUT) {
            match value.parse() {
                Ok(secs) => config.operation_timeout_secs = secs,
                Err(_) => warn!("{} must be a whole number of seconds", ENV_OPERATION_TIMEOUT),
            }
        }
        if let Ok(value) = std::env::var(ENV_DRAIN_TIMEOUT) {
            match value.parse() {
                Ok(secs) => config.drain_timeout_secs = secs,
                Err(_) => warn!("{} must be a whole number of seconds", ENV_DRAIN_TIMEOUT),
            }
        }

        info!(tap = %config.tap_subscription, "Loaded coordinator configuration");
        config
    }

    #[must_use]
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    /// Validate before any component is built.
    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.connection_string.trim().is_empty() {
            return Err(CoordinatorError::Config(format!(
                "connection string is missing, set {ENV_CONNECTION_STRING}"
            )));
        }
        if self.tap_subscription.trim().is_empty() {
            return Err(CoordinatorError::Config(
                "tap subscription name cannot be empty".into(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(CoordinatorError::Config(
                "operation timeout cannot be 0".into(),
            ));
        }
        if self.drain_timeout_secs == 0 {
            return Err(CoordinatorError::Config("drain timeout cannot be 0".into()));
        }
        if self.max_delivery_count == 0 {
            return Err(CoordinatorError::Config(
                "max delivery count cannot be 0".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Parsed namespace connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// `sb://host/` endpoint, normalised without the trailing slash.
    pub endpoint: String,
    /// First label of the endpoint host.
    pub namespace: String,
    pub key_name: Option<String>,
    pub key: Option<String>,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Keys are case-insensitive.
    pub fn parse(raw: &str) -> CoordinatorResult<Self> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = pair.split_once('=') else {
                return Err(CoordinatorError::Connection(format!(
                    "malformed connection string segment `{}`",
                    redact_segment(pair)
                )));
            };
            let value = value.trim().to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "entitypath" => entity_path = Some(value),
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            CoordinatorError::Connection("connection string has no Endpoint".into())
        })?;
        let host = endpoint
            .strip_prefix("sb://")
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                CoordinatorError::Connection(format!(
                    "endpoint `{endpoint}` must look like sb://<namespace>/"
                ))
            })?;
        let namespace = host.split('.').next().unwrap_or(host).to_string();

        Ok(Self {
            endpoint: format!("sb://{host}"),
            namespace,
            key_name,
            key,
            entity_path,
        })
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("key_name", &self.key_name)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

fn redact_segment(segment: &str) -> &str {
    if segment.to_ascii_lowercase().starts_with("sharedaccesskey") {
        "SharedAccessKey..."
    } else {
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "Endpoint=sb://contoso.servicebus.windows.net/;\
        SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0";

    #[test]
    fn test_parse_connection_string() {
        let conn = ConnectionString::parse(RAW).expect("valid");
        assert_eq!(conn.endpoint, "sb://contoso.servicebus.windows.net");
        assert_eq!(conn.namespace, "contoso");
        assert_eq!(conn.key_name.as_deref(), Some("RootManageSharedAccessKey"));
        assert_eq!(conn.key.as_deref(), Some("c2VjcmV0"));
        assert!(conn.entity_path.is_none());
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let conn = ConnectionString::parse("endpoint=sb://local;ENTITYPATH=jobs").expect("valid");
        assert_eq!(conn.namespace, "local");
        assert_eq!(conn.entity_path.as_deref(), Some("jobs"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let conn = ConnectionString::parse(RAW).expect("valid");
        let debug = format!("{conn:?}");
        assert!(!debug.contains("c2VjcmV0"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_missing_or_bad_endpoint() {
        assert!(matches!(
            ConnectionString::parse("SharedAccessKey=abc"),
            Err(CoordinatorError::Connection(_))
        ));
        assert!(matches!(
            ConnectionString::parse("Endpoint=https://contoso"),
            Err(CoordinatorError::Connection(_))
        ));
        assert!(matches!(
            ConnectionString::parse("Endpoint=sb:///"),
            Err(CoordinatorError::Connection(_))
        ));
        assert!(matches!(
            ConnectionString::parse("garbage"),
            Err(CoordinatorError::Connection(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.tap_subscription, "tap");
        assert_eq!(config.operation_timeout(), Duration::from_secs(40));
        assert_eq!(config.max_delivery_count, 10);
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            CoordinatorConfig::default().validate(),
            Err(CoordinatorError::Config(_))
        ));

        let config = CoordinatorConfig::default().with_connection_string(RAW);
        assert!(config.validate().is_ok());

        let config = CoordinatorConfig {
            drain_timeout_secs: 0,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_debug_redacts_connection_string() {
        let config = CoordinatorConfig::default().with_connection_string(RAW);
        assert!(!format!("{config:?}").contains("c2VjcmV0"));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"tap_subscription": "wiretap"}"#).expect("valid");
        assert_eq!(config.tap_subscription, "wiretap");
        assert_eq!(config.drain_timeout_secs, 40);
    }
}
