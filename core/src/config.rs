//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::Headers;

/// Tunables for a `Networking` client.
///
/// Deserializable so test harnesses can load it from a JSON fixture; every
/// field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkingConfig {
    /// Overall deadline for one live request, in seconds.
    pub request_timeout_secs: u64,
    /// How long a synchronous dispatch waits before giving up, in seconds.
    pub synchronous_timeout_secs: u64,
    pub user_agent: String,
    /// Extra headers sent with every live request.
    pub header_fields: Vec<(String, String)>,
    /// Log failed requests at `warn` level.
    pub error_logging: bool,
}

impl NetworkingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn synchronous_timeout(&self) -> Duration {
        Duration::from_secs(self.synchronous_timeout_secs)
    }

    pub fn header_fields(&self) -> Headers {
        self.header_fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            synchronous_timeout_secs: 150,
            user_agent: concat!("networking-core/", env!("CARGO_PKG_VERSION")).to_string(),
            header_fields: Vec::new(),
            error_logging: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: NetworkingConfig =
            serde_json::from_str(r#"{"synchronous_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.synchronous_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert!(config.error_logging);
    }

    #[test]
    fn header_fields_become_headers() {
        let config: NetworkingConfig =
            serde_json::from_str(r#"{"header_fields": [["X-Api-Version", "2"]]}"#).unwrap();
        assert_eq!(config.header_fields().get("x-api-version"), Some("2"));
    }
}
