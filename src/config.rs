use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{FilterError, Result};

#[derive(Default, Clone, Debug)]
pub struct Config {
    pub env: EnvConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    #[serde(default = "default_descriptor_sets")]
    pub descriptor_sets: Vec<String>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    #[serde(default = "default_request_message_type")]
    pub request_message_type: String,
    #[serde(default = "default_response_message_type")]
    pub response_message_type: String,
    pub rules_file: Option<String>,
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            grpc_addr: default_grpc_addr(),
            descriptor_sets: default_descriptor_sets(),
            tls_cert: None,
            tls_key: None,
            request_message_type: default_request_message_type(),
            response_message_type: default_response_message_type(),
            rules_file: None,
            debug: default_debug(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_grpc_addr() -> String {
    "0.0.0.0:18080".to_string()
}

fn default_descriptor_sets() -> Vec<String> {
    vec!["proto/echo.proto.pb".to_string()]
}

fn default_request_message_type() -> String {
    "echo.EchoRequest".to_string()
}

fn default_response_message_type() -> String {
    "echo.EchoReply".to_string()
}

fn default_debug() -> bool {
    false
}

fn default_stream_buffer() -> usize {
    32
}

impl EnvConfig {
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or empty keys take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let grpc_addr = get("GRPC_ADDR").unwrap_or_else(default_grpc_addr);
        let descriptor_sets = get("DESCRIPTOR_SETS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(default_descriptor_sets);
        let tls_cert = get("TLS_CERT");
        let tls_key = get("TLS_KEY");
        let request_message_type =
            get("REQUEST_MESSAGE_TYPE").unwrap_or_else(default_request_message_type);
        let response_message_type =
            get("RESPONSE_MESSAGE_TYPE").unwrap_or_else(default_response_message_type);
        let rules_file = get("RULES_FILE");
        let debug = get("DEBUG").map_or_else(default_debug, |v| v.eq_ignore_ascii_case("true"));
        let stream_buffer = match get("STREAM_BUFFER") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| FilterError::Config(format!("STREAM_BUFFER is not a number: {}", v)))?,
            None => default_stream_buffer(),
        };

        let config = EnvConfig {
            grpc_addr,
            descriptor_sets,
            tls_cert,
            tls_key,
            request_message_type,
            response_message_type,
            rules_file,
            debug,
            stream_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(FilterError::Config(
                "TLS_CERT and TLS_KEY must be set together".to_string(),
            ));
        }
        if self.descriptor_sets.is_empty() {
            return Err(FilterError::Config(
                "DESCRIPTOR_SETS names no descriptor files".to_string(),
            ));
        }
        Ok(())
    }

    /// Certificate and key paths when TLS is enabled.
    pub fn tls(&self) -> Option<(&str, &str)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Result<EnvConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config, EnvConfig::default());
        assert_eq!(config.grpc_addr, "0.0.0.0:18080");
        assert_eq!(config.request_message_type, "echo.EchoRequest");
        assert!(config.tls().is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = from_map(&[
            ("GRPC_ADDR", "127.0.0.1:9000"),
            ("DESCRIPTOR_SETS", "a.pb, b.pb,"),
            ("TLS_CERT", "server.crt"),
            ("TLS_KEY", "server.key"),
            ("DEBUG", "TRUE"),
            ("STREAM_BUFFER", "4"),
            ("RULES_FILE", "rules.json"),
        ])
        .unwrap();
        assert_eq!(config.grpc_addr, "127.0.0.1:9000");
        assert_eq!(config.descriptor_sets, vec!["a.pb", "b.pb"]);
        assert_eq!(config.tls(), Some(("server.crt", "server.key")));
        assert!(config.debug);
        assert_eq!(config.stream_buffer, 4);
        assert_eq!(config.rules_file.as_deref(), Some("rules.json"));
    }

    #[test]
    fn debug_flag_comes_from_the_lookup() {
        assert!(from_map(&[("DEBUG", "true")]).unwrap().debug);
        assert!(!from_map(&[("DEBUG", "false")]).unwrap().debug);
        assert!(!from_map(&[("DEBUG", "1")]).unwrap().debug);
        assert!(!from_map(&[("DEBUG", " ")]).unwrap().debug);
    }

    #[test]
    fn half_configured_tls_is_rejected() {
        assert!(matches!(
            from_map(&[("TLS_CERT", "server.crt")]),
            Err(FilterError::Config(_))
        ));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(matches!(
            from_map(&[("STREAM_BUFFER", "lots")]),
            Err(FilterError::Config(_))
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: EnvConfig = serde_json::from_str(r#"{"debug": true}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.descriptor_sets, default_descriptor_sets());
        assert_eq!(config.stream_buffer, 32);
    }
}
