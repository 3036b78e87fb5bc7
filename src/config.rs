//! Configuration loading and validation.
//!
//! The file is JSON unless its extension is `.toml`. Sections other than the
//! ones below are ignored so the proxy can share a file with other tools.
//!
//! ```json
//! {
//!   "SERVICES": {
//!     "wolfram_alpha": {"api_key": "XXXX"},
//!     "open_weather_map": {"api_key": "YYYY", "cache_ttl_seconds": 60}
//!   },
//!   "server": {"max_payload_bytes": 1048576}
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheSettings;
use crate::cache::response_cache::DEFAULT_MAX_CAPACITY;
use crate::dispatch::{ApiKeyProvider, ServiceSettings};
use crate::error::{ConfigError, Result, ValidationError};
use crate::protocol::MAX_PAYLOAD_SIZE;
use crate::server::ServerSettings;
use crate::services::Service;
use crate::upstream::transport::DEFAULT_TIMEOUT_SECS;

/// Main configuration for the API proxy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Per-service settings keyed by wire name.
    #[serde(default, alias = "SERVICES")]
    pub services: BTreeMap<String, ServiceConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Settings for one upstream service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub api_key: Option<String>,

    /// Replaces the handler's freshness window for every endpoint.
    pub cache_ttl_seconds: Option<u64>,

    /// Replaces the provider origin, e.g. for a mirror.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of cached responses.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Network timeout for each upstream request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Largest accepted inbound message.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Time allowed for a client to send its whole message.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen", deserialize_with = "deserialize_socket_addr")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

const fn default_max_capacity() -> u64 {
    DEFAULT_MAX_CAPACITY
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_max_payload_bytes() -> usize {
    MAX_PAYLOAD_SIZE
}

const fn default_read_timeout_secs() -> u64 {
    30
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl Config {
    /// Load configuration from a JSON or TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::parse_toml(&content)
        } else {
            Self::parse_json(&content)
        }
    }

    pub fn parse_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(ConfigError::ParseJson)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::ParseToml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.cache.max_capacity == 0 {
            return Err(ValidationError::ZeroCacheCapacity.into());
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ValidationError::ZeroUpstreamTimeout.into());
        }
        if self.server.max_payload_bytes == 0 {
            return Err(ValidationError::ZeroPayloadLimit.into());
        }
        if self.server.read_timeout_secs == 0 {
            return Err(ValidationError::ZeroReadTimeout.into());
        }

        for (name, service) in &self.services {
            if name.parse::<Service>().is_err() {
                return Err(ValidationError::UnknownService { name: name.clone() }.into());
            }
            if service.cache_ttl_seconds == Some(0) {
                return Err(ValidationError::ZeroServiceTtl { name: name.clone() }.into());
            }
            if let Some(url) = &service.base_url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(ValidationError::InvalidBaseUrl {
                    name: name.clone(),
                    url: url.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Fill in keys missing from the file from `<SERVICE>_API_KEY` variables.
    ///
    /// `lookup` resolves a variable name; pass `|name| std::env::var(name).ok()`
    /// to read the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for service in Service::ALL {
            if self.api_key_for(service).is_some() {
                continue;
            }
            if let Some(key) = lookup(service.key_variable()).filter(|key| !key.is_empty()) {
                self.services
                    .entry(service.name().to_string())
                    .or_default()
                    .api_key = Some(key);
            }
        }
    }

    pub fn service(&self, service: Service) -> Option<&ServiceConfig> {
        self.services.get(service.name())
    }

    fn api_key_for(&self, service: Service) -> Option<&str> {
        self.service(service)?
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
    }

    /// Handler overrides for every configured service.
    pub fn service_settings(&self) -> HashMap<Service, ServiceSettings> {
        self.services
            .iter()
            .filter_map(|(name, config)| {
                let service = name.parse::<Service>().ok()?;
                let settings = ServiceSettings {
                    base_url: config.base_url.clone(),
                    cache_ttl: config.cache_ttl_seconds.map(Duration::from_secs),
                };
                Some((service, settings))
            })
            .collect()
    }

    pub const fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_capacity: self.cache.max_capacity,
        }
    }

    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    pub const fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            max_payload_bytes: self.server.max_payload_bytes,
            read_timeout: Duration::from_secs(self.server.read_timeout_secs),
        }
    }
}

impl ApiKeyProvider for Config {
    fn get_api_key(&self, service: Service) -> Option<String> {
        self.api_key_for(service).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    fn validation_error(result: Result<Config>) -> ValidationError {
        match result {
            Err(Error::Config(ConfigError::Validation(err))) => err,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn should_parse_legacy_services_section() {
        let json = r#"{
            "SERVICES": {
                "wolfram_alpha": {"api_key": "WA"},
                "alpha_vantage": {"api_key": "AV", "cache_ttl_seconds": 60}
            },
            "MQ": {"server": "mq.example.com"}
        }"#;

        let config = Config::parse_json(json).unwrap();

        assert_eq!(config.get_api_key(Service::WolframAlpha).as_deref(), Some("WA"));
        assert_eq!(config.get_api_key(Service::MapMaker), None);
        let settings = config.service_settings();
        assert_eq!(
            settings[&Service::AlphaVantage].cache_ttl,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn should_apply_defaults() {
        let config = Config::parse_json("{}").unwrap();

        assert!(config.services.is_empty());
        assert_eq!(config.cache.max_capacity, DEFAULT_MAX_CAPACITY);
        assert_eq!(config.upstream_timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.server.max_payload_bytes, MAX_PAYLOAD_SIZE);
        assert_eq!(config.server_settings().read_timeout, Duration::from_secs(30));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn should_parse_toml() {
        let toml = r#"
            [services.open_weather_map]
            api_key = "OWM"
            base_url = "http://127.0.0.1:8080"

            [cache]
            max_capacity = 100

            [metrics]
            enabled = true
            listen = "0.0.0.0:9100"
        "#;

        let config = Config::parse_toml(toml).unwrap();

        assert_eq!(config.get_api_key(Service::OpenWeatherMap).as_deref(), Some("OWM"));
        assert_eq!(config.cache_settings().max_capacity, 100);
        assert_eq!(config.metrics.listen.port(), 9100);
        assert_eq!(
            config.service_settings()[&Service::OpenWeatherMap].base_url.as_deref(),
            Some("http://127.0.0.1:8080")
        );
    }

    #[test]
    fn should_reject_zero_values() {
        assert_eq!(
            validation_error(Config::parse_json(r#"{"cache": {"max_capacity": 0}}"#)),
            ValidationError::ZeroCacheCapacity
        );
        assert_eq!(
            validation_error(Config::parse_json(r#"{"upstream": {"timeout_secs": 0}}"#)),
            ValidationError::ZeroUpstreamTimeout
        );
        assert_eq!(
            validation_error(Config::parse_json(r#"{"server": {"max_payload_bytes": 0}}"#)),
            ValidationError::ZeroPayloadLimit
        );
        assert_eq!(
            validation_error(Config::parse_json(
                r#"{"services": {"map_maker": {"cache_ttl_seconds": 0}}}"#
            )),
            ValidationError::ZeroServiceTtl {
                name: "map_maker".into()
            }
        );
    }

    #[test]
    fn should_reject_unknown_services_and_bad_urls() {
        assert_eq!(
            validation_error(Config::parse_json(r#"{"services": {"bogus": {}}}"#)),
            ValidationError::UnknownService {
                name: "bogus".into()
            }
        );
        assert!(matches!(
            validation_error(Config::parse_json(
                r#"{"services": {"wolfram_alpha": {"base_url": "ftp://x"}}}"#
            )),
            ValidationError::InvalidBaseUrl { .. }
        ));
    }

    #[test]
    fn should_reject_unknown_fields_in_owned_sections() {
        assert!(Config::parse_json(r#"{"server": {"port": 1}}"#).is_err());
        assert!(Config::parse_json(r#"{"services": {"map_maker": {"key": "x"}}}"#).is_err());
    }

    #[test]
    fn should_take_missing_keys_from_environment() {
        let mut config =
            Config::parse_json(r#"{"services": {"wolfram_alpha": {"api_key": "FILE"}}}"#).unwrap();

        config.apply_env_overrides(|name| match name {
            "WOLFRAM_ALPHA_API_KEY" => Some("ENV".into()),
            "OPEN_WEATHER_MAP_API_KEY" => Some("OWM".into()),
            "MAP_MAKER_API_KEY" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.get_api_key(Service::WolframAlpha).as_deref(), Some("FILE"));
        assert_eq!(config.get_api_key(Service::OpenWeatherMap).as_deref(), Some("OWM"));
        assert_eq!(config.get_api_key(Service::MapMaker), None);
    }

    #[test]
    fn should_load_by_extension() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"{{"SERVICES": {{"map_maker": {{"api_key": "MM"}}}}}}"#).unwrap();
        let config = Config::load(json.path()).unwrap();
        assert_eq!(config.get_api_key(Service::MapMaker).as_deref(), Some("MM"));

        let mut toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(toml, "[upstream]\ntimeout_secs = 5").unwrap();
        let config = Config::load(toml.path()).unwrap();
        assert_eq!(config.upstream_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn should_report_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("absent.json"));
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::ReadFile(_)))
        ));
    }
}
