//! Upstream service handlers.
//!
//! Each provider is a handler implementing [`HandleQuery`]. The set of
//! providers is closed: [`Service`] enumerates them and [`ServiceHandler`]
//! routes a query to the matching implementation without any runtime type
//! lookup. Free-form names from the wire are mapped with [`ServiceName`],
//! which keeps unknown names as an explicit variant.

pub mod alpha_vantage;
pub mod map_maker;
pub mod open_weather_map;
pub mod test_endpoint;
pub mod wolfram_alpha;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CachedClient, CachedResponse};
use crate::envelope::{Content, QueryEnvelope, ResponseEnvelope};
use crate::error::Result;
use crate::upstream::HttpTransport;

pub use alpha_vantage::AlphaVantage;
pub use map_maker::MapMaker;
pub use open_weather_map::OpenWeatherMap;
pub use test_endpoint::TestEndpoint;
pub use wolfram_alpha::WolframAlpha;

/// The providers this proxy knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    WolframAlpha,
    AlphaVantage,
    OpenWeatherMap,
    MapMaker,
    TestEndpoint,
}

impl Service {
    pub const ALL: [Self; 5] = [
        Self::WolframAlpha,
        Self::AlphaVantage,
        Self::OpenWeatherMap,
        Self::MapMaker,
        Self::TestEndpoint,
    ];

    /// Wire name of the service.
    pub const fn name(self) -> &'static str {
        match self {
            Self::WolframAlpha => "wolfram_alpha",
            Self::AlphaVantage => "alpha_vantage",
            Self::OpenWeatherMap => "open_weather_map",
            Self::MapMaker => "map_maker",
            Self::TestEndpoint => "api_test_endpoint",
        }
    }

    /// Environment variable that may hold the service API key.
    pub const fn key_variable(self) -> &'static str {
        match self {
            Self::WolframAlpha => "WOLFRAM_ALPHA_API_KEY",
            Self::AlphaVantage => "ALPHA_VANTAGE_API_KEY",
            Self::OpenWeatherMap => "OPEN_WEATHER_MAP_API_KEY",
            Self::MapMaker => "MAP_MAKER_API_KEY",
            Self::TestEndpoint => "API_TEST_ENDPOINT_API_KEY",
        }
    }

    /// Whether the service talks to an upstream provider.
    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::TestEndpoint)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown service name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service: {0:?}")]
pub struct UnknownService(pub String);

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|service| service.name() == name)
            .ok_or_else(|| UnknownService(name.to_string()))
    }
}

/// A service name as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceName {
    Known(Service),
    /// Anything else, rendered as text (`null` when absent).
    Unrecognized(String),
}

impl ServiceName {
    /// Map the `service` value of a query.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(name)) => name
                .parse::<Service>()
                .map_or_else(|_| Self::Unrecognized(name.clone()), Self::Known),
            Some(other) => Self::Unrecognized(other.to_string()),
            None => Self::Unrecognized("null".to_string()),
        }
    }
}

/// Per-handler settings resolved by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Provider key; the handler falls back to its own default when `None`.
    pub api_key: Option<String>,
    /// Replacement for the provider origin (`scheme://host[:port]`).
    pub base_url: Option<String>,
    /// Replacement for the handler's default freshness window.
    pub cache_ttl: Option<Duration>,
}

/// Trait implemented by every provider handler.
pub trait HandleQuery: Send + Sync {
    /// Answer a query. Never fails: problems become local error envelopes.
    fn handle_query(&self, params: &QueryEnvelope) -> impl Future<Output = ResponseEnvelope> + Send;
}

/// A handler for one of the known services.
pub enum ServiceHandler<T> {
    WolframAlpha(WolframAlpha<T>),
    AlphaVantage(AlphaVantage<T>),
    OpenWeatherMap(OpenWeatherMap<T>),
    MapMaker(MapMaker<T>),
    TestEndpoint(TestEndpoint),
}

impl<T: HttpTransport> ServiceHandler<T> {
    /// Build the handler for `service`.
    pub fn build(service: Service, client: CachedClient<T>, options: HandlerOptions) -> Self {
        match service {
            Service::WolframAlpha => Self::WolframAlpha(WolframAlpha::new(client, options)),
            Service::AlphaVantage => Self::AlphaVantage(AlphaVantage::new(client, options)),
            Service::OpenWeatherMap => Self::OpenWeatherMap(OpenWeatherMap::new(client, options)),
            Service::MapMaker => Self::MapMaker(MapMaker::new(client, options)),
            Service::TestEndpoint => Self::TestEndpoint(TestEndpoint),
        }
    }
}

impl<T: HttpTransport> HandleQuery for ServiceHandler<T> {
    async fn handle_query(&self, params: &QueryEnvelope) -> ResponseEnvelope {
        match self {
            Self::WolframAlpha(handler) => handler.handle_query(params).await,
            Self::AlphaVantage(handler) => handler.handle_query(params).await,
            Self::OpenWeatherMap(handler) => handler.handle_query(params).await,
            Self::MapMaker(handler) => handler.handle_query(params).await,
            Self::TestEndpoint(handler) => handler.handle_query(params).await,
        }
    }
}

/// Join an origin and a path, honoring an origin override.
pub(crate) fn endpoint(base_url: Option<&str>, default_origin: &str, path: &str) -> String {
    let origin = base_url.unwrap_or(default_origin).trim_end_matches('/');
    format!("{origin}{path}")
}

/// Form-urlencode `pairs`, skipping empty values.
pub(crate) fn encode_query<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        if !value.is_empty() {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Turn the outcome of an upstream call into an envelope.
///
/// Non-2xx statuses are logged and relayed with their body; transport
/// failures become local errors.
pub(crate) fn upstream_envelope(service: Service, result: Result<CachedResponse>) -> ResponseEnvelope {
    match result {
        Ok(CachedResponse {
            response,
            from_cache,
        }) => {
            if response.is_success() {
                debug!(service = %service, status = response.status, from_cache, "upstream answered");
            } else {
                warn!(service = %service, status = response.status, "upstream query error");
            }
            ResponseEnvelope {
                status_code: i32::from(response.status),
                encoding: response.encoding(),
                content: Content::Bytes(response.body),
            }
        }
        Err(err) => {
            metrics::counter!("apiproxy_upstream_errors_total", "service" => service.name())
                .increment(1);
            warn!(service = %service, error = %err, "upstream request failed");
            ResponseEnvelope::local_error(err.to_string())
        }
    }
}
