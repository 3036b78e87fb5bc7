//! OpenWeatherMap handler.
//!
//! Takes `lat` and `lng` (or `lon`), optional `units` and `api` (`onecall`,
//! the default, or `weather`).

use std::str::FromStr;
use std::time::Duration;

use crate::cache::CachedClient;
use crate::envelope::{QueryEnvelope, ResponseEnvelope};
use crate::error::ParamError;
use crate::upstream::HttpTransport;

use super::{HandleQuery, HandlerOptions, Service, encode_query, endpoint, upstream_envelope};

/// OpenWeatherMap's published sample key, used when none is configured.
pub const DEFAULT_API_KEY: &str = "b6907d289e10d714a6e88b30761fae22";

/// Weather data is refreshed every three minutes at most.
pub const DEFAULT_TTL: Duration = Duration::from_secs(180);

const API_ORIGIN: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenWeatherMapApi {
    #[default]
    OneCall,
    Weather,
}

impl OpenWeatherMapApi {
    const fn path(self) -> &'static str {
        match self {
            Self::OneCall => "/data/2.5/onecall",
            Self::Weather => "/data/2.5/weather",
        }
    }
}

impl FromStr for OpenWeatherMapApi {
    type Err = ParamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "onecall" => Ok(Self::OneCall),
            "weather" => Ok(Self::Weather),
            other => Err(ParamError::UnknownApi(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
            Self::Standard => "standard",
        }
    }
}

impl FromStr for Units {
    type Err = ParamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            "standard" => Ok(Self::Standard),
            other => Err(ParamError::invalid("units", format!("unsupported units {other:?}"))),
        }
    }
}

fn checked(name: &str, value: Option<f64>, bound: f64) -> Result<f64, ParamError> {
    let value = value.ok_or_else(|| ParamError::missing(name))?;
    if !(-bound..=bound).contains(&value) {
        return Err(ParamError::invalid(name, format!("{value} is out of range")));
    }
    Ok(value)
}

pub struct OpenWeatherMap<T> {
    client: CachedClient<T>,
    api_key: String,
    base_url: Option<String>,
    ttl: Duration,
}

impl<T: HttpTransport> OpenWeatherMap<T> {
    pub fn new(client: CachedClient<T>, options: HandlerOptions) -> Self {
        Self {
            client,
            api_key: options
                .api_key
                .unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            base_url: options.base_url,
            ttl: options.cache_ttl.unwrap_or(DEFAULT_TTL),
        }
    }

    /// Request URL for a validated query.
    pub fn build_url(&self, api: OpenWeatherMapApi, lat: f64, lng: f64, units: Units) -> String {
        let url = endpoint(self.base_url.as_deref(), API_ORIGIN, api.path());
        let (lat, lng) = (lat.to_string(), lng.to_string());
        let query = encode_query([
            ("lat", lat.as_str()),
            ("lon", lng.as_str()),
            ("units", units.as_str()),
            ("appid", self.api_key.as_str()),
        ]);
        format!("{url}?{query}")
    }

    async fn resolve(&self, params: &QueryEnvelope) -> Result<ResponseEnvelope, ParamError> {
        let api = match params.non_empty_str("api")? {
            Some(name) => name.parse::<OpenWeatherMapApi>()?,
            None => OpenWeatherMapApi::default(),
        };
        let lat = checked("lat", params.coordinate("lat")?, 90.0)?;
        let lng = match params.coordinate("lng")? {
            Some(lng) => Some(lng),
            None => params.coordinate("lon")?,
        };
        let lng = checked("lng", lng, 180.0)?;
        let units = match params.non_empty_str("units")? {
            Some(units) => units.parse::<Units>()?,
            None => Units::default(),
        };

        let url = self.build_url(api, lat, lng, units);
        Ok(upstream_envelope(
            Service::OpenWeatherMap,
            self.client.get(&url, self.ttl).await,
        ))
    }
}

impl<T: HttpTransport> HandleQuery for OpenWeatherMap<T> {
    async fn handle_query(&self, params: &QueryEnvelope) -> ResponseEnvelope {
        self.resolve(params).await.unwrap_or_else(ResponseEnvelope::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::upstream::UpstreamResponse;
    use crate::upstream::transport::tests::MockTransport;
    use serde_json::{Value, json};

    fn params(value: Value) -> QueryEnvelope {
        serde_json::from_value(value).unwrap()
    }

    async fn handler() -> (OpenWeatherMap<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        transport
            .set_default_response(UpstreamResponse::new(
                200,
                r#"{"current":{"temp":12.3}}"#,
                Some("application/json; charset=utf-8"),
            ))
            .await;
        let handler = OpenWeatherMap::new(
            CachedClient::new(transport.clone(), CacheSettings::default()),
            HandlerOptions {
                api_key: Some("KEY".into()),
                ..Default::default()
            },
        );
        (handler, transport)
    }

    #[tokio::test]
    async fn should_query_onecall_with_requested_units() {
        let (handler, transport) = handler().await;

        let response = handler
            .handle_query(&params(json!({"lat": "47.6769", "lng": "-122.2060", "units": "imperial"})))
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.encoding.as_deref(), Some("utf-8"));
        assert_eq!(
            transport.last_request().await.unwrap().url(),
            "https://api.openweathermap.org/data/2.5/onecall?lat=47.6769&lon=-122.206&units=imperial&appid=KEY"
        );
    }

    #[tokio::test]
    async fn should_default_to_metric_and_accept_lon_alias() {
        let (handler, transport) = handler().await;

        let response = handler
            .handle_query(&params(json!({"api": "weather", "lat": 47.5, "lon": -122.25})))
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(
            transport.last_request().await.unwrap().url(),
            "https://api.openweathermap.org/data/2.5/weather?lat=47.5&lon=-122.25&units=metric&appid=KEY"
        );
    }

    #[tokio::test]
    async fn should_fall_back_to_sample_key() {
        let transport = MockTransport::new();
        let handler = OpenWeatherMap::new(
            CachedClient::new(transport.clone(), CacheSettings::default()),
            HandlerOptions::default(),
        );

        handler
            .handle_query(&params(json!({"lat": "47.6769", "lng": "-122.2060", "units": "imperial"})))
            .await;

        assert_eq!(
            transport.last_request().await.unwrap().url(),
            format!(
                "https://api.openweathermap.org/data/2.5/onecall?lat=47.6769&lon=-122.206&units=imperial&appid={DEFAULT_API_KEY}"
            )
        );
    }

    #[tokio::test]
    async fn should_serve_repeated_queries_from_cache() {
        let (handler, transport) = handler().await;
        let query = params(json!({"lat": "47.4797", "lng": "-122.2079"}));

        let first = handler.handle_query(&query).await;
        let second = handler.handle_query(&query).await;

        assert_eq!(first, second);
        assert_eq!(transport.execute_count(), 1);
    }

    #[tokio::test]
    async fn should_reject_invalid_coordinates() {
        let (handler, transport) = handler().await;

        for query in [
            json!({}),
            json!({"lat": "a", "lng": "b"}),
            json!({"lat": 95.0, "lng": 10.0}),
            json!({"lat": 10.0, "lng": 200.0}),
            json!({"lat": 10.0, "lng": 10.0, "units": "kelvin"}),
        ] {
            let response = handler.handle_query(&params(query.clone())).await;
            assert_eq!(response.status_code, -1, "{query}");
        }
        assert_eq!(transport.execute_count(), 0);
    }
}
