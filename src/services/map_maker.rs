//! Geocoding through geocode.maps.co.
//!
//! `address` triggers a forward lookup, `lat` and `lon` a reverse one. The
//! optional `lang_code` is sent as `Accept-Language`.

use std::time::Duration;

use crate::cache::CachedClient;
use crate::envelope::{QueryEnvelope, ResponseEnvelope};
use crate::error::ParamError;
use crate::upstream::{HttpTransport, UpstreamRequest};

use super::{HandleQuery, HandlerOptions, Service, encode_query, endpoint, upstream_envelope};

/// Places do not move; keep lookups for a day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const API_ORIGIN: &str = "https://geocode.maps.co";

/// A validated geocoding lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    Address(&'a str),
    Coordinates { lat: f64, lon: f64 },
}

impl<'a> Lookup<'a> {
    /// Pick the lookup kind from query parameters.
    pub fn from_params(params: &'a QueryEnvelope) -> Result<Self, ParamError> {
        if params.get("address").is_some() {
            return params.require_str("address").map(Self::Address);
        }

        match (params.coordinate("lat")?, params.coordinate("lon")?) {
            (Some(lat), Some(lon)) => Ok(Self::Coordinates { lat, lon }),
            (Some(_), None) => Err(ParamError::missing("lon")),
            (None, Some(_)) => Err(ParamError::missing("lat")),
            (None, None) => Err(ParamError::missing("address")),
        }
    }
}

pub struct MapMaker<T> {
    client: CachedClient<T>,
    api_key: String,
    base_url: Option<String>,
    ttl: Duration,
}

impl<T: HttpTransport> MapMaker<T> {
    pub fn new(client: CachedClient<T>, options: HandlerOptions) -> Self {
        Self {
            client,
            api_key: options.api_key.unwrap_or_default(),
            base_url: options.base_url,
            ttl: options.cache_ttl.unwrap_or(DEFAULT_TTL),
        }
    }

    /// Request URL for `lookup`. The key is omitted when not configured.
    pub fn build_url(&self, lookup: &Lookup<'_>) -> String {
        let key = self.api_key.as_str();
        let (path, query) = match lookup {
            Lookup::Address(address) => ("/search", encode_query([("q", *address), ("api_key", key)])),
            Lookup::Coordinates { lat, lon } => {
                let (lat, lon) = (lat.to_string(), lon.to_string());
                (
                    "/reverse",
                    encode_query([("lat", lat.as_str()), ("lon", lon.as_str()), ("api_key", key)]),
                )
            }
        };
        let url = endpoint(self.base_url.as_deref(), API_ORIGIN, path);
        format!("{url}?{query}")
    }

    async fn resolve(&self, params: &QueryEnvelope) -> Result<ResponseEnvelope, ParamError> {
        let lookup = Lookup::from_params(params)?;
        let mut request = UpstreamRequest::get(self.build_url(&lookup));
        if let Some(lang) = params.non_empty_str("lang_code")? {
            request = request.with_header("accept-language", lang);
        }

        Ok(upstream_envelope(
            Service::MapMaker,
            self.client.fetch(request, self.ttl).await,
        ))
    }
}

impl<T: HttpTransport> HandleQuery for MapMaker<T> {
    async fn handle_query(&self, params: &QueryEnvelope) -> ResponseEnvelope {
        self.resolve(params).await.unwrap_or_else(ResponseEnvelope::from)
    }
}
