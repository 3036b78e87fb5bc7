//! Wolfram|Alpha handler.
//!
//! Queries accept `query` (mandatory), `api` (`simple`, `short`, `spoken`,
//! `full`, `recognize`, `conversation`; `short` when omitted), `units`
//! (`metric`, anything else is `nonmetric`), `lat`+`lng` or `ip` for
//! geolocation.

use std::str::FromStr;
use std::time::Duration;

use crate::cache::CachedClient;
use crate::envelope::{QueryEnvelope, ResponseEnvelope};
use crate::error::ParamError;
use crate::upstream::HttpTransport;

use super::{HandleQuery, HandlerOptions, Service, encode_query, endpoint, upstream_envelope};

/// Key used when none is configured. Wolfram only honors it for sample inputs.
pub const DEFAULT_API_KEY: &str = "DEMO";

/// Default freshness window for answers.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

const API_ORIGIN: &str = "http://api.wolframalpha.com";
const RECOGNIZER_ORIGIN: &str = "http://www.wolframalpha.com";

/// Wolfram|Alpha endpoint variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WolframApi {
    Simple,
    #[default]
    Short,
    Spoken,
    Full,
    Recognize,
    Conversation,
}

impl WolframApi {
    const fn origin(self) -> &'static str {
        match self {
            Self::Recognize => RECOGNIZER_ORIGIN,
            _ => API_ORIGIN,
        }
    }

    const fn path(self) -> &'static str {
        match self {
            Self::Simple => "/v2/simple",
            Self::Short => "/v2/result",
            Self::Spoken => "/v2/spoken",
            Self::Full => "/v2/query",
            Self::Recognize => "/queryrecognizer/query.jsp",
            Self::Conversation => "/v1/conversation.jsp",
        }
    }
}

impl FromStr for WolframApi {
    type Err = ParamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "simple" => Ok(Self::Simple),
            "short" => Ok(Self::Short),
            "spoken" => Ok(Self::Spoken),
            "full" => Ok(Self::Full),
            "recognize" => Ok(Self::Recognize),
            "conversation" => Ok(Self::Conversation),
            other => Err(ParamError::UnknownApi(other.to_string())),
        }
    }
}

/// Build the form-encoded parameters of a query.
///
/// Coordinates win over `ip` when both halves are present.
pub fn build_query_string(params: &QueryEnvelope) -> Result<String, ParamError> {
    let query = params.require_str("query")?;
    let units = match params.str_param("units")? {
        Some("metric") => "metric",
        _ => "nonmetric",
    };

    let latlong = match (params.text_param("lat")?, params.text_param("lng")?) {
        (Some(lat), Some(lng)) => Some(format!("{lat},{lng}")),
        _ => None,
    };

    let mut pairs = vec![("i", query), ("units", units)];
    match latlong.as_deref() {
        Some(latlong) => pairs.push(("latlong", latlong)),
        None => pairs.push(("ip", params.str_param("ip")?.unwrap_or_default())),
    }

    Ok(encode_query(pairs))
}

pub struct WolframAlpha<T> {
    client: CachedClient<T>,
    api_key: String,
    base_url: Option<String>,
    ttl: Duration,
}

impl<T: HttpTransport> WolframAlpha<T> {
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

    /// Full request URL for `api` with an encoded query string.
    pub fn build_query_url(&self, api: WolframApi, query_string: &str) -> String {
        let url = endpoint(self.base_url.as_deref(), api.origin(), api.path());
        let mode = match api {
            WolframApi::Recognize => "Default",
            _ => "",
        };
        let query = [
            encode_query([("appid", self.api_key.as_str())]),
            query_string.to_string(),
            encode_query([("mode", mode)]),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("&");
        format!("{url}?{query}")
    }

    /// Fetch `url` through the cache and wrap the result.
    pub async fn query_api(&self, url: &str) -> ResponseEnvelope {
        upstream_envelope(Service::WolframAlpha, self.client.get(url, self.ttl).await)
    }

    async fn resolve(&self, params: &QueryEnvelope) -> Result<ResponseEnvelope, ParamError> {
        let api = match params.non_empty_str("api")? {
            Some(name) => name.parse::<WolframApi>()?,
            None => WolframApi::default(),
        };
        let query_string = build_query_string(params)?;
        Ok(self.query_api(&self.build_query_url(api, &query_string)).await)
    }
}

impl<T: HttpTransport> HandleQuery for WolframAlpha<T> {
    async fn handle_query(&self, params: &QueryEnvelope) -> ResponseEnvelope {
        self.resolve(params).await.unwrap_or_else(ResponseEnvelope::from)
    }
}
