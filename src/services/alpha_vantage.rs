//! Alpha Vantage stock data handler.
//!
//! `api` is `symbol` (search by `symbol` or `company`) or `quote` (the
//! default). A quote is looked up by `symbol`, or by `company` through a
//! symbol search first.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CachedClient;
use crate::envelope::{QueryEnvelope, ResponseEnvelope};
use crate::error::ParamError;
use crate::upstream::HttpTransport;

use super::{HandleQuery, HandlerOptions, Service, encode_query, endpoint, upstream_envelope};

/// Public key accepted by Alpha Vantage for its documented examples.
pub const DEFAULT_API_KEY: &str = "demo";

/// Quotes move; keep them for three minutes.
pub const QUOTE_TTL: Duration = Duration::from_secs(180);

/// Symbol listings rarely change.
pub const SYMBOL_SEARCH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Listing preferred when a company trades on several markets.
pub const PREFERRED_REGION: &str = "United States";

const API_ORIGIN: &str = "https://www.alphavantage.co";

#[derive(Debug, Deserialize)]
struct SymbolSearch {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

#[derive(Debug, Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "4. region", default)]
    region: Option<String>,
}

/// Symbol of the best match in a SYMBOL_SEARCH answer.
///
/// Listings in [`PREFERRED_REGION`] win, otherwise the first match is taken.
pub fn best_match_symbol(body: &[u8]) -> Option<String> {
    let search: SymbolSearch = serde_json::from_slice(body).ok()?;
    search
        .best_matches
        .iter()
        .find(|candidate| candidate.region.as_deref() == Some(PREFERRED_REGION))
        .or_else(|| search.best_matches.first())
        .map(|candidate| candidate.symbol.clone())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlphaVantageApi {
    Symbol,
    #[default]
    Quote,
}

impl FromStr for AlphaVantageApi {
    type Err = ParamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "symbol" => Ok(Self::Symbol),
            "quote" => Ok(Self::Quote),
            other => Err(ParamError::UnknownApi(other.to_string())),
        }
    }
}

/// The term to search for: `symbol`, falling back to `company`.
pub fn search_term(params: &QueryEnvelope) -> Result<Option<&str>, ParamError> {
    match params.non_empty_str("symbol")? {
        Some(symbol) => Ok(Some(symbol)),
        None => params.non_empty_str("company"),
    }
}

pub struct AlphaVantage<T> {
    client: CachedClient<T>,
    api_key: String,
    base_url: Option<String>,
    ttl_override: Option<Duration>,
}

impl<T: HttpTransport> AlphaVantage<T> {
    pub fn new(client: CachedClient<T>, options: HandlerOptions) -> Self {
        Self {
            client,
            api_key: options
                .api_key
                .unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            base_url: options.base_url,
            ttl_override: options.cache_ttl,
        }
    }

    fn query_url(&self, function: &str, key: &str, value: &str) -> String {
        let url = endpoint(self.base_url.as_deref(), API_ORIGIN, "/query");
        let query = encode_query([("function", function), (key, value), ("apikey", self.api_key.as_str())]);
        format!("{url}?{query}")
    }

    /// Look up symbols matching `keywords`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::Empty`] when `keywords` is empty.
    pub async fn search_symbol(&self, keywords: &str) -> Result<ResponseEnvelope, ParamError> {
        if keywords.is_empty() {
            return Err(ParamError::empty("keywords"));
        }
        let url = self.query_url("SYMBOL_SEARCH", "keywords", keywords);
        let ttl = self.ttl_override.unwrap_or(SYMBOL_SEARCH_TTL);
        Ok(upstream_envelope(
            Service::AlphaVantage,
            self.client.get(&url, ttl).await,
        ))
    }

    /// Fetch the latest quote for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::Empty`] when `symbol` is empty.
    pub async fn get_quote(&self, symbol: &str) -> Result<ResponseEnvelope, ParamError> {
        if symbol.is_empty() {
            return Err(ParamError::empty("symbol"));
        }
        let url = self.query_url("GLOBAL_QUOTE", "symbol", symbol);
        let ttl = self.ttl_override.unwrap_or(QUOTE_TTL);
        Ok(upstream_envelope(
            Service::AlphaVantage,
            self.client.get(&url, ttl).await,
        ))
    }

    /// Quote the best listed match for `company`.
    ///
    /// A failed search is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::Empty`] when `company` is empty.
    pub async fn quote_company(&self, company: &str) -> Result<ResponseEnvelope, ParamError> {
        let search = self.search_symbol(company).await?;
        if !search.is_success() {
            return Ok(search);
        }
        match best_match_symbol(search.content.as_bytes()) {
            Some(symbol) => self.get_quote(&symbol).await,
            None => Ok(ResponseEnvelope::local_error(format!(
                "No symbol found for {company}"
            ))),
        }
    }

    async fn resolve(&self, params: &QueryEnvelope) -> Result<ResponseEnvelope, ParamError> {
        let api = match params.non_empty_str("api")? {
            Some(name) => name.parse::<AlphaVantageApi>()?,
            None => AlphaVantageApi::default(),
        };

        match api {
            AlphaVantageApi::Symbol => match search_term(params)? {
                Some(term) => self.search_symbol(term).await,
                None => Ok(ResponseEnvelope::local_error("No search term provided")),
            },
            AlphaVantageApi::Quote => {
                if let Some(symbol) = params.non_empty_str("symbol")? {
                    return self.get_quote(symbol).await;
                }
                match params.non_empty_str("company")? {
                    Some(company) => self.quote_company(company).await,
                    None => Ok(ResponseEnvelope::local_error("No search term provided")),
                }
            }
        }
    }
}

impl<T: HttpTransport> HandleQuery for AlphaVantage<T> {
    async fn handle_query(&self, params: &QueryEnvelope) -> ResponseEnvelope {
        self.resolve(params).await.unwrap_or_else(ResponseEnvelope::from)
    }
}
