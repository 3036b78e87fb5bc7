//! Service dispatch.
//!
//! The [`Dispatcher`] maps the `service` of a query to its handler, builds the
//! handler with the key and settings for that service, and returns the
//! handler's envelope. Handlers are cheap to build and immutable; the response
//! cache they share lives in the [`CachedClient`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::cache::CachedClient;
use crate::envelope::{QueryEnvelope, ResponseEnvelope};
use crate::services::{HandleQuery, HandlerOptions, Service, ServiceHandler, ServiceName};
use crate::upstream::HttpTransport;

/// Source of provider API keys.
pub trait ApiKeyProvider: Send + Sync {
    /// The key configured for `service`, if any.
    fn get_api_key(&self, service: Service) -> Option<String>;
}

/// Provider with no keys at all; handlers use their built-in defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeys;

impl ApiKeyProvider for NoKeys {
    fn get_api_key(&self, _service: Service) -> Option<String> {
        None
    }
}

impl ApiKeyProvider for HashMap<Service, String> {
    fn get_api_key(&self, service: Service) -> Option<String> {
        self.get(&service).cloned()
    }
}

/// Per-service overrides applied when building a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSettings {
    pub base_url: Option<String>,
    pub cache_ttl: Option<Duration>,
}

/// Routes queries to service handlers.
pub struct Dispatcher<T> {
    client: CachedClient<T>,
    keys: Arc<dyn ApiKeyProvider>,
    settings: HashMap<Service, ServiceSettings>,
}

impl<T: HttpTransport> Dispatcher<T> {
    pub fn new(client: CachedClient<T>, keys: Arc<dyn ApiKeyProvider>) -> Self {
        Self {
            client,
            keys,
            settings: HashMap::new(),
        }
    }

    /// Replace the overrides for every service at once.
    #[must_use]
    pub fn with_settings(mut self, settings: HashMap<Service, ServiceSettings>) -> Self {
        self.settings = settings;
        self
    }

    /// Override the settings of one service.
    #[must_use]
    pub fn with_service_settings(mut self, service: Service, settings: ServiceSettings) -> Self {
        self.settings.insert(service, settings);
        self
    }

    pub const fn client(&self) -> &CachedClient<T> {
        &self.client
    }

    /// Key configured for `service`.
    pub fn api_key(&self, service: Service) -> Option<String> {
        self.keys.get_api_key(service)
    }

    /// Build the handler for `service`.
    pub fn handler(&self, service: Service) -> ServiceHandler<T> {
        let settings = self.settings.get(&service).cloned().unwrap_or_default();
        let options = HandlerOptions {
            api_key: self.keys.get_api_key(service),
            base_url: settings.base_url,
            cache_ttl: settings.cache_ttl,
        };
        ServiceHandler::build(service, self.client.clone(), options)
    }

    /// Answer `query` with the handler named by its `service` key.
    #[instrument(skip_all, fields(service))]
    pub async fn resolve_query(&self, query: &QueryEnvelope) -> ResponseEnvelope {
        let service = match ServiceName::from_value(query.service()) {
            ServiceName::Known(service) => service,
            ServiceName::Unrecognized(name) => {
                tracing::Span::current().record("service", name.as_str());
                warn!("unresolved service name");
                metrics::counter!("apiproxy_queries_total", "service" => "unresolved").increment(1);
                return ResponseEnvelope::unresolved_service(&name);
            }
        };

        tracing::Span::current().record("service", service.name());
        metrics::counter!("apiproxy_queries_total", "service" => service.name()).increment(1);

        let response = self.handler(service).handle_query(query).await;
        debug!(status = response.status_code, "query resolved");
        response
    }
}
