//! apiproxy - a caching dispatcher in front of third-party information APIs.
//!
//! Callers send a base64 JSON query naming a `service` over a socket; the
//! proxy routes it to the matching provider handler, answers repeated
//! upstream requests from a shared cache, and returns a normalized response
//! envelope.
//!
//! # Architecture
//!
//! - [`upstream`]: HTTP transport abstraction and its `reqwest` implementation
//! - [`cache`]: Response caching with per-entry ttl
//! - [`services`]: Provider handlers (Wolfram|Alpha, Alpha Vantage,
//!   OpenWeatherMap, geocoding, a local echo endpoint)
//! - [`dispatch`]: Service name to handler routing
//! - [`envelope`], [`protocol`]: Query/response types and their wire encoding
//! - [`server`]: Socket listener
//! - [`client`]: Local-or-remote client for embedding callers
//! - [`config`], [`metrics`], [`error`]: Ambient plumbing
//!
//! # Testing
//!
//! Upstream access goes through the [`upstream::HttpTransport`] trait, so the
//! cache, handlers and dispatcher are tested against scripted transports:
//!
//! ```rust
//! use apiproxy::envelope::QueryEnvelope;
//! use apiproxy::services::{Service, ServiceName};
//!
//! let query = QueryEnvelope::new().with("service", "open_weather_map");
//! assert_eq!(
//!     ServiceName::from_value(query.service()),
//!     ServiceName::Known(Service::OpenWeatherMap)
//! );
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod services;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
