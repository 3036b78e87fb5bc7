//! Outbound HTTP access to upstream providers.

pub mod transport;

pub use transport::{HttpTransport, ReqwestTransport, UpstreamRequest, UpstreamResponse};
