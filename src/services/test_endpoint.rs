//! Local echo endpoint used to check connectivity without any upstream call.

use serde_json::Value;

use crate::envelope::{QueryEnvelope, ResponseEnvelope};

use super::HandleQuery;

#[derive(Debug, Clone, Copy, Default)]
pub struct TestEndpoint;

impl HandleQuery for TestEndpoint {
    async fn handle_query(&self, params: &QueryEnvelope) -> ResponseEnvelope {
        ResponseEnvelope::json(&Value::Object(params.as_map().clone()))
    }
}
