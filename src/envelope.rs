//! Query and response envelopes exchanged with callers.
//!
//! A [`QueryEnvelope`] is a free-form JSON object whose `service` key picks
//! the handler. A [`ResponseEnvelope`] always carries a `status_code`; `-1`
//! marks a local failure, anything else is an upstream HTTP status relayed
//! unchanged.

use std::borrow::Cow;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ParamError;

/// Status code used for failures that happened on this side of the proxy.
pub const LOCAL_ERROR_STATUS: i32 = -1;

/// Status code returned when no handler matches the requested service.
pub const UNRESOLVED_SERVICE_STATUS: i32 = 401;

/// Key naming the target service in a query.
pub const SERVICE_KEY: &str = "service";

/// An inbound query: a JSON object of named parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryEnvelope(Map<String, Value>);

impl QueryEnvelope {
    /// Create an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a parameter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw access to a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The declared service, if any.
    #[must_use]
    pub fn service(&self) -> Option<&Value> {
        self.get(SERVICE_KEY)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Read an optional string parameter.
    ///
    /// Absent keys and JSON `null` yield `Ok(None)`; any other non-string
    /// value is a type fault.
    pub fn str_param(&self, key: &str) -> Result<Option<&str>, ParamError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(ParamError::WrongType {
                name: key.to_string(),
                expected: "string",
                found: other.to_string(),
            }),
        }
    }

    /// Read an optional string parameter, treating `""` as absent.
    pub fn non_empty_str(&self, key: &str) -> Result<Option<&str>, ParamError> {
        Ok(self.str_param(key)?.filter(|value| !value.is_empty()))
    }

    /// Read an optional parameter given as a non-empty string or a number,
    /// rendered as text.
    pub fn text_param(&self, key: &str) -> Result<Option<String>, ParamError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) if value.is_empty() => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(other) => Err(ParamError::WrongType {
                name: key.to_string(),
                expected: "string or number",
                found: other.to_string(),
            }),
        }
    }

    /// Read a mandatory, non-empty string parameter.
    pub fn require_str(&self, key: &str) -> Result<&str, ParamError> {
        match self.str_param(key)? {
            None => Err(ParamError::missing(key)),
            Some("") => Err(ParamError::empty(key)),
            Some(value) => Ok(value),
        }
    }

    /// Read an optional coordinate given either as a number or a numeric string.
    pub fn coordinate(&self, key: &str) -> Result<Option<f64>, ParamError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) if raw.trim().is_empty() => Ok(None),
            Some(Value::String(raw)) => parse_coordinate(key, raw).map(Some),
            Some(Value::Number(number)) => number
                .as_f64()
                .map(Some)
                .ok_or_else(|| ParamError::invalid(key, format!("not a finite number: {number}"))),
            Some(other) => Err(ParamError::WrongType {
                name: key.to_string(),
                expected: "number",
                found: other.to_string(),
            }),
        }
    }
}

/// Parse a textual coordinate.
///
/// # Errors
///
/// Returns [`ParamError::Invalid`] when the text is not a finite number.
pub fn parse_coordinate(name: &str, raw: &str) -> Result<f64, ParamError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParamError::invalid(name, format!("not a number: {raw:?}"))),
    }
}

impl From<Map<String, Value>> for QueryEnvelope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryEnvelope {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Payload of a response: upstream bytes or locally produced text.
///
/// Serializes as a string; binary payloads are decoded as UTF-8 with
/// replacement characters since raw bytes cannot travel through JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Content {
    Text(String),
    Bytes(bytes::Bytes),
}

impl Content {
    /// Text view of the payload.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text.as_str()),
            Self::Bytes(raw) => String::from_utf8_lossy(raw),
        }
    }

    /// Raw bytes of the payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(raw) => raw,
        }
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl Serialize for Content {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_text())
    }
}

/// Normalized response returned for every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status_code: i32,
    pub content: Content,
    pub encoding: Option<String>,
}

impl ResponseEnvelope {
    /// Failure on this side of the proxy (bad input, transport error...).
    #[must_use]
    pub fn local_error(message: impl Into<String>) -> Self {
        Self {
            status_code: LOCAL_ERROR_STATUS,
            content: Content::Text(message.into()),
            encoding: None,
        }
    }

    /// No handler matches the requested service.
    #[must_use]
    pub fn unresolved_service(name: &str) -> Self {
        Self {
            status_code: UNRESOLVED_SERVICE_STATUS,
            content: Content::Text(format!("Unresolved service name: {name}")),
            encoding: Some("utf-8".to_string()),
        }
    }

    /// A successful locally produced JSON document.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self {
            status_code: 200,
            content: Content::Text(value.to_string()),
            encoding: Some("utf-8".to_string()),
        }
    }

    /// Returns true when the status is an HTTP success code.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }
}

impl From<ParamError> for ResponseEnvelope {
    fn from(err: ParamError) -> Self {
        Self::local_error(err.to_string())
    }
}
