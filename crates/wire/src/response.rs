use crate::body::Body;
use crate::error::WireError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The normalized `{status, headers, body}` shape of a handler result.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
}

impl Default for StructuredResponse {
    fn default() -> Self {
        Self { status: 200, headers: BTreeMap::new(), body: Body::None }
    }
}

impl StructuredResponse {
    pub fn new(body: impl Into<Body>) -> Self {
        Self { body: body.into(), ..Self::default() }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(value: Value) -> Self {
        Self::new(Body::Json(value))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Body::Text(text.into()))
    }

    /// Whether a JSON value already exposes any of `status`, `statusCode`, `headers` or `body`.
    pub fn looks_structured(value: &Value) -> bool {
        value.as_object().is_some_and(|object| {
            ["status", "statusCode", "headers", "body"].iter().any(|key| object.contains_key(*key))
        })
    }

    /// Stricter than [`StructuredResponse::looks_structured`]: a status plus headers or a body.
    pub fn looks_complete(value: &Value) -> bool {
        value.as_object().is_some_and(|object| {
            let has_status = object.get("status").or_else(|| object.get("statusCode")).is_some_and(Value::is_u64);
            has_status && (object.contains_key("headers") || object.contains_key("body"))
        })
    }

    /// Reads the structured fields of a JSON object, defaulting missing ones.
    ///
    /// `statusCode` is accepted for `status`; non-string header values are kept as JSON text.
    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        let Some(object) = value.as_object() else {
            return Err(WireError::invalid_payload("structured response must be a JSON object"));
        };

        let status = match object.get("status").or_else(|| object.get("statusCode")) {
            None | Some(Value::Null) => 200,
            Some(status) => status
                .as_u64()
                .and_then(|status| u16::try_from(status).ok())
                .ok_or_else(|| WireError::invalid_payload(format!("invalid status: {status}")))?,
        };

        let headers = match object.get("headers") {
            Some(Value::Object(headers)) => headers
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        let body = Body::from_wire(object.get("body").unwrap_or(&Value::Null))?;
        Ok(Self { status, headers, body })
    }

    pub fn to_value(&self) -> Value {
        let headers = self.headers.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();

        let mut object = Map::with_capacity(3);
        object.insert("status".into(), Value::from(self.status));
        object.insert("headers".into(), Value::Object(headers));
        object.insert("body".into(), self.body.to_wire());
        Value::Object(object)
    }
}

impl Serialize for StructuredResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructuredResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}
