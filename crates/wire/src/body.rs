//! The request/response body as a single sum type.
//!
//! A body is one of six mutually exclusive kinds. On the wire it is always JSON-safe:
//! binary, form and multipart bodies travel as single-key marker objects, everything else
//! is carried as the plain JSON value.
//!
//! ```
//! use micro_wire::Body;
//! use serde_json::json;
//!
//! let body = Body::from(vec![0u8, 159, 146, 150]);
//! let wire = body.to_wire();
//! assert_eq!(wire, json!({"__bridge_base64__": "AJ+Slg=="}));
//! assert_eq!(Body::from_wire(&wire).unwrap(), body);
//! ```

use crate::error::WireError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// marker key for a base64 encoded binary body
pub const BASE64_MARKER: &str = "__bridge_base64__";
/// marker key for an url-encoded form body
pub const FORM_MARKER: &str = "__bridge_form__";
/// marker key for a multipart body, holding `fields` and `files`
pub const MULTIPART_MARKER: &str = "__bridge_multipart__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    #[default]
    None,
    Json,
    Form,
    Multipart,
    Binary,
    Text,
}

impl BodyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::None => "none",
            BodyKind::Json => "json",
            BodyKind::Form => "form",
            BodyKind::Multipart => "multipart",
            BodyKind::Binary => "binary",
            BodyKind::Text => "text",
        }
    }

    /// Parses a kind name case-insensitively, unknown names become [`BodyKind::None`].
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => BodyKind::Json,
            "form" => BodyKind::Form,
            "multipart" => BodyKind::Multipart,
            "binary" => BodyKind::Binary,
            "text" => BodyKind::Text,
            _ => BodyKind::None,
        }
    }
}

impl Display for BodyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BodyKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.as_deref().map_or(BodyKind::None, BodyKind::parse))
    }
}

/// An uploaded file inside a multipart body. Content is kept base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "content")]
    pub content_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl MultipartFile {
    pub fn new(name: impl Into<String>, content: &[u8]) -> Self {
        Self { name: name.into(), filename: None, content_b64: STANDARD.encode(content), content_type: None }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(STANDARD.decode(&self.content_b64)?))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    None,
    Json(Value),
    Text(String),
    Form(BTreeMap<String, String>),
    Multipart { fields: BTreeMap<String, String>, files: Vec<MultipartFile> },
    Binary(Bytes),
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Body::None => BodyKind::None,
            Body::Json(_) => BodyKind::Json,
            Body::Text(_) => BodyKind::Text,
            Body::Form(_) => BodyKind::Form,
            Body::Multipart { .. } => BodyKind::Multipart,
            Body::Binary(_) => BodyKind::Binary,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Body::None)
    }

    /// Decodes a JSON-safe wire value, recognizing the binary, form and multipart markers.
    pub fn from_wire(value: &Value) -> Result<Self, WireError> {
        let object = match value {
            Value::Null => return Ok(Body::None),
            Value::String(text) => return Ok(Body::Text(text.clone())),
            Value::Object(object) => object,
            other => return Ok(Body::Json(other.clone())),
        };

        if let Some(Value::String(encoded)) = object.get(BASE64_MARKER) {
            return Ok(Body::Binary(Bytes::from(STANDARD.decode(encoded)?)));
        }

        if let Some(Value::Object(form)) = object.get(FORM_MARKER) {
            return Ok(Body::Form(flatten_form_values(form)));
        }

        if let Some(Value::Object(multipart)) = object.get(MULTIPART_MARKER) {
            let fields = match multipart.get("fields") {
                Some(Value::Object(fields)) => flatten_form_values(fields),
                _ => BTreeMap::new(),
            };
            let files = match multipart.get("files") {
                Some(files @ Value::Array(_)) => serde_json::from_value(files.clone())?,
                _ => Vec::new(),
            };
            return Ok(Body::Multipart { fields, files });
        }

        Ok(Body::Json(value.clone()))
    }

    /// Encodes the body into its JSON-safe wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            Body::None => Value::Null,
            Body::Json(value) => value.clone(),
            Body::Text(text) => Value::String(text.clone()),
            Body::Form(fields) => marker(FORM_MARKER, string_map(fields)),
            Body::Multipart { fields, files } => {
                let files = files.iter().map(file_to_value).collect();
                let mut multipart = Map::new();
                multipart.insert("fields".into(), string_map(fields));
                multipart.insert("files".into(), Value::Array(files));
                marker(MULTIPART_MARKER, Value::Object(multipart))
            }
            Body::Binary(bytes) => marker(BASE64_MARKER, Value::String(STANDARD.encode(bytes))),
        }
    }

    /// The byte view of the body.
    ///
    /// Form and multipart bodies are rendered as `application/x-www-form-urlencoded` text of
    /// their fields, JSON is serialized compactly.
    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        let bytes = match self {
            Body::None => Bytes::new(),
            Body::Json(value) => Bytes::from(serde_json::to_vec(value)?),
            Body::Text(text) => Bytes::from(text.clone()),
            Body::Form(fields) | Body::Multipart { fields, .. } => Bytes::from(encode_form(fields)?),
            Body::Binary(bytes) => bytes.clone(),
        };
        Ok(bytes)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        if value.is_null() { Body::None } else { Body::Json(value) }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Binary(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Binary(Bytes::from(value))
    }
}

impl From<BTreeMap<String, String>> for Body {
    fn from(value: BTreeMap<String, String>) -> Self {
        Body::Form(value)
    }
}

/// Flattens form values to text: `null` becomes empty, strings are kept, the rest is JSON.
pub fn flatten_form_values<'a>(source: impl IntoIterator<Item = (&'a String, &'a Value)>) -> BTreeMap<String, String> {
    source
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::Null => String::new(),
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

pub(crate) fn encode_form(fields: &BTreeMap<String, String>) -> Result<String, WireError> {
    serde_urlencoded::to_string(fields).map_err(WireError::invalid_form)
}

fn marker(key: &str, value: Value) -> Value {
    let mut object = Map::with_capacity(1);
    object.insert(key.to_owned(), value);
    Value::Object(object)
}

fn string_map(fields: &BTreeMap<String, String>) -> Value {
    Value::Object(fields.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}

fn file_to_value(file: &MultipartFile) -> Value {
    let mut object = Map::new();
    object.insert("name".into(), Value::String(file.name.clone()));
    if let Some(filename) = &file.filename {
        object.insert("filename".into(), Value::String(filename.clone()));
    }
    object.insert("content".into(), Value::String(file.content_b64.clone()));
    if let Some(content_type) = &file.content_type {
        object.insert("contentType".into(), Value::String(content_type.clone()));
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!(BodyKind::parse("JSON"), BodyKind::Json);
        assert_eq!(BodyKind::parse("Multipart"), BodyKind::Multipart);
        assert_eq!(BodyKind::parse("xml"), BodyKind::None);

        let kind: BodyKind = serde_json::from_value(json!("Binary")).unwrap();
        assert_eq!(kind, BodyKind::Binary);
        let kind: BodyKind = serde_json::from_value(Value::Null).unwrap();
        assert_eq!(kind, BodyKind::None);
    }

    #[test]
    fn test_plain_values() {
        assert_eq!(Body::from_wire(&Value::Null).unwrap(), Body::None);
        assert_eq!(Body::from_wire(&json!("hi")).unwrap(), Body::Text("hi".into()));
        assert_eq!(Body::from_wire(&json!(42)).unwrap(), Body::Json(json!(42)));
        assert_eq!(Body::from_wire(&json!([1, 2])).unwrap(), Body::Json(json!([1, 2])));
        assert_eq!(Body::from_wire(&json!({"a": 1})).unwrap(), Body::Json(json!({"a": 1})));
    }

    #[test]
    fn test_form_marker_flattens_values() {
        let wire = json!({FORM_MARKER: {"name": "alice", "age": 30, "nick": null, "tags": ["a"]}});
        let body = Body::from_wire(&wire).unwrap();

        let Body::Form(fields) = &body else { panic!("expected form body, got {body:?}") };
        assert_eq!(fields["name"], "alice");
        assert_eq!(fields["age"], "30");
        assert_eq!(fields["nick"], "");
        assert_eq!(fields["tags"], r#"["a"]"#);
        assert_eq!(body.to_bytes().unwrap(), Bytes::from_static(b"age=30&name=alice&nick=&tags=%5B%22a%22%5D"));
    }

    #[test]
    fn test_multipart_marker() {
        let wire = json!({
            MULTIPART_MARKER: {
                "fields": {"title": "report"},
                "files": [{"name": "doc", "filename": "a.txt", "content": "aGVsbG8=", "contentType": "text/plain"}]
            }
        });

        let body = Body::from_wire(&wire).unwrap();
        let Body::Multipart { fields, files } = &body else { panic!("expected multipart body, got {body:?}") };
        assert_eq!(fields["title"], "report");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename.as_deref(), Some("a.txt"));
        assert_eq!(files[0].content().unwrap(), Bytes::from_static(b"hello"));

        assert_eq!(body.to_wire(), wire);
    }

    #[test]
    fn test_invalid_base64_marker() {
        let wire = json!({BASE64_MARKER: "not base64!"});
        assert!(matches!(Body::from_wire(&wire), Err(WireError::InvalidBase64 { .. })));
    }

    #[test]
    fn test_marker_with_wrong_type_is_plain_json() {
        let wire = json!({BASE64_MARKER: 1});
        assert_eq!(Body::from_wire(&wire).unwrap(), Body::Json(wire));
    }
}
