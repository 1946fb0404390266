//! Body classification and materialization.
//!
//! [`classify`] describes a body as [`BodyMetadata`]: its kind, the typed value for that
//! kind and a base64 rendering of its bytes. The base64 field is the authoritative byte
//! view, [`materialize`] prefers it over re-serializing the typed value.

use crate::body::{Body, BodyKind, MultipartFile, encode_form};
use crate::error::WireError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyMetadata {
    #[serde(default)]
    pub kind: BodyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_bytes_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_value: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<MultipartFile>>,
}

impl BodyMetadata {
    fn with_bytes(kind: BodyKind, bytes: &[u8]) -> Self {
        Self { kind, raw_bytes_b64: Some(STANDARD.encode(bytes)), ..Self::default() }
    }
}

/// The typed views of a body, as seen by accessors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Materialized {
    pub kind: BodyKind,
    pub bytes: Option<Bytes>,
    pub json_value: Option<Value>,
    pub form_value: Option<BTreeMap<String, String>>,
    pub text_value: Option<String>,
    pub files: Option<Vec<MultipartFile>>,
}

impl Materialized {
    pub fn into_body(self) -> Body {
        match self.kind {
            BodyKind::None => Body::None,
            BodyKind::Json => Body::Json(self.json_value.unwrap_or(Value::Null)),
            BodyKind::Text => Body::Text(self.text_value.unwrap_or_default()),
            BodyKind::Form => Body::Form(self.form_value.unwrap_or_default()),
            BodyKind::Multipart => Body::Multipart {
                fields: self.form_value.unwrap_or_default(),
                files: self.files.unwrap_or_default(),
            },
            BodyKind::Binary => Body::Binary(self.bytes.unwrap_or_default()),
        }
    }
}

pub fn classify(body: &Body) -> Result<BodyMetadata, WireError> {
    let metadata = match body {
        Body::None => BodyMetadata::default(),
        Body::Text(text) => {
            BodyMetadata { text_value: Some(text.clone()), ..BodyMetadata::with_bytes(BodyKind::Text, text.as_bytes()) }
        }
        Body::Json(value) => {
            let bytes = serde_json::to_vec(value)?;
            BodyMetadata { json_value: Some(value.clone()), ..BodyMetadata::with_bytes(BodyKind::Json, &bytes) }
        }
        Body::Binary(bytes) => BodyMetadata::with_bytes(BodyKind::Binary, bytes),
        Body::Form(fields) => {
            let encoded = encode_form(fields)?;
            BodyMetadata { form_value: Some(fields.clone()), ..BodyMetadata::with_bytes(BodyKind::Form, encoded.as_bytes()) }
        }
        Body::Multipart { fields, files } => {
            let encoded = encode_form(fields)?;
            BodyMetadata {
                form_value: Some(fields.clone()),
                files: Some(files.clone()),
                ..BodyMetadata::with_bytes(BodyKind::Multipart, encoded.as_bytes())
            }
        }
    };
    Ok(metadata)
}

/// Classifies a JSON-safe wire value, see [`Body::from_wire`] for the marker rules.
pub fn classify_wire(value: &Value) -> Result<BodyMetadata, WireError> {
    classify(&Body::from_wire(value)?)
}

/// Rebuilds the typed views from metadata, falling back to the wire body where the
/// metadata is silent.
///
/// Bytes always come from `raw_bytes_b64` when it is present. Otherwise they are
/// synthesized the way [`Body::to_bytes`] renders the same kind.
pub fn materialize(metadata: Option<&BodyMetadata>, fallback: Option<&Value>) -> Result<Materialized, WireError> {
    let Some(metadata) = metadata else {
        return Ok(Materialized::default());
    };

    let mut bytes = match &metadata.raw_bytes_b64 {
        Some(encoded) => Some(Bytes::from(STANDARD.decode(encoded)?)),
        None => None,
    };
    let fallback = fallback.filter(|value| !value.is_null());

    let mut materialized = Materialized { kind: metadata.kind, files: metadata.files.clone(), ..Materialized::default() };

    match metadata.kind {
        BodyKind::Json => {
            let value = metadata.json_value.clone().or_else(|| fallback.cloned());
            if bytes.is_none()
                && let Some(value) = &value
            {
                bytes = Some(Bytes::from(serde_json::to_vec(value)?));
            }
            materialized.json_value = value;
        }
        BodyKind::Form | BodyKind::Multipart => {
            let (fields, files) = match (&metadata.form_value, fallback) {
                (Some(fields), _) => (Some(fields.clone()), None),
                (None, Some(value)) => match Body::from_wire(value)? {
                    Body::Form(fields) => (Some(fields), None),
                    Body::Multipart { fields, files } => (Some(fields), Some(files)),
                    _ => (None, None),
                },
                (None, None) => (None, None),
            };
            if bytes.is_none()
                && let Some(fields) = &fields
            {
                bytes = Some(Bytes::from(encode_form(fields)?));
            }
            if materialized.files.is_none() {
                materialized.files = files;
            }
            materialized.form_value = fields;
        }
        BodyKind::Text => {
            let text = metadata.text_value.clone().or_else(|| fallback.and_then(Value::as_str).map(str::to_owned));
            if bytes.is_none()
                && let Some(text) = &text
            {
                bytes = Some(Bytes::from(text.clone()));
            }
            materialized.text_value = text;
        }
        BodyKind::Binary | BodyKind::None => {}
    }

    materialized.bytes = bytes;
    Ok(materialized)
}
