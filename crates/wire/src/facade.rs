use crate::body::{Body, BodyKind, MultipartFile};
use crate::codec::{self, BodyMetadata};
use crate::error::WireError;
use crate::payload::WirePayload;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use tracing::trace;

/// The request handed to every handler and request hook.
///
/// Built once from a [`WirePayload`]. Typed accessors never mutate; replacing the body
/// through [`Request::set_body`] only marks the request dirty, the [`BodyMetadata`] is
/// rebuilt lazily by [`Request::to_payload`].
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    path_params: BTreeMap<String, String>,
    params: BTreeMap<String, Value>,
    query: BTreeMap<String, Value>,
    raw_query: BTreeMap<String, Vec<String>>,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    body: Body,
    bytes: OnceCell<Bytes>,
    metadata: Option<BodyMetadata>,
    dirty: bool,
    raw: String,
}

impl Request {
    pub fn from_raw(raw: &str) -> Result<Self, WireError> {
        let payload: WirePayload = serde_json::from_str(raw)?;
        Self::with_raw(payload, raw.to_owned())
    }

    pub fn from_payload(payload: WirePayload) -> Result<Self, WireError> {
        let raw = serde_json::to_string(&payload)?;
        Self::with_raw(payload, raw)
    }

    fn with_raw(payload: WirePayload, raw: String) -> Result<Self, WireError> {
        let WirePayload { method, path, path_params, params, query, raw_query, headers, cookies, body, body_metadata } =
            payload;

        let bytes = OnceCell::new();
        let (body, metadata) = match body_metadata {
            Some(metadata) if metadata.kind != BodyKind::None || body.is_null() => {
                let materialized = codec::materialize(Some(&metadata), Some(&body))?;
                if let Some(exact) = &materialized.bytes {
                    let _ = bytes.set(exact.clone());
                }
                (materialized.into_body(), Some(metadata))
            }
            _ => {
                // metadata is derived on the first byte view or serialization
                trace!(path = %path, "decoding body from wire value");
                (Body::from_wire(&body)?, None)
            }
        };

        Ok(Self {
            method,
            path,
            path_params,
            params,
            query,
            raw_query,
            headers,
            cookies,
            body,
            bytes,
            metadata,
            dirty: false,
            raw,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    /// a single path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// merged path, query, header and cookie parameters, as validated by the core
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn query(&self) -> &BTreeMap<String, Value> {
        &self.query
    }

    pub fn raw_query(&self) -> &BTreeMap<String, Vec<String>> {
        &self.raw_query
    }

    /// Rebuilds the url-encoded query string from the raw query values.
    pub fn query_string(&self) -> Result<String, WireError> {
        let pairs: Vec<(&str, &str)> = self
            .raw_query
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str())))
            .collect();
        serde_urlencoded::to_string(pairs).map_err(WireError::invalid_form)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Looks up a header ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_kind(&self) -> BodyKind {
        self.body.kind()
    }

    /// Replaces the body. Metadata is rebuilt on the next [`Request::to_payload`].
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
        self.bytes = OnceCell::new();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The body metadata, `None` until it is received or first derived.
    pub fn body_metadata(&self) -> Option<&BodyMetadata> {
        self.metadata.as_ref()
    }

    /// The byte view of the body, exact to the wire bytes when the body is unchanged.
    pub fn bytes(&self) -> Result<Bytes, WireError> {
        self.bytes.get_or_try_init(|| self.body.to_bytes()).cloned()
    }

    /// The body as JSON. A text body is accepted when it parses as JSON.
    pub fn json(&self) -> Result<Value, WireError> {
        match &self.body {
            Body::Json(value) => Ok(value.clone()),
            Body::Text(text) => Ok(serde_json::from_str(text)?),
            other => Err(WireError::wrong_body_kind(BodyKind::Json, other.kind())),
        }
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_value(self.json()?)?)
    }

    /// Form fields of a form or multipart body.
    pub fn form(&self) -> Result<BTreeMap<String, String>, WireError> {
        match &self.body {
            Body::Form(fields) | Body::Multipart { fields, .. } => Ok(fields.clone()),
            other => Err(WireError::wrong_body_kind(BodyKind::Form, other.kind())),
        }
    }

    pub fn text(&self) -> Result<&str, WireError> {
        match &self.body {
            Body::Text(text) => Ok(text),
            other => Err(WireError::wrong_body_kind(BodyKind::Text, other.kind())),
        }
    }

    pub fn files(&self) -> &[MultipartFile] {
        match &self.body {
            Body::Multipart { files, .. } => files,
            _ => &[],
        }
    }

    /// Serializes the request back into a wire payload.
    ///
    /// Metadata is only recomputed when the body was replaced since the last call, so
    /// repeated calls on an unchanged request produce equal payloads.
    pub fn to_payload(&mut self) -> Result<WirePayload, WireError> {
        if self.dirty || self.metadata.is_none() {
            self.metadata = Some(codec::classify(&self.body)?);
            self.dirty = false;
        }

        Ok(WirePayload {
            method: self.method.clone(),
            path: self.path.clone(),
            path_params: self.path_params.clone(),
            params: self.params.clone(),
            query: self.query.clone(),
            raw_query: self.raw_query.clone(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            body: self.body.to_wire(),
            body_metadata: self.metadata.clone(),
        })
    }

    /// The wire text this request was built from.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
