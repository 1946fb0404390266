use crate::client::ResponseSnapshot;
use crate::decompress::Decompressor;
use crate::error::BridgeError;
use bytes::Bytes;
use micro_wire::Body;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::warn;

/// A response returned by the [`HandlerBridge`](crate::HandlerBridge).
///
/// `text`, `json` and `bytes` read the body after decompression, which happens at most
/// once and only when the `content-encoding` matches the configured decompressor.
/// [`BridgeResponse::raw`] always returns the bytes exactly as the core produced them.
pub struct BridgeResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    raw: Bytes,
    decompressor: Option<Arc<dyn Decompressor>>,
    decoded: OnceCell<Bytes>,
}

impl BridgeResponse {
    pub fn from_snapshot(snapshot: ResponseSnapshot, decompressor: Option<Arc<dyn Decompressor>>) -> Self {
        let ResponseSnapshot { status, headers, body } = snapshot;
        let headers = lowercase_keys(headers);

        let (status, headers, raw) = match unwrap_structured(&body) {
            Some(inner) => {
                let (inner_status, inner_headers, inner_body) = flatten(inner);
                let mut merged = headers;
                merged.extend(inner_headers);
                (inner_status.unwrap_or(status), merged, inner_body)
            }
            None => (status, headers, body),
        };

        Self { status, headers, raw, decompressor, decoded: OnceCell::new() }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn bytes(&self) -> Bytes {
        self.decoded().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.decoded()).into_owned()
    }

    /// Never fails: an empty body is `null` and unparsable text comes back as a JSON string.
    pub fn json(&self) -> Value {
        let body = self.decoded();
        if body.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, BridgeError> {
        Ok(serde_json::from_slice(self.decoded())?)
    }

    pub fn raw(&self) -> Bytes {
        self.raw.clone()
    }

    fn decoded(&self) -> &Bytes {
        self.decoded.get_or_init(|| {
            let Some(decompressor) = &self.decompressor else {
                return self.raw.clone();
            };
            match self.header("content-encoding") {
                Some(encoding) if encoding.trim().eq_ignore_ascii_case(decompressor.encoding()) => {
                    match decompressor.decompress(&self.raw) {
                        Ok(decoded) => Bytes::from(decoded),
                        Err(e) => {
                            warn!(encoding, cause = %e, "failed to decompress response body, using raw bytes");
                            self.raw.clone()
                        }
                    }
                }
                _ => self.raw.clone(),
            }
        })
    }
}

impl Debug for BridgeResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("raw_len", &self.raw.len())
            .finish_non_exhaustive()
    }
}

fn lowercase_keys(headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers.into_iter().map(|(name, value)| (name.to_ascii_lowercase(), value)).collect()
}

fn unwrap_structured(body: &[u8]) -> Option<Map<String, Value>> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(object)) if is_complete(&object) => Some(object),
        _ => None,
    }
}

/// Follows nested structured bodies, inner headers overriding outer ones. The snapshot's own
/// headers are the outermost layer.
fn flatten(mut current: Map<String, Value>) -> (Option<u16>, BTreeMap<String, String>, Bytes) {
    let mut headers = BTreeMap::new();
    let mut status = None;

    loop {
        status = read_status(&current).or(status);
        if let Some(Value::Object(inner)) = current.get("headers") {
            for (name, value) in inner {
                let value = value.as_str().map_or_else(|| value.to_string(), str::to_owned);
                headers.insert(name.to_ascii_lowercase(), value);
            }
        }
        match current.remove("body") {
            Some(Value::Object(next)) if is_complete(&next) => current = next,
            body => return (status, headers, encode_body(body.unwrap_or(Value::Null))),
        }
    }
}

fn is_complete(object: &Map<String, Value>) -> bool {
    read_status(object).is_some() && (object.contains_key("headers") || object.contains_key("body"))
}

fn read_status(object: &Map<String, Value>) -> Option<u16> {
    object.get("status").or_else(|| object.get("statusCode")).and_then(Value::as_u64).and_then(|s| u16::try_from(s).ok())
}

fn encode_body(body: Value) -> Bytes {
    match body {
        Value::Null => Bytes::new(),
        Value::String(text) => Bytes::from(text),
        other => Body::from_wire(&other)
            .and_then(|body| body.to_bytes())
            .unwrap_or_else(|_| Bytes::from(other.to_string())),
    }
}
