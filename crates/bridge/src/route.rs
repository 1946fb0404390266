use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Route metadata as the compiled core expects it. Field names are snake_case on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteMetadata {
    pub method: String,
    pub path: String,
    pub handler_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_params: Option<Value>,
    #[serde(default = "default_true")]
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Value>,
}

fn default_true() -> bool {
    true
}

macro_rules! route_metadata_method {
    ($method:ident, $name:literal) => {
        pub fn $method(path: impl Into<String>, handler_name: impl Into<String>) -> Self {
            Self::new($name, path, handler_name)
        }
    };
}

impl RouteMetadata {
    pub fn new(method: impl Into<String>, path: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            handler_name: handler_name.into(),
            request_schema: None,
            response_schema: None,
            parameter_schema: None,
            file_params: None,
            is_async: true,
            cors: None,
        }
    }

    route_metadata_method!(get, "GET");
    route_metadata_method!(post, "POST");
    route_metadata_method!(put, "PUT");
    route_metadata_method!(delete, "DELETE");
    route_metadata_method!(head, "HEAD");
    route_metadata_method!(options, "OPTIONS");
    route_metadata_method!(patch, "PATCH");
    route_metadata_method!(trace, "TRACE");

    pub fn with_request_schema(mut self, schema: Value) -> Self {
        self.request_schema = Some(schema);
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_parameter_schema(mut self, schema: Value) -> Self {
        self.parameter_schema = Some(schema);
        self
    }

    pub fn with_cors(mut self, cors: Value) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn method_matches(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }
}

/// Matches a concrete path against a `{name}` template, segment by segment.
///
/// The query string is ignored, empty segments are skipped and captured values are
/// percent-decoded. Returns the captured parameters, or `None` when the path does not match.
pub fn match_path(template: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let path = path.split_once('?').map_or(path, |(path, _)| path);

    let mut template_segments = template.split('/').filter(|s| !s.is_empty());
    let mut path_segments = path.split('/').filter(|s| !s.is_empty());
    let mut params = BTreeMap::new();

    loop {
        match (template_segments.next(), path_segments.next()) {
            (None, None) => return Some(params),
            (Some(expected), Some(actual)) => {
                if let Some(name) = expected.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    let value = percent_decode_str(actual).decode_utf8_lossy().into_owned();
                    params.insert(name.to_owned(), value);
                } else if expected != actual {
                    return None;
                }
            }
            _ => return None,
        }
    }
}
