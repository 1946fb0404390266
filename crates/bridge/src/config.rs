//! Server configuration handed to the core, and the bridge's own construction options.

use crate::client::CoreFactory;
use crate::client::local::LocalCoreFactory;
use crate::decompress::{Decompressor, GzipDecompressor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

const DEFAULT_MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub enable_request_id: bool,
    /// `None` disables the limit
    pub max_body_size: Option<u64>,
    /// seconds, `None` disables the timeout
    pub request_timeout: Option<u64>,
    pub graceful_shutdown: bool,
    pub shutdown_timeout: u64,
    pub static_files: Vec<StaticFilesConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub static_manifest: Vec<StaticManifestEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            workers: 1,
            enable_request_id: true,
            max_body_size: Some(DEFAULT_MAX_BODY_SIZE),
            request_timeout: Some(DEFAULT_TIMEOUT_SECS),
            graceful_shutdown: true,
            shutdown_timeout: DEFAULT_TIMEOUT_SECS,
            static_files: Vec::new(),
            static_manifest: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn with_max_body_size(mut self, size: Option<u64>) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_request_timeout(mut self, secs: Option<u64>) -> Self {
        self.request_timeout = secs;
        self
    }

    pub fn with_request_id(mut self, enabled: bool) -> Self {
        self.enable_request_id = enabled;
        self
    }

    pub fn with_static_files(mut self, config: StaticFilesConfig) -> Self {
        self.static_files.push(config);
        self
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticFilesConfig {
    pub directory: String,
    pub route_prefix: String,
    #[serde(default = "default_index_file")]
    pub index_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
}

fn default_index_file() -> bool {
    true
}

impl StaticFilesConfig {
    pub fn new(directory: impl Into<String>, route_prefix: impl Into<String>) -> Self {
        Self { directory: directory.into(), route_prefix: route_prefix.into(), index_file: true, cache_control: None }
    }

    pub fn with_index_file(mut self, index_file: bool) -> Self {
        self.index_file = index_file;
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }
}

/// One pre-read static file, served by the core for `GET` and `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticManifestEntry {
    pub route: String,
    pub headers: BTreeMap<String, String>,
    /// base64 encoded file content
    pub body: String,
}

/// Options fixed at [`HandlerBridge`](crate::HandlerBridge) construction.
#[derive(Clone)]
pub struct BridgeOptions {
    pub(crate) core_factory: Arc<dyn CoreFactory>,
    pub(crate) decompressor: Option<Arc<dyn Decompressor>>,
    pub(crate) strict_body_options: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            core_factory: Arc::new(LocalCoreFactory),
            decompressor: Some(Arc::new(GzipDecompressor)),
            strict_body_options: false,
        }
    }
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core_factory<F: CoreFactory + 'static>(mut self, factory: F) -> Self {
        self.core_factory = Arc::new(factory);
        self
    }

    pub fn with_decompressor<D: Decompressor + 'static>(mut self, decompressor: D) -> Self {
        self.decompressor = Some(Arc::new(decompressor));
        self
    }

    pub fn without_decompressor(mut self) -> Self {
        self.decompressor = None;
        self
    }

    /// Reject requests that set more than one body option instead of applying precedence.
    pub fn strict_body_options(mut self, strict: bool) -> Self {
        self.strict_body_options = strict;
        self
    }
}

impl Debug for BridgeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("decompressor", &self.decompressor)
            .field("strict_body_options", &self.strict_body_options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camel_case_with_defaults() {
        let config: ServerConfig = serde_json::from_value(json!({"port": 9000, "maxBodySize": null})).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_body_size, None);
        assert!(config.enable_request_id);

        let value = serde_json::to_value(ServerConfig::default()).unwrap();
        assert_eq!(value["requestTimeout"], 30);
        assert!(value.get("staticManifest").is_none());
    }

    #[test]
    fn test_static_files_index_default() {
        let config: StaticFilesConfig =
            serde_json::from_value(json!({"directory": "public", "routePrefix": "/assets"})).unwrap();
        assert!(config.index_file);
        assert_eq!(config, StaticFilesConfig::new("public", "/assets"));
    }

    #[test]
    fn test_is_default() {
        assert!(ServerConfig::default().is_default());
        assert!(!ServerConfig::default().with_request_id(false).is_default());
    }
}
