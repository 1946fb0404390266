//! Builds the static file manifest embedded in the core configuration.

use crate::config::{StaticFilesConfig, StaticManifestEntry};
use crate::error::BridgeError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mime::Mime;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

const INDEX_FILE: &str = "index.html";

/// Walks every configured directory and reads each file into a manifest entry.
///
/// Configs missing a directory or prefix are skipped. When `index_file` is set and the
/// directory holds an `index.html`, it is also served at the bare prefix and at `prefix/`.
pub fn build_manifest(configs: &[StaticFilesConfig]) -> Result<Vec<StaticManifestEntry>, BridgeError> {
    let mut manifest = Vec::new();

    for config in configs {
        if config.directory.is_empty() || config.route_prefix.is_empty() {
            continue;
        }
        let root = Path::new(&config.directory);
        let prefix = config.route_prefix.trim_end_matches('/');

        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| BridgeError::static_files(format!("{}: {e}", config.directory)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| BridgeError::static_files(e.to_string()))?
                .to_string_lossy()
                .into_owned();

            manifest.push(read_entry(&normalize_route(&format!("{prefix}/{relative}")), entry.path(), config)?);
        }

        let index = root.join(INDEX_FILE);
        if config.index_file && index.is_file() {
            let route = normalize_route(prefix);
            let entry = read_entry(&route, &index, config)?;
            if !route.ends_with('/') {
                let slashed = StaticManifestEntry { route: format!("{route}/"), ..entry.clone() };
                manifest.push(entry);
                manifest.push(slashed);
            } else {
                manifest.push(entry);
            }
        }
    }

    debug!(entries = manifest.len(), "built static file manifest");
    Ok(manifest)
}

fn read_entry(route: &str, path: &Path, config: &StaticFilesConfig) -> Result<StaticManifestEntry, BridgeError> {
    let content = fs::read(path)?;

    let mut headers = BTreeMap::new();
    headers.insert(http::header::CONTENT_TYPE.as_str().to_owned(), content_type_for(path).to_string());
    if let Some(cache_control) = &config.cache_control {
        headers.insert(http::header::CACHE_CONTROL.as_str().to_owned(), cache_control.clone());
    }

    Ok(StaticManifestEntry { route: route.to_owned(), headers, body: STANDARD.encode(content) })
}

/// Backslashes become slashes, repeated slashes collapse and a leading slash is ensured.
pub fn normalize_route(route: &str) -> String {
    let mut normalized = String::with_capacity(route.len() + 1);
    normalized.push('/');
    for ch in route.chars().map(|ch| if ch == '\\' { '/' } else { ch }) {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }
    normalized
}

pub fn content_type_for(path: &Path) -> Mime {
    let extension = path.extension().map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") => mime::TEXT_HTML,
        Some("txt") => mime::TEXT_PLAIN,
        Some("css") => mime::TEXT_CSS,
        Some("js" | "mjs") => mime::APPLICATION_JAVASCRIPT,
        Some("json") => mime::APPLICATION_JSON,
        Some("svg") => mime::IMAGE_SVG,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "micro-bridge-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(dir.join("css")).unwrap();
        fs::write(dir.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.join("css").join("site.css"), "body{}").unwrap();
        dir
    }

    #[test]
    fn test_normalize_route() {
        assert_eq!(normalize_route("assets//css\\site.css"), "/assets/css/site.css");
        assert_eq!(normalize_route("/"), "/");
        assert_eq!(normalize_route(""), "/");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/B.HTML")), mime::TEXT_HTML);
        assert_eq!(content_type_for(Path::new("app.mjs")), mime::APPLICATION_JAVASCRIPT);
        assert_eq!(content_type_for(Path::new("blob")), mime::APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn test_build_manifest() {
        let dir = scratch_dir("manifest");
        let config = StaticFilesConfig::new(dir.to_string_lossy(), "/static/").with_cache_control("max-age=60");

        let manifest = build_manifest(&[config]).unwrap();
        let routes: Vec<&str> = manifest.iter().map(|entry| entry.route.as_str()).collect();
        assert_eq!(routes, ["/static/css/site.css", "/static/index.html", "/static", "/static/"]);

        let css = &manifest[0];
        assert_eq!(css.headers["content-type"], "text/css");
        assert_eq!(css.headers["cache-control"], "max-age=60");
        assert_eq!(STANDARD.decode(&css.body).unwrap(), b"body{}");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_index_disabled_and_missing_dir() {
        let dir = scratch_dir("noindex");
        let config = StaticFilesConfig::new(dir.to_string_lossy(), "/s").with_index_file(false);
        assert_eq!(build_manifest(&[config]).unwrap().len(), 2);
        fs::remove_dir_all(dir).unwrap();

        let missing = StaticFilesConfig::new("/definitely/not/here", "/x");
        assert!(matches!(build_manifest(&[missing]), Err(BridgeError::StaticFiles { .. })));
    }
}
