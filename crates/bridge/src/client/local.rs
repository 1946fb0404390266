//! The default in-process routing core.

use super::{CoreClient, CoreFactory, CoreRequest, CoreSetup, ResponseSnapshot};
use crate::config::ServerConfig;
use crate::error::BridgeError;
use crate::handler::WireHandler;
use crate::lifecycle::{LifecycleHookRunner, RequestFlow, normalize};
use crate::route::RouteMetadata;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, StatusCode};
use micro_wire::{Body, Request, StructuredResponse, WirePayload, codec};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

const REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCoreFactory;

impl LocalCoreFactory {
    pub fn build(setup: CoreSetup) -> Result<Arc<dyn CoreClient>, BridgeError> {
        Ok(Arc::new(LocalCore::new(setup)?))
    }
}

#[async_trait]
impl CoreFactory for LocalCoreFactory {
    async fn create(&self, setup: CoreSetup) -> Result<Arc<dyn CoreClient>, BridgeError> {
        Self::build(setup)
    }
}

struct StaticEntry {
    headers: BTreeMap<String, String>,
    body: Bytes,
}

/// Routes requests to registered handlers, running the lifecycle hooks around them.
pub struct LocalCore {
    routers: HashMap<Method, matchit::Router<usize>>,
    routes: Vec<RouteMetadata>,
    handlers: HashMap<String, WireHandler>,
    hooks: LifecycleHookRunner,
    config: ServerConfig,
    statics: HashMap<String, StaticEntry>,
    next_request_id: AtomicU64,
}

impl LocalCore {
    pub fn new(setup: CoreSetup) -> Result<Self, BridgeError> {
        let CoreSetup { routes_json, handlers, hooks, config } = setup;
        let routes: Vec<RouteMetadata> = serde_json::from_str(&routes_json)?;
        let config: ServerConfig = config.map(serde_json::from_value).transpose()?.unwrap_or_default();

        let mut routers: HashMap<Method, matchit::Router<usize>> = HashMap::new();
        for (index, route) in routes.iter().enumerate() {
            let method = Method::from_bytes(route.method.to_ascii_uppercase().as_bytes())
                .map_err(|e| BridgeError::invalid_route(&route.path, e))?;
            if !handlers.contains_key(&route.handler_name) {
                return Err(BridgeError::unknown_handler(&route.handler_name));
            }
            routers
                .entry(method)
                .or_insert_with(matchit::Router::new)
                .insert(route.path.as_str(), index)
                .map_err(|e| BridgeError::invalid_route(&route.path, e))?;
        }

        let mut statics = HashMap::with_capacity(config.static_manifest.len());
        for entry in &config.static_manifest {
            let body = STANDARD.decode(&entry.body).map_err(BridgeError::static_files)?;
            statics.insert(entry.route.clone(), StaticEntry { headers: entry.headers.clone(), body: Bytes::from(body) });
        }

        debug!(routes = routes.len(), statics = statics.len(), "local core ready");
        Ok(Self { routers, routes, handlers, hooks, config, statics, next_request_id: AtomicU64::new(1) })
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(&WireHandler, BTreeMap<String, String>)> {
        let matched = self.routers.get(method)?.at(path).ok()?;
        let route = &self.routes[*matched.value];
        let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
        Some((self.handlers.get(&route.handler_name)?, params))
    }

    fn allowed_elsewhere(&self, method: &Method, path: &str) -> bool {
        self.routers.iter().any(|(other, router)| other != method && router.at(path).is_ok())
    }

    async fn handle(&self, handler: &WireHandler, request: Request) -> Result<StructuredResponse, BridgeError> {
        let request = match self.hooks.run_request_hooks(request).await? {
            RequestFlow::Continue(request) => request,
            RequestFlow::ShortCircuit(response) => return self.hooks.on_response(response).await,
        };

        let result = match self.config.request_timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), handler.call(request))
                .await
                .map_err(|_| BridgeError::RequestTimeout { secs })??,
            None => handler.call(request).await?,
        };

        let response = normalize(result).await?;
        self.hooks.on_response(response).await
    }

    /// Turns a failure into an error response and gives the `onError` hooks a chance to replace it.
    async fn fail(&self, e: BridgeError) -> StructuredResponse {
        let (status, message) = match &e {
            BridgeError::RequestTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, e.to_string()),
            BridgeError::Handler { name, source } => {
                error!(handler = %name, cause = %source, "handler failed");
                (StatusCode::INTERNAL_SERVER_ERROR, source.to_string())
            }
            _ => {
                error!(cause = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let response = error_response(status, &message);
        match self.hooks.on_error(response.clone()).await {
            Ok(response) => response,
            Err(hook_error) => {
                error!(cause = %hook_error, "onError hook failed, sending the original error response");
                response
            }
        }
    }

    fn to_snapshot(
        &self,
        response: StructuredResponse,
        request_id: Option<String>,
        head: bool,
    ) -> Result<ResponseSnapshot, BridgeError> {
        let StructuredResponse { status, headers, body } = response;
        let mut headers: BTreeMap<String, String> =
            headers.into_iter().map(|(name, value)| (name.to_ascii_lowercase(), value)).collect();

        let default_type = match &body {
            Body::None => None,
            Body::Json(_) => Some(mime::APPLICATION_JSON),
            Body::Text(_) => Some(mime::TEXT_PLAIN_UTF_8),
            Body::Form(_) | Body::Multipart { .. } => Some(mime::APPLICATION_WWW_FORM_URLENCODED),
            Body::Binary(_) => Some(mime::APPLICATION_OCTET_STREAM),
        };
        if let Some(content_type) = default_type {
            headers.entry(http::header::CONTENT_TYPE.as_str().to_owned()).or_insert_with(|| content_type.to_string());
        }
        if let Some(id) = request_id {
            headers.entry(REQUEST_ID.to_owned()).or_insert(id);
        }

        let body = if head { Bytes::new() } else { body.to_bytes()? };
        Ok(ResponseSnapshot { status, headers, body })
    }

    fn request_id(&self, headers: &BTreeMap<String, String>) -> Option<String> {
        if !self.config.enable_request_id {
            return None;
        }
        let id = headers
            .get(REQUEST_ID)
            .cloned()
            .unwrap_or_else(|| format!("{:016x}", self.next_request_id.fetch_add(1, Ordering::Relaxed)));
        Some(id)
    }
}

#[async_trait]
impl CoreClient for LocalCore {
    async fn call(&self, request: CoreRequest) -> Result<ResponseSnapshot, BridgeError> {
        let CoreRequest { method, path: target, headers, body } = request;
        let (path, query_string) = target.split_once('?').unwrap_or((target.as_str(), ""));
        let headers: BTreeMap<String, String> =
            headers.into_iter().map(|(name, value)| (name.to_ascii_lowercase(), value)).collect();
        let request_id = self.request_id(&headers);
        let head = method == Method::HEAD;

        if (method == Method::GET || head)
            && let Some(entry) = self.statics.get(path)
        {
            let body = if head { Bytes::new() } else { entry.body.clone() };
            return Ok(ResponseSnapshot { status: 200, headers: entry.headers.clone(), body });
        }

        let Some((handler, path_params)) = self.lookup(&method, path) else {
            let status = if self.allowed_elsewhere(&method, path) {
                StatusCode::METHOD_NOT_ALLOWED
            } else {
                StatusCode::NOT_FOUND
            };
            debug!(method = %method, path, status = status.as_u16(), "no route matched");
            return self.to_snapshot(error_response(status, status_reason(status)), request_id, head);
        };

        if let Some(limit) = self.config.max_body_size {
            let size = payload_size(&body)?;
            if size > limit {
                warn!(size, limit, path, "request body too large");
                let status = StatusCode::PAYLOAD_TOO_LARGE;
                return self.to_snapshot(error_response(status, status_reason(status)), request_id, head);
            }
        }

        let (query, raw_query) = parse_query(query_string)?;
        let mut params: BTreeMap<String, Value> = query.clone();
        params.extend(path_params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))));
        let cookies = headers.get(http::header::COOKIE.as_str()).map(String::as_str).map(parse_cookies).unwrap_or_default();

        let payload = WirePayload {
            method: method.as_str().to_owned(),
            path: path.to_owned(),
            path_params,
            params,
            query,
            raw_query,
            headers,
            cookies,
            body_metadata: Some(codec::classify(&body)?),
            body: body.to_wire(),
        };

        let response = match Request::from_payload(payload) {
            Ok(request) => self.handle(handler, request).await,
            Err(e) => Err(e.into()),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => self.fail(e).await,
        };
        self.to_snapshot(response, request_id, head)
    }
}

fn error_response(status: StatusCode, message: &str) -> StructuredResponse {
    StructuredResponse::json(json!({ "error": message })).with_status(status.as_u16())
}

fn status_reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Error")
}

type Query = (BTreeMap<String, Value>, BTreeMap<String, Vec<String>>);

/// Repeated keys become arrays in the parsed view; the raw view keeps every value as text.
/// The request size counted against `maxBodySize`, including multipart file content.
fn payload_size(body: &Body) -> Result<u64, BridgeError> {
    let size = match body {
        Body::Multipart { fields, files } => {
            let fields: usize = fields.iter().map(|(name, value)| name.len() + value.len()).sum();
            let mut files_size = 0;
            for file in files {
                files_size += file.content()?.len();
            }
            fields + files_size
        }
        other => other.to_bytes()?.len(),
    };
    Ok(size as u64)
}

pub fn parse_query(query: &str) -> Result<Query, BridgeError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query).map_err(micro_wire::WireError::invalid_form)?;

    let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in pairs {
        raw.entry(key).or_default().push(value);
    }

    let parsed = raw
        .iter()
        .map(|(key, values)| {
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            (key.clone(), value)
        })
        .collect();
    Ok((parsed, raw))
}

pub fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_owned(), value.trim().trim_matches('"').to_owned()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::client::{HandlerBridge, RequestOptions};
    use crate::config::{BridgeOptions, StaticFilesConfig};
    use crate::error::BoxError;
    use crate::handler::handler_fn;
    use crate::lifecycle::hook_fn;
    use crate::static_files::tests::scratch_dir;
    use std::fs;

    fn bridge(app: App) -> HandlerBridge {
        HandlerBridge::new(app, BridgeOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_query() {
        let (query, raw) = parse_query("tag=a&tag=b&q=hello+world&empty=").unwrap();
        assert_eq!(query["tag"], json!(["a", "b"]));
        assert_eq!(query["q"], json!("hello world"));
        assert_eq!(query["empty"], json!(""));
        assert_eq!(raw["tag"], ["a", "b"]);
        assert!(parse_query("").unwrap().0.is_empty());
    }

    #[test]
    fn test_parse_cookies() {
        let cookies = parse_cookies("session=abc; theme=\"dark\" ;broken; =x");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["session"], "abc");
        assert_eq!(cookies["theme"], "dark");
    }

    #[tokio::test]
    async fn test_request_view_of_handler() {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::get("/users/{id}", "get_user"),
            handler_fn(|request: Request| async move {
                Ok::<_, BoxError>(json!({
                    "id": request.param("id"),
                    "page": request.query().get("page"),
                    "session": request.cookie("session"),
                    "agent": request.header("User-Agent"),
                }))
            }),
        );

        let headers = BTreeMap::from([
            (String::from("User-Agent"), String::from("tests")),
            (String::from("Cookie"), String::from("session=s1")),
        ]);
        let response = bridge(app).get("/users/7?page=2", Some(headers)).await.unwrap();
        assert_eq!(response.json(), json!({"id": "7", "page": "2", "session": "s1", "agent": "tests"}));
        assert!(response.header("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let mut app = App::new();
        app.add_route(RouteMetadata::get("/only-get", "g"), handler_fn(|_r: Request| async { Ok::<_, BoxError>(()) }));
        let bridge = bridge(app);

        assert_eq!(bridge.get("/missing", None).await.unwrap().status(), 404);
        let response = bridge.delete("/only-get", None).await.unwrap();
        assert_eq!(response.status(), 405);
        assert_eq!(response.json(), json!({"error": "Method Not Allowed"}));
    }

    #[tokio::test]
    async fn test_handler_error_runs_on_error_hooks() {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::post("/fail", "fail"),
            handler_fn(|_r: Request| async { Err::<(), BoxError>("database unavailable".into()) }),
        )
        .on_error(hook_fn(|response: StructuredResponse| async move {
            Ok::<_, BoxError>(response.with_header("x-error-hook", "ran"))
        }));

        let response = bridge(app).post("/fail", RequestOptions::new()).await.unwrap();
        assert_eq!(response.status(), 500);
        assert_eq!(response.header("x-error-hook"), Some("ran"));
        assert_eq!(response.json(), json!({"error": "database unavailable"}));
    }

    #[tokio::test]
    async fn test_body_limit_and_timeout() {
        let mut app = App::new();
        app.add_route(RouteMetadata::post("/upload", "upload"), handler_fn(|_r: Request| async { Ok::<_, BoxError>(()) }))
            .add_route(
                RouteMetadata::get("/slow", "slow"),
                handler_fn(|_r: Request| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, BoxError>(())
                }),
            )
            .config(ServerConfig::default().with_max_body_size(Some(4)).with_request_timeout(Some(1)));
        let bridge = bridge(app);

        let response = bridge.post("/upload", RequestOptions::new().binary(vec![0u8; 5])).await.unwrap();
        assert_eq!(response.status(), 413);
        let response = bridge.post("/upload", RequestOptions::new().binary(vec![0u8; 4])).await.unwrap();
        assert_eq!(response.status(), 200);

        let response = bridge.get("/slow", None).await.unwrap();
        assert_eq!(response.status(), 408);
    }

    #[tokio::test]
    async fn test_body_limit_counts_multipart_files() {
        let mut app = App::new();
        app.add_route(RouteMetadata::post("/upload", "upload"), handler_fn(|_r: Request| async { Ok::<_, BoxError>(()) }))
            .config(ServerConfig::default().with_max_body_size(Some(16)));
        let bridge = bridge(app);

        let file = micro_wire::MultipartFile::new("doc", &vec![7u8; 1_000_000]).with_filename("big.bin");
        let response = bridge.post("/upload", RequestOptions::new().multipart(BTreeMap::new(), vec![file])).await.unwrap();
        assert_eq!(response.status(), 413);

        let file = micro_wire::MultipartFile::new("doc", b"tiny").with_filename("t.txt");
        let fields = BTreeMap::from([(String::from("k"), json!("v"))]);
        let response = bridge.post("/upload", RequestOptions::new().multipart(fields, vec![file])).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[test]
    fn test_payload_size() {
        let file = micro_wire::MultipartFile::new("f", b"12345");
        let fields = BTreeMap::from([(String::from("ab"), String::from("cde"))]);
        assert_eq!(payload_size(&Body::Multipart { fields, files: vec![file] }).unwrap(), 10);
        assert_eq!(payload_size(&Body::from("four")).unwrap(), 4);
        assert_eq!(payload_size(&Body::None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_head_and_request_id_passthrough() {
        let mut app = App::new();
        app.add_route(RouteMetadata::head("/ping", "ping"), handler_fn(|_r: Request| async { Ok::<_, BoxError>("pong") }));
        let headers = BTreeMap::from([(String::from("X-Request-Id"), String::from("abc"))]);

        let response = bridge(app).head("/ping", Some(headers)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.raw().is_empty());
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.header("x-request-id"), Some("abc"));
    }

    #[tokio::test]
    async fn test_static_files_served() {
        let dir = scratch_dir("core");
        let mut app = App::new();
        app.config(ServerConfig::default().with_static_files(StaticFilesConfig::new(dir.to_string_lossy(), "/public")));
        let bridge = bridge(app);

        let response = bridge.get("/public/css/site.css", None).await.unwrap();
        assert_eq!(response.text(), "body{}");
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert_eq!(bridge.get("/public/", None).await.unwrap().text(), "<h1>home</h1>");
        assert_eq!(bridge.get("/public", None).await.unwrap().text(), "<h1>home</h1>");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_route_without_handler_is_rejected() {
        let setup = CoreSetup {
            routes_json: json!([{"method": "GET", "path": "/", "handler_name": "missing"}]).to_string(),
            handlers: HashMap::new(),
            hooks: LifecycleHookRunner::default(),
            config: None,
        };
        assert!(matches!(LocalCore::new(setup), Err(BridgeError::UnknownHandler { .. })));
    }
}
