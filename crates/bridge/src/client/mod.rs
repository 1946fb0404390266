//! The handler bridge: drives requests through a routing core and decodes its responses.
//!
//! The core itself sits behind [`CoreFactory`] and [`CoreClient`]. It is created lazily on the
//! first request, exactly once, however many requests race for it. [`LocalCoreFactory`] is the
//! default in-process core.

pub mod local;

use crate::app::App;
use crate::config::BridgeOptions;
use crate::error::BridgeError;
use crate::handler::WireHandler;
use crate::lifecycle::LifecycleHookRunner;
use crate::response::BridgeResponse;
use crate::route::{RouteMetadata, match_path};
use crate::static_files::build_manifest;
use crate::websocket::{RouteMessageHandler, WebSocketHandler, WebSocketTestConnection};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use micro_wire::body::flatten_form_values;
use micro_wire::{Body, MultipartFile, WireError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub use local::{LocalCore, LocalCoreFactory};

/// Everything a core needs to start serving.
#[derive(Debug, Clone)]
pub struct CoreSetup {
    /// the registered routes as a JSON array of snake_case route metadata
    pub routes_json: String,
    pub handlers: HashMap<String, WireHandler>,
    pub hooks: LifecycleHookRunner,
    /// the camelCase server config, only present when it differs from the defaults
    pub config: Option<Value>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoreFactory: Send + Sync {
    async fn create(&self, setup: CoreSetup) -> Result<Arc<dyn CoreClient>, BridgeError>;
}

#[async_trait]
pub trait CoreClient: Send + Sync {
    async fn call(&self, request: CoreRequest) -> Result<ResponseSnapshot, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct CoreRequest {
    pub method: Method,
    /// path including any query string
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
}

impl CoreRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: BTreeMap::new(), body: Body::None }
    }
}

/// What the core sends back for one request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartOptions {
    pub fields: BTreeMap<String, Value>,
    pub files: Vec<MultipartFile>,
}

/// Headers and body for a request. At most one body option is expected.
///
/// When several are set, precedence is multipart, form, raw form text, JSON, then binary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub json: Option<Value>,
    pub form: Option<BTreeMap<String, Value>>,
    pub form_raw: Option<String>,
    pub multipart: Option<MultipartOptions>,
    pub binary: Option<Bytes>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.json = Some(value);
        self
    }

    pub fn form<K: Into<String>>(mut self, fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        self.form = Some(fields.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    pub fn form_raw(mut self, text: impl Into<String>) -> Self {
        self.form_raw = Some(text.into());
        self
    }

    pub fn multipart(mut self, fields: BTreeMap<String, Value>, files: Vec<MultipartFile>) -> Self {
        self.multipart = Some(MultipartOptions { fields, files });
        self
    }

    pub fn binary(mut self, bytes: impl Into<Bytes>) -> Self {
        self.binary = Some(bytes.into());
        self
    }

    fn set_options(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.multipart.is_some() {
            set.push("multipart");
        }
        if self.form.is_some() {
            set.push("form");
        }
        if self.form_raw.is_some() {
            set.push("form_raw");
        }
        if self.json.is_some() {
            set.push("json");
        }
        if self.binary.is_some() {
            set.push("binary");
        }
        set
    }

    /// Picks the body by precedence and fills in a matching `content-type` unless one was given.
    pub fn resolve(self, strict: bool) -> Result<(BTreeMap<String, String>, Body), BridgeError> {
        let set = self.set_options();
        if set.len() > 1 {
            if strict {
                return Err(BridgeError::ambiguous_body(format!("several body options set: {}", set.join(", "))));
            }
            warn!(options = %set.join(", "), "several body options set, using `{}`", set[0]);
        }

        let Self { mut headers, json, form, form_raw, multipart, binary } = self;

        let (body, content_type) = if let Some(MultipartOptions { fields, files }) = multipart {
            let fields = flatten_form_values(&fields);
            (Body::Multipart { fields, files }, Some(mime::MULTIPART_FORM_DATA))
        } else if let Some(form) = form {
            (Body::Form(flatten_form_values(&form)), Some(mime::APPLICATION_WWW_FORM_URLENCODED))
        } else if let Some(text) = form_raw {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&text).map_err(WireError::invalid_form)?;
            (Body::Form(pairs.into_iter().collect()), Some(mime::APPLICATION_WWW_FORM_URLENCODED))
        } else if let Some(value) = json {
            (Body::from(value), Some(mime::APPLICATION_JSON))
        } else if let Some(bytes) = binary {
            (Body::Binary(bytes), Some(mime::APPLICATION_OCTET_STREAM))
        } else {
            (Body::None, None)
        };

        if let Some(content_type) = content_type
            && !headers.keys().any(|name| name.eq_ignore_ascii_case(http::header::CONTENT_TYPE.as_str()))
        {
            headers.insert(http::header::CONTENT_TYPE.as_str().to_owned(), content_type.to_string());
        }
        Ok((headers, body))
    }
}

macro_rules! bridge_method_without_body {
    ($name:ident, $method:expr) => {
        pub async fn $name(
            &self,
            path: &str,
            headers: Option<BTreeMap<String, String>>,
        ) -> Result<BridgeResponse, BridgeError> {
            let options = RequestOptions { headers: headers.unwrap_or_default(), ..RequestOptions::default() };
            self.request($method, path, options).await
        }
    };
}

macro_rules! bridge_method_with_body {
    ($name:ident, $method:expr) => {
        pub async fn $name(&self, path: &str, options: RequestOptions) -> Result<BridgeResponse, BridgeError> {
            self.request($method, path, options).await
        }
    };
}

/// Drives requests for an [`App`] through a routing core.
pub struct HandlerBridge {
    app: App,
    options: BridgeOptions,
    setup: CoreSetup,
    client: OnceCell<Arc<dyn CoreClient>>,
}

impl HandlerBridge {
    pub fn new(app: App, options: BridgeOptions) -> Result<Self, BridgeError> {
        let routes_json = serde_json::to_string(app.routes())?;
        let setup = CoreSetup {
            routes_json,
            handlers: app.handlers().clone(),
            hooks: LifecycleHookRunner::new(app.lifecycle_hooks()),
            config: None,
        };
        Ok(Self { app, options, setup, client: OnceCell::new() })
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    bridge_method_without_body!(get, Method::GET);
    bridge_method_without_body!(delete, Method::DELETE);
    bridge_method_without_body!(head, Method::HEAD);
    bridge_method_without_body!(options, Method::OPTIONS);
    bridge_method_without_body!(trace, Method::TRACE);
    bridge_method_with_body!(post, Method::POST);
    bridge_method_with_body!(put, Method::PUT);
    bridge_method_with_body!(patch, Method::PATCH);

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<BridgeResponse, BridgeError> {
        let (headers, body) = options.resolve(self.options.strict_body_options)?;
        let snapshot = self.dispatch(CoreRequest { method, path: path.to_owned(), headers, body }).await?;
        Ok(BridgeResponse::from_snapshot(snapshot, self.options.decompressor.clone()))
    }

    /// Sends a prepared request to the core and returns its untouched snapshot.
    pub async fn dispatch(&self, request: CoreRequest) -> Result<ResponseSnapshot, BridgeError> {
        self.client().await?.call(request).await
    }

    async fn client(&self) -> Result<&Arc<dyn CoreClient>, BridgeError> {
        self.client.get_or_try_init(|| self.create_client()).await
    }

    async fn create_client(&self) -> Result<Arc<dyn CoreClient>, BridgeError> {
        let mut setup = self.setup.clone();

        if let Some(config) = self.app.server_config() {
            let mut config = config.clone();
            if !config.static_files.is_empty() {
                let static_files = config.static_files.clone();
                config.static_manifest = tokio::task::spawn_blocking(move || build_manifest(&static_files))
                    .await
                    .map_err(BridgeError::core_init)??;
            }
            if !config.is_default() {
                setup.config = Some(serde_json::to_value(&config)?);
            }
        }

        debug!(routes = self.app.routes().len(), handlers = setup.handlers.len(), "creating core client");
        self.options.core_factory.create(setup).await
    }

    /// Websocket routes are searched first, then `GET` routes.
    pub fn find_websocket_route(&self, path: &str) -> Option<(&RouteMetadata, BTreeMap<String, String>)> {
        find_route(self.app.websocket_routes(), path, None)
            .or_else(|| find_route(self.app.routes(), path, Some(Method::GET.as_str())))
    }

    /// A `GET` route without a websocket handler of its own is served by its HTTP handler,
    /// see [`RouteMessageHandler`].
    pub fn websocket_handler_for(&self, path: &str) -> Result<WebSocketHandler, BridgeError> {
        let (route, params) = self.find_websocket_route(path).ok_or_else(|| BridgeError::no_websocket_route(path))?;
        if let Some(handler) = self.app.websocket_handler(&route.handler_name) {
            return Ok(handler.clone());
        }
        let handler = self
            .app
            .handlers()
            .get(&route.handler_name)
            .cloned()
            .ok_or_else(|| BridgeError::unknown_handler(&route.handler_name))?;
        debug!(path, handler = %route.handler_name, "serving websocket with http handler");
        Ok(WebSocketHandler::function(RouteMessageHandler::new(handler, path, params)))
    }

    /// Opens an in-memory websocket connection to the handler registered for `path`.
    pub async fn websocket_connect(&self, path: &str) -> Result<WebSocketTestConnection, BridgeError> {
        self.client().await?;
        WebSocketTestConnection::connect(self.websocket_handler_for(path)?).await
    }
}

fn find_route<'a>(
    routes: &'a [RouteMetadata],
    path: &str,
    method: Option<&str>,
) -> Option<(&'a RouteMetadata, BTreeMap<String, String>)> {
    routes
        .iter()
        .filter(|route| method.is_none_or(|method| route.method_matches(method)))
        .find_map(|route| match_path(&route.path, path).map(|params| (route, params)))
}

impl std::fmt::Debug for HandlerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBridge")
            .field("app", &self.app)
            .field("options", &self.options)
            .field("initialized", &self.client.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::gzip;
    use crate::error::BoxError;
    use crate::handler::handler_fn;
    use crate::lifecycle::{HookOutcome, hook_fn};
    use crate::responder::HandlerResult;
    use crate::websocket::{WsMessage, message_fn};
    use micro_wire::{Request, StructuredResponse};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_app() -> App {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::post("/items", "create_item"),
            handler_fn(|request: Request| async move { request.json() }),
        );
        app
    }

    #[tokio::test]
    async fn test_post_json_echo() {
        let bridge = HandlerBridge::new(echo_app(), BridgeOptions::default()).unwrap();
        let body = json!({"name": "Widget", "price": 9.5});

        let response = bridge.post("/items", RequestOptions::new().json(body.clone())).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.json(), body);
    }

    #[tokio::test]
    async fn test_on_request_short_circuit_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut app = App::new();
        app.add_route(
            RouteMetadata::get("/secret", "secret"),
            handler_fn(move |_request: Request| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>("secret")
                }
            }),
        )
        .on_request(hook_fn(|request: Request| async move {
            if request.header("authorization").is_some() {
                return Ok::<_, BoxError>(HookOutcome::Continue(request));
            }
            let denied = StructuredResponse::json(json!({"error": "Unauthorized"})).with_status(401);
            Ok(HookOutcome::Respond(HandlerResult::Response(denied)))
        }));

        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();
        let response = bridge.get("/secret", None).await.unwrap();
        assert_eq!(response.status(), 401);
        assert_eq!(response.json(), json!({"error": "Unauthorized"}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let headers = BTreeMap::from([(String::from("Authorization"), String::from("token"))]);
        let response = bridge.get("/secret", Some(headers)).await.unwrap();
        assert_eq!(response.text(), "secret");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_websocket_echo() {
        let mut app = App::new();
        app.websocket(
            RouteMetadata::get("/ws", "chat"),
            WebSocketHandler::function(message_fn(|message: WsMessage| async move {
                Ok::<_, BoxError>(json!({"echo": message.json()?["msg"].clone()}))
            })),
        );

        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();
        let connection = bridge.websocket_connect("/ws").await.unwrap();
        connection.send_json(json!({"msg": "hi"})).await.unwrap();
        assert_eq!(connection.receive_json().await.unwrap(), json!({"echo": "hi"}));

        assert!(matches!(bridge.websocket_connect("/nope").await, Err(BridgeError::NoWebSocketRoute { .. })));
    }

    #[tokio::test]
    async fn test_post_json_keeps_decimal_price() {
        let bridge = HandlerBridge::new(echo_app(), BridgeOptions::default()).unwrap();
        let body = json!({"name": "Foo", "price": 35.4});

        let response = bridge.post("/items", RequestOptions::new().json(body.clone())).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.json(), body);
        assert_eq!(response.json()["price"].as_f64(), Some(35.4));
        assert!(response.text().contains("35.4"));
    }

    #[tokio::test]
    async fn test_on_request_raw_json_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut app = App::new();
        app.add_route(
            RouteMetadata::get("/private", "private"),
            handler_fn(move |_request: Request| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>("private")
                }
            }),
        )
        .on_request(hook_fn(|_request: Request| async { Ok::<_, BoxError>(json!({"status": 401, "body": null})) }));

        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();
        let response = bridge.get("/private", None).await.unwrap();
        assert_eq!(response.status(), 401);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_websocket_text_frame_echo() {
        let mut app = App::new();
        app.websocket(
            RouteMetadata::get("/ws", "chat"),
            WebSocketHandler::function(message_fn(|message: WsMessage| async move {
                Ok::<_, BoxError>(json!({"echo": message.text()?}))
            })),
        );

        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();
        let connection = bridge.websocket_connect("/ws").await.unwrap();
        connection.send_text("hi").await.unwrap();
        assert_eq!(connection.receive_json().await.unwrap(), json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn test_gzip_response_decoding() {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::get("/compressed", "compressed"),
            handler_fn(|_request: Request| async {
                Ok::<_, BoxError>(
                    StructuredResponse::new(Body::Binary(Bytes::from(gzip(b"hello"))))
                        .with_header("Content-Encoding", "gzip"),
                )
            }),
        );

        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();
        let response = bridge.get("/compressed", None).await.unwrap();
        assert_eq!(response.text(), "hello");
        assert_eq!(response.raw(), Bytes::from(gzip(b"hello")));

        let bridge = HandlerBridge::new(bridge.app().clone(), BridgeOptions::new().without_decompressor()).unwrap();
        let response = bridge.get("/compressed", None).await.unwrap();
        assert_eq!(response.bytes(), Bytes::from(gzip(b"hello")));
    }

    #[tokio::test]
    async fn test_core_created_once_under_concurrency() {
        let mut factory = MockCoreFactory::new();
        factory.expect_create().times(1).returning(|setup| {
            assert!(setup.routes_json.contains("create_item"));
            assert!(setup.config.is_none());
            LocalCoreFactory::build(setup)
        });

        let bridge = HandlerBridge::new(echo_app(), BridgeOptions::new().with_core_factory(factory)).unwrap();
        let options = || RequestOptions::new().json(json!({"n": 1}));
        let (a, b, c) = tokio::join!(
            bridge.post("/items", options()),
            bridge.post("/items", options()),
            bridge.post("/items", options())
        );
        for response in [a, b, c] {
            assert_eq!(response.unwrap().json(), json!({"n": 1}));
        }
    }

    #[tokio::test]
    async fn test_core_init_failure_surfaces() {
        let mut factory = MockCoreFactory::new();
        factory.expect_create().returning(|_| Err(BridgeError::core_init("no core")));

        let bridge = HandlerBridge::new(echo_app(), BridgeOptions::new().with_core_factory(factory)).unwrap();
        assert!(matches!(bridge.get("/items", None).await, Err(BridgeError::CoreInit { .. })));
    }

    #[test]
    fn test_body_option_precedence() {
        let options = RequestOptions::new().json(json!({"a": 1})).form([("b", json!(2))]).binary(vec![1u8]);
        let (headers, body) = options.clone().resolve(false).unwrap();
        assert_eq!(body, Body::Form(BTreeMap::from([(String::from("b"), String::from("2"))])));
        assert_eq!(headers["content-type"], "application/x-www-form-urlencoded");

        assert!(matches!(options.resolve(true), Err(BridgeError::AmbiguousBody { .. })));

        let (headers, body) =
            RequestOptions::new().header("Content-Type", "text/csv").form_raw("a=1&b=x+y").resolve(true).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["Content-Type"], "text/csv");
        let Body::Form(fields) = body else { panic!("expected form body") };
        assert_eq!(fields["b"], "x y");
    }

    #[tokio::test]
    async fn test_multipart_and_binary_bodies() {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::post("/upload", "upload"),
            handler_fn(|request: Request| async move {
                let files: Vec<String> = request.files().iter().filter_map(|f| f.filename.clone()).collect();
                Ok::<_, BoxError>(json!({"kind": request.body_kind(), "form": request.form()?, "files": files}))
            }),
        )
        .add_route(
            RouteMetadata::put("/blob", "blob"),
            handler_fn(|request: Request| async move { request.bytes().map(|bytes| bytes.len().to_string()) }),
        );
        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();

        let file = MultipartFile::new("doc", b"content").with_filename("a.txt");
        let fields = BTreeMap::from([(String::from("title"), json!("report"))]);
        let response = bridge.post("/upload", RequestOptions::new().multipart(fields, vec![file])).await.unwrap();
        assert_eq!(response.json(), json!({"kind": "multipart", "form": {"title": "report"}, "files": ["a.txt"]}));

        let response = bridge.put("/blob", RequestOptions::new().binary(vec![0u8, 1, 2, 255])).await.unwrap();
        assert_eq!(response.json(), json!(4));
    }

    #[tokio::test]
    async fn test_websocket_falls_back_to_get_routes() {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::get("/rooms/{room}", "room"),
            handler_fn(|r: Request| async move {
                Ok::<_, BoxError>(json!({"room": r.param("room"), "said": r.text()?, "method": r.method()}))
            }),
        )
        .websocket(
                RouteMetadata::new("WS", "/live", "live"),
                WebSocketHandler::function(message_fn(|_m: WsMessage| async { Ok::<_, BoxError>("live") })),
            );
        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();

        let (route, params) = bridge.find_websocket_route("/rooms/42").unwrap();
        assert_eq!(route.handler_name, "room");
        assert_eq!(params["room"], "42");
        assert_eq!(bridge.find_websocket_route("/live").unwrap().0.handler_name, "live");

        let ws = bridge.websocket_connect("/rooms/7").await.unwrap();
        ws.send_text("hi").await.unwrap();
        assert_eq!(ws.receive_json().await.unwrap(), json!({"room": "7", "said": "hi", "method": "GET"}));

        assert!(matches!(bridge.websocket_handler_for("/nowhere"), Err(BridgeError::NoWebSocketRoute { .. })));
    }

    #[tokio::test]
    async fn test_websocket_get_route_echo() {
        let mut app = App::new();
        app.add_route(
            RouteMetadata::get("/echo", "echo"),
            handler_fn(|request: Request| async move { Ok::<_, BoxError>(json!({"echo": request.text()?})) }),
        );
        let bridge = HandlerBridge::new(app, BridgeOptions::default()).unwrap();

        let ws = bridge.websocket_connect("/echo").await.unwrap();
        ws.send_text("hi").await.unwrap();
        assert_eq!(ws.receive_json().await.unwrap(), json!({"echo": "hi"}));

        // JSON messages arrive as a JSON body, so the text view refuses them.
        let error = ws.send_json(json!({"n": 1})).await.unwrap_err();
        assert!(matches!(error, BridgeError::WebSocketHandler { .. }));
    }
}
