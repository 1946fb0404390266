//! Fronts a [`HandlerBridge`] with a platform request/response surface.
//!
//! The adapter turns an [`App`] into one [`FetchHandler`] and binds it to the first hosting
//! primitive found in an [`Environment`]. Websocket upgrade attempts are intercepted before
//! the HTTP path.

pub mod host;
pub mod multipart;
pub mod socket;

pub use host::{
    ClientSocket, Environment, FetchHandler, Frame, Host, HttpRequest, HttpResponse, Incoming, ListenerHost,
    NativeSocket, Primitive, ServeHost, SocketPairHost, UpgradeHost, Upgraded,
};
pub use socket::{HostSocket, run_session};

use crate::app::App;
use crate::background;
use crate::client::{CoreRequest, HandlerBridge};
use crate::config::BridgeOptions;
use crate::error::{BoxError, BridgeError};
use crate::response::BridgeResponse;
use crate::websocket::WebSocketHandler;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use micro_wire::{Body, WireError};
use mime::Mime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const SUPPORTED_METHODS: [Method; 8] = [
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
    Method::DELETE,
    Method::POST,
    Method::PUT,
    Method::PATCH,
];

/// One platform-neutral request handler for an [`App`].
#[derive(Clone)]
pub struct RuntimeAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    bridge: HandlerBridge,
    primitive: Option<Primitive>,
}

impl RuntimeAdapter {
    pub fn new(app: App, options: BridgeOptions, environment: &Environment) -> Result<Self, BridgeError> {
        let bridge = HandlerBridge::new(app, options)?;
        Ok(Self { inner: Arc::new(Inner { bridge, primitive: environment.detect() }) })
    }

    pub fn bridge(&self) -> &HandlerBridge {
        &self.inner.bridge
    }

    pub fn primitive(&self) -> Option<&Primitive> {
        self.inner.primitive.as_ref()
    }

    /// Binds the adapter to the detected primitive and returns the serve future.
    ///
    /// Fails before anything is awaited when the environment has no hosting primitive.
    pub fn run(&self) -> Result<BoxFuture<'static, Result<(), BoxError>>, BridgeError> {
        let primitive = self.primitive().ok_or(BridgeError::UnsupportedEnvironment)?;

        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        // a subscriber installed by the embedding application wins
        let _ = tracing::subscriber::set_global_default(subscriber);

        info!(primitive = primitive.kind(), host = primitive.host().name(), "runtime adapter serving");
        Ok(primitive.host().serve(Arc::new(self.clone())))
    }

    pub async fn fetch(&self, request: HttpRequest) -> HttpResponse {
        if !SUPPORTED_METHODS.contains(request.method()) {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        if wants_upgrade(request.headers()) {
            return self.upgrade(&request);
        }

        let core_request = match self.core_request(request) {
            Ok(core_request) => core_request,
            Err(e) => {
                warn!(cause = %e, "failed to read request body");
                return text_response(StatusCode::BAD_REQUEST, e.to_string());
            }
        };

        match self.inner.bridge.dispatch(core_request).await {
            Ok(snapshot) => into_http_response(&BridgeResponse::from_snapshot(snapshot, None)),
            Err(e) => {
                error!(cause = %e, "request dispatch failed");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    fn upgrade(&self, request: &HttpRequest) -> HttpResponse {
        let path = request.uri().path();
        let handler = match self.inner.bridge.websocket_handler_for(path) {
            Ok(handler) => handler,
            Err(e) => {
                debug!(path, cause = %e, "websocket upgrade without handler");
                return text_response(StatusCode::NOT_FOUND, "Not Found");
            }
        };

        match self.primitive() {
            Some(Primitive::Serve(host)) => match host.upgrade(request) {
                Some(upgraded) => {
                    start_session(handler, upgraded);
                    switching_protocols()
                }
                None => text_response(StatusCode::BAD_REQUEST, "WebSocket upgrade failed"),
            },
            Some(Primitive::Native(host)) => match host.upgrade(request) {
                Ok((response, upgraded)) => {
                    start_session(handler, upgraded);
                    response
                }
                Err(e) => {
                    warn!(cause = %e, "native websocket upgrade failed");
                    text_response(StatusCode::BAD_REQUEST, "WebSocket upgrade failed")
                }
            },
            Some(Primitive::SocketPair(host)) => {
                let (client, upgraded) = host.socket_pair();
                start_session(handler, upgraded);
                let mut response = switching_protocols();
                response.extensions_mut().insert(client);
                response
            }
            Some(Primitive::Listener(_)) | None => {
                text_response(StatusCode::NOT_IMPLEMENTED, "WebSocket is not supported in this environment")
            }
        }
    }

    fn core_request(&self, request: HttpRequest) -> Result<CoreRequest, BridgeError> {
        let (parts, bytes) = request.into_parts();
        let path = parts.uri.path_and_query().map_or("/", |path| path.as_str());

        let mut core_request = CoreRequest::new(parts.method.clone(), path);
        core_request.body = self.shape_body(&parts.headers, &bytes)?;
        core_request.headers = header_map(&parts.headers);
        Ok(core_request)
    }

    /// Shapes the body by its content type: JSON, form, multipart, anything else is binary.
    fn shape_body(&self, headers: &HeaderMap, bytes: &Bytes) -> Result<Body, BridgeError> {
        if bytes.is_empty() {
            return Ok(Body::None);
        }
        let Some(content_type) = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok())
        else {
            return Ok(Body::Binary(bytes.clone()));
        };

        if content_type.subtype() == mime::JSON || content_type.suffix() == Some(mime::JSON) {
            return Ok(match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => Body::from(value),
                Err(_) => Body::Binary(bytes.clone()),
            });
        }

        if content_type.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
            let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes).map_err(WireError::invalid_form)?;
            return Ok(Body::Form(fields.into_iter().collect()));
        }

        if content_type.essence_str() == mime::MULTIPART_FORM_DATA.essence_str() {
            return match self.primitive() {
                Some(primitive) => primitive.host().parse_form_data(&content_type, bytes),
                None => multipart::parse(&content_type, bytes),
            };
        }

        Ok(Body::Binary(bytes.clone()))
    }
}

#[async_trait]
impl FetchHandler for RuntimeAdapter {
    async fn call(&self, request: HttpRequest) -> HttpResponse {
        self.fetch(request).await
    }
}

impl Debug for RuntimeAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeAdapter")
            .field("bridge", &self.inner.bridge)
            .field("primitive", &self.inner.primitive)
            .finish()
    }
}

fn start_session(handler: WebSocketHandler, upgraded: Upgraded) {
    // failures are logged by the background task itself
    let _session = background::spawn("websocket-session", run_session(handler, upgraded));
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    let websocket = headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("upgrade"));
    websocket && connection
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    map
}

fn into_http_response(response: &BridgeResponse) -> HttpResponse {
    let mut http_response = HttpResponse::new(response.raw());
    *http_response.status_mut() = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let headers = http_response.headers_mut();
    for (name, value) in response.headers() {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "dropping invalid response header"),
        }
    }
    http_response
}

fn text_response(status: StatusCode, text: impl Into<String>) -> HttpResponse {
    let mut response = HttpResponse::new(Bytes::from(text.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn switching_protocols() -> HttpResponse {
    let mut response = HttpResponse::new(Bytes::new());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    response
}
