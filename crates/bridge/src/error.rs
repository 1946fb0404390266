use crate::lifecycle::HookStage;
use micro_wire::WireError;
use std::error::Error;
use std::io;
use thiserror::Error;

/// Errors raised by user code: handlers, hooks and websocket callbacks.
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("wire error: {source}")]
    Wire {
        #[from]
        source: WireError,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("{stage} hook failed: {source}")]
    Hook { stage: HookStage, source: BoxError },

    #[error("handler `{name}` failed: {source}")]
    Handler { name: String, source: BoxError },

    #[error("handler `{name}` is not registered")]
    UnknownHandler { name: String },

    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("ambiguous request body: {reason}")]
    AmbiguousBody { reason: String },

    #[error("core client failed to start: {reason}")]
    CoreInit { reason: String },

    #[error("request timed out after {secs}s")]
    RequestTimeout { secs: u64 },

    #[error("core request failed: {source}")]
    Core { source: BoxError },

    #[error("invalid stream source: {reason}")]
    InvalidStreamSource { reason: String },

    #[error("stream failed: {source}")]
    Stream { source: BoxError },

    #[error("streaming responses are not supported over websocket")]
    StreamingOverWebSocket,

    #[error("no websocket route matches `{path}`")]
    NoWebSocketRoute { path: String },

    #[error("No WebSocket messages available")]
    NoMessages,

    #[error("websocket message is not JSON: {source}")]
    MessageNotJson { source: serde_json::Error },

    #[error("websocket message is not valid utf-8")]
    MessageNotText,

    #[error("websocket is closed")]
    SocketClosed,

    #[error("websocket send failed: {source}")]
    Send { source: BoxError },

    #[error("websocket handler failed: {source}")]
    WebSocketHandler { source: BoxError },

    #[error("background task `{name}` failed: {source}")]
    Background { name: String, source: BoxError },

    #[error("binary frames are not supported by this socket")]
    BinaryUnsupported,

    #[error("no supported hosting environment detected")]
    UnsupportedEnvironment,

    #[error("static files error: {reason}")]
    StaticFiles { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl BridgeError {
    pub fn hook(stage: HookStage, source: BoxError) -> Self {
        Self::Hook { stage, source }
    }

    pub fn handler<S: ToString>(name: S, source: BoxError) -> Self {
        Self::Handler { name: name.to_string(), source }
    }

    pub fn unknown_handler<S: ToString>(name: S) -> Self {
        Self::UnknownHandler { name: name.to_string() }
    }

    pub fn invalid_route<P: ToString, R: ToString>(path: P, reason: R) -> Self {
        Self::InvalidRoute { path: path.to_string(), reason: reason.to_string() }
    }

    pub fn ambiguous_body<S: ToString>(str: S) -> Self {
        Self::AmbiguousBody { reason: str.to_string() }
    }

    pub fn core_init<S: ToString>(str: S) -> Self {
        Self::CoreInit { reason: str.to_string() }
    }

    pub fn core<E: Into<BoxError>>(e: E) -> Self {
        Self::Core { source: e.into() }
    }

    pub fn invalid_stream_source<S: ToString>(str: S) -> Self {
        Self::InvalidStreamSource { reason: str.to_string() }
    }

    pub fn stream<E: Into<BoxError>>(e: E) -> Self {
        Self::Stream { source: e.into() }
    }

    pub fn no_websocket_route<S: ToString>(path: S) -> Self {
        Self::NoWebSocketRoute { path: path.to_string() }
    }

    pub fn send<E: Into<BoxError>>(e: E) -> Self {
        Self::Send { source: e.into() }
    }

    pub fn websocket_handler<E: Into<BoxError>>(e: E) -> Self {
        Self::WebSocketHandler { source: e.into() }
    }

    pub fn background<S: ToString, E: Into<BoxError>>(name: S, e: E) -> Self {
        Self::Background { name: name.to_string(), source: e.into() }
    }

    pub fn static_files<S: ToString>(str: S) -> Self {
        Self::StaticFiles { reason: str.to_string() }
    }
}
