//! WebSocket handlers and the server-side socket abstraction.
//!
//! A [`WebSocketHandler`] is either a set of [`WebSocketCallbacks`] or a bare
//! [`MessageHandler`] function; the shape is fixed when the handler is registered.
//! Both the runtime adapter and the in-memory [`harness`] drive handlers through the
//! same [`WebSocketHandler::open`], [`WebSocketHandler::message`] and
//! [`WebSocketHandler::closed`] calls.

pub mod harness;

use crate::error::{BoxError, BridgeError};
use crate::handler::WireHandler;
use crate::responder::{HandlerResult, IntoHandlerResult};
use async_trait::async_trait;
use bytes::Bytes;
use micro_wire::{Body, Request, WirePayload};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use harness::WebSocketTestConnection;

/// A decoded websocket message.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Text(String),
    Json(Value),
    Binary(Bytes),
}

impl WsMessage {
    /// Text frames carrying valid JSON become [`WsMessage::Json`], anything else stays text.
    pub fn decode_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => WsMessage::Json(value),
            Err(_) => WsMessage::Text(text),
        }
    }

    pub fn json(&self) -> Result<Value, BridgeError> {
        match self {
            WsMessage::Json(value) => Ok(value.clone()),
            WsMessage::Text(text) => serde_json::from_str(text).map_err(|e| BridgeError::MessageNotJson { source: e }),
            WsMessage::Binary(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| BridgeError::MessageNotJson { source: e })
            }
        }
    }

    pub fn text(&self) -> Result<String, BridgeError> {
        match self {
            WsMessage::Text(text) => Ok(text.clone()),
            WsMessage::Json(value) => Ok(serde_json::to_string(value)?),
            WsMessage::Binary(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn bytes(&self) -> Result<Bytes, BridgeError> {
        match self {
            WsMessage::Text(text) => Ok(Bytes::from(text.clone())),
            WsMessage::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            WsMessage::Binary(bytes) => Ok(bytes.clone()),
        }
    }
}

impl From<String> for WsMessage {
    fn from(value: String) -> Self {
        WsMessage::Text(value)
    }
}

impl From<&str> for WsMessage {
    fn from(value: &str) -> Self {
        WsMessage::Text(value.to_owned())
    }
}

impl From<Value> for WsMessage {
    fn from(value: Value) -> Self {
        WsMessage::Json(value)
    }
}

impl From<Bytes> for WsMessage {
    fn from(value: Bytes) -> Self {
        WsMessage::Binary(value)
    }
}

/// A closed flag that flips exactly once.
#[derive(Debug, Default)]
pub struct ClosedFlag(AtomicBool);

impl ClosedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually closed the flag.
    pub fn close_once(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.is_closed() { Err(BridgeError::SocketClosed) } else { Ok(()) }
    }
}

/// The server side of a websocket connection, as seen by handlers.
#[async_trait]
pub trait ServerSocket: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), BridgeError>;

    async fn send_json(&self, value: Value) -> Result<(), BridgeError>;

    async fn send_bytes(&self, _bytes: Bytes) -> Result<(), BridgeError> {
        Err(BridgeError::BinaryUnsupported)
    }

    /// String values go out as text frames, everything else as JSON.
    async fn broadcast(&self, value: Value) -> Result<(), BridgeError> {
        match value {
            Value::String(text) => self.send_text(text).await,
            other => self.send_json(other).await,
        }
    }

    /// Closing more than once has no further effect.
    async fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), BridgeError>;

    fn is_closed(&self) -> bool;
}

/// Sends a message through the `ServerSocket` method matching its kind.
pub async fn send_message(socket: &dyn ServerSocket, message: WsMessage) -> Result<(), BridgeError> {
    match message {
        WsMessage::Text(text) => socket.send_text(text).await,
        WsMessage::Json(value) => socket.send_json(value).await,
        WsMessage::Binary(bytes) => socket.send_bytes(bytes).await,
    }
}

/// Callback-shaped websocket handler.
#[async_trait]
pub trait WebSocketCallbacks: Send + Sync {
    async fn on_open(&self, _socket: &dyn ServerSocket) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_message(&self, socket: &dyn ServerSocket, message: WsMessage) -> Result<HandlerResult, BoxError>;

    async fn on_close(&self, _code: Option<u16>, _reason: Option<String>) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A bare message function, called once per inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn call(&self, message: WsMessage) -> Result<HandlerResult, BoxError>;
}

pub struct FnMessageHandler<F> {
    f: F,
}

pub fn message_fn<F, Fut, R, E>(f: F) -> FnMessageHandler<F>
where
    F: Fn(WsMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    R: IntoHandlerResult,
    E: Into<BoxError>,
{
    FnMessageHandler { f }
}

#[async_trait]
impl<F, Fut, R, E> MessageHandler for FnMessageHandler<F>
where
    F: Fn(WsMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    R: IntoHandlerResult + Send,
    E: Into<BoxError> + Send,
{
    async fn call(&self, message: WsMessage) -> Result<HandlerResult, BoxError> {
        let result = (self.f)(message).await.map_err(Into::into)?;
        Ok(result.into_handler_result())
    }
}

/// Serves websocket messages with a plain HTTP handler bound to a `GET` route.
///
/// Each message becomes a `GET` request for the matched path whose body is the decoded
/// message; the handler's result is the reply.
#[derive(Debug)]
pub struct RouteMessageHandler {
    handler: WireHandler,
    path: String,
    path_params: BTreeMap<String, String>,
}

impl RouteMessageHandler {
    pub fn new(handler: WireHandler, path: impl Into<String>, path_params: BTreeMap<String, String>) -> Self {
        Self { handler, path: path.into(), path_params }
    }

    fn request_for(&self, message: WsMessage) -> Result<Request, BridgeError> {
        let body = match message {
            WsMessage::Text(text) => Value::String(text),
            WsMessage::Json(value) => value,
            WsMessage::Binary(bytes) => Body::Binary(bytes).to_wire(),
        };
        let params = self.path_params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        let payload = WirePayload {
            method: "GET".into(),
            path: self.path.clone(),
            path_params: self.path_params.clone(),
            params,
            body,
            ..WirePayload::default()
        };
        Ok(Request::from_payload(payload)?)
    }
}

#[async_trait]
impl MessageHandler for RouteMessageHandler {
    async fn call(&self, message: WsMessage) -> Result<HandlerResult, BoxError> {
        let request = self.request_for(message)?;
        Ok(self.handler.call(request).await?)
    }
}

#[derive(Clone)]
pub enum WebSocketHandler {
    Callbacks(Arc<dyn WebSocketCallbacks>),
    Function(Arc<dyn MessageHandler>),
}

impl WebSocketHandler {
    pub fn callbacks<C: WebSocketCallbacks + 'static>(callbacks: C) -> Self {
        WebSocketHandler::Callbacks(Arc::new(callbacks))
    }

    pub fn function<H: MessageHandler + 'static>(handler: H) -> Self {
        WebSocketHandler::Function(Arc::new(handler))
    }

    pub async fn open(&self, socket: &dyn ServerSocket) -> Result<(), BridgeError> {
        match self {
            WebSocketHandler::Callbacks(callbacks) => {
                callbacks.on_open(socket).await.map_err(BridgeError::websocket_handler)
            }
            WebSocketHandler::Function(_) => Ok(()),
        }
    }

    /// Dispatches one message and returns the reply to send back, if any.
    pub async fn message(&self, socket: &dyn ServerSocket, message: WsMessage) -> Result<Option<WsMessage>, BridgeError> {
        let result = match self {
            WebSocketHandler::Callbacks(callbacks) => callbacks.on_message(socket, message).await,
            WebSocketHandler::Function(handler) => handler.call(message).await,
        };
        encode_reply(result.map_err(BridgeError::websocket_handler)?)
    }

    pub async fn closed(&self, code: Option<u16>, reason: Option<String>) -> Result<(), BridgeError> {
        match self {
            WebSocketHandler::Callbacks(callbacks) => {
                callbacks.on_close(code, reason).await.map_err(BridgeError::websocket_handler)
            }
            WebSocketHandler::Function(_) => Ok(()),
        }
    }
}

impl Debug for WebSocketHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WebSocketHandler::Callbacks(_) => f.write_str("WebSocketHandler::Callbacks"),
            WebSocketHandler::Function(_) => f.write_str("WebSocketHandler::Function"),
        }
    }
}

/// Text is sent as text, binary as bytes, everything else as JSON. Streams are refused.
pub fn encode_reply(result: HandlerResult) -> Result<Option<WsMessage>, BridgeError> {
    let message = match result {
        HandlerResult::Empty => return Ok(None),
        HandlerResult::Text(text) => WsMessage::Text(text),
        HandlerResult::Binary(bytes) => WsMessage::Binary(bytes),
        HandlerResult::Json(value) => WsMessage::Json(value),
        HandlerResult::Response(response) => WsMessage::Json(response.to_value()),
        HandlerResult::Stream(_) => return Err(BridgeError::StreamingOverWebSocket),
    };
    Ok(Some(message))
}
