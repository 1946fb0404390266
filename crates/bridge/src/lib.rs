//! The request/response lifecycle bridge between host handlers and a routing core.
//!
//! An [`App`] collects routes, handlers, websocket handlers and lifecycle hooks. A
//! [`HandlerBridge`] drives requests for it through a core client, created lazily and exactly
//! once, and decodes the core's answer into a [`BridgeResponse`]. The [`RuntimeAdapter`] fronts
//! the same bridge with a platform `http` request/response surface and websocket upgrades.
//!
//! Handler return values are normalized through [`IntoHandlerResult`]; lazy bodies are
//! expressed with [`StreamingResponse`].

mod app;
mod config;
mod decompress;
mod error;
mod handler;
mod lifecycle;
mod responder;
mod response;
mod route;
mod streaming;

pub mod background;
pub mod client;
pub mod runtime;
pub mod static_files;
pub mod websocket;

pub use app::App;
pub use background::BackgroundTask;
pub use client::{CoreClient, CoreFactory, CoreRequest, HandlerBridge, RequestOptions, ResponseSnapshot};
pub use config::{BridgeOptions, ServerConfig, StaticFilesConfig, StaticManifestEntry};
pub use decompress::{Decompressor, GzipDecompressor};
pub use error::{BoxError, BridgeError};
pub use handler::{FnHandler, RequestHandler, WireHandler, handler_fn};
pub use lifecycle::{
    FnHook, HookOutcome, HookStage, IntoHookOutcome, LifecycleHookRunner, LifecycleHooks, RequestFlow, RequestHook,
    ResponseHook, hook_fn,
};
pub use responder::{HandlerResult, IntoHandlerResult, Json};
pub use response::BridgeResponse;
pub use route::{RouteMetadata, match_path};
pub use runtime::{Environment, RuntimeAdapter};
pub use streaming::{Chunk, StreamingResponse};
pub use websocket::{
    ServerSocket, WebSocketCallbacks, WebSocketHandler, WebSocketTestConnection, WsMessage, message_fn,
};

pub use micro_wire::{Body, BodyKind, MultipartFile, Request, StructuredResponse, WireError, WirePayload};
