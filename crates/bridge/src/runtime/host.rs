//! Hosting primitives the runtime adapter can serve through.
//!
//! A host environment exposes some subset of four primitives. They are tried in a fixed
//! order by [`Environment::detect`]:
//!
//! 1. [`ServeHost`]: a single-process serve loop with its own in-place upgrade call
//! 2. [`UpgradeHost`]: a native serve loop whose upgrade call hands back the 101 response
//! 3. [`SocketPairHost`]: creates a client/server socket pair, the client half travels in the response
//! 4. [`ListenerHost`]: a plain request listener without websocket support

use super::multipart;
use crate::error::{BoxError, BridgeError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use micro_wire::Body;
use mime::Mime;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = http::Response<Bytes>;

/// A websocket frame as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close { code: Option<u16>, reason: String },
}

/// The host's server-side socket.
#[async_trait]
pub trait NativeSocket: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<(), BoxError>;

    async fn close(&self, code: u16, reason: &str) -> Result<(), BoxError>;
}

/// Inbound frames of one connection; the stream ends when the peer goes away.
pub type Incoming = BoxStream<'static, Frame>;

pub struct Upgraded {
    pub socket: Arc<dyn NativeSocket>,
    pub incoming: Incoming,
}

impl Debug for Upgraded {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgraded").finish_non_exhaustive()
    }
}

/// The client half of a socket pair, attached to the 101 response as an extension.
#[derive(Clone)]
pub struct ClientSocket(pub Arc<dyn NativeSocket>);

impl Debug for ClientSocket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientSocket")
    }
}

/// What a host calls for every request it receives.
#[async_trait]
pub trait FetchHandler: Send + Sync {
    async fn call(&self, request: HttpRequest) -> HttpResponse;
}

pub trait Host: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts serving; the future resolves when the host stops.
    fn serve(&self, handler: Arc<dyn FetchHandler>) -> BoxFuture<'static, Result<(), BoxError>>;

    /// Parses a `multipart/form-data` body into a multipart [`Body`].
    fn parse_form_data(&self, content_type: &Mime, body: &[u8]) -> Result<Body, BridgeError> {
        multipart::parse(content_type, body)
    }
}

pub trait ServeHost: Host {
    /// Upgrades in place; `None` when the request could not be upgraded.
    fn upgrade(&self, request: &HttpRequest) -> Option<Upgraded>;
}

pub trait UpgradeHost: Host {
    fn upgrade(&self, request: &HttpRequest) -> Result<(HttpResponse, Upgraded), BoxError>;
}

pub trait SocketPairHost: Host {
    fn socket_pair(&self) -> (ClientSocket, Upgraded);
}

pub trait ListenerHost: Host {}

/// The primitive chosen for this environment.
#[derive(Clone)]
pub enum Primitive {
    Serve(Arc<dyn ServeHost>),
    Native(Arc<dyn UpgradeHost>),
    SocketPair(Arc<dyn SocketPairHost>),
    Listener(Arc<dyn ListenerHost>),
}

impl Primitive {
    pub fn host(&self) -> &dyn Host {
        match self {
            Primitive::Serve(host) => host.as_ref(),
            Primitive::Native(host) => host.as_ref(),
            Primitive::SocketPair(host) => host.as_ref(),
            Primitive::Listener(host) => host.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Primitive::Serve(_) => "serve",
            Primitive::Native(_) => "native",
            Primitive::SocketPair(_) => "socket-pair",
            Primitive::Listener(_) => "listener",
        }
    }
}

impl Debug for Primitive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Primitive::{}({})", self.kind(), self.host().name())
    }
}

/// The hosting primitives available in the current process.
#[derive(Clone, Default)]
pub struct Environment {
    serve: Option<Arc<dyn ServeHost>>,
    native: Option<Arc<dyn UpgradeHost>>,
    socket_pair: Option<Arc<dyn SocketPairHost>>,
    listener: Option<Arc<dyn ListenerHost>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serve<H: ServeHost + 'static>(mut self, host: H) -> Self {
        self.serve = Some(Arc::new(host));
        self
    }

    pub fn with_native<H: UpgradeHost + 'static>(mut self, host: H) -> Self {
        self.native = Some(Arc::new(host));
        self
    }

    pub fn with_socket_pair<H: SocketPairHost + 'static>(mut self, host: H) -> Self {
        self.socket_pair = Some(Arc::new(host));
        self
    }

    pub fn with_listener<H: ListenerHost + 'static>(mut self, host: H) -> Self {
        self.listener = Some(Arc::new(host));
        self
    }

    pub fn detect(&self) -> Option<Primitive> {
        if let Some(host) = &self.serve {
            return Some(Primitive::Serve(Arc::clone(host)));
        }
        if let Some(host) = &self.native {
            return Some(Primitive::Native(Arc::clone(host)));
        }
        if let Some(host) = &self.socket_pair {
            return Some(Primitive::SocketPair(Arc::clone(host)));
        }
        self.listener.as_ref().map(|host| Primitive::Listener(Arc::clone(host)))
    }
}

impl Debug for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("serve", &self.serve.is_some())
            .field("native", &self.native.is_some())
            .field("socket_pair", &self.socket_pair.is_some())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
