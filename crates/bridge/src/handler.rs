use crate::error::{BoxError, BridgeError};
use crate::responder::{HandlerResult, IntoHandlerResult};
use async_trait::async_trait;
use micro_wire::{Request, WirePayload};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, request: Request) -> Result<HandlerResult, BoxError>;
}

/// a holder which represents any async `Fn(Request) -> Result<R, E>`
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    fn new(f: F) -> Self {
        Self { f }
    }
}

pub fn handler_fn<F, Fut, R, E>(f: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    R: IntoHandlerResult,
    E: Into<BoxError>,
{
    FnHandler::new(f)
}

#[async_trait]
impl<F, Fut, R, E> RequestHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    R: IntoHandlerResult + Send,
    E: Into<BoxError> + Send,
{
    async fn invoke(&self, request: Request) -> Result<HandlerResult, BoxError> {
        let result = (self.f)(request).await.map_err(Into::into)?;
        Ok(result.into_handler_result())
    }
}

/// A named handler that accepts whatever the core hands over and always invokes the
/// inner handler with a [`Request`].
#[derive(Clone)]
pub struct WireHandler {
    name: String,
    inner: Arc<dyn RequestHandler>,
}

impl WireHandler {
    pub fn new(name: impl Into<String>, inner: Arc<dyn RequestHandler>) -> Self {
        Self { name: name.into(), inner }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, request: Request) -> Result<HandlerResult, BridgeError> {
        self.inner.invoke(request).await.map_err(|e| BridgeError::handler(&self.name, e))
    }

    pub async fn call_payload(&self, payload: WirePayload) -> Result<HandlerResult, BridgeError> {
        self.call(Request::from_payload(payload)?).await
    }

    /// Invokes the handler with the raw wire text of a request.
    pub async fn call_raw(&self, raw: &str) -> Result<HandlerResult, BridgeError> {
        self.call(Request::from_raw(raw)?).await
    }
}

impl Debug for WireHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireHandler").field("name", &self.name).finish_non_exhaustive()
    }
}
