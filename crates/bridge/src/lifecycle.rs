//! Lifecycle hooks and result normalization.
//!
//! Five stages run in a fixed order around a handler call:
//!
//! 1. `onRequest`, `preValidation`, `preHandler`: request stages. A hook either passes a
//!    (possibly modified) [`Request`] on, or answers with a response. Answering skips every
//!    remaining request hook and the handler itself.
//! 2. `onResponse`: runs on the normalized response, whether it came from the handler or
//!    from a short-circuiting request hook.
//! 3. `onError`: runs instead of `onResponse` when the handler failed.
//!
//! Response hooks that return a request are ignored and the current response is kept.
//! Hooks of one stage run strictly in registration order.

use crate::error::{BoxError, BridgeError};
use crate::responder::HandlerResult;
use crate::streaming::StreamingResponse;
use async_trait::async_trait;
use micro_wire::{Body, Request, StructuredResponse, WirePayload, WireError};
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    OnRequest,
    PreValidation,
    PreHandler,
    OnResponse,
    OnError,
}

impl HookStage {
    pub const REQUEST_STAGES: [HookStage; 3] = [HookStage::OnRequest, HookStage::PreValidation, HookStage::PreHandler];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::OnRequest => "onRequest",
            HookStage::PreValidation => "preValidation",
            HookStage::PreHandler => "preHandler",
            HookStage::OnResponse => "onResponse",
            HookStage::OnError => "onError",
        }
    }

    pub fn is_request_stage(&self) -> bool {
        matches!(self, HookStage::OnRequest | HookStage::PreValidation | HookStage::PreHandler)
    }
}

impl Display for HookStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook decided.
#[derive(Debug)]
pub enum HookOutcome {
    /// keep going with this request
    Continue(Request),
    /// stop and answer with this result
    Respond(HandlerResult),
}

pub trait IntoHookOutcome {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError>;
}

impl IntoHookOutcome for HookOutcome {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(self)
    }
}

impl IntoHookOutcome for Request {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(HookOutcome::Continue(self))
    }
}

impl IntoHookOutcome for HandlerResult {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(HookOutcome::Respond(self))
    }
}

impl IntoHookOutcome for StructuredResponse {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(HookOutcome::Respond(HandlerResult::Response(self)))
    }
}

impl IntoHookOutcome for StreamingResponse {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(HookOutcome::Respond(HandlerResult::Stream(self)))
    }
}

impl IntoHookOutcome for String {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(HookOutcome::Respond(HandlerResult::Text(self)))
    }
}

impl IntoHookOutcome for &'static str {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        Ok(HookOutcome::Respond(HandlerResult::Text(self.to_owned())))
    }
}

/// A JSON object with string `method` and `path` fields is read back as a request,
/// anything else is a response.
impl IntoHookOutcome for Value {
    fn into_hook_outcome(self) -> Result<HookOutcome, BridgeError> {
        if is_request_shaped(&self) {
            let payload: WirePayload = serde_json::from_value(self)?;
            return Ok(HookOutcome::Continue(Request::from_payload(payload)?));
        }
        Ok(HookOutcome::Respond(HandlerResult::Json(self)))
    }
}

fn is_request_shaped(value: &Value) -> bool {
    value.get("method").is_some_and(Value::is_string) && value.get("path").is_some_and(Value::is_string)
}

#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn call(&self, request: Request) -> Result<HookOutcome, BoxError>;
}

#[async_trait]
pub trait ResponseHook: Send + Sync {
    async fn call(&self, response: StructuredResponse) -> Result<HookOutcome, BoxError>;
}

/// an async closure used as a request or response hook
pub struct FnHook<F> {
    f: F,
}

pub fn hook_fn<F>(f: F) -> FnHook<F> {
    FnHook { f }
}

#[async_trait]
impl<F, Fut, O, E> RequestHook for FnHook<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, E>> + Send,
    O: IntoHookOutcome + Send,
    E: Into<BoxError> + Send,
{
    async fn call(&self, request: Request) -> Result<HookOutcome, BoxError> {
        let outcome = (self.f)(request).await.map_err(Into::into)?;
        Ok(outcome.into_hook_outcome()?)
    }
}

#[async_trait]
impl<F, Fut, O, E> ResponseHook for FnHook<F>
where
    F: Fn(StructuredResponse) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, E>> + Send,
    O: IntoHookOutcome + Send,
    E: Into<BoxError> + Send,
{
    async fn call(&self, response: StructuredResponse) -> Result<HookOutcome, BoxError> {
        let outcome = (self.f)(response).await.map_err(Into::into)?;
        Ok(outcome.into_hook_outcome()?)
    }
}

/// The five hook sequences. Insertion order is execution order.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_request: Vec<Arc<dyn RequestHook>>,
    pre_validation: Vec<Arc<dyn RequestHook>>,
    pre_handler: Vec<Arc<dyn RequestHook>>,
    on_response: Vec<Arc<dyn ResponseHook>>,
    on_error: Vec<Arc<dyn ResponseHook>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.on_request.push(Arc::new(hook));
        self
    }

    pub fn pre_validation<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.pre_validation.push(Arc::new(hook));
        self
    }

    pub fn pre_handler<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.pre_handler.push(Arc::new(hook));
        self
    }

    pub fn on_response<H: ResponseHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.on_response.push(Arc::new(hook));
        self
    }

    pub fn on_error<H: ResponseHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.on_error.push(Arc::new(hook));
        self
    }

    pub fn request_hooks(&self, stage: HookStage) -> &[Arc<dyn RequestHook>] {
        match stage {
            HookStage::OnRequest => &self.on_request,
            HookStage::PreValidation => &self.pre_validation,
            HookStage::PreHandler => &self.pre_handler,
            HookStage::OnResponse | HookStage::OnError => &[],
        }
    }

    pub fn response_hooks(&self, stage: HookStage) -> &[Arc<dyn ResponseHook>] {
        match stage {
            HookStage::OnResponse => &self.on_response,
            HookStage::OnError => &self.on_error,
            _ => &[],
        }
    }

    pub fn len(&self, stage: HookStage) -> usize {
        if stage.is_request_stage() { self.request_hooks(stage).len() } else { self.response_hooks(stage).len() }
    }

    pub fn is_empty(&self) -> bool {
        self.on_request.is_empty()
            && self.pre_validation.is_empty()
            && self.pre_handler.is_empty()
            && self.on_response.is_empty()
            && self.on_error.is_empty()
    }
}

impl Debug for LifecycleHooks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_request", &self.on_request.len())
            .field("pre_validation", &self.pre_validation.len())
            .field("pre_handler", &self.pre_handler.len())
            .field("on_response", &self.on_response.len())
            .field("on_error", &self.on_error.len())
            .finish()
    }
}

/// Result of the request stages.
#[derive(Debug)]
pub enum RequestFlow {
    Continue(Request),
    ShortCircuit(StructuredResponse),
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleHookRunner {
    hooks: LifecycleHooks,
}

impl LifecycleHookRunner {
    pub fn new(hooks: LifecycleHooks) -> Self {
        Self { hooks }
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Runs `onRequest`, `preValidation` and `preHandler` in order, stopping at the first
    /// hook that answers with a response.
    pub async fn run_request_hooks(&self, mut request: Request) -> Result<RequestFlow, BridgeError> {
        for stage in HookStage::REQUEST_STAGES {
            for hook in self.hooks.request_hooks(stage) {
                match hook.call(request).await.map_err(|e| BridgeError::hook(stage, e))? {
                    HookOutcome::Continue(next) => request = next,
                    HookOutcome::Respond(result) => {
                        debug!(stage = %stage, "request hook answered, skipping handler");
                        return Ok(RequestFlow::ShortCircuit(normalize(result).await?));
                    }
                }
            }
        }
        Ok(RequestFlow::Continue(request))
    }

    /// Runs one response stage, each hook replacing the current response.
    pub async fn run_response_hooks(
        &self,
        stage: HookStage,
        mut response: StructuredResponse,
    ) -> Result<StructuredResponse, BridgeError> {
        for hook in self.hooks.response_hooks(stage) {
            match hook.call(response.clone()).await.map_err(|e| BridgeError::hook(stage, e))? {
                HookOutcome::Continue(_) => debug!(stage = %stage, "response hook returned a request, keeping response"),
                HookOutcome::Respond(result) => response = normalize(result).await?,
            }
        }
        Ok(response)
    }

    pub async fn on_response(&self, response: StructuredResponse) -> Result<StructuredResponse, BridgeError> {
        self.run_response_hooks(HookStage::OnResponse, response).await
    }

    pub async fn on_error(&self, response: StructuredResponse) -> Result<StructuredResponse, BridgeError> {
        self.run_response_hooks(HookStage::OnError, response).await
    }
}

/// Normalizes a raw result into a [`StructuredResponse`], draining streams.
pub async fn normalize(result: HandlerResult) -> Result<StructuredResponse, BridgeError> {
    let response = match result {
        HandlerResult::Empty => StructuredResponse::default(),
        HandlerResult::Text(text) => normalize_text(text)?,
        HandlerResult::Json(value) => normalize_value(value)?,
        HandlerResult::Binary(bytes) => StructuredResponse::new(Body::Binary(bytes)),
        HandlerResult::Response(response) => response,
        HandlerResult::Stream(stream) => stream.into_structured().await?,
    };
    Ok(response)
}

/// Text that parses as JSON is normalized as that JSON, other text becomes a text body.
pub fn normalize_text(text: String) -> Result<StructuredResponse, WireError> {
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => normalize_value(value),
        Err(_) => Ok(StructuredResponse::text(text)),
    }
}

/// An object exposing any of `status`, `statusCode`, `headers` or `body` is read as a
/// structured response; any other value becomes the body of a 200 response.
pub fn normalize_value(value: Value) -> Result<StructuredResponse, WireError> {
    match value {
        Value::String(text) => normalize_text(text),
        value if StructuredResponse::looks_structured(&value) => StructuredResponse::from_value(&value),
        value => Ok(StructuredResponse::new(Body::from_wire(&value)?)),
    }
}
