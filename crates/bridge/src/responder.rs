//! Conversion of handler return values into a [`HandlerResult`].
//!
//! Handlers may return any type implementing [`IntoHandlerResult`]: strings, JSON values,
//! bytes, structured responses, streams, or a `(StatusCode, T)` pair to override the status.
//! The raw result is normalized into a [`StructuredResponse`] later by the lifecycle runner.

use crate::streaming::StreamingResponse;
use bytes::Bytes;
use http::StatusCode;
use micro_wire::{Body, StructuredResponse};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

/// The raw value a handler or hook produced, before normalization.
#[derive(Debug)]
pub enum HandlerResult {
    Empty,
    Text(String),
    Json(Value),
    Binary(Bytes),
    Response(StructuredResponse),
    Stream(StreamingResponse),
}

impl HandlerResult {
    /// Only results built from a [`StreamingResponse`] are streaming; JSON is never inspected.
    pub fn is_streaming(&self) -> bool {
        matches!(self, HandlerResult::Stream(_))
    }

    pub fn with_status(self, status: u16) -> Self {
        let body = match self {
            HandlerResult::Response(response) => return HandlerResult::Response(response.with_status(status)),
            HandlerResult::Stream(stream) => return HandlerResult::Stream(stream.with_status(status)),
            HandlerResult::Empty => Body::None,
            HandlerResult::Text(text) => Body::Text(text),
            HandlerResult::Json(value) => Body::from(value),
            HandlerResult::Binary(bytes) => Body::Binary(bytes),
        };
        HandlerResult::Response(StructuredResponse::new(body).with_status(status))
    }
}

pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for HandlerResult {
    fn into_handler_result(self) -> HandlerResult {
        self
    }
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Empty
    }
}

impl IntoHandlerResult for String {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Text(self)
    }
}

impl IntoHandlerResult for &'static str {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Text(self.to_owned())
    }
}

impl IntoHandlerResult for Value {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Json(self)
    }
}

impl IntoHandlerResult for Bytes {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Binary(self)
    }
}

impl IntoHandlerResult for Vec<u8> {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Binary(Bytes::from(self))
    }
}

impl IntoHandlerResult for StructuredResponse {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Response(self)
    }
}

impl IntoHandlerResult for StreamingResponse {
    fn into_handler_result(self) -> HandlerResult {
        HandlerResult::Stream(self)
    }
}

/// `None` is an empty result.
impl<T: IntoHandlerResult> IntoHandlerResult for Option<T> {
    fn into_handler_result(self) -> HandlerResult {
        match self {
            Some(t) => t.into_handler_result(),
            None => HandlerResult::Empty,
        }
    }
}

impl<T: IntoHandlerResult> IntoHandlerResult for (StatusCode, T) {
    fn into_handler_result(self) -> HandlerResult {
        let (status, result) = self;
        result.into_handler_result().with_status(status.as_u16())
    }
}

impl<T: IntoHandlerResult> IntoHandlerResult for (T, StatusCode) {
    fn into_handler_result(self) -> HandlerResult {
        let (result, status) = self;
        (status, result).into_handler_result()
    }
}

impl<T: IntoHandlerResult> IntoHandlerResult for Box<T> {
    fn into_handler_result(self) -> HandlerResult {
        (*self).into_handler_result()
    }
}

/// Serializes any `T` as a JSON result.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoHandlerResult for Json<T> {
    fn into_handler_result(self) -> HandlerResult {
        match serde_json::to_value(&self.0) {
            Ok(value) => HandlerResult::Json(value),
            Err(e) => {
                error!(cause = %e, "failed to serialize json result");
                let body = json!({"error": e.to_string()});
                HandlerResult::Response(StructuredResponse::json(body).with_status(500))
            }
        }
    }
}
