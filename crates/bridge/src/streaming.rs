//! Lazily produced handler results.
//!
//! A [`StreamingResponse`] wraps a single-use stream of [`Chunk`]s. Draining it normalizes
//! every chunk to bytes and concatenates them in order; once drained, further drains yield
//! an empty body.

use crate::error::{BoxError, BridgeError};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use micro_wire::{Body, StructuredResponse};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single item produced by a streaming handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Empty,
    Text(String),
    Bytes(Bytes),
    /// a window over a larger buffer; only `len` bytes starting at `offset` are emitted
    View { buffer: Bytes, offset: usize, len: usize },
    Json(Value),
}

impl Chunk {
    pub fn into_bytes(self) -> Result<Bytes, BridgeError> {
        let bytes = match self {
            Chunk::Empty | Chunk::Json(Value::Null) => Bytes::new(),
            Chunk::Text(text) => Bytes::from(text),
            Chunk::Bytes(bytes) => bytes,
            Chunk::View { buffer, offset, len } => {
                let start = offset.min(buffer.len());
                let end = start.saturating_add(len).min(buffer.len());
                Bytes::copy_from_slice(&buffer[start..end])
            }
            Chunk::Json(value) => Bytes::from(serde_json::to_vec(&value)?),
        };
        Ok(bytes)
    }
}

impl From<String> for Chunk {
    fn from(value: String) -> Self {
        Chunk::Text(value)
    }
}

impl From<&str> for Chunk {
    fn from(value: &str) -> Self {
        Chunk::Text(value.to_owned())
    }
}

impl From<Bytes> for Chunk {
    fn from(value: Bytes) -> Self {
        Chunk::Bytes(value)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(value: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(value))
    }
}

impl From<Value> for Chunk {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Chunk::Empty,
            Value::String(text) => Chunk::Text(text),
            other => Chunk::Json(other),
        }
    }
}

impl<T: Into<Chunk>> From<Option<T>> for Chunk {
    fn from(value: Option<T>) -> Self {
        value.map_or(Chunk::Empty, Into::into)
    }
}

macro_rules! json_chunk {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Chunk {
                fn from(value: $ty) -> Self {
                    Chunk::Json(Value::from(value))
                }
            }
        )*
    };
}

json_chunk!(i32, i64, u32, u64, f64, bool);

type ChunkStream = BoxStream<'static, Result<Chunk, BoxError>>;

/// A streaming handler result.
///
/// Cloning shares the underlying stream, so only one clone ever observes the chunks.
#[derive(Clone)]
pub struct StreamingResponse {
    stream: Arc<Mutex<Option<ChunkStream>>>,
    status: u16,
    headers: BTreeMap<String, String>,
}

impl StreamingResponse {
    pub fn new<S, C>(stream: S) -> Self
    where
        S: Stream<Item = C> + Send + 'static,
        C: Into<Chunk>,
    {
        Self::from_boxed(stream.map(|chunk| Ok::<Chunk, BoxError>(chunk.into())).boxed())
    }

    /// A stream whose items may fail; the first failure aborts draining.
    pub fn try_new<S, C, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<C, E>> + Send + 'static,
        C: Into<Chunk>,
        E: Into<BoxError>,
    {
        Self::from_boxed(
            stream.map(|item| -> Result<Chunk, BoxError> { item.map(Into::into).map_err(Into::into) }).boxed(),
        )
    }

    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Chunk>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures::stream::iter(iter))
    }

    fn from_boxed(stream: ChunkStream) -> Self {
        Self { stream: Arc::new(Mutex::new(Some(stream))), status: 200, headers: BTreeMap::new() }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub async fn is_consumed(&self) -> bool {
        self.stream.lock().await.is_none()
    }

    /// Drains the stream into one buffer. A single-chunk stream is returned without copying.
    pub async fn collect(&self) -> Result<Bytes, BridgeError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(Bytes::new());
        };

        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            chunks.push(item.map_err(BridgeError::stream)?.into_bytes()?);
        }

        Ok(match chunks.len() {
            0 => Bytes::new(),
            1 => chunks.swap_remove(0),
            _ => {
                let total = chunks.iter().map(Bytes::len).sum();
                let mut buf = BytesMut::with_capacity(total);
                for chunk in &chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        })
    }

    /// Drains the stream into a binary structured response carrying this stream's status and headers.
    pub async fn into_structured(self) -> Result<StructuredResponse, BridgeError> {
        let bytes = self.collect().await?;
        Ok(StructuredResponse { status: self.status, headers: self.headers, body: Body::Binary(bytes) })
    }
}

/// Only JSON arrays are accepted as a static chunk source.
impl TryFrom<Value> for StreamingResponse {
    type Error = BridgeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => Ok(Self::from_iter(items)),
            other => Err(BridgeError::invalid_stream_source(format!("expected an array of chunks, got {other}"))),
        }
    }
}

impl Debug for StreamingResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;

    fn check_send_sync<T: Send + Sync>() {}

    #[test]
    fn is_send_sync() {
        check_send_sync::<StreamingResponse>();
    }

    #[tokio::test]
    async fn test_mixed_chunks_concatenate_in_order() {
        let stream = StreamingResponse::from_iter([Chunk::from("a"), Chunk::from(vec![98u8]), Chunk::from(3)]);
        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(b"ab3"));
    }

    #[tokio::test]
    async fn test_async_source() {
        let source = futures::stream::iter(vec!["x", "y"]).then(|s| async move { s.to_uppercase() });
        let stream = StreamingResponse::new(source);
        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(b"XY"));
    }

    #[tokio::test]
    async fn test_chunk_normalization() {
        let buffer = Bytes::from_static(b"0123456789");
        let chunks = vec![
            Chunk::View { buffer: buffer.clone(), offset: 2, len: 3 },
            Chunk::Empty,
            Chunk::from(json!({"k": [1]})),
            Chunk::View { buffer, offset: 8, len: 10 },
        ];
        let stream = StreamingResponse::from_iter(chunks);
        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(br#"234{"k":[1]}89"#));
    }

    #[tokio::test]
    async fn test_single_chunk_is_not_copied() {
        let chunk = Bytes::from(vec![7u8; 64]);
        let ptr = chunk.as_ptr();
        let stream = StreamingResponse::from_iter([chunk]);

        let collected = stream.collect().await.unwrap();
        assert_eq!(collected.as_ptr(), ptr);
    }

    #[tokio::test]
    async fn test_second_drain_is_empty() {
        let stream = StreamingResponse::from_iter(["once"]);
        let shared = stream.clone();

        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(b"once"));
        assert!(shared.is_consumed().await);
        assert!(shared.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_stream() {
        let items: Vec<Result<&str, io::Error>> = vec![Ok("a"), Err(io::Error::other("boom"))];
        let stream = StreamingResponse::try_new(futures::stream::iter(items));
        assert!(matches!(stream.collect().await, Err(BridgeError::Stream { .. })));
    }

    #[tokio::test]
    async fn test_from_value() {
        let stream = StreamingResponse::try_from(json!(["a", null, 1])).unwrap();
        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(b"a1"));

        assert!(matches!(StreamingResponse::try_from(json!({"a": 1})), Err(BridgeError::InvalidStreamSource { .. })));
        assert!(StreamingResponse::try_from(json!("abc")).is_err());
    }

    #[tokio::test]
    async fn test_into_structured() {
        let stream = StreamingResponse::from_iter(["data: 1\n\n"])
            .with_status(206)
            .with_header("content-type", "text/event-stream");
        let response = stream.into_structured().await.unwrap();

        assert_eq!(response.status, 206);
        assert_eq!(response.headers["content-type"], "text/event-stream");
        assert_eq!(response.body, Body::Binary(Bytes::from_static(b"data: 1\n\n")));
    }
}
