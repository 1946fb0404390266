//! An in-memory websocket connection for tests.
//!
//! Messages sent to the connection are dispatched straight to the handler; every reply,
//! and everything the handler pushes through its [`ServerSocket`], lands in a FIFO queue
//! read back with the `receive_*` methods.

use super::{ClosedFlag, ServerSocket, WebSocketHandler, WsMessage};
use crate::error::BridgeError;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

type Pending = Mutex<VecDeque<WsMessage>>;

fn lock(pending: &Pending) -> MutexGuard<'_, VecDeque<WsMessage>> {
    // the queue is only touched by short non-panicking sections
    pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct HarnessSocket {
    pending: Pending,
    closed: ClosedFlag,
    handler: WebSocketHandler,
}

impl HarnessSocket {
    fn enqueue(&self, message: WsMessage) -> Result<(), BridgeError> {
        self.closed.ensure_open()?;
        lock(&self.pending).push_back(message);
        Ok(())
    }
}

#[async_trait]
impl ServerSocket for HarnessSocket {
    async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        self.enqueue(WsMessage::Text(text))
    }

    async fn send_json(&self, value: Value) -> Result<(), BridgeError> {
        self.enqueue(WsMessage::Json(value))
    }

    async fn send_bytes(&self, bytes: Bytes) -> Result<(), BridgeError> {
        self.enqueue(WsMessage::Binary(bytes))
    }

    async fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), BridgeError> {
        if !self.closed.close_once() {
            return Ok(());
        }
        self.handler.closed(code, reason).await
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

pub struct WebSocketTestConnection {
    socket: HarnessSocket,
}

impl WebSocketTestConnection {
    /// Opens a connection, running the handler's `on_open` callback.
    pub async fn connect(handler: WebSocketHandler) -> Result<Self, BridgeError> {
        let socket = HarnessSocket { pending: Pending::default(), closed: ClosedFlag::new(), handler };
        socket.handler.open(&socket).await?;
        Ok(Self { socket })
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), BridgeError> {
        self.dispatch(WsMessage::Text(text.into())).await
    }

    pub async fn send_json(&self, value: Value) -> Result<(), BridgeError> {
        self.dispatch(WsMessage::Json(value)).await
    }

    pub async fn send_bytes(&self, bytes: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.dispatch(WsMessage::Binary(bytes.into())).await
    }

    async fn dispatch(&self, message: WsMessage) -> Result<(), BridgeError> {
        self.socket.closed.ensure_open()?;
        // a reply is queued even when the handler closed the socket while producing it
        if let Some(reply) = self.socket.handler.message(&self.socket, message).await? {
            lock(&self.socket.pending).push_back(reply);
        }
        Ok(())
    }

    fn next_message(&self) -> Result<WsMessage, BridgeError> {
        lock(&self.socket.pending).pop_front().ok_or(BridgeError::NoMessages)
    }

    pub async fn receive_json(&self) -> Result<Value, BridgeError> {
        self.next_message()?.json()
    }

    pub async fn receive_text(&self) -> Result<String, BridgeError> {
        self.next_message()?.text()
    }

    pub async fn receive_bytes(&self) -> Result<Bytes, BridgeError> {
        self.next_message()?.bytes()
    }

    pub fn pending(&self) -> usize {
        lock(&self.socket.pending).len()
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// Drops pending messages and runs `on_close`. Later calls do nothing.
    pub async fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), BridgeError> {
        if self.socket.is_closed() {
            return Ok(());
        }
        let dropped = {
            let mut pending = lock(&self.socket.pending);
            let dropped = pending.len();
            pending.clear();
            dropped
        };
        debug!(dropped, "closing websocket test connection");
        self.socket.close(code, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::responder::HandlerResult;
    use crate::websocket::{WebSocketCallbacks, message_fn};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WebSocketCallbacks for Counting {
        async fn on_open(&self, socket: &dyn ServerSocket) -> Result<(), BoxError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            socket.send_text("welcome".into()).await?;
            Ok(())
        }

        async fn on_message(&self, socket: &dyn ServerSocket, message: WsMessage) -> Result<HandlerResult, BoxError> {
            socket.broadcast(json!("side")).await?;
            Ok(HandlerResult::Json(json!({"got": message.text()?})))
        }

        async fn on_close(&self, _code: Option<u16>, _reason: Option<String>) -> Result<(), BoxError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_function_handler_echo() {
        let handler = WebSocketHandler::function(message_fn(|message: WsMessage| async move {
            Ok::<_, BoxError>(json!({"echo": message.json()?["msg"].clone()}))
        }));
        let connection = WebSocketTestConnection::connect(handler).await.unwrap();

        connection.send_json(json!({"msg": "hi"})).await.unwrap();
        assert_eq!(connection.receive_json().await.unwrap(), json!({"echo": "hi"}));
        assert!(matches!(connection.receive_json().await, Err(BridgeError::NoMessages)));
    }

    #[tokio::test]
    async fn test_callbacks_queue_in_order() {
        let closed = Arc::new(AtomicUsize::new(0));
        let handler = WebSocketHandler::callbacks(Counting { closed: closed.clone(), ..Counting::default() });
        let connection = WebSocketTestConnection::connect(handler).await.unwrap();

        connection.send_bytes(Bytes::from_static(b"raw")).await.unwrap();
        assert_eq!(connection.receive_text().await.unwrap(), "welcome");
        assert_eq!(connection.receive_text().await.unwrap(), "side");
        assert_eq!(connection.receive_bytes().await.unwrap(), Bytes::from_static(br#"{"got":"raw"}"#));

        connection.send_text("again").await.unwrap();
        assert_eq!(connection.pending(), 2);
        connection.close(Some(1000), None).await.unwrap();
        connection.close(Some(1000), None).await.unwrap();

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(connection.pending(), 0);
        assert!(matches!(connection.send_text("late").await, Err(BridgeError::SocketClosed)));
    }

    struct CloseOnMessage;

    #[async_trait]
    impl WebSocketCallbacks for CloseOnMessage {
        async fn on_message(&self, socket: &dyn ServerSocket, _message: WsMessage) -> Result<HandlerResult, BoxError> {
            socket.close(Some(1000), Some("bye".into())).await?;
            Ok(HandlerResult::Text("last words".into()))
        }
    }

    #[tokio::test]
    async fn test_reply_queued_after_handler_closes() {
        let connection = WebSocketTestConnection::connect(WebSocketHandler::callbacks(CloseOnMessage)).await.unwrap();

        connection.send_text("hello").await.unwrap();
        assert!(connection.is_closed());
        assert_eq!(connection.receive_text().await.unwrap(), "last words");
        assert!(matches!(connection.send_text("again").await, Err(BridgeError::SocketClosed)));
    }

    #[tokio::test]
    async fn test_text_reply_is_not_json() {
        let handler =
            WebSocketHandler::function(message_fn(|_message: WsMessage| async { Ok::<_, BoxError>("plain text") }));
        let connection = WebSocketTestConnection::connect(handler).await.unwrap();

        connection.send_text("x").await.unwrap();
        assert!(matches!(connection.receive_json().await, Err(BridgeError::MessageNotJson { .. })));
    }

    #[tokio::test]
    async fn test_handler_error_surfaces() {
        let handler = WebSocketHandler::function(message_fn(|_message: WsMessage| async {
            Err::<(), BoxError>("boom".into())
        }));
        let connection = WebSocketTestConnection::connect(handler).await.unwrap();
        assert!(matches!(connection.send_text("x").await, Err(BridgeError::WebSocketHandler { .. })));
    }
}
