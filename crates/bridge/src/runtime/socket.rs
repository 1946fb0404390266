use super::host::{Frame, NativeSocket, Upgraded};
use crate::error::BridgeError;
use crate::websocket::{ClosedFlag, ServerSocket, WebSocketHandler, WsMessage, send_message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

pub const INTERNAL_ERROR_CODE: u16 = 1011;
pub const INTERNAL_ERROR_REASON: &str = "Internal error";

/// A [`ServerSocket`] over a host socket. Sends fail once the socket is closed.
pub struct HostSocket {
    native: Arc<dyn NativeSocket>,
    closed: ClosedFlag,
}

impl HostSocket {
    pub fn new(native: Arc<dyn NativeSocket>) -> Self {
        Self { native, closed: ClosedFlag::new() }
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), BridgeError> {
        self.closed.ensure_open()?;
        self.native.send(frame).await.map_err(BridgeError::send)
    }
}

#[async_trait]
impl ServerSocket for HostSocket {
    async fn send_text(&self, text: String) -> Result<(), BridgeError> {
        self.send_frame(Frame::Text(text)).await
    }

    async fn send_json(&self, value: Value) -> Result<(), BridgeError> {
        self.send_frame(Frame::Text(serde_json::to_string(&value)?)).await
    }

    async fn send_bytes(&self, bytes: Bytes) -> Result<(), BridgeError> {
        self.send_frame(Frame::Binary(bytes)).await
    }

    async fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), BridgeError> {
        if !self.closed.close_once() {
            return Ok(());
        }
        let code = code.unwrap_or(1000);
        self.native.close(code, reason.as_deref().unwrap_or_default()).await.map_err(BridgeError::send)
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

struct Session {
    handler: WebSocketHandler,
    socket: HostSocket,
    notified: ClosedFlag,
}

impl Session {
    async fn closed(&self, code: Option<u16>, reason: Option<String>) -> Result<(), BridgeError> {
        if !self.notified.close_once() {
            return Ok(());
        }
        self.handler.closed(code, reason).await
    }

    async fn fail(&self, e: BridgeError) -> Result<(), BridgeError> {
        error!(cause = %e, "websocket handler failed, closing connection");
        let reason = Some(INTERNAL_ERROR_REASON.to_owned());
        if let Err(close_error) = self.socket.close(Some(INTERNAL_ERROR_CODE), reason.clone()).await {
            debug!(cause = %close_error, "failed to close websocket after handler error");
        }
        if let Err(close_error) = self.closed(Some(INTERNAL_ERROR_CODE), reason).await {
            debug!(cause = %close_error, "onClose failed after handler error");
        }
        Err(e)
    }
}

/// Pumps one upgraded connection through `handler` until the peer closes.
///
/// `on_close` runs exactly once. A handler failure closes the socket with 1011.
pub async fn run_session(handler: WebSocketHandler, upgraded: Upgraded) -> Result<(), BridgeError> {
    let Upgraded { socket, mut incoming } = upgraded;
    let session = Session { handler, socket: HostSocket::new(socket), notified: ClosedFlag::new() };

    if let Err(e) = session.handler.open(&session.socket).await {
        return session.fail(e).await;
    }

    while let Some(frame) = incoming.next().await {
        let message = match frame {
            Frame::Text(text) => WsMessage::decode_text(text),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
            Frame::Close { code, reason } => {
                debug!(?code, reason = %reason, "peer closed websocket");
                session.socket.closed.close_once();
                return session.closed(code, Some(reason)).await;
            }
        };

        let reply = match session.handler.message(&session.socket, message).await {
            Ok(reply) => reply,
            Err(e) => return session.fail(e).await,
        };
        if let Some(reply) = reply
            && let Err(e) = send_message(&session.socket, reply).await
        {
            return session.fail(e).await;
        }
    }

    debug!("websocket stream ended");
    session.socket.closed.close_once();
    session.closed(None, None).await
}
