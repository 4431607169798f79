use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, trace};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::utils::error::{AppError, AppResult};

/// Reason sent with the normal-closure code on an explicit stop
pub const NORMAL_CLOSE_REASON: &str = "Monitoring stopped";

/// Opens connections to a telemetry producer
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> AppResult<Box<dyn FrameSource>>;
}

/// One open, text-framed telemetry connection
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, `None` once the peer has closed the stream.
    ///
    /// `Err(AppError::FrameParse)` reports a single unusable frame; any other
    /// error means the transport itself failed.
    async fn next_frame(&mut self) -> Option<AppResult<String>>;

    /// Close with the normal-closure code
    async fn close(&mut self) -> AppResult<()>;
}

/// WebSocket connector used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &str) -> AppResult<Box<dyn FrameSource>> {
        let (stream, response) = connect_async(endpoint).await?;
        debug!("WebSocket handshake with {} completed ({})", endpoint, response.status());
        Ok(Box::new(WebSocketSource { stream }))
    }
}

struct WebSocketSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<AppResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(|e| {
                        AppError::FrameParse(format!("binary frame is not valid UTF-8: {}", e))
                    }))
                }
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => debug!("Peer closed stream: {} {}", frame.code, frame.reason),
                        None => debug!("Peer closed stream without a close frame"),
                    }
                    return None;
                }
                Ok(other) => {
                    trace!("Skipping control frame ({} bytes)", other.len());
                }
                Err(WsError::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: NORMAL_CLOSE_REASON.into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
