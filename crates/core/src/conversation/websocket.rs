//! WebSocket conversation transport.
//!
//! Text frames from the agent become `on_message` events. A close frame ends the session as a
//! remote disconnect; a read error or the stream simply ending is reported as transport loss.

use super::{
    ConversationError, ConversationTransport, DisconnectReason, TransportConnection,
    TransportEvents,
};
use crate::error::{ClinicError, ClinicResult};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::fmt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidConfig`] unless `url` is a `ws://` or `wss://` URL.
    pub fn new(url: &str) -> ClinicResult<Self> {
        let url = Url::parse(url.trim())
            .map_err(|e| ClinicError::InvalidConfig(format!("conversation URL '{url}': {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClinicError::InvalidConfig(format!(
                "conversation URL must be ws(s), got '{}'",
                url.scheme()
            )));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ConversationTransport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn connect(&self, events: TransportEvents) -> Result<WebSocketConnection, ConversationError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ConversationError::Connect(e.to_string()))?;
        tracing::debug!(url = %self.url, "websocket connected");

        let (writer, mut reader) = socket.split();
        let reader = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => events.message(text.to_string()),
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        events.closed(DisconnectReason::Remote(reason));
                        return;
                    }
                    // Pings are answered by tungstenite; audio and pongs are not surfaced.
                    Ok(_) => {}
                    Err(e) => {
                        events.error(e.to_string());
                        events.closed(DisconnectReason::TransportLost);
                        return;
                    }
                }
            }
            events.closed(DisconnectReason::TransportLost);
        });

        Ok(WebSocketConnection { writer, reader })
    }
}

/// Write half of an open socket plus its reader task.
pub struct WebSocketConnection {
    writer: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
}

impl TransportConnection for WebSocketConnection {
    async fn disconnect(mut self) -> Result<(), ConversationError> {
        let result = self
            .writer
            .close()
            .await
            .map_err(|e| ConversationError::Disconnect(e.to_string()));
        self.reader.abort();
        result
    }
}

impl fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("reader_finished", &self.reader.is_finished())
            .finish_non_exhaustive()
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
