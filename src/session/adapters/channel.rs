//! Transport over a pair of in-process text channels.
//!
//! Frames travel as JSON text, one object per frame, exactly as a
//! WebSocket host would carry them. A host bridges its socket to a
//! [`ClientEnd`]; tests drive the [`ClientEnd`] directly.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::session::ports::transport::{
    InboundFrame, OutboundFrame, Transport, TransportError, TransportResult, decode_inbound,
    decode_outbound, encode_inbound, encode_outbound,
};

/// Creates a connected server/client pair with the given per-direction
/// buffer.
///
/// # Examples
///
/// ```
/// use palaver::session::adapters::channel::channel_pair;
///
/// let (_server, client) = channel_pair(8);
/// assert!(client.is_connected());
/// ```
#[must_use]
pub fn channel_pair(buffer: usize) -> (ChannelTransport, ClientEnd) {
    let capacity = buffer.max(1);
    let (to_client, from_server) = mpsc::channel(capacity);
    let (to_server, from_client) = mpsc::channel(capacity);
    (
        ChannelTransport {
            outbound: to_client,
            inbound: from_client,
        },
        ClientEnd {
            outbound: to_server,
            inbound: from_server,
        },
    )
}

/// Server side of an in-process channel.
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: OutboundFrame) -> TransportResult<()> {
        let text = encode_outbound(&frame)?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    async fn recv(&mut self) -> TransportResult<InboundFrame> {
        let text = self
            .inbound
            .recv()
            .await
            .ok_or(TransportError::Disconnected)?;
        decode_inbound(&text)
    }
}

/// Client side of an in-process channel.
#[derive(Debug)]
pub struct ClientEnd {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

impl ClientEnd {
    /// Sends a request frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the server side is gone.
    pub async fn send(&self, frame: &InboundFrame) -> TransportResult<()> {
        let text = encode_inbound(frame)?;
        self.send_text(text).await
    }

    /// Sends raw text, bypassing encoding.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the server side is gone.
    pub async fn send_text(&self, text: impl Into<String>) -> TransportResult<()> {
        self.outbound
            .send(text.into())
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    /// Awaits the next update.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] once the server side is
    /// gone and every buffered frame has been read.
    pub async fn recv(&mut self) -> TransportResult<OutboundFrame> {
        let text = self
            .inbound
            .recv()
            .await
            .ok_or(TransportError::Disconnected)?;
        decode_outbound(&text)
    }

    /// Returns an already buffered update, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the server side is gone
    /// and nothing is buffered.
    pub fn try_recv(&mut self) -> TransportResult<Option<OutboundFrame>> {
        match self.inbound.try_recv() {
            Ok(text) => decode_outbound(&text).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    /// Returns `true` while the server side still holds its receiver.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}
