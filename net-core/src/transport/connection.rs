//! A single framed, optionally-TLS-wrapped duplex link (spec §4.6).

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::instrument;

use crate::protocol::codec::FrameCodec;
use crate::protocol::{Endpoint, Message};

/// The concrete transport behind a `PeerConnection`: plain TCP, or TCP
/// wrapped in a TLS session on either side of the handshake.
pub enum Stream {
    Plain(TcpStream),
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Stream::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Stream::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Stream::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Stream::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A framed duplex link to one peer. Sends are serialized by a single
/// writer lock (spec §5: "strictly serialized by a per-link mutex");
/// receives are single-consumer per link.
pub struct PeerConnection {
    id: String,
    endpoint: Endpoint,
    writer: Mutex<futures::stream::SplitSink<Framed<Stream, FrameCodec>, Message>>,
    reader: Mutex<futures::stream::SplitStream<Framed<Stream, FrameCodec>>>,
    connected: AtomicBool,
}

impl PeerConnection {
    pub fn new(id: impl Into<String>, endpoint: Endpoint, stream: Stream) -> Self {
        let framed = Framed::new(stream, FrameCodec);
        let (writer, reader) = framed.split();
        Self {
            id: id.into(),
            endpoint,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            connected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Encode and write one message, flushing before returning. At most
    /// one sender proceeds at a time (the writer mutex).
    #[instrument(skip(self, msg), fields(peer = %self.id, msg_type = ?msg.message_type()))]
    pub async fn send(&self, msg: Message) -> bool {
        let mut writer = self.writer.lock().await;
        match writer.send(msg).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(peer = %self.id, error = %e, "send failed, marking disconnected");
                self.connected.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Decode one framed message. Returns `None` on stream close, a
    /// malformed frame, or an unknown type byte -- any of which mean the
    /// link should be treated as dead (spec §4.1, §4.6).
    #[instrument(skip(self), fields(peer = %self.id))]
    pub async fn receive(&self) -> Option<Message> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(Ok(msg)) => Some(msg),
            Some(Err(e)) => {
                tracing::warn!(peer = %self.id, error = %e, "receive failed");
                self.connected.store(false, Ordering::Release);
                None
            }
            None => {
                self.connected.store(false, Ordering::Release);
                None
            }
        }
    }

    /// Idempotently shut the socket down and release resources.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}
