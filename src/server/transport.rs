//! Transport detection.
//!
//! The first bytes of a connection decide how it is carried: the Bolt magic
//! means plain TCP, a TLS record header means TLS (detection then runs again
//! on the decrypted stream) and an HTTP `GET ` means a WebSocket upgrade.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures::{SinkExt, StreamExt};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::bolt::handshake::BOLT_MAGIC;
use crate::config::EncryptionLevel;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

const HTTP_GET: [u8; 4] = *b"GET ";

/// Bytes buffered between a WebSocket and the Bolt pipeline.
const WEBSOCKET_BRIDGE_BUFFER: usize = 64 * 1024;

/// Byte stream a connection is served over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Io for T {}

pub type BoxedIo = Box<dyn Io>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Plain,
    Tls,
    WebSocket,
    WebSocketTls,
}

impl Transport {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Transport::Tls | Transport::WebSocketTls)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Plain => "tcp",
            Transport::Tls => "tls",
            Transport::WebSocket => "ws",
            Transport::WebSocketTls => "wss",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unrecognized protocol preamble {0:02X?}")]
    Unrecognized([u8; 4]),

    #[error("an unencrypted connection was refused because encryption is required")]
    EncryptionRequired,

    #[error("an encrypted connection was refused because encryption is disabled")]
    EncryptionDisabled,

    #[error("TLS handshake failed: {0}")]
    Tls(io::Error),

    #[error("WebSocket upgrade failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A connection ready for the Bolt handshake.
pub struct Negotiated {
    pub io: BoxedIo,
    pub transport: Transport,
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

impl fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("transport", &self.transport)
            .field("peer_certificates", &self.peer_certificates.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preamble {
    Bolt,
    Tls,
    WebSocket,
}

fn classify(prefix: [u8; 4]) -> Result<Preamble, TransportError> {
    if prefix == BOLT_MAGIC {
        Ok(Preamble::Bolt)
    } else if prefix[0] == TLS_HANDSHAKE_RECORD {
        Ok(Preamble::Tls)
    } else if prefix == HTTP_GET {
        Ok(Preamble::WebSocket)
    } else {
        Err(TransportError::Unrecognized(prefix))
    }
}

/// Reads the first four bytes and hands them back in front of the stream.
async fn sniff<S>(mut stream: S) -> Result<(Preamble, PrefixedStream<S>), TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await?;
    let preamble = classify(prefix)?;
    Ok((preamble, PrefixedStream::new(Bytes::copy_from_slice(&prefix), stream)))
}

/// Detects the transport of a freshly accepted stream and applies the
/// encryption policy.
pub async fn negotiate<S>(
    stream: S,
    tls: Option<&TlsAcceptor>,
    encryption: EncryptionLevel,
) -> Result<Negotiated, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (preamble, stream) = sniff(stream).await?;
    match preamble {
        Preamble::Tls => {
            let acceptor = match (encryption, tls) {
                (EncryptionLevel::Disabled, _) | (_, None) => {
                    return Err(TransportError::EncryptionDisabled)
                }
                (_, Some(acceptor)) => acceptor,
            };
            let tls_stream = acceptor.accept(stream).await.map_err(TransportError::Tls)?;
            let peer_certificates = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| certs.to_vec())
                .unwrap_or_default();

            let (preamble, stream) = sniff(tls_stream).await?;
            let (io, transport): (BoxedIo, _) = match preamble {
                Preamble::Bolt => (Box::new(stream), Transport::Tls),
                Preamble::WebSocket => (websocket(stream).await?, Transport::WebSocketTls),
                Preamble::Tls => return Err(TransportError::Unrecognized([TLS_HANDSHAKE_RECORD, 0, 0, 0])),
            };
            Ok(Negotiated {
                io,
                transport,
                peer_certificates,
            })
        }
        _ if encryption == EncryptionLevel::Required => Err(TransportError::EncryptionRequired),
        Preamble::Bolt => Ok(Negotiated {
            io: Box::new(stream),
            transport: Transport::Plain,
            peer_certificates: Vec::new(),
        }),
        Preamble::WebSocket => Ok(Negotiated {
            io: websocket(stream).await?,
            transport: Transport::WebSocket,
            peer_certificates: Vec::new(),
        }),
    }
}

// ============================================================================
// WebSocket bridge
// ============================================================================

/// Completes the upgrade and exposes binary frames as a byte stream.
async fn websocket<S>(stream: S) -> Result<BoxedIo, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (local, remote) = tokio::io::duplex(WEBSOCKET_BRIDGE_BUFFER);
    tokio::spawn(bridge(ws, remote));
    Ok(Box::new(local))
}

async fn bridge<S>(ws: WebSocketStream<S>, pipe: DuplexStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (mut pipe_rx, mut pipe_tx) = tokio::io::split(pipe);

    let inbound = async {
        while let Some(message) = ws_rx.next().await {
            match message.map_err(io::Error::other)? {
                Message::Binary(data) => pipe_tx.write_all(&data).await?,
                Message::Close(_) => break,
                // pings are answered by tungstenite itself
                _ => {}
            }
        }
        pipe_tx.shutdown().await
    };

    let outbound = async {
        let mut buf = vec![0u8; 8192];
        loop {
            let n = pipe_rx.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            ws_tx
                .send(Message::Binary(buf[..n].to_vec()))
                .await
                .map_err(io::Error::other)?;
        }
        ws_tx.close().await.map_err(io::Error::other)
    };

    let result = tokio::select! {
        result = inbound => result,
        result = outbound => result,
    };
    if let Err(e) = result {
        debug!(error = %e, "WebSocket bridge closed");
    }
}

// ============================================================================
// PrefixedStream
// ============================================================================

/// A stream with bytes that were already read put back in front.
#[derive(Debug)]
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.prefix.has_remaining() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(BOLT_MAGIC).unwrap(), Preamble::Bolt);
        assert_eq!(classify([0x16, 0x03, 0x01, 0x02]).unwrap(), Preamble::Tls);
        assert_eq!(classify(*b"GET ").unwrap(), Preamble::WebSocket);
        assert!(matches!(
            classify(*b"POST"),
            Err(TransportError::Unrecognized(_))
        ));
    }

    #[tokio::test]
    async fn test_prefixed_stream_replays_prefix() {
        let inner: &[u8] = b"rest";
        let mut stream = PrefixedStream::new(Bytes::from_static(b"head-"), inner);
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "head-rest");
    }

    #[tokio::test]
    async fn test_plain_bolt_detected() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = client;
        client.write_all(&BOLT_MAGIC).await.unwrap();

        let mut negotiated = negotiate(server, None, EncryptionLevel::Optional).await.unwrap();
        assert_eq!(negotiated.transport, Transport::Plain);

        let mut magic = [0u8; 4];
        negotiated.io.read_exact(&mut magic).await.unwrap();
        assert_eq!(magic, BOLT_MAGIC);
    }

    #[tokio::test]
    async fn test_plain_refused_when_encryption_required() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&BOLT_MAGIC).await.unwrap();
        assert!(matches!(
            negotiate(server, None, EncryptionLevel::Required).await,
            Err(TransportError::EncryptionRequired)
        ));
    }

    #[tokio::test]
    async fn test_tls_refused_without_acceptor() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0x16, 0x03, 0x01, 0x00]).await.unwrap();
        assert!(matches!(
            negotiate(server, None, EncryptionLevel::Optional).await,
            Err(TransportError::EncryptionDisabled)
        ));
    }
}
