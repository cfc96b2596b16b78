mod common;

use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use common::{basic, server};
use zeta4g_bolt::bolt::codec::{ChunkCodec, Frame};
use zeta4g_bolt::bolt::handshake::build_client_handshake;
use zeta4g_bolt::bolt::message::{tag, BoltResponse};
use zeta4g_bolt::bolt::packstream::{decode, encode, PackStreamStructure, PackStreamValue};
use zeta4g_bolt::{BoltConfig, BoltVersion, SessionState};

/// Bolt client speaking through WebSocket binary frames.
struct WsClient {
    ws: WebSocketStream<DuplexStream>,
    chunks: ChunkCodec,
    buffer: BytesMut,
}

impl WsClient {
    async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws.send(Message::Binary(data)).await.unwrap();
    }

    /// Reads frames until at least `n` bytes are buffered.
    async fn fill(&mut self, n: usize) {
        while self.buffer.len() < n {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => self.buffer.extend_from_slice(&data),
                Some(Ok(_)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    async fn handshake(&mut self, version: BoltVersion) -> [u8; 4] {
        self.send_binary(build_client_handshake(&[version.to_bytes()]).to_vec())
            .await;
        self.fill(4).await;
        let agreed = self.buffer.split_to(4);
        [agreed[0], agreed[1], agreed[2], agreed[3]]
    }

    async fn send(&mut self, tag: u8, fields: Vec<PackStreamValue>) {
        let value = PackStreamValue::Structure(PackStreamStructure::new(tag, fields));
        let mut framed = BytesMut::new();
        self.chunks
            .encode(Frame::Message(encode(&value).unwrap().freeze()), &mut framed)
            .unwrap();
        self.send_binary(framed.to_vec()).await;
    }

    async fn expect(&mut self) -> BoltResponse {
        loop {
            if let Some(body) = self.chunks.decode(&mut self.buffer).unwrap() {
                let PackStreamValue::Structure(s) = decode(&body).unwrap() else {
                    panic!("response is not a structure");
                };
                return BoltResponse::from_structure(&s).unwrap();
            }
            let wanted = self.buffer.len() + 1;
            self.fill(wanted).await;
        }
    }
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let server = server(BoltConfig::default());
    let (client_io, remote) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move {
            server
                .serve_stream(remote, "127.0.0.1:51000".parse().unwrap(), cancel)
                .await
        }
    });

    let (ws, _) = tokio_tungstenite::client_async("ws://localhost/", client_io)
        .await
        .unwrap();
    let mut client = WsClient {
        ws,
        chunks: ChunkCodec::new(),
        buffer: BytesMut::new(),
    };

    assert_eq!(client.handshake(BoltVersion::V4_4).await, BoltVersion::V4_4.to_bytes());

    let mut hello = basic("neo4j", "secret");
    hello.insert("user_agent".to_string(), PackStreamValue::from("ws-test/1.0"));
    client.send(tag::HELLO, vec![PackStreamValue::Map(hello)]).await;
    assert!(client.expect().await.is_success());

    client.send(tag::RESET, vec![]).await;
    assert!(client.expect().await.is_success());

    // closing the socket ends the session like a TCP EOF
    client.ws.close(None).await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(30), task)
        .await
        .expect("server task did not finish")
        .expect("server task panicked");
    assert_eq!(state, Some(SessionState::Closed));
    assert_eq!(server.metrics().snapshot().active, 0);
}
