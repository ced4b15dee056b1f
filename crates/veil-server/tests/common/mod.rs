use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use veil_server::config::{AuthConfig, ServerConfig};
use veil_server::{AppState, build_router, spawn_maintenance};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        let config = ServerConfig {
            auth: AuthConfig {
                token_secret: Some("integration-test-secret".to_string()),
                token_ttl_secs: None,
            },
            ..ServerConfig::default()
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(config);
        spawn_maintenance(&state);
        let app = build_router(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _server: handle,
        }
    }

    pub fn ws_url(&self, query: &str) -> String {
        if query.is_empty() {
            format!("ws://{}/ws", self.addr)
        } else {
            format!("ws://{}/ws?{query}", self.addr)
        }
    }
}

pub async fn connect(server: &TestServer, query: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(server.ws_url(query))
        .await
        .unwrap();
    stream
}

/// Connect with a nickname and consume the `authenticated` event.
/// Returns the stream and the authenticated payload.
pub async fn connect_as(server: &TestServer, nickname: &str) -> (WsStream, Value) {
    let mut stream = connect(server, &format!("nickname={nickname}")).await;
    let auth = read_event(&mut stream, "authenticated").await;
    (stream, auth["data"].clone())
}

/// Send one envelope frame.
pub async fn send(stream: &mut WsStream, event: &str, data: Value, ack: u64) {
    let frame = json!({"event": event, "data": data, "ack": ack}).to_string();
    stream.send(Message::Text(frame.into())).await.unwrap();
}

/// Send an envelope and wait for its ack, skipping unrelated events.
pub async fn request(stream: &mut WsStream, event: &str, data: Value, ack: u64) -> Value {
    send(stream, event, data, ack).await;
    read_ack(stream, ack).await
}

/// Read frames until the ack with the given id arrives (5 s timeout).
pub async fn read_ack(stream: &mut WsStream, ack: u64) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = next_json(stream).await;
            if frame["event"] == "ack" && frame["ack"] == json!(ack) {
                return frame["data"].clone();
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for ack {ack}"))
}

/// Read frames until one with the given event name arrives (5 s timeout).
/// Returns the whole envelope.
pub async fn read_event(stream: &mut WsStream, event: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = next_json(stream).await;
            if frame["event"] == event {
                return frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for event {event:?}"))
}

async fn next_json(stream: &mut WsStream) -> Value {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("frames are JSON");
            },
            Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("WebSocket error: {e}"),
            None => panic!("WebSocket stream ended"),
        }
    }
}

/// Stand up a room with both players confessed and the pool locked to a
/// single game kind. Returns (alice, bob, room_code, alice_user_id,
/// bob_user_id).
pub async fn room_with_confessions(
    server: &TestServer,
    game_kind: &str,
) -> (WsStream, WsStream, String, Value, Value) {
    let (mut alice, alice_auth) = connect_as(server, "Alice").await;
    let (mut bob, bob_auth) = connect_as(server, "Bob").await;

    let created = request(&mut alice, "createRoom", json!({"name": "A"}), 1).await;
    assert_eq!(created["success"], true);
    let code = created["roomCode"].as_str().unwrap().to_string();

    let joined = request(&mut bob, "joinRoom", json!({"roomCode": code}), 1).await;
    assert_eq!(joined["success"], true);

    let ok = request(
        &mut alice,
        "submitConfession",
        json!({"text": "a confession of ten"}),
        2,
    )
    .await;
    assert_eq!(ok["success"], true);
    let ok = request(
        &mut bob,
        "submitConfession",
        json!({"text": "another confession"}),
        2,
    )
    .await;
    assert_eq!(ok["success"], true);

    let ok = request(
        &mut alice,
        "updateGamePool",
        json!({"gamePool": [game_kind]}),
        3,
    )
    .await;
    assert_eq!(ok["success"], true);

    (
        alice,
        bob,
        code,
        alice_auth["user"]["userId"].clone(),
        bob_auth["user"]["userId"].clone(),
    )
}
