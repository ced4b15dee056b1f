use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use veil_core::ids::{AttachmentId, SessionId, UserId};
use veil_core::protocol::{
    AuthenticatedUser, ClientEvent, ErrorKind, ServerEvent, decode_envelope, encode_event,
};
use veil_core::room::normalize_room_code;

use crate::error::{MatchError, RoomError};
use crate::matchmaker;
use crate::room_manager::PlayerSender;
use crate::scheduler::SubmitError;
use crate::session::BindRequest;
use crate::state::{AppState, IpConnectionGuard};

const MAX_NICKNAME_LEN: usize = 32;

/// Per-attachment state, owned by the socket task.
struct Conn {
    attachment: AttachmentId,
    session_id: SessionId,
    user_id: UserId,
    room: Option<String>,
    tx: PlayerSender,
}

/// A failed operation, encoded as an ack failure.
struct Failure {
    kind: ErrorKind,
    detail: Option<String>,
}

impl Failure {
    fn of(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    fn encode(&self, ack: u64) -> String {
        let mut data = serde_json::Map::new();
        data.insert("success".into(), json!(false));
        data.insert("error".into(), json!(self.kind.as_str()));
        if let Some(detail) = &self.detail {
            data.insert("details".into(), json!(detail));
        }
        json!({"event": "ack", "ack": ack, "data": data}).to_string()
    }
}

impl From<RoomError> for Failure {
    fn from(e: RoomError) -> Self {
        Self {
            kind: e.kind(),
            detail: Some(e.to_string()),
        }
    }
}

impl From<MatchError> for Failure {
    fn from(e: MatchError) -> Self {
        Self::of(e.kind())
    }
}

impl From<SubmitError> for Failure {
    fn from(e: SubmitError) -> Self {
        let detail = match &e {
            SubmitError::Rejected(inner) => Some(inner.to_string()),
            _ => None,
        };
        Self {
            kind: e.kind(),
            detail,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params, addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    params: HashMap<String, String>,
    addr: SocketAddr,
) {
    let Some(_ip_guard) = IpConnectionGuard::try_acquire(
        addr.ip(),
        Arc::clone(&state.ws_per_ip),
        state.config.limits.max_ws_per_ip,
    ) else {
        tracing::warn!(%addr, "connection rejected: per-IP limit reached");
        return;
    };

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    spawn_writer(ws_sender, rx);

    // Handshake auth from the upgrade query string.
    let attachment = AttachmentId::new();
    let bind = {
        let mut sessions = state.sessions.write().await;
        sessions.bind(
            BindRequest {
                token: params.get("token").cloned().filter(|t| !t.is_empty()),
                nickname: params.get("nickname").cloned(),
                tab_id: params.get("tabId").cloned(),
                new_session: truthy(params.get("newSession")),
            },
            attachment,
        )
    };

    // Queued through the outbound channel, so it lands after the writer
    // task is live and the client has registered its listeners.
    send_event(
        &tx,
        &ServerEvent::Authenticated {
            success: true,
            user: AuthenticatedUser {
                user_id: bind.user.id,
                nickname: bind.user.nickname.clone(),
                avatar: bind.user.avatar.clone(),
            },
            token: bind.token.clone(),
            is_new: bind.is_new,
        },
    );
    state.cache.mark_online(bind.user.id).await;
    tracing::info!(
        user = %bind.user.id,
        session = %bind.session_id,
        reattached = bind.reattached,
        "attachment bound"
    );

    let mut conn = Conn {
        attachment,
        session_id: bind.session_id,
        user_id: bind.user.id,
        room: None,
        tx,
    };

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => handle_frame(&state, &mut conn, text.as_str()).await,
            Message::Close(_) => break,
            _ => {},
        }
    }

    disconnect(&state, &conn).await;
}

fn truthy(value: Option<&String>) -> bool {
    matches!(value.map(String::as_str), Some("1") | Some("true"))
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let text = String::from_utf8_lossy(&data).into_owned();
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });
}

fn send_event(tx: &PlayerSender, event: &ServerEvent) {
    match encode_event(event) {
        Ok(json) => {
            let _ = tx.try_send(Bytes::from(json));
        },
        Err(e) => tracing::error!(error = %e, "failed to encode event"),
    }
}

fn send_raw(tx: &PlayerSender, frame: String) {
    let _ = tx.try_send(Bytes::from(frame));
}

async fn handle_frame(state: &AppState, conn: &mut Conn, text: &str) {
    let envelope = match decode_envelope(text) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(user = %conn.user_id, error = %e, "dropping malformed frame");
            return;
        },
    };
    let ack = envelope.ack;

    // Rate limits apply before dispatch. Counters live in the shared
    // cache keyed by user, so a reattach cannot reset a drained bucket.
    if !state.rate_limiter.check(conn.user_id, &envelope.event).await {
        if let Some(ack) = ack {
            send_raw(&conn.tx, Failure::of(ErrorKind::RateLimited).encode(ack));
        }
        return;
    }

    let event = match ClientEvent::parse(&envelope.event, envelope.data) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::debug!(user = %conn.user_id, error = %e, "unparseable event");
            if let Some(ack) = ack {
                send_raw(
                    &conn.tx,
                    Failure {
                        kind: ErrorKind::Validation,
                        detail: Some(e.to_string()),
                    }
                    .encode(ack),
                );
            }
            return;
        },
    };

    state.sessions.write().await.touch(conn.session_id);

    let result = dispatch(state, conn, event).await;
    if let Some(ack) = ack {
        let frame = match result {
            Ok(extra) => veil_core::protocol::encode_ack_ok(ack, extra),
            Err(failure) => failure.encode(ack),
        };
        send_raw(&conn.tx, frame);
    }
}

fn room_scope(conn: &Conn) -> Result<String, Failure> {
    conn.room
        .clone()
        .ok_or_else(|| Failure::of(ErrorKind::NotInRoom))
}

async fn current_user(state: &AppState, conn: &Conn) -> Result<crate::session::User, Failure> {
    state
        .sessions
        .read()
        .await
        .user(conn.user_id)
        .cloned()
        .ok_or_else(|| Failure::of(ErrorKind::Internal))
}

async fn dispatch(
    state: &AppState,
    conn: &mut Conn,
    event: ClientEvent,
) -> Result<serde_json::Value, Failure> {
    match event {
        ClientEvent::CreateRoom(req) => {
            let user = current_user(state, conn).await?;
            let snapshot = state.rooms.write().await.create(
                &user,
                &req,
                conn.tx.clone(),
                state.config.rooms.default_max_players,
            )?;
            let code = snapshot.code.clone();
            conn.room = Some(code.clone());
            state.cache.save_room_snapshot(&snapshot).await;
            send_event(
                &conn.tx,
                &ServerEvent::RoomCreated {
                    room: snapshot.clone(),
                },
            );
            Ok(json!({"roomCode": code, "room": snapshot}))
        },

        ClientEvent::JoinRoom(req) => {
            let user = current_user(state, conn).await?;
            let code = normalize_room_code(&req.room_code);
            let snapshot = state.rooms.write().await.join(
                &user,
                &code,
                req.password.as_deref(),
                conn.tx.clone(),
            )?;
            conn.room = Some(code);
            state.cache.save_room_snapshot(&snapshot).await;
            Ok(json!({"room": snapshot}))
        },

        ClientEvent::LeaveRoom => {
            let code = room_scope(conn)?;
            let deactivated = state.rooms.write().await.leave(conn.user_id, &code)?;
            conn.room = None;
            // A player who walks out mid-game counts as disconnected there.
            state.scheduler.notify_disconnected(conn.user_id);
            if deactivated {
                state.cache.delete_room_snapshot(&code).await;
            } else if let Some(snapshot) = state.rooms.read().await.snapshot(&code) {
                state.cache.save_room_snapshot(&snapshot).await;
            }
            Ok(json!({}))
        },

        ClientEvent::GetRooms => {
            let rooms = state.rooms.read().await.listing();
            Ok(json!({"rooms": rooms}))
        },

        ClientEvent::GetRoomInfo { room_code } => {
            let code = normalize_room_code(&room_code);
            let snapshot = state
                .rooms
                .read()
                .await
                .snapshot(&code)
                .ok_or_else(|| Failure::of(ErrorKind::NotFound))?;
            Ok(json!({"room": snapshot}))
        },

        ClientEvent::UpdateRoomSettings(req) => {
            let code = room_scope(conn)?;
            let snapshot = state
                .rooms
                .write()
                .await
                .update_settings(conn.user_id, &code, &req)?;
            state.cache.save_room_snapshot(&snapshot).await;
            Ok(json!({"room": snapshot}))
        },

        ClientEvent::UpdateGamePool { game_pool } => {
            let code = room_scope(conn)?;
            let (pool, snapshot) =
                state
                    .rooms
                    .write()
                    .await
                    .update_game_pool(conn.user_id, &code, &game_pool)?;
            state.cache.save_room_snapshot(&snapshot).await;
            Ok(json!({"gamePool": pool}))
        },

        ClientEvent::KickPlayer { user_id } => {
            let code = room_scope(conn)?;
            let deactivated = state.rooms.write().await.kick(conn.user_id, &code, user_id)?;
            if deactivated {
                state.cache.delete_room_snapshot(&code).await;
            } else if let Some(snapshot) = state.rooms.read().await.snapshot(&code) {
                state.cache.save_room_snapshot(&snapshot).await;
            }
            Ok(json!({}))
        },

        ClientEvent::SubmitConfession { text } => {
            let code = room_scope(conn)?;
            state
                .rooms
                .write()
                .await
                .submit_confession(conn.user_id, &code, &text)?;
            if let Some(snapshot) = state.rooms.read().await.snapshot(&code) {
                state.cache.save_room_snapshot(&snapshot).await;
            }
            Ok(json!({"hasConfession": true}))
        },

        ClientEvent::UpdateConfession { text } => {
            let code = room_scope(conn)?;
            state
                .rooms
                .write()
                .await
                .update_confession(conn.user_id, &code, &text)?;
            Ok(json!({}))
        },

        ClientEvent::GetConfessions => {
            let code = room_scope(conn)?;
            let confessions = state.rooms.read().await.confessions_view(&code)?;
            Ok(json!({"confessions": confessions}))
        },

        ClientEvent::GetMyConfession => {
            let code = room_scope(conn)?;
            let confession = state.rooms.read().await.my_confession(conn.user_id, &code)?;
            Ok(json!({"confession": confession}))
        },

        ClientEvent::SendMessage { text } => {
            let code = room_scope(conn)?;
            let message = state
                .rooms
                .write()
                .await
                .send_chat(conn.user_id, &code, &text)?;
            Ok(json!({"message": message}))
        },

        ClientEvent::GetChatHistory => {
            let code = room_scope(conn)?;
            let messages = state
                .rooms
                .read()
                .await
                .chat_history(conn.user_id, &code)?;
            Ok(json!({"messages": messages}))
        },

        ClientEvent::StartGameWithPool { room_code } => {
            let code = match room_code {
                Some(c) => normalize_room_code(&c),
                None => room_scope(conn)?,
            };
            let game_id = matchmaker::start_game_with_pool(state, conn.user_id, &code).await?;
            Ok(json!({"gameId": game_id}))
        },

        ClientEvent::RequestMatch => {
            let code = room_scope(conn)?;
            let waiting = matchmaker::request_match(state, conn.user_id, &code).await?;
            Ok(json!({"waiting": waiting}))
        },

        ClientEvent::GameAction(action) => {
            state.scheduler.submit_action(conn.user_id, action).await?;
            Ok(json!({}))
        },

        ClientEvent::UpdateNickname { nickname } => {
            let trimmed = nickname.trim();
            if trimmed.is_empty() || trimmed.len() > MAX_NICKNAME_LEN {
                return Err(Failure {
                    kind: ErrorKind::Validation,
                    detail: Some(format!("nickname must be 1..={MAX_NICKNAME_LEN} bytes")),
                });
            }
            state
                .sessions
                .write()
                .await
                .set_nickname(conn.user_id, trimmed.to_string())
                .ok_or_else(|| Failure::of(ErrorKind::Internal))?;
            state
                .rooms
                .write()
                .await
                .update_nickname(conn.user_id, trimmed);
            Ok(json!({"nickname": trimmed}))
        },

        ClientEvent::Reconnect { room_code } => {
            let code = normalize_room_code(&room_code);
            let snapshot = state.rooms.write().await.reconnect_player(
                conn.user_id,
                &code,
                conn.tx.clone(),
            )?;
            conn.room = Some(code);
            state.scheduler.notify_reconnected(conn.user_id);
            Ok(json!({"room": snapshot}))
        },
    }
}

/// Attachment loss: session survives, room membership survives, the
/// player is marked temporarily disconnected and the reattach grace runs.
async fn disconnect(state: &AppState, conn: &Conn) {
    state.sessions.write().await.detach(conn.attachment);
    state.cache.mark_offline(conn.user_id).await;

    let room = state.rooms.read().await.room_of(conn.user_id);
    if let Some(code) = room {
        state
            .rooms
            .write()
            .await
            .mark_disconnected(conn.user_id, &code);
        state.scheduler.notify_disconnected(conn.user_id);
    }
    tracing::info!(user = %conn.user_id, session = %conn.session_id, "attachment closed");
}
