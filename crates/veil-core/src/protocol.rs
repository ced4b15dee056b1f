use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::game::{GameAction, GameKind, GamePlayer, RankedPlayer};
use crate::ids::{GameId, UserId};
use crate::player::RoomPlayer;
use crate::room::{RoomListing, RoomSnapshot};

/// Maximum inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// One inbound frame: an event name, an optional payload, and an optional
/// ack id the sender wants echoed back on the response.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(ProtocolError::from)
}

#[derive(Debug)]
pub enum ProtocolError {
    TooLarge(usize),
    Json(serde_json::Error),
    UnknownEvent(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge(n) => write!(f, "frame too large ({n} bytes)"),
            Self::Json(e) => write!(f, "malformed frame: {e}"),
            Self::UnknownEvent(name) => write!(f, "unknown event {name:?}"),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Stable machine-readable failure kinds surfaced in ack responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailed,
    RateLimited,
    NotInRoom,
    NotHost,
    NotFound,
    Inactive,
    Full,
    BadPassword,
    Validation,
    GameInProgress,
    NotEnoughReady,
    NoGamesAvailable,
    QueueFull,
    CodeExhaustion,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::NotHost => "NOT_HOST",
            Self::NotFound => "NOT_FOUND",
            Self::Inactive => "INACTIVE",
            Self::Full => "FULL",
            Self::BadPassword => "BAD_PASSWORD",
            Self::Validation => "VALIDATION",
            Self::GameInProgress => "GAME_IN_PROGRESS",
            Self::NotEnoughReady => "NOT_ENOUGH_READY",
            Self::NoGamesAvailable => "NO_GAMES_AVAILABLE",
            Self::QueueFull => "QUEUE_FULL",
            Self::CodeExhaustion => "CODE_EXHAUSTION",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomReq {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_players: Option<u8>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomReq {
    pub room_code: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Absent fields are left unchanged; an empty password string clears it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoomSettingsReq {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_players: Option<u8>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

/// All events the server consumes, parsed from an [`Envelope`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    CreateRoom(CreateRoomReq),
    JoinRoom(JoinRoomReq),
    LeaveRoom,
    GetRooms,
    GetRoomInfo { room_code: String },
    UpdateRoomSettings(UpdateRoomSettingsReq),
    UpdateGamePool { game_pool: Vec<String> },
    KickPlayer { user_id: UserId },
    SubmitConfession { text: String },
    UpdateConfession { text: String },
    GetConfessions,
    GetMyConfession,
    SendMessage { text: String },
    GetChatHistory,
    StartGameWithPool { room_code: Option<String> },
    RequestMatch,
    GameAction(GameAction),
    UpdateNickname { nickname: String },
    Reconnect { room_code: String },
}

impl ClientEvent {
    pub fn parse(event: &str, data: serde_json::Value) -> Result<Self, ProtocolError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RoomCodeReq {
            room_code: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct OptRoomCodeReq {
            #[serde(default)]
            room_code: Option<String>,
        }
        #[derive(Deserialize)]
        struct TextReq {
            text: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UserIdReq {
            user_id: UserId,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct GamePoolReq {
            game_pool: Vec<String>,
        }
        #[derive(Deserialize)]
        struct NicknameReq {
            nickname: String,
        }

        // A missing payload reads as an empty object.
        let data = if data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            data
        };

        let ev = match event {
            "createRoom" => Self::CreateRoom(serde_json::from_value(data)?),
            "joinRoom" => Self::JoinRoom(serde_json::from_value(data)?),
            "leaveRoom" => Self::LeaveRoom,
            "getRooms" => Self::GetRooms,
            "getRoomInfo" => {
                let req: RoomCodeReq = serde_json::from_value(data)?;
                Self::GetRoomInfo {
                    room_code: req.room_code,
                }
            },
            "updateRoomSettings" => Self::UpdateRoomSettings(serde_json::from_value(data)?),
            "updateGamePool" => {
                let req: GamePoolReq = serde_json::from_value(data)?;
                Self::UpdateGamePool {
                    game_pool: req.game_pool,
                }
            },
            "kickPlayer" => {
                let req: UserIdReq = serde_json::from_value(data)?;
                Self::KickPlayer {
                    user_id: req.user_id,
                }
            },
            "submitConfession" => {
                let req: TextReq = serde_json::from_value(data)?;
                Self::SubmitConfession { text: req.text }
            },
            "updateConfession" => {
                let req: TextReq = serde_json::from_value(data)?;
                Self::UpdateConfession { text: req.text }
            },
            "getConfessions" => Self::GetConfessions,
            "getMyConfession" => Self::GetMyConfession,
            "sendMessage" => {
                let req: TextReq = serde_json::from_value(data)?;
                Self::SendMessage { text: req.text }
            },
            "getChatHistory" => Self::GetChatHistory,
            "startGameWithPool" => {
                let req: OptRoomCodeReq = serde_json::from_value(data)?;
                Self::StartGameWithPool {
                    room_code: req.room_code,
                }
            },
            "requestMatch" => Self::RequestMatch,
            "gameAction" => Self::GameAction(serde_json::from_value(data)?),
            "updateNickname" => {
                let req: NicknameReq = serde_json::from_value(data)?;
                Self::UpdateNickname {
                    nickname: req.nickname,
                }
            },
            "reconnect" => {
                let req: RoomCodeReq = serde_json::from_value(data)?;
                Self::Reconnect {
                    room_code: req.room_code,
                }
            },
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(ev)
    }

    /// Name used for rate limiting, matching the inbound event string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom(_) => "createRoom",
            Self::JoinRoom(_) => "joinRoom",
            Self::LeaveRoom => "leaveRoom",
            Self::GetRooms => "getRooms",
            Self::GetRoomInfo { .. } => "getRoomInfo",
            Self::UpdateRoomSettings(_) => "updateRoomSettings",
            Self::UpdateGamePool { .. } => "updateGamePool",
            Self::KickPlayer { .. } => "kickPlayer",
            Self::SubmitConfession { .. } => "submitConfession",
            Self::UpdateConfession { .. } => "updateConfession",
            Self::GetConfessions => "getConfessions",
            Self::GetMyConfession => "getMyConfession",
            Self::SendMessage { .. } => "sendMessage",
            Self::GetChatHistory => "getChatHistory",
            Self::StartGameWithPool { .. } => "startGameWithPool",
            Self::RequestMatch => "requestMatch",
            Self::GameAction(_) => "gameAction",
            Self::UpdateNickname { .. } => "updateNickname",
            Self::Reconnect { .. } => "reconnect",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// The user block inside the `authenticated` handshake response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub nickname: String,
    pub avatar: String,
}

/// Wire shape of a game inside `matchStarted`/`gameUpdate`/`gameEnded`.
/// `state` is the per-recipient projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameWire {
    pub id: GameId,
    #[serde(rename = "type")]
    pub kind: GameKind,
    pub players: Vec<GamePlayer>,
    pub state: serde_json::Value,
}

/// All events the server emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Authenticated {
        success: bool,
        user: AuthenticatedUser,
        token: String,
        is_new: bool,
    },
    RoomCreated {
        room: RoomSnapshot,
    },
    PlayerJoined {
        room_code: String,
        player: RoomPlayer,
    },
    PlayerLeft {
        room_code: String,
        user_id: UserId,
    },
    PlayerDisconnected {
        user_id: UserId,
        temporary: bool,
    },
    PlayerReconnected {
        user_id: UserId,
    },
    PlayerKicked {
        user_id: UserId,
    },
    PlayerUpdated {
        player: RoomPlayer,
    },
    RoomUpdated {
        room: RoomSnapshot,
    },
    RoomSettingsUpdated {
        room: RoomSnapshot,
    },
    GamePoolUpdated {
        game_pool: Vec<GameKind>,
    },
    ConfessionSubmitted {
        user_id: UserId,
    },
    ConfessionRevealed {
        message: ChatMessage,
    },
    MatchmakingAvailable {
        count: usize,
    },
    MatchmakingStarted {
        room_code: String,
    },
    #[serde(rename_all = "camelCase")]
    GameStarting {
        #[serde(rename = "type")]
        kind: GameKind,
        player_count: usize,
    },
    GameSelected {
        #[serde(rename = "type")]
        kind: GameKind,
    },
    MatchStarted {
        game: GameWire,
    },
    GameUpdate {
        game: GameWire,
    },
    GameEnded {
        game: GameWire,
        winner: Option<UserId>,
        rankings: Vec<RankedPlayer>,
        room: RoomSnapshot,
    },
    NewMessage {
        message: ChatMessage,
    },
    Kicked {
        room_code: String,
    },
}

pub fn encode_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::from)
}

/// Successful ack: `{"event":"ack","ack":N,"data":{"success":true,...}}`.
/// `extra` must be a JSON object; its fields are merged beside `success`.
pub fn encode_ack_ok(ack: u64, extra: serde_json::Value) -> String {
    let mut data = serde_json::Map::new();
    data.insert("success".into(), serde_json::Value::Bool(true));
    if let serde_json::Value::Object(fields) = extra {
        data.extend(fields);
    }
    serde_json::json!({"event": "ack", "ack": ack, "data": data}).to_string()
}

/// Failed ack: `{"event":"ack","ack":N,"data":{"success":false,"error":KIND}}`.
pub fn encode_ack_err(ack: u64, kind: ErrorKind) -> String {
    serde_json::json!({
        "event": "ack",
        "ack": ack,
        "data": {"success": false, "error": kind.as_str()},
    })
    .to_string()
}
