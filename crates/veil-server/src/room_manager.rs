use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use veil_core::chat::{CHAT_HISTORY_LIMIT, ChatKind, ChatLog, ChatMessage};
use veil_core::confession::{Confession, validate_confession_text, validate_message_text};
use veil_core::game::{GameKind, GamePlayer};
use veil_core::ids::{GameId, UserId};
use veil_core::player::RoomPlayer;
use veil_core::protocol::{CreateRoomReq, ServerEvent, UpdateRoomSettingsReq, encode_event};
use veil_core::room::{RoomListing, RoomSettings, RoomSnapshot, generate_room_code};
use veil_core::time::unix_millis;

use crate::error::RoomError;
use crate::session::User;

/// Per-player sender for outbound frames. Bounded to protect against slow
/// clients; `Bytes` gives zero-copy cloning across a broadcast.
pub type PlayerSender = mpsc::Sender<Bytes>;

/// Sender map shared with a live game's broadcast forwarder. Updated on
/// reconnection so the forwarder reaches reattached clients.
pub type GameSenders = Arc<Mutex<HashMap<UserId, PlayerSender>>>;

/// Attempts at a unique room code before giving up.
const CODE_RETRIES: usize = 10;

struct RoomEntry {
    code: String,
    name: String,
    description: Option<String>,
    host_id: UserId,
    max_players: u8,
    is_public: bool,
    password: Option<String>,
    settings: RoomSettings,
    players: Vec<RoomPlayer>,
    confessions: HashMap<UserId, Confession>,
    chat: ChatLog,
    connections: HashMap<UserId, PlayerSender>,
    game_senders: GameSenders,
    current_game: Option<GameId>,
    active: bool,
    /// Set when the last attachment drops; cleared on any reattach.
    empty_since: Option<Instant>,
    deactivated_at: Option<Instant>,
}

impl RoomEntry {
    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            host_id: self.host_id,
            max_players: self.max_players,
            is_public: self.is_public,
            has_password: self.password.is_some(),
            players: self.players.clone(),
            game_pool: self.settings.game_pool.clone(),
            current_game_id: self.current_game,
        }
    }

    fn player(&self, user_id: UserId) -> Option<&RoomPlayer> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    fn player_mut(&mut self, user_id: UserId) -> Option<&mut RoomPlayer> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    fn broadcast(&self, event: &ServerEvent) {
        match encode_event(event) {
            Ok(json) => {
                let bytes = Bytes::from(json);
                for (&user_id, tx) in &self.connections {
                    if tx.try_send(bytes.clone()).is_err() {
                        tracing::debug!(
                            player = %user_id, room = %self.code,
                            "skipping broadcast to slow client"
                        );
                    }
                }
            },
            Err(e) => tracing::error!(room = %self.code, error = %e, "failed to encode event"),
        }
    }

    fn send_to(&self, user_id: UserId, event: &ServerEvent) {
        if let Some(tx) = self.connections.get(&user_id)
            && let Ok(json) = encode_event(event)
            && tx.try_send(Bytes::from(json)).is_err()
        {
            tracing::debug!(player = %user_id, room = %self.code, "dropping frame for slow client");
        }
    }

    fn append_system(&mut self, text: String) {
        let msg = ChatMessage::system(text);
        self.chat.push(msg.clone());
        self.broadcast(&ServerEvent::NewMessage { message: msg });
    }
}

/// Owns all room state. Every mutation broadcasts its own diff event, so
/// the order observed by all attachments matches the order of application.
pub struct RoomManager {
    rooms: HashMap<String, RoomEntry>,
    /// A player belongs to at most one active room at a time.
    user_rooms: HashMap<UserId, String>,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            user_rooms: HashMap::new(),
        }
    }

    /// Create a room and seat the creator as host. Joining a new room
    /// implicitly leaves the previous one.
    pub fn create(
        &mut self,
        user: &User,
        req: &CreateRoomReq,
        sender: PlayerSender,
        default_max_players: u8,
    ) -> Result<RoomSnapshot, RoomError> {
        let code = self.allocate_code()?;
        self.remove_from_current_room(user.id);

        let mut player = RoomPlayer::new(user.id, user.nickname.clone(), user.avatar.clone(), true);
        player.connected = true;
        let name = req.name.trim();
        let mut entry = RoomEntry {
            code: code.clone(),
            name: if name.is_empty() {
                format!("Room {code}")
            } else {
                name.to_string()
            },
            description: req.description.clone().filter(|d| !d.trim().is_empty()),
            host_id: user.id,
            max_players: req.max_players.unwrap_or(default_max_players).max(2),
            is_public: req.is_public.unwrap_or(true),
            password: req.password.clone().filter(|p| !p.is_empty()),
            settings: RoomSettings::default(),
            players: vec![player],
            confessions: HashMap::new(),
            chat: ChatLog::new(),
            connections: HashMap::new(),
            game_senders: Arc::new(Mutex::new(HashMap::new())),
            current_game: None,
            active: true,
            empty_since: None,
            deactivated_at: None,
        };
        entry.connections.insert(user.id, sender);
        entry.append_system(format!("{} created the room", user.nickname));

        let snapshot = entry.snapshot();
        self.rooms.insert(code.clone(), entry);
        self.user_rooms.insert(user.id, code.clone());
        tracing::info!(room = %code, host = %user.id, "room created");
        Ok(snapshot)
    }

    fn allocate_code(&self) -> Result<String, RoomError> {
        for _ in 0..CODE_RETRIES {
            let code = generate_room_code();
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(RoomError::CodeExhaustion)
    }

    /// Join a room. Idempotent for current members: returns the snapshot
    /// without changing membership.
    pub fn join(
        &mut self,
        user: &User,
        code: &str,
        password: Option<&str>,
        sender: PlayerSender,
    ) -> Result<RoomSnapshot, RoomError> {
        let already_member = {
            let entry = self.rooms.get(code).ok_or(RoomError::NotFound)?;
            if !entry.active {
                return Err(RoomError::Inactive);
            }
            let member = entry.player(user.id).is_some();
            if !member {
                if let Some(expected) = &entry.password
                    && password != Some(expected.as_str())
                {
                    return Err(RoomError::BadPassword);
                }
                if entry.players.len() >= entry.max_players as usize {
                    return Err(RoomError::Full);
                }
            }
            member
        };

        if already_member {
            // Refresh the connection and hand back the current snapshot.
            let entry = self.rooms.get_mut(code).expect("room exists");
            entry.connections.insert(user.id, sender);
            if let Some(p) = entry.player_mut(user.id) {
                p.connected = true;
            }
            entry.empty_since = None;
            return Ok(entry.snapshot());
        }

        self.remove_from_current_room(user.id);

        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        let mut player =
            RoomPlayer::new(user.id, user.nickname.clone(), user.avatar.clone(), false);
        // A returning player keeps their unrevealed confession.
        player.has_confession = entry
            .confessions
            .get(&user.id)
            .map(|c| !c.is_revealed)
            .unwrap_or(false);
        entry.players.push(player.clone());
        entry.connections.insert(user.id, sender);
        entry.empty_since = None;
        self.user_rooms.insert(user.id, code.to_string());

        entry.broadcast(&ServerEvent::PlayerJoined {
            room_code: code.to_string(),
            player,
        });
        entry.append_system(format!("{} joined the room", user.nickname));
        Ok(entry.snapshot())
    }

    /// Remove a player. The last player out deactivates the room.
    /// Returns `true` when the room was deactivated.
    pub fn leave(&mut self, user_id: UserId, code: &str) -> Result<bool, RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if entry.player(user_id).is_none() {
            return Err(RoomError::NotInRoom);
        }
        let nickname = entry
            .player(user_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default();

        Self::detach_player(entry, user_id);
        self.user_rooms.remove(&user_id);

        let entry = self.rooms.get_mut(code).expect("room exists");
        entry.broadcast(&ServerEvent::PlayerLeft {
            room_code: code.to_string(),
            user_id,
        });
        entry.append_system(format!("{nickname} left the room"));

        if entry.players.is_empty() {
            Self::deactivate(entry);
            tracing::info!(room = %code, "room deactivated (last player left)");
            return Ok(true);
        }

        // Host transfer: the earliest-joined remaining player takes over.
        if entry.host_id == user_id {
            let new_host = entry.players[0].user_id;
            entry.host_id = new_host;
            for p in &mut entry.players {
                p.is_host = p.user_id == entry.host_id;
            }
            let snapshot = entry.snapshot();
            entry.broadcast(&ServerEvent::RoomUpdated { room: snapshot });
            tracing::info!(room = %code, new_host = %new_host, "host transferred");
        }
        Ok(false)
    }

    /// Host-only: remove another player from the room.
    pub fn kick(
        &mut self,
        host_id: UserId,
        code: &str,
        target: UserId,
    ) -> Result<bool, RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if entry.host_id != host_id {
            return Err(RoomError::NotHost);
        }
        if entry.player(target).is_none() {
            return Err(RoomError::NotInRoom);
        }
        let nickname = entry
            .player(target)
            .map(|p| p.nickname.clone())
            .unwrap_or_default();

        entry.send_to(
            target,
            &ServerEvent::Kicked {
                room_code: code.to_string(),
            },
        );
        Self::detach_player(entry, target);
        self.user_rooms.remove(&target);

        let entry = self.rooms.get_mut(code).expect("room exists");
        entry.broadcast(&ServerEvent::PlayerKicked { user_id: target });
        entry.append_system(format!("{nickname} was kicked"));

        if entry.players.is_empty() {
            Self::deactivate(entry);
            return Ok(true);
        }
        if entry.host_id == target {
            entry.host_id = entry.players[0].user_id;
            for p in &mut entry.players {
                p.is_host = p.user_id == entry.host_id;
            }
            let snapshot = entry.snapshot();
            entry.broadcast(&ServerEvent::RoomUpdated { room: snapshot });
        }
        Ok(false)
    }

    fn detach_player(entry: &mut RoomEntry, user_id: UserId) {
        entry.players.retain(|p| p.user_id != user_id);
        entry.connections.remove(&user_id);
        if let Ok(mut senders) = entry.game_senders.lock() {
            senders.remove(&user_id);
        }
    }

    fn deactivate(entry: &mut RoomEntry) {
        entry.active = false;
        entry.deactivated_at = Some(Instant::now());
        entry.connections.clear();
        entry.empty_since = None;
        if let Ok(mut senders) = entry.game_senders.lock() {
            senders.clear();
        }
    }

    fn remove_from_current_room(&mut self, user_id: UserId) {
        if let Some(code) = self.user_rooms.get(&user_id).cloned() {
            let _ = self.leave(user_id, &code);
        }
    }

    /// Attachment dropped: the player stays a member, marked disconnected.
    pub fn mark_disconnected(&mut self, user_id: UserId, code: &str) {
        let Some(entry) = self.rooms.get_mut(code) else {
            return;
        };
        if let Some(p) = entry.player_mut(user_id) {
            p.connected = false;
        } else {
            return;
        }
        entry.connections.remove(&user_id);
        if entry.connections.is_empty() {
            entry.empty_since = Some(Instant::now());
        }
        entry.broadcast(&ServerEvent::PlayerDisconnected {
            user_id,
            temporary: true,
        });
    }

    /// A reattached client re-enters its room. No membership change.
    pub fn reconnect_player(
        &mut self,
        user_id: UserId,
        code: &str,
        sender: PlayerSender,
    ) -> Result<RoomSnapshot, RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if !entry.active {
            return Err(RoomError::Inactive);
        }
        let Some(p) = entry.player_mut(user_id) else {
            return Err(RoomError::NotInRoom);
        };
        p.connected = true;
        entry.connections.insert(user_id, sender.clone());
        entry.empty_since = None;
        if let Ok(mut senders) = entry.game_senders.lock() {
            senders.insert(user_id, sender);
        }
        self.user_rooms.insert(user_id, code.to_string());
        entry.broadcast(&ServerEvent::PlayerReconnected { user_id });
        Ok(entry.snapshot())
    }

    pub fn submit_confession(
        &mut self,
        user_id: UserId,
        code: &str,
        text: &str,
    ) -> Result<(), RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if entry.player(user_id).is_none() {
            return Err(RoomError::NotInRoom);
        }
        validate_confession_text(text)?;
        if entry
            .confessions
            .get(&user_id)
            .is_some_and(|c| !c.is_revealed)
        {
            return Err(RoomError::AlreadyConfessed);
        }
        entry
            .confessions
            .insert(user_id, Confession::new(user_id, text.to_string()));
        if let Some(p) = entry.player_mut(user_id) {
            p.has_confession = true;
        }
        entry.broadcast(&ServerEvent::ConfessionSubmitted { user_id });
        Ok(())
    }

    /// Replace the text of an unrevealed confession.
    pub fn update_confession(
        &mut self,
        user_id: UserId,
        code: &str,
        text: &str,
    ) -> Result<(), RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if entry.player(user_id).is_none() {
            return Err(RoomError::NotInRoom);
        }
        validate_confession_text(text)?;
        let confession = entry
            .confessions
            .get_mut(&user_id)
            .ok_or(RoomError::NoConfession)?;
        if confession.is_revealed {
            return Err(RoomError::Revealed);
        }
        confession.text = text.to_string();
        Ok(())
    }

    /// Condensed confession list: raw text only once revealed.
    pub fn confessions_view(&self, code: &str) -> Result<Vec<serde_json::Value>, RoomError> {
        let entry = self.rooms.get(code).ok_or(RoomError::NotFound)?;
        Ok(entry
            .confessions
            .values()
            .map(|c| {
                serde_json::json!({
                    "userId": c.user_id,
                    "isRevealed": c.is_revealed,
                    "revealedAt": c.revealed_at,
                    "text": if c.is_revealed { Some(c.text.as_str()) } else { None },
                })
            })
            .collect())
    }

    pub fn my_confession(
        &self,
        user_id: UserId,
        code: &str,
    ) -> Result<Option<serde_json::Value>, RoomError> {
        let entry = self.rooms.get(code).ok_or(RoomError::NotFound)?;
        Ok(entry.confessions.get(&user_id).map(|c| {
            serde_json::json!({
                "text": c.text,
                "isRevealed": c.is_revealed,
                "revealedAt": c.revealed_at,
            })
        }))
    }

    /// Scheduler-only: reveal a loser's confession into the chat stream.
    pub fn reveal_confession(
        &mut self,
        code: &str,
        user_id: UserId,
        game_id: GameId,
    ) -> Option<ChatMessage> {
        let entry = self.rooms.get_mut(code)?;
        let nickname = entry
            .player(user_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_else(|| "someone".to_string());
        let confession = entry.confessions.get_mut(&user_id)?;
        if confession.is_revealed {
            return None;
        }
        confession.is_revealed = true;
        confession.revealed_at = Some(unix_millis());
        confession.revealed_in_game = Some(game_id);
        let text = confession.text.clone();

        if let Some(p) = entry.player_mut(user_id) {
            p.has_confession = false;
        }
        let msg = ChatMessage::confession(&nickname, &text);
        entry.chat.push(msg.clone());
        entry.broadcast(&ServerEvent::ConfessionRevealed {
            message: msg.clone(),
        });
        tracing::info!(room = %code, player = %user_id, game = %game_id, "confession revealed");
        Some(msg)
    }

    pub fn send_chat(
        &mut self,
        user: UserId,
        code: &str,
        text: &str,
    ) -> Result<ChatMessage, RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        let Some(player) = entry.player(user) else {
            return Err(RoomError::NotInRoom);
        };
        validate_message_text(text)?;
        let msg = ChatMessage::chat(user, player.nickname.clone(), text.to_string());
        entry.chat.push(msg.clone());
        entry.broadcast(&ServerEvent::NewMessage {
            message: msg.clone(),
        });
        Ok(msg)
    }

    /// Append a game-originated message (word reveals, round notices).
    pub fn append_game_message(&mut self, code: &str, kind: ChatKind, text: String) {
        if let Some(entry) = self.rooms.get_mut(code) {
            let mut msg = ChatMessage::game(text);
            msg.kind = kind;
            entry.chat.push(msg.clone());
            entry.broadcast(&ServerEvent::NewMessage { message: msg });
        }
    }

    pub fn append_system_message(&mut self, code: &str, text: String) {
        if let Some(entry) = self.rooms.get_mut(code) {
            entry.append_system(text);
        }
    }

    pub fn chat_history(&self, user_id: UserId, code: &str) -> Result<Vec<ChatMessage>, RoomError> {
        let entry = self.rooms.get(code).ok_or(RoomError::NotFound)?;
        if entry.player(user_id).is_none() {
            return Err(RoomError::NotInRoom);
        }
        Ok(entry.chat.recent(CHAT_HISTORY_LIMIT))
    }

    /// Host-only: replace the game pool. Unknown kinds are silently
    /// dropped; an empty filtered pool falls back to every known kind.
    pub fn update_game_pool(
        &mut self,
        host_id: UserId,
        code: &str,
        pool: &[String],
    ) -> Result<(Vec<GameKind>, RoomSnapshot), RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if entry.host_id != host_id {
            return Err(RoomError::NotHost);
        }
        let mut filtered: Vec<GameKind> = Vec::new();
        for name in pool {
            if let Some(kind) = GameKind::from_str_opt(name)
                && !filtered.contains(&kind)
            {
                filtered.push(kind);
            }
        }
        if filtered.is_empty() {
            filtered = GameKind::ALL.to_vec();
        }
        entry.settings.game_pool = filtered.clone();
        let snapshot = entry.snapshot();
        entry.broadcast(&ServerEvent::GamePoolUpdated {
            game_pool: filtered.clone(),
        });
        entry.broadcast(&ServerEvent::RoomUpdated {
            room: snapshot.clone(),
        });
        Ok((filtered, snapshot))
    }

    /// Host-only: adjust room metadata. An empty password string clears it.
    pub fn update_settings(
        &mut self,
        host_id: UserId,
        code: &str,
        req: &UpdateRoomSettingsReq,
    ) -> Result<RoomSnapshot, RoomError> {
        let entry = self.rooms.get_mut(code).ok_or(RoomError::NotFound)?;
        if entry.host_id != host_id {
            return Err(RoomError::NotHost);
        }
        if let Some(name) = &req.name
            && !name.trim().is_empty()
        {
            entry.name = name.trim().to_string();
        }
        if let Some(description) = &req.description {
            entry.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
        }
        if let Some(password) = &req.password {
            entry.password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if let Some(max_players) = req.max_players {
            entry.max_players = max_players.max(entry.players.len() as u8).max(2);
        }
        if let Some(is_public) = req.is_public {
            entry.is_public = is_public;
        }
        let snapshot = entry.snapshot();
        entry.broadcast(&ServerEvent::RoomSettingsUpdated {
            room: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Update the player's nickname in their current room, if any.
    pub fn update_nickname(&mut self, user_id: UserId, nickname: &str) {
        let Some(code) = self.user_rooms.get(&user_id).cloned() else {
            return;
        };
        if let Some(entry) = self.rooms.get_mut(&code) {
            if let Some(p) = entry.player_mut(user_id) {
                p.nickname = nickname.to_string();
            }
            if let Some(player) = entry.player(user_id).cloned() {
                entry.broadcast(&ServerEvent::PlayerUpdated { player });
            }
        }
    }

    // -- Game linkage ------------------------------------------------------

    /// Players holding an unrevealed confession, in join order.
    pub fn ready_players(&self, code: &str) -> Vec<GamePlayer> {
        self.rooms
            .get(code)
            .map(|entry| {
                entry
                    .players
                    .iter()
                    .filter(|p| p.has_confession)
                    .map(|p| GamePlayer {
                        user_id: p.user_id,
                        nickname: p.nickname.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_playing(&mut self, code: &str, users: &[UserId], playing: bool) {
        if let Some(entry) = self.rooms.get_mut(code) {
            for p in &mut entry.players {
                if users.contains(&p.user_id) {
                    p.is_playing = playing;
                }
            }
        }
    }

    pub fn clear_playing(&mut self, code: &str) {
        if let Some(entry) = self.rooms.get_mut(code) {
            for p in &mut entry.players {
                p.is_playing = false;
            }
        }
    }

    pub fn current_game(&self, code: &str) -> Option<GameId> {
        self.rooms.get(code).and_then(|e| e.current_game)
    }

    pub fn set_current_game(&mut self, code: &str, game: Option<GameId>) {
        if let Some(entry) = self.rooms.get_mut(code) {
            entry.current_game = game;
        }
    }

    /// Copy the live connections into the shared game-sender map and
    /// return it for the broadcast forwarder.
    pub fn populate_game_senders(&self, code: &str) -> Option<GameSenders> {
        let entry = self.rooms.get(code)?;
        if let Ok(mut senders) = entry.game_senders.lock() {
            senders.clear();
            for (&user_id, tx) in &entry.connections {
                senders.insert(user_id, tx.clone());
            }
        }
        Some(Arc::clone(&entry.game_senders))
    }

    // -- Reads -------------------------------------------------------------

    pub fn snapshot(&self, code: &str) -> Option<RoomSnapshot> {
        self.rooms.get(code).filter(|e| e.active).map(|e| e.snapshot())
    }

    pub fn is_host(&self, code: &str, user_id: UserId) -> bool {
        self.rooms
            .get(code)
            .map(|e| e.host_id == user_id)
            .unwrap_or(false)
    }

    pub fn is_member(&self, code: &str, user_id: UserId) -> bool {
        self.rooms
            .get(code)
            .map(|e| e.player(user_id).is_some())
            .unwrap_or(false)
    }

    pub fn room_of(&self, user_id: UserId) -> Option<String> {
        self.user_rooms.get(&user_id).cloned()
    }

    pub fn listing(&self) -> Vec<RoomListing> {
        self.rooms
            .values()
            .filter(|e| e.active && e.is_public)
            .map(|e| RoomListing {
                code: e.code.clone(),
                name: e.name.clone(),
                player_count: e.players.len(),
                max_players: e.max_players,
                has_password: e.password.is_some(),
                in_game: e.current_game.is_some(),
            })
            .collect()
    }

    pub fn broadcast(&self, code: &str, event: &ServerEvent) {
        if let Some(entry) = self.rooms.get(code) {
            entry.broadcast(event);
        }
    }

    pub fn send_to(&self, code: &str, user_id: UserId, event: &ServerEvent) {
        if let Some(entry) = self.rooms.get(code) {
            entry.send_to(user_id, event);
        }
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Deactivate rooms whose last attachment dropped more than
    /// `empty_grace` ago, and forget rooms deactivated longer than
    /// `retention` ago. Returns codes deactivated this pass.
    pub fn sweep(&mut self, empty_grace: Duration, retention: Duration) -> Vec<String> {
        let mut deactivated = Vec::new();
        for (code, entry) in &mut self.rooms {
            if entry.active
                && let Some(since) = entry.empty_since
                && since.elapsed() > empty_grace
            {
                for p in &entry.players {
                    self.user_rooms.remove(&p.user_id);
                }
                entry.players.clear();
                Self::deactivate(entry);
                deactivated.push(code.clone());
                tracing::info!(room = %code, "room deactivated (empty beyond grace)");
            }
        }
        self.rooms.retain(|_, entry| {
            entry.active
                || entry
                    .deactivated_at
                    .is_none_or(|at| at.elapsed() <= retention)
        });
        deactivated
    }

    #[cfg(test)]
    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }
}
