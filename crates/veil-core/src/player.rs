use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Condensed per-player entry carried in room snapshots.
///
/// Never contains confession text; only the `has_confession` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    pub user_id: UserId,
    pub nickname: String,
    pub avatar: String,
    pub is_host: bool,
    pub has_confession: bool,
    pub is_playing: bool,
    pub connected: bool,
}

impl RoomPlayer {
    pub fn new(user_id: UserId, nickname: String, avatar: String, is_host: bool) -> Self {
        Self {
            user_id,
            nickname,
            avatar,
            is_host,
            has_confession: false,
            is_playing: false,
            connected: true,
        }
    }
}

/// Avatar glyphs assigned round-robin to new guests.
pub const AVATARS: &[&str] = &[
    "🦊", "🐼", "🦉", "🐙", "🦕", "🐸", "🦜", "🐺", "🦔", "🐢", "🦩", "🐧",
];

/// Pick an avatar for the `n`-th user.
pub fn avatar_for(n: usize) -> &'static str {
    AVATARS[n % AVATARS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_wraps_around() {
        assert_eq!(avatar_for(0), AVATARS[0]);
        assert_eq!(avatar_for(AVATARS.len()), AVATARS[0]);
        assert_eq!(avatar_for(AVATARS.len() + 3), AVATARS[3]);
    }

    #[test]
    fn new_player_starts_without_confession() {
        let p = RoomPlayer::new(UserId::new(), "Alice".into(), "🦊".into(), true);
        assert!(!p.has_confession);
        assert!(!p.is_playing);
        assert!(p.connected);
        assert!(p.is_host);
    }
}
