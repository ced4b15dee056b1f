use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game::GameKind;
use crate::ids::{GameId, UserId};
use crate::player::RoomPlayer;

/// Room codes are exactly six characters from this alphabet.
pub const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random candidate room code. Uniqueness is the caller's problem.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Uppercase and trim a client-supplied room code.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Host-adjustable room settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    /// Game kinds eligible for random selection at start.
    pub game_pool: Vec<GameKind>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            game_pool: GameKind::ALL.to_vec(),
        }
    }
}

pub const DEFAULT_MAX_PLAYERS: u8 = 20;

/// Public view of a room, broadcast on every membership or settings change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub host_id: UserId,
    pub max_players: u8,
    pub is_public: bool,
    pub has_password: bool,
    pub players: Vec<RoomPlayer>,
    pub game_pool: Vec<GameKind>,
    pub current_game_id: Option<GameId>,
}

/// Entry in the public room listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListing {
    pub code: String,
    pub name: String,
    pub player_count: usize,
    pub max_players: u8,
    pub has_password: bool,
    pub in_game: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "invalid code: {code}");
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_room_code("  xy z1 "), "XY Z1");
        assert_eq!(normalize_room_code("abc123"), "ABC123");
    }

    #[test]
    fn validation_rejects_bad_codes() {
        assert!(!is_valid_room_code("abc123")); // lowercase
        assert!(!is_valid_room_code("ABC12")); // too short
        assert!(!is_valid_room_code("ABC1234")); // too long
        assert!(!is_valid_room_code("ABC-12")); // bad char
        assert!(is_valid_room_code("ABC123"));
    }

    #[test]
    fn default_settings_enable_every_game() {
        let settings = RoomSettings::default();
        assert_eq!(settings.game_pool.len(), GameKind::ALL.len());
    }
}
