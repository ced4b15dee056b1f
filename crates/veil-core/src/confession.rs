use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{GameId, UserId};

pub const CONFESSION_MIN_LEN: usize = 10;
pub const CONFESSION_MAX_LEN: usize = 500;
pub const MESSAGE_MAX_LEN: usize = 500;

/// A player's hidden secret for one room. At most one unrevealed confession
/// per (room, user); once revealed it never changes again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confession {
    pub user_id: UserId,
    pub text: String,
    pub is_revealed: bool,
    pub revealed_at: Option<u64>,
    pub revealed_in_game: Option<GameId>,
}

impl Confession {
    pub fn new(user_id: UserId, text: String) -> Self {
        Self {
            user_id,
            text,
            is_revealed: false,
            revealed_at: None,
            revealed_in_game: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    TooShort { min: usize, len: usize },
    TooLong { max: usize, len: usize },
    ForbiddenChar(char),
}

impl fmt::Display for TextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { min, len } => write!(f, "text too short ({len} < {min})"),
            Self::TooLong { max, len } => write!(f, "text too long ({len} > {max})"),
            Self::ForbiddenChar(c) => write!(f, "forbidden character {c:?}"),
        }
    }
}

fn check_text(text: &str, min: usize, max: usize) -> Result<(), TextError> {
    let len = text.len();
    if len < min {
        return Err(TextError::TooShort { min, len });
    }
    if len > max {
        return Err(TextError::TooLong { max, len });
    }
    if let Some(c) = text.chars().find(|c| matches!(c, '<' | '>')) {
        return Err(TextError::ForbiddenChar(c));
    }
    Ok(())
}

/// Confession text: 10..=500 bytes, no angle brackets.
pub fn validate_confession_text(text: &str) -> Result<(), TextError> {
    check_text(text, CONFESSION_MIN_LEN, CONFESSION_MAX_LEN)
}

/// Chat message text: 1..=500 bytes, no angle brackets.
pub fn validate_message_text(text: &str) -> Result<(), TextError> {
    check_text(text, 1, MESSAGE_MAX_LEN)
}
