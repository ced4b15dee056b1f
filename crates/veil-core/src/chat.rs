use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::UserId;
use crate::time::unix_millis;

/// Per-room chat log capacity. Overflow trims the oldest message.
pub const CHAT_LOG_CAPACITY: usize = 100;

/// History fetches never return more than this many messages.
pub const CHAT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Chat,
    Confession,
    System,
    Game,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub author_user_id: Option<UserId>,
    pub nickname: String,
    pub text: String,
    pub kind: ChatKind,
    pub created_at: u64,
}

impl ChatMessage {
    pub fn chat(author: UserId, nickname: String, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_user_id: Some(author),
            nickname,
            text,
            kind: ChatKind::Chat,
            created_at: unix_millis(),
        }
    }

    /// A message with no author, e.g. join/leave notices.
    pub fn system(text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_user_id: None,
            nickname: String::new(),
            text,
            kind: ChatKind::System,
            created_at: unix_millis(),
        }
    }

    /// Emitted by game instances (word reveals, round notices).
    pub fn game(text: String) -> Self {
        Self {
            kind: ChatKind::Game,
            ..Self::system(text)
        }
    }

    /// The reveal message for a loser's confession.
    pub fn confession(nickname: &str, text: &str) -> Self {
        Self {
            kind: ChatKind::Confession,
            nickname: nickname.to_string(),
            ..Self::system(format!("{nickname}'s confession: {text}"))
        }
    }
}

/// Append-only ring buffer of the last [`CHAT_LOG_CAPACITY`] messages.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::with_capacity(CHAT_LOG_CAPACITY),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        if self.messages.len() == CHAT_LOG_CAPACITY {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    /// The most recent `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
