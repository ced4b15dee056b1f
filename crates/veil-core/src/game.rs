use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::chat::ChatKind;
use crate::ids::UserId;

/// Identifies a mini-game type. Used in room pools and wire messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameKind {
    #[serde(rename = "rock-paper-scissors")]
    RockPaperScissors,
    #[serde(rename = "racer")]
    Racer,
    #[serde(rename = "sketch")]
    Sketch,
}

impl GameKind {
    pub const ALL: &[GameKind] = &[Self::RockPaperScissors, Self::Racer, Self::Sketch];

    /// Wire-format string used in pools and game messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RockPaperScissors => "rock-paper-scissors",
            Self::Racer => "racer",
            Self::Sketch => "sketch",
        }
    }

    /// Parse from wire-format string. Returns `None` for unknown kinds.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "rock-paper-scissors" => Some(Self::RockPaperScissors),
            "racer" => Some(Self::Racer),
            "sketch" => Some(Self::Sketch),
            _ => None,
        }
    }

    /// Most players one instance of this kind can seat.
    pub fn max_players(&self) -> usize {
        match self {
            Self::RockPaperScissors => 20,
            Self::Racer => 8,
            Self::Sketch => 8,
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a game instance knows about each participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePlayer {
    pub user_id: UserId,
    pub nickname: String,
}

/// Held input booleans for the racer, resent by the client at ~20 Hz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RacerInputs {
    pub accelerate: bool,
    pub brake: bool,
    pub left: bool,
    pub right: bool,
    pub boost: bool,
}

/// A player action routed through the game's serialized action queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameAction {
    /// RPS: submit a choice for the current round.
    Choice { value: String },
    /// RPS battle royale: activate a held power-up.
    UsePowerUp {
        kind: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
    /// Acknowledge a round summary.
    Ready,
    /// Racer: replace the held input booleans.
    Input { inputs: RacerInputs },
    /// Sketch: append a stroke to the drawing buffer (drawer only).
    Draw { stroke: serde_json::Value },
    /// Sketch: clear the drawing buffer (drawer only).
    Clear,
    /// Sketch: submit a guess (guessers only).
    Guess { text: String },
}

/// Why a game rejected an action. Maps to a `VALIDATION` ack at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The actor is not a participant of this game.
    NotInGame,
    /// The action exists but this actor may not perform it right now.
    NotAllowed(&'static str),
    /// Malformed or out-of-phase payload.
    Invalid(String),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInGame => f.write_str("not a participant of this game"),
            Self::NotAllowed(why) => f.write_str(why),
            Self::Invalid(why) => f.write_str(why),
        }
    }
}

/// A player's final placement. Equal ranks mean a shared position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPlayer {
    pub user_id: UserId,
    pub rank: u32,
    pub score: i64,
}

/// Terminal result of a game instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOutcome {
    /// `None` for draws and forced ends.
    pub winner: Option<UserId>,
    /// Ordered best-first; ties share a rank value.
    pub rankings: Vec<RankedPlayer>,
}

/// Competition ranking: items sorted best-first by `key`, equal keys share
/// a rank, and the next distinct key skips past the tied block.
pub fn competition_ranks<K: Ord>(keys: &[K]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| keys[b].cmp(&keys[a]));

    let mut ranks = vec![0u32; keys.len()];
    let mut rank = 0u32;
    for (pos, &idx) in order.iter().enumerate() {
        if pos == 0 || keys[idx] < keys[order[pos - 1]] {
            rank = pos as u32 + 1;
        }
        ranks[idx] = rank;
    }
    ranks
}

/// The winner is the unique rank-1 player; a shared top rank is a draw.
pub fn sole_rank_one(rankings: &[RankedPlayer]) -> Option<UserId> {
    let mut top = rankings.iter().filter(|r| r.rank == 1);
    match (top.next(), top.next()) {
        (Some(only), None) => Some(only.user_id),
        _ => None,
    }
}

impl GameOutcome {
    /// Every ranked player sharing the worst (highest) rank.
    pub fn last_place(&self) -> Vec<UserId> {
        let Some(worst) = self.rankings.iter().map(|r| r.rank).max() else {
            return Vec::new();
        };
        // A game where everyone shares one rank has no last place.
        if self.rankings.iter().all(|r| r.rank == worst) && self.rankings.len() > 1 {
            return Vec::new();
        }
        self.rankings
            .iter()
            .filter(|r| r.rank == worst)
            .map(|r| r.user_id)
            .collect()
    }
}

/// Outbound signals produced by a game while processing an action,
/// a tick, or a timer. The scheduler owns the fan-out; games never
/// see the transport.
#[derive(Debug, Clone)]
pub enum GameSignal {
    /// Broadcast a fresh state projection to the room.
    StateChanged,
    /// Append a message to the room chat (word reveals, round notices).
    RoomMessage { kind: ChatKind, text: String },
    /// The game is over. No further signals follow.
    Ended(GameOutcome),
}

/// Capability set every Veil mini-game implements. The scheduler drives
/// instances exclusively through this trait, one action at a time.
pub trait PartyGame: Send {
    fn kind(&self) -> GameKind;

    /// Called once with the frozen player set before any action.
    fn init(&mut self, players: &[GamePlayer]);

    /// Apply one player action. Actions arrive strictly serialized.
    fn handle_action(
        &mut self,
        actor: UserId,
        action: &GameAction,
    ) -> Result<Vec<GameSignal>, ActionError>;

    /// Simulation rate in Hz for games that need continuous ticking.
    /// `None` means the game is purely action- and timer-driven.
    fn tick_rate(&self) -> Option<f32> {
        None
    }

    /// Advance the simulation by `dt` seconds.
    fn tick(&mut self, _dt: f32) -> Vec<GameSignal> {
        Vec::new()
    }

    /// The next pending deadline, tagged with a sequence number. The
    /// scheduler sleeps until the instant and calls [`Self::timer_fired`]
    /// with the same sequence; a stale sequence must be a no-op.
    fn timer_deadline(&self) -> Option<(u64, Instant)> {
        None
    }

    fn timer_fired(&mut self, _seq: u64) -> Vec<GameSignal> {
        Vec::new()
    }

    /// Public view of the state for one recipient. `None` is the
    /// spectator view; private fields (e.g. the sketch word) appear
    /// only for the entitled viewer.
    fn project(&self, viewer: Option<UserId>) -> serde_json::Value;

    fn player_disconnected(&mut self, _user: UserId) -> Vec<GameSignal> {
        Vec::new()
    }

    fn player_reconnected(&mut self, _user: UserId) -> Vec<GameSignal> {
        Vec::new()
    }

    /// Terminate immediately (timeout, abandonment, panic recovery).
    /// Returns a winnerless outcome ranking everyone as they stand.
    fn force_end(&mut self) -> GameOutcome;

    /// Release any per-instance resources. Timers owned by the scheduler
    /// die with the game task; most games have nothing extra to do.
    fn cleanup(&mut self) {}
}
