pub mod words;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;

use veil_core::chat::ChatKind;
use veil_core::game::{
    ActionError, GameAction, GameKind, GameOutcome, GamePlayer, GameSignal, PartyGame,
    RankedPlayer, competition_ranks, sole_rank_one,
};
use veil_core::ids::UserId;

use words::{mask_word, normalize_guess, pick_word};

/// Data-driven configuration for the sketch game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SketchConfig {
    pub round_secs: f32,
    pub intermission_secs: f32,
    pub guess_points: i64,
    pub speed_bonus: i64,
    /// A correct guess inside this window earns the speed bonus.
    pub speed_bonus_window_secs: f32,
    pub drawer_points: i64,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            round_secs: 60.0,
            intermission_secs: 3.0,
            guess_points: 100,
            speed_bonus: 50,
            speed_bonus_window_secs: 30.0,
            drawer_points: 10,
        }
    }
}

impl SketchConfig {
    /// Load config from the environment or a TOML file, falling back to
    /// defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("VEIL_SKETCH_CONFIG")
            && let Ok(contents) = std::fs::read_to_string(&path)
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        if let Ok(contents) = std::fs::read_to_string("config/sketch.toml")
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Drawing,
    Intermission,
    Ended,
}

#[derive(Debug)]
struct SketchPlayer {
    user_id: UserId,
    nickname: String,
    score: i64,
    solved: bool,
    connected: bool,
}

/// An incorrect guess, kept in the round's public guess feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GuessLine {
    user_id: UserId,
    nickname: String,
    text: String,
}

pub struct SketchGame {
    cfg: SketchConfig,
    players: Vec<SketchPlayer>,
    phase: Phase,
    round: u32,
    rounds_total: u32,
    drawer_idx: usize,
    current_word: String,
    category: String,
    word_hint: String,
    strokes: Vec<serde_json::Value>,
    guesses: Vec<GuessLine>,
    used_words: HashSet<&'static str>,
    round_started: Instant,
    timer_seq: u64,
    deadline: Option<Instant>,
}

impl SketchGame {
    pub fn new() -> Self {
        Self::with_config(SketchConfig::load())
    }

    pub fn with_config(cfg: SketchConfig) -> Self {
        Self {
            cfg,
            players: Vec::new(),
            phase: Phase::Ended,
            round: 0,
            rounds_total: 0,
            drawer_idx: 0,
            current_word: String::new(),
            category: String::new(),
            word_hint: String::new(),
            strokes: Vec::new(),
            guesses: Vec::new(),
            used_words: HashSet::new(),
            round_started: Instant::now(),
            timer_seq: 0,
            deadline: None,
        }
    }

    fn index_of(&self, user: UserId) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user)
    }

    fn drawer(&self) -> &SketchPlayer {
        &self.players[self.drawer_idx]
    }

    fn arm(&mut self, secs: f32) {
        self.timer_seq += 1;
        self.deadline = Some(Instant::now() + Duration::from_secs_f32(secs));
    }

    fn start_round(&mut self) {
        self.round += 1;
        // Round-robin drawer so everyone draws exactly once.
        self.drawer_idx = (self.round as usize - 1) % self.players.len();
        let entry = pick_word(&self.used_words);
        self.used_words.insert(entry.word);
        self.current_word = entry.word.to_string();
        self.category = entry.category.to_string();
        self.word_hint = mask_word(entry.word);
        self.strokes.clear();
        self.guesses.clear();
        for p in &mut self.players {
            p.solved = false;
        }
        self.phase = Phase::Drawing;
        self.round_started = Instant::now();
        self.arm(self.cfg.round_secs);
        tracing::debug!(
            round = self.round,
            drawer = %self.players[self.drawer_idx].user_id,
            category = %self.category,
            "sketch round started"
        );
    }

    /// Reveal the word and move into the intermission.
    fn end_round(&mut self) -> Vec<GameSignal> {
        self.phase = Phase::Intermission;
        let reveal = format!("The word was \"{}\"", self.current_word);
        self.arm(self.cfg.intermission_secs);
        vec![
            GameSignal::StateChanged,
            GameSignal::RoomMessage {
                kind: ChatKind::Game,
                text: reveal,
            },
        ]
    }

    fn all_guessers_solved(&self) -> bool {
        self.players
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != self.drawer_idx)
            .all(|(_, p)| p.solved)
    }

    fn final_outcome(&self) -> GameOutcome {
        let keys: Vec<i64> = self.players.iter().map(|p| p.score).collect();
        let ranks = competition_ranks(&keys);
        let mut rankings: Vec<RankedPlayer> = self
            .players
            .iter()
            .zip(&ranks)
            .map(|(p, &rank)| RankedPlayer {
                user_id: p.user_id,
                rank,
                score: p.score,
            })
            .collect();
        rankings.sort_by_key(|r| r.rank);
        let winner = sole_rank_one(&rankings);
        GameOutcome { winner, rankings }
    }

    fn handle_guess(&mut self, idx: usize, text: &str) -> Result<Vec<GameSignal>, ActionError> {
        if idx == self.drawer_idx {
            return Err(ActionError::NotAllowed("the drawer cannot guess"));
        }
        if self.players[idx].solved {
            return Err(ActionError::NotAllowed("already guessed this round"));
        }
        if self.phase != Phase::Drawing {
            return Err(ActionError::NotAllowed("no round in progress"));
        }

        if normalize_guess(text) == normalize_guess(&self.current_word) {
            let elapsed = self.round_started.elapsed().as_secs_f32();
            let mut points = self.cfg.guess_points;
            if elapsed < self.cfg.speed_bonus_window_secs {
                points += self.cfg.speed_bonus;
            }
            self.players[idx].score += points;
            self.players[idx].solved = true;
            self.players[self.drawer_idx].score += self.cfg.drawer_points;

            if self.all_guessers_solved() {
                // Everyone got it: cut the round short.
                return Ok(self.end_round());
            }
            return Ok(vec![GameSignal::StateChanged]);
        }

        let line = GuessLine {
            user_id: self.players[idx].user_id,
            nickname: self.players[idx].nickname.clone(),
            text: text.to_string(),
        };
        self.guesses.push(line);
        Ok(vec![GameSignal::StateChanged])
    }
}

impl Default for SketchGame {
    fn default() -> Self {
        Self::with_config(SketchConfig::default())
    }
}

impl PartyGame for SketchGame {
    fn kind(&self) -> GameKind {
        GameKind::Sketch
    }

    fn init(&mut self, players: &[GamePlayer]) {
        self.players = players
            .iter()
            .map(|p| SketchPlayer {
                user_id: p.user_id,
                nickname: p.nickname.clone(),
                score: 0,
                solved: false,
                connected: true,
            })
            .collect();
        self.rounds_total = players.len() as u32;
        self.round = 0;
        self.start_round();
    }

    fn handle_action(
        &mut self,
        actor: UserId,
        action: &GameAction,
    ) -> Result<Vec<GameSignal>, ActionError> {
        let idx = self.index_of(actor).ok_or(ActionError::NotInGame)?;
        if self.phase == Phase::Ended {
            return Err(ActionError::NotAllowed("game already ended"));
        }

        match action {
            GameAction::Draw { stroke } => {
                if idx != self.drawer_idx {
                    return Err(ActionError::NotAllowed("only the drawer may draw"));
                }
                if self.phase != Phase::Drawing {
                    return Err(ActionError::NotAllowed("no round in progress"));
                }
                self.strokes.push(stroke.clone());
                Ok(vec![GameSignal::StateChanged])
            },
            GameAction::Clear => {
                if idx != self.drawer_idx {
                    return Err(ActionError::NotAllowed("only the drawer may clear"));
                }
                self.strokes.clear();
                Ok(vec![GameSignal::StateChanged])
            },
            GameAction::Guess { text } => self.handle_guess(idx, text),
            GameAction::Ready => Ok(Vec::new()),
            _ => Err(ActionError::Invalid("not a sketch action".into())),
        }
    }

    fn timer_deadline(&self) -> Option<(u64, Instant)> {
        self.deadline.map(|d| (self.timer_seq, d))
    }

    fn timer_fired(&mut self, seq: u64) -> Vec<GameSignal> {
        if seq != self.timer_seq {
            return Vec::new();
        }
        match self.phase {
            // Round timer ran out: reveal and move on.
            Phase::Drawing => self.end_round(),
            Phase::Intermission => {
                if self.round >= self.rounds_total {
                    self.phase = Phase::Ended;
                    self.timer_seq += 1;
                    self.deadline = None;
                    let outcome = self.final_outcome();
                    vec![GameSignal::StateChanged, GameSignal::Ended(outcome)]
                } else {
                    self.start_round();
                    vec![GameSignal::StateChanged]
                }
            },
            Phase::Ended => Vec::new(),
        }
    }

    fn project(&self, viewer: Option<UserId>) -> serde_json::Value {
        let players: Vec<serde_json::Value> = self
            .players
            .iter()
            .map(|p| {
                json!({
                    "userId": p.user_id,
                    "nickname": p.nickname,
                    "score": p.score,
                    "solved": p.solved,
                    "connected": p.connected,
                })
            })
            .collect();

        // The word itself is visible only to the drawer; everyone else
        // gets an explicit null plus the public hint.
        let word = if self.phase != Phase::Ended && viewer == Some(self.drawer().user_id) {
            json!(self.current_word)
        } else {
            serde_json::Value::Null
        };

        let phase = match self.phase {
            Phase::Drawing => "drawing",
            Phase::Intermission => "intermission",
            Phase::Ended => "ended",
        };
        json!({
            "phase": phase,
            "round": self.round,
            "roundsTotal": self.rounds_total,
            "drawerId": self.players.get(self.drawer_idx).map(|p| p.user_id),
            "category": self.category,
            "wordHint": self.word_hint,
            "currentWord": word,
            "strokes": self.strokes,
            "guesses": self.guesses,
            "players": players,
        })
    }

    fn player_disconnected(&mut self, user: UserId) -> Vec<GameSignal> {
        let Some(i) = self.index_of(user) else {
            return Vec::new();
        };
        self.players[i].connected = false;
        // A vanished drawer would stall the round; reveal and move on.
        if i == self.drawer_idx && self.phase == Phase::Drawing {
            return self.end_round();
        }
        vec![GameSignal::StateChanged]
    }

    fn player_reconnected(&mut self, user: UserId) -> Vec<GameSignal> {
        if let Some(i) = self.index_of(user) {
            self.players[i].connected = true;
            return vec![GameSignal::StateChanged];
        }
        Vec::new()
    }

    fn force_end(&mut self) -> GameOutcome {
        self.phase = Phase::Ended;
        self.timer_seq += 1;
        self.deadline = None;
        GameOutcome {
            winner: None,
            rankings: self.final_outcome().rankings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::test_helpers::{ended, make_players, test_user};

    fn guess(text: &str) -> GameAction {
        GameAction::Guess { text: text.into() }
    }

    /// Game with a known word so guesses are deterministic.
    fn rigged_game(n: usize, word: &str) -> SketchGame {
        let mut game = SketchGame::new();
        game.init(&make_players(n));
        game.current_word = word.to_string();
        game.word_hint = mask_word(word);
        game
    }

    #[test]
    fn rounds_equal_player_count() {
        let mut game = SketchGame::new();
        game.init(&make_players(3));
        assert_eq!(game.rounds_total, 3);
        assert_eq!(game.round, 1);
        assert_eq!(game.drawer_idx, 0);
    }

    #[test]
    fn word_is_private_to_the_drawer() {
        let game = rigged_game(3, "kedi");
        let drawer_view = game.project(Some(test_user(0)));
        assert_eq!(drawer_view["currentWord"], json!("kedi"));
        let guesser_view = game.project(Some(test_user(1)));
        assert!(guesser_view["currentWord"].is_null());
        let spectator_view = game.project(None);
        assert!(spectator_view["currentWord"].is_null());
        assert_eq!(guesser_view["wordHint"], json!("_ _ _ _"));
    }

    #[test]
    fn correct_guess_ignores_case_and_whitespace() {
        let mut game = rigged_game(3, "kedi");
        game.handle_action(test_user(1), &guess("  KeDi ")).unwrap();
        // 100 base + 50 speed bonus inside the window, drawer gets 10.
        assert_eq!(game.players[1].score, 150);
        assert_eq!(game.players[0].score, 10);
        assert!(game.players[1].solved);
    }

    #[test]
    fn no_speed_bonus_after_window() {
        let mut game = rigged_game(3, "kedi");
        game.round_started = Instant::now() - Duration::from_secs(31);
        game.handle_action(test_user(1), &guess("kedi")).unwrap();
        assert_eq!(game.players[1].score, 100);
    }

    #[test]
    fn incorrect_guess_joins_the_feed() {
        let mut game = rigged_game(3, "kedi");
        game.handle_action(test_user(1), &guess("dog")).unwrap();
        assert_eq!(game.guesses.len(), 1);
        assert_eq!(game.guesses[0].text, "dog");
        assert!(!game.players[1].solved);
        // A wrong guess does not lock the player out.
        game.handle_action(test_user(1), &guess("kedi")).unwrap();
        assert!(game.players[1].solved);
    }

    #[test]
    fn drawer_cannot_guess_and_solvers_cannot_repeat() {
        let mut game = rigged_game(3, "kedi");
        let err = game.handle_action(test_user(0), &guess("kedi")).unwrap_err();
        assert!(matches!(err, ActionError::NotAllowed(_)));

        game.handle_action(test_user(1), &guess("kedi")).unwrap();
        let err = game.handle_action(test_user(1), &guess("kedi")).unwrap_err();
        assert!(matches!(err, ActionError::NotAllowed(_)));
    }

    #[test]
    fn all_solved_ends_the_round_early() {
        let mut game = rigged_game(3, "kedi");
        game.handle_action(test_user(1), &guess("kedi")).unwrap();
        let signals = game.handle_action(test_user(2), &guess("kedi")).unwrap();
        assert_eq!(game.phase, Phase::Intermission);
        let reveal = signals.iter().any(|s| {
            matches!(s, GameSignal::RoomMessage { kind: ChatKind::Game, text }
                if text.contains("kedi"))
        });
        assert!(reveal, "round end must reveal the word");
    }

    #[test]
    fn only_drawer_may_draw() {
        let mut game = rigged_game(3, "kedi");
        let stroke = GameAction::Draw {
            stroke: json!({"from": [0, 0], "to": [5, 5]}),
        };
        game.handle_action(test_user(0), &stroke).unwrap();
        assert_eq!(game.strokes.len(), 1);
        let err = game.handle_action(test_user(1), &stroke).unwrap_err();
        assert!(matches!(err, ActionError::NotAllowed(_)));

        game.handle_action(test_user(0), &GameAction::Clear).unwrap();
        assert!(game.strokes.is_empty());
    }

    #[test]
    fn round_timer_reveals_then_intermission_advances() {
        let mut game = rigged_game(2, "kedi");
        let (seq, _) = game.timer_deadline().unwrap();
        let signals = game.timer_fired(seq);
        assert_eq!(game.phase, Phase::Intermission);
        assert!(signals
            .iter()
            .any(|s| matches!(s, GameSignal::RoomMessage { .. })));

        // Intermission timer starts the next round with the next drawer.
        let (seq, _) = game.timer_deadline().unwrap();
        game.timer_fired(seq);
        assert_eq!(game.phase, Phase::Drawing);
        assert_eq!(game.round, 2);
        assert_eq!(game.drawer_idx, 1);
    }

    #[test]
    fn final_round_ends_with_score_rankings() {
        let mut game = rigged_game(2, "kedi");
        game.handle_action(test_user(1), &guess("kedi")).unwrap();
        assert_eq!(game.phase, Phase::Intermission);
        let (seq, _) = game.timer_deadline().unwrap();
        // Round 2 of 2 begins.
        game.timer_fired(seq);
        game.current_word = "owl".into();
        // Outside the bonus window: 100 points, so player 1 stays ahead.
        game.round_started = Instant::now() - Duration::from_secs(31);
        game.handle_action(test_user(0), &guess("owl")).unwrap();
        let (seq, _) = game.timer_deadline().unwrap();
        let outcome = ended(&game.timer_fired(seq)).expect("last intermission ends the game");
        assert_eq!(outcome.winner, Some(test_user(1)));
        assert_eq!(outcome.rankings.len(), 2);
        assert_eq!(outcome.rankings[0].user_id, test_user(1));
    }

    #[test]
    fn drawer_disconnect_cuts_the_round_short() {
        let mut game = rigged_game(3, "kedi");
        let signals = game.player_disconnected(test_user(0));
        assert_eq!(game.phase, Phase::Intermission);
        assert!(signals
            .iter()
            .any(|s| matches!(s, GameSignal::RoomMessage { .. })));
    }

    #[test]
    fn stale_round_timer_is_ignored_after_early_end() {
        let mut game = rigged_game(2, "kedi");
        let (old_seq, _) = game.timer_deadline().unwrap();
        game.handle_action(test_user(1), &guess("kedi")).unwrap();
        // The drawing-phase timer fires late: it must be a no-op now.
        assert!(game.timer_fired(old_seq).is_empty());
        assert_eq!(game.phase, Phase::Intermission);
    }

    #[test]
    fn contracts() {
        let mut game = SketchGame::new();
        veil_core::test_helpers::contract_init_projects_object(&mut game, 3);
        veil_core::test_helpers::contract_outsider_rejected(&mut game, &guess("kedi"));
        veil_core::test_helpers::contract_stale_timer_is_noop(&mut game);
        veil_core::test_helpers::contract_force_end_ranks_everyone(&mut game, 3);
    }
}
