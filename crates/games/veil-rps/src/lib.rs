pub mod config;
pub mod resolve;

use std::time::{Duration, Instant};

use rand::seq::IndexedRandom;
use serde::Serialize;
use serde_json::json;

use veil_core::game::{
    ActionError, GameAction, GameKind, GameOutcome, GamePlayer, GameSignal, PartyGame,
    RankedPlayer, competition_ranks, sole_rank_one,
};
use veil_core::ids::UserId;

use config::RpsConfig;
use resolve::{Choice, pairwise_tally};

/// Two players play a single decisive round; three or more play the
/// battle royale with lives and power-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Duel,
    Royale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingChoices,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerUpKind {
    Shield,
    Peek,
    Change,
}

impl PowerUpKind {
    const ALL: [PowerUpKind; 3] = [Self::Shield, Self::Peek, Self::Change];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "shield" => Some(Self::Shield),
            "peek" => Some(Self::Peek),
            "change" => Some(Self::Change),
            _ => None,
        }
    }
}

/// Per-player power-up inventory, capped per type.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUps {
    pub shield: u8,
    pub peek: u8,
    pub change: u8,
}

impl PowerUps {
    fn count(&self, kind: PowerUpKind) -> u8 {
        match kind {
            PowerUpKind::Shield => self.shield,
            PowerUpKind::Peek => self.peek,
            PowerUpKind::Change => self.change,
        }
    }

    fn slot(&mut self, kind: PowerUpKind) -> &mut u8 {
        match kind {
            PowerUpKind::Shield => &mut self.shield,
            PowerUpKind::Peek => &mut self.peek,
            PowerUpKind::Change => &mut self.change,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PeekResult {
    target: UserId,
    choice: Option<Choice>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundLine {
    pub user_id: UserId,
    pub choice: Option<Choice>,
    pub wins: u8,
    pub losses: u8,
    pub lost_life: bool,
    pub shielded: bool,
}

/// Revealed result of the previous round, included in every projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round: u32,
    pub tie: bool,
    pub lines: Vec<RoundLine>,
}

#[derive(Debug)]
struct RpsPlayer {
    user_id: UserId,
    nickname: String,
    lives: u8,
    score: i64,
    streak: u32,
    eliminated: bool,
    elimination_round: Option<u32>,
    choice: Option<Choice>,
    shield_armed: bool,
    powerups: PowerUps,
    peek: Option<PeekResult>,
    ready: bool,
    connected: bool,
}

pub struct RpsGame {
    cfg: RpsConfig,
    mode: Mode,
    extended: bool,
    players: Vec<RpsPlayer>,
    round: u32,
    phase: Phase,
    /// Duel only: the previous round was a tie and state was reset.
    tie: bool,
    last_round: Option<RoundSummary>,
    timer_seq: u64,
    deadline: Option<Instant>,
}

impl RpsGame {
    pub fn new() -> Self {
        Self::with_config(RpsConfig::load())
    }

    pub fn with_config(cfg: RpsConfig) -> Self {
        Self {
            cfg,
            mode: Mode::Duel,
            extended: false,
            players: Vec::new(),
            round: 0,
            phase: Phase::Ended,
            tie: false,
            last_round: None,
            timer_seq: 0,
            deadline: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn index_of(&self, user: UserId) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user)
    }

    fn active_indices(&self) -> Vec<usize> {
        (0..self.players.len())
            .filter(|&i| !self.players[i].eliminated)
            .collect()
    }

    fn all_active_chosen(&self) -> bool {
        self.players
            .iter()
            .filter(|p| !p.eliminated)
            .all(|p| p.choice.is_some())
    }

    fn arm_deadline(&mut self) {
        self.timer_seq += 1;
        self.deadline = Some(Instant::now() + Duration::from_secs_f32(self.cfg.choice_window_secs));
    }

    fn clear_deadline(&mut self) {
        self.timer_seq += 1;
        self.deadline = None;
    }

    fn grant_random_powerup(&mut self, idx: usize) {
        let cap = self.cfg.powerup_cap;
        let eligible: Vec<PowerUpKind> = PowerUpKind::ALL
            .into_iter()
            .filter(|&k| self.players[idx].powerups.count(k) < cap)
            .collect();
        let mut rng = rand::rng();
        if let Some(&kind) = eligible.choose(&mut rng) {
            *self.players[idx].powerups.slot(kind) += 1;
            tracing::debug!(player = %self.players[idx].user_id, ?kind, "streak power-up granted");
        }
    }

    fn resolve(&mut self) -> Vec<GameSignal> {
        match self.mode {
            Mode::Duel => self.resolve_duel(),
            Mode::Royale => self.resolve_royale(),
        }
    }

    fn resolve_duel(&mut self) -> Vec<GameSignal> {
        let (ca, cb) = (self.players[0].choice, self.players[1].choice);
        let winner_idx = match (ca, cb) {
            (Some(a), Some(b)) if a.beats(b) => Some(0),
            (Some(a), Some(b)) if b.beats(a) => Some(1),
            (Some(_), Some(_)) => None, // same choice
            (Some(_), None) => Some(0),
            (None, Some(_)) => Some(1),
            (None, None) => None,
        };

        self.last_round = Some(RoundSummary {
            round: self.round,
            tie: winner_idx.is_none(),
            lines: self
                .players
                .iter()
                .map(|p| RoundLine {
                    user_id: p.user_id,
                    choice: p.choice,
                    wins: 0,
                    losses: 0,
                    lost_life: false,
                    shielded: false,
                })
                .collect(),
        });

        match winner_idx {
            None => {
                // Tie: reset and replay.
                self.tie = true;
                for p in &mut self.players {
                    p.choice = None;
                }
                self.round += 1;
                self.arm_deadline();
                vec![GameSignal::StateChanged]
            },
            Some(w) => {
                let l = 1 - w;
                self.players[w].score += 1;
                self.phase = Phase::Ended;
                self.clear_deadline();
                let outcome = GameOutcome {
                    winner: Some(self.players[w].user_id),
                    rankings: vec![
                        RankedPlayer {
                            user_id: self.players[w].user_id,
                            rank: 1,
                            score: self.players[w].score,
                        },
                        RankedPlayer {
                            user_id: self.players[l].user_id,
                            rank: 2,
                            score: self.players[l].score,
                        },
                    ],
                };
                vec![GameSignal::StateChanged, GameSignal::Ended(outcome)]
            },
        }
    }

    fn resolve_royale(&mut self) -> Vec<GameSignal> {
        let active = self.active_indices();
        let choices: Vec<Option<Choice>> =
            active.iter().map(|&i| self.players[i].choice).collect();
        let tally = pairwise_tally(&choices);

        let mut lines = Vec::with_capacity(active.len());
        for (pos, &i) in active.iter().enumerate() {
            let (wins, losses) = tally[pos];
            let lost = losses > wins;
            let mut shielded = false;
            {
                let p = &mut self.players[i];
                p.score += wins as i64;
                if lost {
                    if p.shield_armed {
                        // Single-use: disarm and spend the inventory slot.
                        p.shield_armed = false;
                        p.powerups.shield = p.powerups.shield.saturating_sub(1);
                        shielded = true;
                    } else {
                        p.lives = p.lives.saturating_sub(1);
                        if p.lives == 0 {
                            p.eliminated = true;
                            p.elimination_round = Some(self.round);
                        }
                    }
                }
                if wins > losses {
                    p.streak += 1;
                } else {
                    p.streak = 0;
                }
            }
            let p = &self.players[i];
            lines.push(RoundLine {
                user_id: p.user_id,
                choice: p.choice,
                wins,
                losses,
                lost_life: lost && !shielded,
                shielded,
            });
            if self.players[i].streak > 0
                && self.players[i].streak % self.cfg.streak_for_powerup == 0
            {
                self.grant_random_powerup(i);
            }
        }

        self.last_round = Some(RoundSummary {
            round: self.round,
            tie: false,
            lines,
        });
        for p in &mut self.players {
            p.choice = None;
            p.peek = None;
            p.ready = false;
        }

        let remaining = self.active_indices();
        if remaining.len() == 1 {
            let winner = self.players[remaining[0]].user_id;
            return self.finish(self.rank_by_elimination(), Some(winner));
        }
        if remaining.is_empty() {
            // Cross-elimination of everyone left: shared top rank, no winner.
            return self.finish(self.rank_by_elimination(), None);
        }
        if self.round >= self.cfg.max_rounds {
            let rankings = self.rank_by_points();
            let winner = sole_rank_one(&rankings);
            return self.finish(rankings, winner);
        }

        self.round += 1;
        self.arm_deadline();
        vec![GameSignal::StateChanged]
    }

    fn finish(
        &mut self,
        rankings: Vec<RankedPlayer>,
        winner: Option<UserId>,
    ) -> Vec<GameSignal> {
        self.phase = Phase::Ended;
        self.clear_deadline();
        vec![
            GameSignal::StateChanged,
            GameSignal::Ended(GameOutcome { winner, rankings }),
        ]
    }

    /// Rank survivors first, then by how long each player lasted.
    fn rank_by_elimination(&self) -> Vec<RankedPlayer> {
        let keys: Vec<u32> = self
            .players
            .iter()
            .map(|p| p.elimination_round.unwrap_or(u32::MAX))
            .collect();
        self.ranked(&competition_ranks(&keys))
    }

    /// Rank by score, then lives, then streak.
    fn rank_by_points(&self) -> Vec<RankedPlayer> {
        let keys: Vec<(i64, u8, u32)> = self
            .players
            .iter()
            .map(|p| (p.score, p.lives, p.streak))
            .collect();
        self.ranked(&competition_ranks(&keys))
    }

    fn ranked(&self, ranks: &[u32]) -> Vec<RankedPlayer> {
        let mut out: Vec<RankedPlayer> = self
            .players
            .iter()
            .zip(ranks)
            .map(|(p, &rank)| RankedPlayer {
                user_id: p.user_id,
                rank,
                score: p.score,
            })
            .collect();
        out.sort_by_key(|r| r.rank);
        out
    }

    fn use_powerup(
        &mut self,
        idx: usize,
        kind: PowerUpKind,
        data: Option<&serde_json::Value>,
    ) -> Result<(), ActionError> {
        if self.players[idx].powerups.count(kind) == 0 {
            return Err(ActionError::NotAllowed("power-up not held"));
        }
        match kind {
            PowerUpKind::Shield => {
                let p = &mut self.players[idx];
                if p.shield_armed {
                    return Err(ActionError::NotAllowed("shield already armed"));
                }
                p.shield_armed = true;
                // Inventory is spent when the shield absorbs a loss.
            },
            PowerUpKind::Peek => {
                let target = data
                    .and_then(|d| d.get("target"))
                    .and_then(|t| t.as_str())
                    .and_then(UserId::parse)
                    .ok_or_else(|| ActionError::Invalid("peek requires a target".into()))?;
                if target == self.players[idx].user_id {
                    return Err(ActionError::Invalid("cannot peek yourself".into()));
                }
                let t = self
                    .index_of(target)
                    .filter(|&t| !self.players[t].eliminated)
                    .ok_or_else(|| ActionError::Invalid("no such opponent".into()))?;
                let choice = self.players[t].choice;
                let p = &mut self.players[idx];
                p.peek = Some(PeekResult { target, choice });
                p.powerups.peek -= 1;
            },
            PowerUpKind::Change => {
                let p = &mut self.players[idx];
                if p.choice.is_none() {
                    return Err(ActionError::Invalid("no choice to change".into()));
                }
                p.choice = None;
                p.powerups.change -= 1;
            },
        }
        Ok(())
    }
}

impl Default for RpsGame {
    fn default() -> Self {
        Self::with_config(RpsConfig::default())
    }
}

impl PartyGame for RpsGame {
    fn kind(&self) -> GameKind {
        GameKind::RockPaperScissors
    }

    fn init(&mut self, players: &[GamePlayer]) {
        self.mode = if players.len() == 2 {
            Mode::Duel
        } else {
            Mode::Royale
        };
        self.extended = players.len() >= self.cfg.extended_at;
        self.players = players
            .iter()
            .map(|p| RpsPlayer {
                user_id: p.user_id,
                nickname: p.nickname.clone(),
                lives: self.cfg.lives,
                score: 0,
                streak: 0,
                eliminated: false,
                elimination_round: None,
                choice: None,
                shield_armed: false,
                powerups: PowerUps::default(),
                peek: None,
                ready: false,
                connected: true,
            })
            .collect();
        self.round = 1;
        self.phase = Phase::AwaitingChoices;
        self.tie = false;
        self.last_round = None;
        self.arm_deadline();
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
        if self.players[idx].eliminated {
            return Err(ActionError::NotAllowed("eliminated"));
        }

        match action {
            GameAction::Choice { value } => {
                if self.players[idx].choice.is_some() {
                    return Err(ActionError::NotAllowed("choice already submitted"));
                }
                let choice = Choice::parse(value, self.extended)
                    .ok_or_else(|| ActionError::Invalid(format!("unknown choice {value:?}")))?;
                self.players[idx].choice = Some(choice);
                self.tie = false;
                if self.all_active_chosen() {
                    Ok(self.resolve())
                } else {
                    Ok(vec![GameSignal::StateChanged])
                }
            },
            GameAction::UsePowerUp { kind, data } => {
                if self.mode != Mode::Royale {
                    return Err(ActionError::NotAllowed("no power-ups in a duel"));
                }
                let kind = PowerUpKind::parse(kind)
                    .ok_or_else(|| ActionError::Invalid(format!("unknown power-up {kind:?}")))?;
                self.use_powerup(idx, kind, data.as_ref())?;
                Ok(vec![GameSignal::StateChanged])
            },
            GameAction::Ready => {
                self.players[idx].ready = true;
                Ok(Vec::new())
            },
            _ => Err(ActionError::Invalid("not an RPS action".into())),
        }
    }

    fn timer_deadline(&self) -> Option<(u64, Instant)> {
        self.deadline.map(|d| (self.timer_seq, d))
    }

    fn timer_fired(&mut self, seq: u64) -> Vec<GameSignal> {
        if seq != self.timer_seq || self.phase != Phase::AwaitingChoices {
            return Vec::new();
        }
        // Window elapsed: resolve with whatever was submitted. Missing
        // choices lose every comparison.
        self.resolve()
    }

    fn project(&self, viewer: Option<UserId>) -> serde_json::Value {
        let players: Vec<serde_json::Value> = self
            .players
            .iter()
            .map(|p| {
                let mut v = json!({
                    "userId": p.user_id,
                    "nickname": p.nickname,
                    "lives": p.lives,
                    "score": p.score,
                    "streak": p.streak,
                    "eliminated": p.eliminated,
                    "connected": p.connected,
                    "hasChosen": p.choice.is_some(),
                });
                if viewer == Some(p.user_id) {
                    v["choice"] = json!(p.choice);
                    v["powerUps"] = json!(p.powerups);
                    v["shieldArmed"] = json!(p.shield_armed);
                }
                v
            })
            .collect();

        let peek = viewer
            .and_then(|u| self.index_of(u))
            .and_then(|i| self.players[i].peek.as_ref());

        let mode = match self.mode {
            Mode::Duel => "duel",
            Mode::Royale => "royale",
        };
        let phase = match self.phase {
            Phase::AwaitingChoices => "awaiting_choices",
            Phase::Ended => "ended",
        };
        json!({
            "mode": mode,
            "phase": phase,
            "round": self.round,
            "maxRounds": self.cfg.max_rounds,
            "extended": self.extended,
            "tie": self.tie,
            "players": players,
            "lastRound": self.last_round,
            "peek": peek,
        })
    }

    fn player_disconnected(&mut self, user: UserId) -> Vec<GameSignal> {
        if let Some(i) = self.index_of(user) {
            self.players[i].connected = false;
            return vec![GameSignal::StateChanged];
        }
        Vec::new()
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
        self.clear_deadline();
        GameOutcome {
            winner: None,
            rankings: self.rank_by_points(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::test_helpers::{contract_stale_timer_is_noop, ended, make_players, test_user};

    fn choice(value: &str) -> GameAction {
        GameAction::Choice {
            value: value.into(),
        }
    }

    fn game_with(n: usize) -> RpsGame {
        let mut game = RpsGame::new();
        game.init(&make_players(n));
        game
    }

    #[test]
    fn two_players_get_duel_mode() {
        assert_eq!(game_with(2).mode(), Mode::Duel);
        assert_eq!(game_with(3).mode(), Mode::Royale);
    }

    #[test]
    fn duel_tie_resets_and_replays() {
        let mut game = game_with(2);
        game.handle_action(test_user(0), &choice("rock")).unwrap();
        let signals = game.handle_action(test_user(1), &choice("rock")).unwrap();
        assert!(ended(&signals).is_none(), "tie must not end the game");
        assert!(game.project(None)["tie"].as_bool().unwrap());
        assert_eq!(game.round, 2);

        // Decisive replay: paper beats rock.
        game.handle_action(test_user(0), &choice("paper")).unwrap();
        let signals = game.handle_action(test_user(1), &choice("rock")).unwrap();
        let outcome = ended(&signals).expect("decisive round ends the duel");
        assert_eq!(outcome.winner, Some(test_user(0)));
        assert_eq!(outcome.rankings[0].user_id, test_user(0));
        assert_eq!(outcome.rankings[1].rank, 2);
    }

    #[test]
    fn duel_window_expiry_rewards_the_only_chooser() {
        let mut game = game_with(2);
        game.handle_action(test_user(0), &choice("scissors")).unwrap();
        let (seq, _) = game.timer_deadline().unwrap();
        let outcome = ended(&game.timer_fired(seq)).expect("expiry resolves");
        assert_eq!(outcome.winner, Some(test_user(0)));
    }

    #[test]
    fn duplicate_choice_rejected() {
        let mut game = game_with(2);
        game.handle_action(test_user(0), &choice("rock")).unwrap();
        let err = game.handle_action(test_user(0), &choice("paper")).unwrap_err();
        assert!(matches!(err, ActionError::NotAllowed(_)));
    }

    #[test]
    fn lizard_rejected_below_five_players() {
        let mut game = game_with(3);
        assert!(!game.extended);
        let err = game.handle_action(test_user(0), &choice("lizard")).unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));

        let mut game = game_with(5);
        assert!(game.extended);
        game.handle_action(test_user(0), &choice("lizard")).unwrap();
    }

    #[test]
    fn royale_loser_drops_a_life() {
        let mut game = game_with(3);
        game.handle_action(test_user(0), &choice("rock")).unwrap();
        game.handle_action(test_user(1), &choice("rock")).unwrap();
        let signals = game.handle_action(test_user(2), &choice("scissors")).unwrap();
        assert!(ended(&signals).is_none());
        // Scissors lost to both rocks.
        assert_eq!(game.players[2].lives, 2);
        assert_eq!(game.players[0].lives, 3);
        assert_eq!(game.players[0].score, 1);
        assert_eq!(game.round, 2);
    }

    #[test]
    fn royale_elimination_yields_winner_and_ranks() {
        let cfg = RpsConfig {
            lives: 1,
            ..RpsConfig::default()
        };
        let mut game = RpsGame::with_config(cfg);
        game.init(&make_players(3));

        // Rock, scissors, scissors: players 1 and 2 are eliminated together.
        game.handle_action(test_user(0), &choice("rock")).unwrap();
        game.handle_action(test_user(1), &choice("scissors")).unwrap();
        let signals = game.handle_action(test_user(2), &choice("scissors")).unwrap();
        let outcome = ended(&signals).expect("single survivor ends the game");
        assert_eq!(outcome.winner, Some(test_user(0)));
        let winner_rank = outcome
            .rankings
            .iter()
            .find(|r| r.user_id == test_user(0))
            .unwrap()
            .rank;
        assert_eq!(winner_rank, 1);
        // The two simultaneous eliminations share a rank.
        let r1 = outcome.rankings.iter().find(|r| r.user_id == test_user(1)).unwrap();
        let r2 = outcome.rankings.iter().find(|r| r.user_id == test_user(2)).unwrap();
        assert_eq!(r1.rank, r2.rank);
    }

    #[test]
    fn shield_absorbs_one_loss() {
        let mut game = game_with(3);
        game.players[2].powerups.shield = 1;
        game.handle_action(
            test_user(2),
            &GameAction::UsePowerUp {
                kind: "shield".into(),
                data: None,
            },
        )
        .unwrap();

        game.handle_action(test_user(0), &choice("rock")).unwrap();
        game.handle_action(test_user(1), &choice("rock")).unwrap();
        game.handle_action(test_user(2), &choice("scissors")).unwrap();

        assert_eq!(game.players[2].lives, 3, "shield must absorb the loss");
        assert!(!game.players[2].shield_armed, "shield is single-use");
        assert_eq!(game.players[2].powerups.shield, 0, "inventory spent on use");
    }

    #[test]
    fn peek_reveals_target_choice_privately() {
        let mut game = game_with(3);
        game.players[0].powerups.peek = 1;
        game.handle_action(test_user(1), &choice("paper")).unwrap();
        game.handle_action(
            test_user(0),
            &GameAction::UsePowerUp {
                kind: "peek".into(),
                data: Some(json!({"target": test_user(1)})),
            },
        )
        .unwrap();

        let own = game.project(Some(test_user(0)));
        assert_eq!(own["peek"]["choice"], json!("paper"));
        let other = game.project(Some(test_user(2)));
        assert!(other["peek"].is_null(), "peek result is private");
    }

    #[test]
    fn change_allows_resubmission() {
        let mut game = game_with(3);
        game.players[0].powerups.change = 1;
        game.handle_action(test_user(0), &choice("rock")).unwrap();
        game.handle_action(
            test_user(0),
            &GameAction::UsePowerUp {
                kind: "change".into(),
                data: None,
            },
        )
        .unwrap();
        game.handle_action(test_user(0), &choice("paper")).unwrap();
        assert_eq!(game.players[0].choice, Some(Choice::Paper));
    }

    #[test]
    fn three_round_streak_grants_a_powerup() {
        let mut game = game_with(3);
        for _ in 0..3 {
            if game.phase == Phase::Ended {
                break;
            }
            game.handle_action(test_user(0), &choice("rock")).unwrap();
            game.handle_action(test_user(1), &choice("scissors")).unwrap();
            game.handle_action(test_user(2), &choice("scissors")).unwrap();
        }
        let p = &game.players[0];
        let total = p.powerups.shield + p.powerups.peek + p.powerups.change;
        assert_eq!(total, 1, "exactly one power-up after a 3-round streak");
    }

    #[test]
    fn max_rounds_ranks_by_points() {
        let cfg = RpsConfig {
            max_rounds: 1,
            ..RpsConfig::default()
        };
        let mut game = RpsGame::with_config(cfg);
        game.init(&make_players(3));

        game.handle_action(test_user(0), &choice("rock")).unwrap();
        game.handle_action(test_user(1), &choice("rock")).unwrap();
        let signals = game.handle_action(test_user(2), &choice("scissors")).unwrap();
        let outcome = ended(&signals).expect("max rounds reached");
        // Players 0 and 1 tie on (score, lives, streak) and share the top rank.
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.rankings[0].rank, 1);
        assert_eq!(outcome.rankings[1].rank, 1);
        assert_eq!(outcome.rankings[2].rank, 3);
    }

    #[test]
    fn hidden_choices_before_resolution() {
        let mut game = game_with(2);
        game.handle_action(test_user(0), &choice("rock")).unwrap();
        let spectator = game.project(None);
        let p0 = &spectator["players"][0];
        assert_eq!(p0["hasChosen"], json!(true));
        assert!(p0.get("choice").is_none(), "choices are hidden from others");
        let own = game.project(Some(test_user(0)));
        assert_eq!(own["players"][0]["choice"], json!("rock"));
    }

    #[test]
    fn outsider_and_stale_timer_contracts() {
        let mut game = game_with(2);
        veil_core::test_helpers::contract_outsider_rejected(&mut game, &choice("rock"));
        contract_stale_timer_is_noop(&mut game);
    }

    #[test]
    fn force_end_has_no_winner() {
        let mut game = game_with(3);
        let outcome = game.force_end();
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.rankings.len(), 3);
        assert!(game.timer_deadline().is_none());
    }
}
