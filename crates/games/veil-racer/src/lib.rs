pub mod config;
pub mod physics;

use std::cmp::Reverse;

use serde_json::json;

use veil_core::game::{
    ActionError, GameAction, GameKind, GameOutcome, GamePlayer, GameSignal, PartyGame,
    RacerInputs, RankedPlayer, competition_ranks, sole_rank_one,
};
use veil_core::ids::UserId;

use config::RacerConfig;
use physics::{Runner, update_runner};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Countdown { remaining: f32 },
    Running,
    Ended,
}

#[derive(Debug)]
struct RacerPlayer {
    user_id: UserId,
    nickname: String,
    runner: Runner,
    inputs: RacerInputs,
    connected: bool,
}

pub struct RacerGame {
    cfg: RacerConfig,
    players: Vec<RacerPlayer>,
    phase: Phase,
    /// Seconds since the countdown hit zero.
    elapsed: f32,
}

impl RacerGame {
    pub fn new() -> Self {
        Self::with_config(RacerConfig::load())
    }

    pub fn with_config(cfg: RacerConfig) -> Self {
        Self {
            cfg,
            players: Vec::new(),
            phase: Phase::Ended,
            elapsed: 0.0,
        }
    }

    fn index_of(&self, user: UserId) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user)
    }

    /// Rank by finish time, then by distance covered.
    fn standings(&self) -> Vec<RankedPlayer> {
        let keys: Vec<(Reverse<i64>, i64)> = self
            .players
            .iter()
            .map(|p| {
                let finish = p
                    .runner
                    .finished_at
                    .map(|t| (t * 1000.0) as i64)
                    .unwrap_or(i64::MAX);
                let position = (p.runner.position * 1000.0) as i64;
                (Reverse(finish), position)
            })
            .collect();
        let ranks = competition_ranks(&keys);
        let mut out: Vec<RankedPlayer> = self
            .players
            .iter()
            .zip(&ranks)
            .map(|(p, &rank)| RankedPlayer {
                user_id: p.user_id,
                rank,
                score: p.runner.position as i64,
            })
            .collect();
        out.sort_by_key(|r| r.rank);
        out
    }

    fn run_tick(&mut self, dt: f32) -> Vec<GameSignal> {
        self.elapsed += dt;
        let track_length = self.cfg.track_length;
        let mut someone_finished = false;
        for p in &mut self.players {
            update_runner(&mut p.runner, &p.inputs, dt, &self.cfg);
            if p.runner.position >= track_length && p.runner.finished_at.is_none() {
                p.runner.finished_at = Some(self.elapsed);
                someone_finished = true;
            }
        }

        if someone_finished {
            // First across the line wins and the race ends immediately.
            self.phase = Phase::Ended;
            let rankings = self.standings();
            let winner = sole_rank_one(&rankings);
            tracing::debug!(elapsed = self.elapsed, ?winner, "race finished");
            return vec![
                GameSignal::StateChanged,
                GameSignal::Ended(GameOutcome { winner, rankings }),
            ];
        }
        vec![GameSignal::StateChanged]
    }
}

impl Default for RacerGame {
    fn default() -> Self {
        Self::with_config(RacerConfig::default())
    }
}

impl PartyGame for RacerGame {
    fn kind(&self) -> GameKind {
        GameKind::Racer
    }

    fn init(&mut self, players: &[GamePlayer]) {
        let lane_count = self.cfg.lane_count;
        self.players = players
            .iter()
            .enumerate()
            .map(|(i, p)| RacerPlayer {
                user_id: p.user_id,
                nickname: p.nickname.clone(),
                runner: Runner::new((i as u8) % lane_count, &self.cfg),
                inputs: RacerInputs::default(),
                connected: true,
            })
            .collect();
        self.phase = Phase::Countdown {
            remaining: self.cfg.countdown_secs,
        };
        self.elapsed = 0.0;
    }

    fn handle_action(
        &mut self,
        actor: UserId,
        action: &GameAction,
    ) -> Result<Vec<GameSignal>, ActionError> {
        let idx = self.index_of(actor).ok_or(ActionError::NotInGame)?;
        if self.phase == Phase::Ended {
            return Err(ActionError::NotAllowed("race already over"));
        }
        match action {
            GameAction::Input { inputs } => {
                // Held booleans are applied by the tick loop; the broadcast
                // cadence is the tick loop's, not the input rate's.
                self.players[idx].inputs = *inputs;
                Ok(Vec::new())
            },
            GameAction::Ready => Ok(Vec::new()),
            _ => Err(ActionError::Invalid("not a racer action".into())),
        }
    }

    fn tick_rate(&self) -> Option<f32> {
        Some(self.cfg.tick_rate_hz)
    }

    fn tick(&mut self, dt: f32) -> Vec<GameSignal> {
        match self.phase {
            Phase::Countdown { remaining } => {
                let next = remaining - dt;
                if next <= 0.0 {
                    self.phase = Phase::Running;
                    self.elapsed = 0.0;
                } else {
                    self.phase = Phase::Countdown { remaining: next };
                }
                // Positions are frozen, but the countdown value itself is
                // broadcast at the normal downsampled cadence.
                vec![GameSignal::StateChanged]
            },
            Phase::Running => self.run_tick(dt),
            Phase::Ended => Vec::new(),
        }
    }

    fn project(&self, _viewer: Option<UserId>) -> serde_json::Value {
        let players: Vec<serde_json::Value> = self
            .players
            .iter()
            .map(|p| {
                json!({
                    "userId": p.user_id,
                    "nickname": p.nickname,
                    "lane": p.runner.lane,
                    "position": p.runner.position,
                    "speed": p.runner.speed,
                    "boostCharges": p.runner.boost_charges,
                    "isBoosting": p.runner.is_boosting(),
                    "finished": p.runner.finished_at.is_some(),
                    "finishTime": p.runner.finished_at,
                    "connected": p.connected,
                })
            })
            .collect();

        let (phase, countdown) = match self.phase {
            Phase::Countdown { remaining } => ("countdown", Some(remaining.ceil() as u8)),
            Phase::Running => ("running", None),
            Phase::Ended => ("ended", None),
        };

        json!({
            "phase": phase,
            "countdown": countdown,
            "trackLength": self.cfg.track_length,
            "laneCount": self.cfg.lane_count,
            "elapsed": self.elapsed,
            "players": players,
        })
    }

    fn player_disconnected(&mut self, user: UserId) -> Vec<GameSignal> {
        if let Some(i) = self.index_of(user) {
            self.players[i].connected = false;
            // A vanished player should coast to a stop, not race on.
            self.players[i].inputs = RacerInputs::default();
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
        GameOutcome {
            winner: None,
            rankings: self.standings(),
        }
    }
}
