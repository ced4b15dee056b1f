pub mod chat;
pub mod confession;
pub mod game;
pub mod ids;
pub mod player;
pub mod protocol;
pub mod room;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use uuid::Uuid;

    use crate::game::{GameAction, GameOutcome, GamePlayer, GameSignal, PartyGame};
    use crate::ids::UserId;

    /// Create `n` test players with deterministic IDs.
    pub fn make_players(n: usize) -> Vec<GamePlayer> {
        (0..n)
            .map(|i| GamePlayer {
                user_id: test_user(i),
                nickname: format!("Player{}", i + 1),
            })
            .collect()
    }

    /// The deterministic ID of the `i`-th test player.
    pub fn test_user(i: usize) -> UserId {
        UserId(Uuid::from_u128(0x1000 + i as u128))
    }

    /// Extract the outcome if any of the signals ended the game.
    pub fn ended(signals: &[GameSignal]) -> Option<GameOutcome> {
        signals.iter().find_map(|s| match s {
            GameSignal::Ended(outcome) => Some(outcome.clone()),
            _ => None,
        })
    }

    // ================================================================
    // Game Trait Contract Tests
    // ================================================================
    // A generic suite every PartyGame implementation must pass. Game
    // crates call these from their own #[cfg(test)] modules with a
    // concrete instance.

    /// After init() with N players, the spectator projection must be a
    /// JSON object.
    pub fn contract_init_projects_object(game: &mut dyn PartyGame, player_count: usize) {
        let players = make_players(player_count);
        game.init(&players);
        let state = game.project(None);
        assert!(
            state.is_object(),
            "projection must be a JSON object after init, got: {state}"
        );
    }

    /// Actions from users outside the player set must be rejected.
    pub fn contract_outsider_rejected(game: &mut dyn PartyGame, probe: &GameAction) {
        let outsider = UserId(Uuid::from_u128(0xdead));
        let result = game.handle_action(outsider, probe);
        assert!(
            result.is_err(),
            "action from a non-participant must be rejected"
        );
    }

    /// force_end() must rank every participant.
    pub fn contract_force_end_ranks_everyone(game: &mut dyn PartyGame, player_count: usize) {
        let outcome = game.force_end();
        assert_eq!(
            outcome.rankings.len(),
            player_count,
            "forced end must rank every participant"
        );
        assert!(outcome.winner.is_none(), "forced end has no winner");
    }

    /// A stale timer sequence must be a no-op.
    pub fn contract_stale_timer_is_noop(game: &mut dyn PartyGame) {
        let before = game.project(None);
        let signals = game.timer_fired(u64::MAX);
        assert!(
            signals.is_empty(),
            "stale timer sequence must produce no signals"
        );
        assert_eq!(before, game.project(None), "stale timer must not mutate state");
    }
}
