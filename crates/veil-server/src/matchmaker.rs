use std::sync::Arc;

use rand::seq::IndexedRandom;

use veil_core::game::GameKind;
use veil_core::ids::{GameId, UserId};
use veil_core::protocol::ServerEvent;

use crate::cache::{MATCHMAKING_TTL, matchmaking_key};
use crate::error::MatchError;
use crate::state::AppState;

/// Host-driven pool start: snapshot the ready players, pick a game kind
/// uniformly from the filtered pool, and hand off to the scheduler. The
/// selection is final; confessions submitted afterwards do not join.
pub async fn start_game_with_pool(
    state: &AppState,
    user_id: UserId,
    room_code: &str,
) -> Result<GameId, MatchError> {
    let mut mgr = state.rooms.write().await;

    let snapshot = mgr.snapshot(room_code).ok_or(MatchError::NotFound)?;
    if !mgr.is_member(room_code, user_id) {
        return Err(MatchError::NotInRoom);
    }
    if snapshot.host_id != user_id {
        return Err(MatchError::NotHost);
    }
    if mgr.current_game(room_code).is_some() {
        return Err(MatchError::GameInProgress);
    }

    let mut ready = mgr.ready_players(room_code);
    if ready.len() < 2 {
        return Err(MatchError::NotEnoughReady);
    }

    // The stored pool is pre-filtered, but guard against an empty one.
    let pool: Vec<GameKind> = if snapshot.game_pool.is_empty() {
        GameKind::ALL.to_vec()
    } else {
        snapshot.game_pool.clone()
    };
    let Some(&kind) = pool.choose(&mut rand::rng()) else {
        return Err(MatchError::NoGamesAvailable);
    };
    // Overfull lobbies seat the earliest-ready players.
    ready.truncate(kind.max_players());

    mgr.broadcast(
        room_code,
        &ServerEvent::GameStarting {
            kind,
            player_count: ready.len(),
        },
    );
    mgr.broadcast(room_code, &ServerEvent::GameSelected { kind });
    mgr.append_system_message(room_code, format!("A round of {kind} is starting"));

    let player_ids: Vec<UserId> = ready.iter().map(|p| p.user_id).collect();
    mgr.set_playing(room_code, &player_ids, true);
    let senders = mgr
        .populate_game_senders(room_code)
        .ok_or(MatchError::NotFound)?;

    let game_id = state.scheduler.create_game(
        kind,
        room_code,
        ready,
        senders,
        Arc::clone(&state.rooms),
        Arc::clone(&state.cache),
        Arc::clone(&state.config),
    );
    mgr.set_current_game(room_code, Some(game_id));
    tracing::info!(room = room_code, game = %game_id, %kind, "match launched");
    Ok(game_id)
}

/// Register interest in a match. The ready set lives in the shared cache
/// with a short TTL; the start itself remains host-driven.
pub async fn request_match(
    state: &AppState,
    user_id: UserId,
    room_code: &str,
) -> Result<usize, MatchError> {
    {
        let mgr = state.rooms.read().await;
        mgr.snapshot(room_code).ok_or(MatchError::NotFound)?;
        if !mgr.is_member(room_code, user_id) {
            return Err(MatchError::NotInRoom);
        }
    }

    let key = matchmaking_key(room_code);
    let count = state
        .cache
        .sadd(&key, &user_id.to_string(), Some(MATCHMAKING_TTL))
        .await;

    let mgr = state.rooms.read().await;
    mgr.send_to(
        room_code,
        user_id,
        &ServerEvent::MatchmakingStarted {
            room_code: room_code.to_string(),
        },
    );
    if count >= 2 {
        mgr.broadcast(room_code, &ServerEvent::MatchmakingAvailable { count });
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::RwLock;
    use veil_core::protocol::CreateRoomReq;

    use crate::cache::SharedCache;
    use crate::config::ServerConfig;
    use crate::rate_limit::EventRateLimiter;
    use crate::room_manager::RoomManager;
    use crate::scheduler::GameScheduler;
    use crate::session::{SessionStore, TokenSigner, User};

    fn make_user(nickname: &str) -> User {
        User {
            id: UserId::new(),
            nickname: nickname.to_string(),
            avatar: "🦊".to_string(),
            is_guest: true,
        }
    }

    fn make_state() -> AppState {
        let config = ServerConfig::default();
        let signer = TokenSigner::new("test-secret".into(), 3600);
        let cache = Arc::new(SharedCache::new());
        AppState {
            config: Arc::new(config),
            sessions: Arc::new(RwLock::new(SessionStore::new(
                signer,
                std::time::Duration::from_secs(3600),
            ))),
            rooms: Arc::new(RwLock::new(RoomManager::new())),
            scheduler: Arc::new(GameScheduler::new()),
            rate_limiter: Arc::new(EventRateLimiter::new(Arc::clone(&cache))),
            cache,
            ws_per_ip: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
        }
    }

    async fn room_with_players(state: &AppState) -> (String, User, User) {
        let alice = make_user("Alice");
        let bob = make_user("Bob");
        let mut mgr = state.rooms.write().await;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        std::mem::forget(rx);
        let snapshot = mgr
            .create(
                &alice,
                &CreateRoomReq {
                    name: "Test".into(),
                    description: None,
                    password: None,
                    max_players: None,
                    is_public: None,
                },
                tx,
                20,
            )
            .unwrap();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        std::mem::forget(rx);
        mgr.join(&bob, &snapshot.code, None, tx).unwrap();
        (snapshot.code, alice, bob)
    }

    #[tokio::test]
    async fn start_requires_host() {
        let state = make_state();
        let (code, _alice, bob) = room_with_players(&state).await;
        let err = start_game_with_pool(&state, bob.id, &code).await.unwrap_err();
        assert_eq!(err, MatchError::NotHost);
    }

    #[tokio::test]
    async fn start_requires_two_ready_players() {
        let state = make_state();
        let (code, alice, _bob) = room_with_players(&state).await;
        // Nobody ready.
        assert_eq!(
            start_game_with_pool(&state, alice.id, &code).await.unwrap_err(),
            MatchError::NotEnoughReady
        );
        // Exactly one ready player is still not enough.
        state
            .rooms
            .write()
            .await
            .submit_confession(alice.id, &code, "a confession of ten")
            .unwrap();
        assert_eq!(
            start_game_with_pool(&state, alice.id, &code).await.unwrap_err(),
            MatchError::NotEnoughReady
        );
    }

    #[tokio::test]
    async fn start_launches_and_links_the_game() {
        let state = make_state();
        let (code, alice, bob) = room_with_players(&state).await;
        {
            let mut mgr = state.rooms.write().await;
            mgr.submit_confession(alice.id, &code, "a confession of ten")
                .unwrap();
            mgr.submit_confession(bob.id, &code, "another confession")
                .unwrap();
        }

        let game_id = start_game_with_pool(&state, alice.id, &code).await.unwrap();
        {
            let mgr = state.rooms.read().await;
            assert_eq!(mgr.current_game(&code), Some(game_id));
            let snap = mgr.snapshot(&code).unwrap();
            assert!(snap.players.iter().all(|p| p.is_playing));
        }
        assert_eq!(state.scheduler.game_of_room(&code), Some(game_id));

        // A second start is rejected while the game lives.
        assert_eq!(
            start_game_with_pool(&state, alice.id, &code).await.unwrap_err(),
            MatchError::GameInProgress
        );
    }

    #[tokio::test]
    async fn start_in_unknown_room_fails() {
        let state = make_state();
        let user = make_user("Alice");
        assert_eq!(
            start_game_with_pool(&state, user.id, "ZZZZZZ").await.unwrap_err(),
            MatchError::NotFound
        );
    }

    #[tokio::test]
    async fn request_match_registers_in_cache() {
        let state = make_state();
        let (code, alice, bob) = room_with_players(&state).await;

        assert_eq!(request_match(&state, alice.id, &code).await.unwrap(), 1);
        assert_eq!(request_match(&state, bob.id, &code).await.unwrap(), 2);
        assert_eq!(state.cache.scard(&matchmaking_key(&code)).await, 2);

        let outsider = UserId::new();
        assert_eq!(
            request_match(&state, outsider, &code).await.unwrap_err(),
            MatchError::NotInRoom
        );
    }
}
