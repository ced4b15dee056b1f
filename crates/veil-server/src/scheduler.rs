use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use veil_core::chat::ChatKind;
use veil_core::game::{
    ActionError, GameAction, GameKind, GameOutcome, GamePlayer, GameSignal, PartyGame,
};
use veil_core::ids::{GameId, UserId};
use veil_core::protocol::{ErrorKind, GameWire, ServerEvent, encode_event};
use veil_core::time::unix_millis;

use crate::cache::{GAME_TTL, SharedCache, game_key};
use crate::config::{GamesConfig, ServerConfig};
use crate::room_manager::GameSenders;
use crate::state::SharedRooms;

/// Bounded in-memory log of the most recent committed actions per game.
const ACTION_LOG_CAPACITY: usize = 100;

/// Commands into a game task. All actions for one game flow through one
/// bounded queue and are processed strictly serialized.
pub enum GameCommand {
    Action {
        actor: UserId,
        action: GameAction,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    PlayerDisconnected(UserId),
    PlayerReconnected(UserId),
    ForceEnd(&'static str),
}

/// Outbound traffic from a game task to its broadcast forwarder.
enum GameBroadcast {
    /// Per-recipient projections plus the spectator fallback frame.
    Frames {
        per_player: Vec<(UserId, Bytes)>,
        spectator: Bytes,
    },
    /// Game-originated chat (word reveals, round notices).
    RoomMessage { kind: ChatKind, text: String },
    /// Terminal: triggers reveal, room cleanup, and map removal.
    Ended {
        outcome: GameOutcome,
        forced: bool,
        final_state: serde_json::Value,
    },
}

#[derive(Clone)]
pub struct GameInfo {
    pub id: GameId,
    pub kind: GameKind,
    pub room_code: String,
    pub players: Vec<GamePlayer>,
}

struct Activity {
    last_activity: Instant,
    all_disconnected_since: Option<Instant>,
}

struct GameHandle {
    cmd_tx: mpsc::Sender<GameCommand>,
    info: GameInfo,
    started_at: Instant,
    activity: Arc<Mutex<Activity>>,
}

#[derive(Default)]
struct SchedulerMaps {
    by_id: HashMap<GameId, GameHandle>,
    by_room: HashMap<String, GameId>,
    by_player: HashMap<UserId, GameId>,
}

/// Why submitting an action failed, before it ever reached the game.
#[derive(Debug)]
pub enum SubmitError {
    NotFound,
    QueueFull,
    Rejected(ActionError),
    Internal,
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::QueueFull => ErrorKind::QueueFull,
            Self::Rejected(_) => ErrorKind::Validation,
            Self::Internal => ErrorKind::Internal,
        }
    }
}

/// Cache snapshot shape for `game:state:{id}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GameSnapshot<'a> {
    id: GameId,
    room_code: &'a str,
    #[serde(rename = "type")]
    kind: GameKind,
    players: &'a [GamePlayer],
    state: &'a serde_json::Value,
    ended: bool,
    saved_at: u64,
}

/// The only component that maps a game kind to a constructor.
fn make_game(kind: GameKind) -> Box<dyn PartyGame> {
    match kind {
        GameKind::RockPaperScissors => Box::new(veil_rps::RpsGame::new()),
        GameKind::Racer => Box::new(veil_racer::RacerGame::new()),
        GameKind::Sketch => Box::new(veil_sketch::SketchGame::new()),
    }
}

/// Owns every live game instance. Each game runs on its own task with a
/// serialized action queue; the scheduler keeps the id/room/player maps
/// consistent across transitions.
pub struct GameScheduler {
    maps: Mutex<SchedulerMaps>,
}

impl Default for GameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl GameScheduler {
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(SchedulerMaps::default()),
        }
    }

    /// Construct and launch a game instance for a frozen player set.
    #[allow(clippy::too_many_arguments)]
    pub fn create_game(
        self: &Arc<Self>,
        kind: GameKind,
        room_code: &str,
        players: Vec<GamePlayer>,
        senders: GameSenders,
        rooms: SharedRooms,
        cache: Arc<SharedCache>,
        config: Arc<ServerConfig>,
    ) -> GameId {
        let id = GameId::new();
        let mut game = make_game(kind);
        game.init(&players);

        let info = GameInfo {
            id,
            kind,
            room_code: room_code.to_string(),
            players: players.clone(),
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(config.limits.action_queue_depth);
        let (bcast_tx, bcast_rx) = mpsc::unbounded_channel();
        let activity = Arc::new(Mutex::new(Activity {
            last_activity: Instant::now(),
            all_disconnected_since: None,
        }));

        tokio::spawn(forward_broadcasts(
            info.clone(),
            bcast_rx,
            senders,
            rooms,
            Arc::clone(&cache),
            Arc::clone(self),
        ));
        tokio::spawn(run_game(
            info.clone(),
            game,
            cmd_rx,
            bcast_tx,
            cache,
            config,
            Arc::clone(&activity),
        ));

        let mut maps = self.maps.lock().expect("scheduler lock");
        maps.by_room.insert(room_code.to_string(), id);
        for p in &players {
            maps.by_player.insert(p.user_id, id);
        }
        maps.by_id.insert(
            id,
            GameHandle {
                cmd_tx,
                info,
                started_at: Instant::now(),
                activity,
            },
        );
        tracing::info!(game = %id, %kind, room = room_code, "game created");
        id
    }

    pub fn game_of_player(&self, user: UserId) -> Option<GameId> {
        self.maps.lock().expect("scheduler lock").by_player.get(&user).copied()
    }

    pub fn game_of_room(&self, code: &str) -> Option<GameId> {
        self.maps.lock().expect("scheduler lock").by_room.get(code).copied()
    }

    pub fn active_games(&self) -> usize {
        self.maps.lock().expect("scheduler lock").by_id.len()
    }

    /// Route a player action into their game's queue and wait for the
    /// serialized executor's verdict.
    pub async fn submit_action(
        &self,
        actor: UserId,
        action: GameAction,
    ) -> Result<(), SubmitError> {
        let cmd_tx = {
            let maps = self.maps.lock().expect("scheduler lock");
            let id = maps.by_player.get(&actor).ok_or(SubmitError::NotFound)?;
            let handle = maps.by_id.get(id).ok_or(SubmitError::NotFound)?;
            handle.cmd_tx.clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .try_send(GameCommand::Action {
                actor,
                action,
                reply: reply_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SubmitError::NotFound,
            })?;

        match tokio::time::timeout(Duration::from_secs(10), reply_rx).await {
            Ok(Ok(verdict)) => verdict.map_err(SubmitError::Rejected),
            Ok(Err(_)) | Err(_) => Err(SubmitError::Internal),
        }
    }

    pub fn notify_disconnected(&self, user: UserId) {
        self.notify(user, GameCommand::PlayerDisconnected(user));
    }

    pub fn notify_reconnected(&self, user: UserId) {
        self.notify(user, GameCommand::PlayerReconnected(user));
    }

    fn notify(&self, user: UserId, cmd: GameCommand) {
        let maps = self.maps.lock().expect("scheduler lock");
        if let Some(id) = maps.by_player.get(&user)
            && let Some(handle) = maps.by_id.get(id)
            && handle.cmd_tx.try_send(cmd).is_err()
        {
            tracing::debug!(player = %user, game = %id, "game queue unavailable");
        }
    }

    pub fn force_end_room(&self, code: &str, reason: &'static str) {
        let maps = self.maps.lock().expect("scheduler lock");
        if let Some(id) = maps.by_room.get(code)
            && let Some(handle) = maps.by_id.get(id)
        {
            let _ = handle.cmd_tx.try_send(GameCommand::ForceEnd(reason));
        }
    }

    fn remove_game(&self, id: GameId) {
        let mut maps = self.maps.lock().expect("scheduler lock");
        if let Some(handle) = maps.by_id.remove(&id) {
            if maps.by_room.get(&handle.info.room_code) == Some(&id) {
                maps.by_room.remove(&handle.info.room_code);
            }
            for p in &handle.info.players {
                if maps.by_player.get(&p.user_id) == Some(&id) {
                    maps.by_player.remove(&p.user_id);
                }
            }
        }
    }

    /// One pass of the lifecycle sweeper: force-end idle, over-long, and
    /// abandoned games.
    pub fn sweep(&self, cfg: &GamesConfig) {
        let maps = self.maps.lock().expect("scheduler lock");
        for handle in maps.by_id.values() {
            let reason = {
                let activity = handle.activity.lock().expect("activity lock");
                if handle.started_at.elapsed() > Duration::from_secs(cfg.max_duration_secs) {
                    Some("max duration exceeded")
                } else if activity.last_activity.elapsed()
                    > Duration::from_secs(cfg.idle_timeout_secs)
                {
                    Some("idle timeout")
                } else if activity
                    .all_disconnected_since
                    .is_some_and(|at| at.elapsed() > Duration::from_secs(cfg.reattach_grace_secs))
                {
                    Some("all players disconnected")
                } else {
                    None
                }
            };
            if let Some(reason) = reason {
                tracing::warn!(game = %handle.info.id, reason, "sweeper force-ending game");
                let _ = handle.cmd_tx.try_send(GameCommand::ForceEnd(reason));
            }
        }
    }

    /// Periodic lifecycle sweep, once a minute by default.
    pub fn spawn_sweeper(self: &Arc<Self>, config: Arc<ServerConfig>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.games.sweep_interval_secs));
            loop {
                interval.tick().await;
                scheduler.sweep(&config.games);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Game task
// ---------------------------------------------------------------------------

struct SignalBatch {
    state_changed: bool,
    messages: Vec<(ChatKind, String)>,
    outcome: Option<GameOutcome>,
}

fn collect_signals(signals: Vec<GameSignal>) -> SignalBatch {
    let mut batch = SignalBatch {
        state_changed: false,
        messages: Vec::new(),
        outcome: None,
    };
    for signal in signals {
        match signal {
            GameSignal::StateChanged => batch.state_changed = true,
            GameSignal::RoomMessage { kind, text } => batch.messages.push((kind, text)),
            GameSignal::Ended(outcome) => batch.outcome = Some(outcome),
        }
    }
    batch
}

/// Build per-recipient frames for `matchStarted` or `gameUpdate`.
fn build_frames(info: &GameInfo, game: &dyn PartyGame, started: bool) -> Option<GameBroadcast> {
    let encode = |state: serde_json::Value| -> Option<Bytes> {
        let wire = GameWire {
            id: info.id,
            kind: info.kind,
            players: info.players.clone(),
            state,
        };
        let event = if started {
            ServerEvent::MatchStarted { game: wire }
        } else {
            ServerEvent::GameUpdate { game: wire }
        };
        match encode_event(&event) {
            Ok(json) => Some(Bytes::from(json)),
            Err(e) => {
                tracing::error!(game = %info.id, error = %e, "failed to encode game frame");
                None
            },
        }
    };

    let spectator = encode(game.project(None))?;
    let per_player = info
        .players
        .iter()
        .filter_map(|p| Some((p.user_id, encode(game.project(Some(p.user_id)))?)))
        .collect();
    Some(GameBroadcast::Frames {
        per_player,
        spectator,
    })
}

/// Save-through snapshot with CAS: one retry after a jittered backoff,
/// then last-writer-wins (logged).
async fn persist(
    cache: &SharedCache,
    info: &GameInfo,
    state: &serde_json::Value,
    ended: bool,
    version: &mut Option<u64>,
) {
    let snapshot = GameSnapshot {
        id: info.id,
        room_code: &info.room_code,
        kind: info.kind,
        players: &info.players,
        state,
        ended,
        saved_at: unix_millis(),
    };
    let bytes = match rmp_serde::to_vec_named(&snapshot) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(game = %info.id, error = %e, "failed to encode game snapshot");
            return;
        },
    };

    let key = game_key(info.id);
    match cache.cas_bytes(&key, *version, bytes.clone(), Some(GAME_TTL)).await {
        Ok(v) => *version = Some(v),
        Err(conflict) => {
            let backoff = {
                use rand::Rng;
                rand::rng().random_range(5..25)
            };
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            match cache
                .cas_bytes(&key, conflict.current, bytes.clone(), Some(GAME_TTL))
                .await
            {
                Ok(v) => *version = Some(v),
                Err(_) => {
                    tracing::warn!(game = %info.id, "snapshot CAS failed twice, last writer wins");
                    let v = cache.set_bytes(&key, bytes, Some(GAME_TTL)).await;
                    *version = Some(v);
                },
            }
        },
    }
}

struct PendingPersist {
    state: serde_json::Value,
    attempts: u32,
}

/// One action travelling through the executor. `batch` records the
/// state-machine half once it has run, so a rotated retry never applies
/// the action to the game a second time.
struct QueuedAction {
    actor: UserId,
    action: GameAction,
    reply: Option<oneshot::Sender<Result<(), ActionError>>>,
    attempts: u32,
    batch: Option<SignalBatch>,
}

enum ActionStep {
    Done,
    Rotate(QueuedAction),
    Ended(GameOutcome),
    Panicked,
}

/// One executor pass over a queued action: apply it to the state machine
/// (first pass only), answer the caller, then fan out and persist.
/// `Err(())` means the game instance panicked.
async fn execute_action(
    qa: &mut QueuedAction,
    game: &mut Box<dyn PartyGame>,
    info: &GameInfo,
    bcast_tx: &mpsc::UnboundedSender<GameBroadcast>,
    cache: &SharedCache,
    snapshot_version: &mut Option<u64>,
) -> Result<Option<GameOutcome>, ()> {
    if qa.batch.is_none() {
        match catch_unwind(AssertUnwindSafe(|| game.handle_action(qa.actor, &qa.action))) {
            Ok(Ok(signals)) => {
                if let Some(reply) = qa.reply.take() {
                    let _ = reply.send(Ok(()));
                }
                qa.batch = Some(collect_signals(signals));
            },
            Ok(Err(e)) => {
                if let Some(reply) = qa.reply.take() {
                    let _ = reply.send(Err(e));
                }
                return Ok(None);
            },
            Err(_) => {
                if let Some(reply) = qa.reply.take() {
                    let _ = reply.send(Err(ActionError::Invalid("internal game error".into())));
                }
                return Err(());
            },
        }
    }

    let batch = qa.batch.as_mut().expect("state half ran above");
    // Room messages drain once; frames are snapshots and safe to resend.
    for (kind, text) in batch.messages.drain(..) {
        let _ = bcast_tx.send(GameBroadcast::RoomMessage { kind, text });
    }
    if let Some(outcome) = batch.outcome.take() {
        if let Some(frames) = build_frames(info, game.as_ref(), false) {
            let _ = bcast_tx.send(frames);
        }
        return Ok(Some(outcome));
    }
    if batch.state_changed {
        if let Some(frames) = build_frames(info, game.as_ref(), false) {
            let _ = bcast_tx.send(frames);
        }
        let state = game.project(None);
        persist(cache, info, &state, false, snapshot_version).await;
        batch.state_changed = false;
    }
    Ok(None)
}

/// Run one executor pass under the action timeout. A timed-out action is
/// rotated to the back of the queue with its retry counter bumped, and
/// dropped with a logged error once the retries are spent.
#[allow(clippy::too_many_arguments)]
async fn drive_action(
    mut qa: QueuedAction,
    game: &mut Box<dyn PartyGame>,
    info: &GameInfo,
    bcast_tx: &mpsc::UnboundedSender<GameBroadcast>,
    cache: &SharedCache,
    snapshot_version: &mut Option<u64>,
    action_timeout: Duration,
    max_retries: u32,
) -> ActionStep {
    match tokio::time::timeout(
        action_timeout,
        execute_action(&mut qa, game, info, bcast_tx, cache, snapshot_version),
    )
    .await
    {
        Ok(Ok(Some(outcome))) => ActionStep::Ended(outcome),
        Ok(Ok(None)) => ActionStep::Done,
        Ok(Err(())) => ActionStep::Panicked,
        Err(_) => {
            qa.attempts += 1;
            if qa.attempts > max_retries {
                tracing::error!(
                    game = %info.id,
                    actor = %qa.actor,
                    attempts = qa.attempts,
                    "dropping action after repeated executor timeouts"
                );
                ActionStep::Done
            } else {
                tracing::warn!(
                    game = %info.id,
                    actor = %qa.actor,
                    attempt = qa.attempts,
                    "action execution timed out, rotating to the back of the queue"
                );
                ActionStep::Rotate(qa)
            }
        },
    }
}

fn touch(activity: &Arc<Mutex<Activity>>) {
    activity.lock().expect("activity lock").last_activity = Instant::now();
}

fn push_log(log: &mut VecDeque<String>, entry: String) {
    if log.len() == ACTION_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

/// Recover a terminal outcome from a game that may have just panicked.
fn recover_outcome(game: &mut Box<dyn PartyGame>, info: &GameInfo) -> GameOutcome {
    catch_unwind(AssertUnwindSafe(|| game.force_end())).unwrap_or_else(|_| GameOutcome {
        winner: None,
        rankings: info
            .players
            .iter()
            .map(|p| veil_core::game::RankedPlayer {
                user_id: p.user_id,
                rank: 1,
                score: 0,
            })
            .collect(),
    })
}

async fn tick_arm(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        },
        None => std::future::pending().await,
    }
}

async fn timer_arm(deadline: Option<(u64, Instant)>) -> u64 {
    match deadline {
        Some((seq, at)) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
            seq
        },
        None => std::future::pending().await,
    }
}

async fn run_game(
    info: GameInfo,
    mut game: Box<dyn PartyGame>,
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    bcast_tx: mpsc::UnboundedSender<GameBroadcast>,
    cache: Arc<SharedCache>,
    config: Arc<ServerConfig>,
    activity: Arc<Mutex<Activity>>,
) {
    let action_timeout = Duration::from_secs(config.limits.action_timeout_secs);
    let max_retries = config.limits.action_retries;
    let divisor = config.games.broadcast_divisor.max(1) as u64;

    let mut action_log: VecDeque<String> = VecDeque::with_capacity(ACTION_LOG_CAPACITY);
    let mut pending_actions: VecDeque<QueuedAction> = VecDeque::new();
    let mut pending_persists: VecDeque<PendingPersist> = VecDeque::new();
    let mut connected: HashSet<UserId> = info.players.iter().map(|p| p.user_id).collect();
    let mut snapshot_version: Option<u64> = None;
    let mut tick_count: u64 = 0;
    let mut ended: Option<(GameOutcome, bool)> = None;

    // Announce the match with the initial per-recipient projection.
    if let Some(frames) = build_frames(&info, game.as_ref(), true) {
        let _ = bcast_tx.send(frames);
    }
    persist(&cache, &info, &game.project(None), false, &mut snapshot_version).await;

    let mut interval = game.tick_rate().map(|hz| {
        let mut i = tokio::time::interval(Duration::from_secs_f32(1.0 / hz));
        i.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        i
    });
    let mut last_tick = Instant::now();

    'main: loop {
        // Retry a rotated action first. On a further timeout it goes back
        // behind whatever the select admits next, so fresh commands and
        // ticks interleave with the retries.
        if let Some(qa) = pending_actions.pop_front() {
            match drive_action(
                qa,
                &mut game,
                &info,
                &bcast_tx,
                &cache,
                &mut snapshot_version,
                action_timeout,
                max_retries,
            )
            .await
            {
                ActionStep::Done => continue,
                ActionStep::Rotate(rotated) => pending_actions.push_back(rotated),
                ActionStep::Ended(outcome) => {
                    ended = Some((outcome, false));
                    break 'main;
                },
                ActionStep::Panicked => {
                    tracing::error!(
                        game = %info.id,
                        last_action = action_log.back().map(String::as_str),
                        "game instance panicked, forcing end"
                    );
                    ended = Some((recover_outcome(&mut game, &info), true));
                    break 'main;
                },
            }
        }

        // Rotate deferred persist work before accepting anything new.
        if let Some(PendingPersist { state, attempts }) = pending_persists.pop_front() {
            let timed_out = tokio::time::timeout(
                action_timeout,
                persist(&cache, &info, &state, false, &mut snapshot_version),
            )
            .await
            .is_err();
            if timed_out {
                if attempts >= max_retries {
                    tracing::error!(
                        game = %info.id, attempts,
                        "dropping snapshot persist after retries"
                    );
                } else {
                    pending_persists.push_back(PendingPersist {
                        state,
                        attempts: attempts + 1,
                    });
                }
            }
        }

        let deadline = game.timer_deadline();

        let batch: SignalBatch;
        let mut suppress_broadcast = false;

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(GameCommand::Action { actor, action, reply }) => {
                        touch(&activity);
                        push_log(&mut action_log, format!("{actor} {action:?}"));
                        let qa = QueuedAction {
                            actor,
                            action,
                            reply: Some(reply),
                            attempts: 0,
                            batch: None,
                        };
                        match drive_action(
                            qa,
                            &mut game,
                            &info,
                            &bcast_tx,
                            &cache,
                            &mut snapshot_version,
                            action_timeout,
                            max_retries,
                        )
                        .await
                        {
                            ActionStep::Done => {},
                            ActionStep::Rotate(rotated) => pending_actions.push_back(rotated),
                            ActionStep::Ended(outcome) => {
                                ended = Some((outcome, false));
                                break 'main;
                            },
                            ActionStep::Panicked => {
                                tracing::error!(
                                    game = %info.id,
                                    last_action = action_log.back().map(String::as_str),
                                    "game instance panicked, forcing end"
                                );
                                ended = Some((recover_outcome(&mut game, &info), true));
                                break 'main;
                            },
                        }
                        continue;
                    },
                    Some(GameCommand::PlayerDisconnected(user)) => {
                        connected.remove(&user);
                        if connected.is_empty() {
                            activity.lock().expect("activity lock").all_disconnected_since =
                                Some(Instant::now());
                        }
                        batch = collect_signals(game.player_disconnected(user));
                    },
                    Some(GameCommand::PlayerReconnected(user)) => {
                        connected.insert(user);
                        activity.lock().expect("activity lock").all_disconnected_since = None;
                        batch = collect_signals(game.player_reconnected(user));
                    },
                    Some(GameCommand::ForceEnd(reason)) => {
                        tracing::info!(game = %info.id, reason, "game force-ended");
                        ended = Some((recover_outcome(&mut game, &info), true));
                        break 'main;
                    },
                    None => {
                        ended = Some((recover_outcome(&mut game, &info), true));
                        break 'main;
                    },
                }
            }
            _ = tick_arm(&mut interval) => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;
                tick_count += 1;
                touch(&activity);
                match catch_unwind(AssertUnwindSafe(|| game.tick(dt))) {
                    Ok(signals) => {
                        batch = collect_signals(signals);
                        // Downsample tick broadcasts (60 Hz sim → 20 Hz wire).
                        suppress_broadcast = tick_count % divisor != 0;
                    },
                    Err(_) => {
                        tracing::error!(
                            game = %info.id,
                            last_action = action_log.back().map(String::as_str),
                            "game tick panicked, forcing end"
                        );
                        ended = Some((recover_outcome(&mut game, &info), true));
                        break 'main;
                    },
                }
            }
            seq = timer_arm(deadline) => {
                touch(&activity);
                match catch_unwind(AssertUnwindSafe(|| game.timer_fired(seq))) {
                    Ok(signals) => batch = collect_signals(signals),
                    Err(_) => {
                        tracing::error!(game = %info.id, "game timer panicked, forcing end");
                        ended = Some((recover_outcome(&mut game, &info), true));
                        break 'main;
                    },
                }
            }
        }

        for (kind, text) in batch.messages {
            let _ = bcast_tx.send(GameBroadcast::RoomMessage { kind, text });
        }

        if let Some(outcome) = batch.outcome {
            // Final state is always broadcast, downsampling aside.
            if let Some(frames) = build_frames(&info, game.as_ref(), false) {
                let _ = bcast_tx.send(frames);
            }
            ended = Some((outcome, false));
            break 'main;
        }

        if batch.state_changed && !suppress_broadcast {
            if let Some(frames) = build_frames(&info, game.as_ref(), false) {
                let _ = bcast_tx.send(frames);
            }
            let state = game.project(None);
            if tokio::time::timeout(
                action_timeout,
                persist(&cache, &info, &state, false, &mut snapshot_version),
            )
            .await
            .is_err()
            {
                pending_persists.push_back(PendingPersist { state, attempts: 1 });
            }
        }
    }

    let (outcome, forced) = ended.expect("loop exits only with an outcome");
    let final_state =
        catch_unwind(AssertUnwindSafe(|| game.project(None))).unwrap_or(serde_json::json!({}));
    persist(&cache, &info, &final_state, true, &mut snapshot_version).await;
    game.cleanup();
    let _ = bcast_tx.send(GameBroadcast::Ended {
        outcome,
        forced,
        final_state,
    });
    tracing::info!(game = %info.id, forced, "game task finished");
}

// ---------------------------------------------------------------------------
// Broadcast forwarder
// ---------------------------------------------------------------------------

/// Fan game traffic out to the room. Uses the shared sender map so
/// reconnected clients are reached without restarting the game.
async fn forward_broadcasts(
    info: GameInfo,
    mut rx: mpsc::UnboundedReceiver<GameBroadcast>,
    senders: GameSenders,
    rooms: SharedRooms,
    cache: Arc<SharedCache>,
    scheduler: Arc<GameScheduler>,
) {
    while let Some(broadcast) = rx.recv().await {
        match broadcast {
            GameBroadcast::Frames {
                per_player,
                spectator,
            } => {
                let snapshot = senders.lock().expect("sender lock").clone();
                let private: HashMap<UserId, Bytes> = per_player.into_iter().collect();
                for (user_id, tx) in &snapshot {
                    let frame = private
                        .get(user_id)
                        .cloned()
                        .unwrap_or_else(|| spectator.clone());
                    if tx.try_send(frame).is_err() {
                        tracing::debug!(
                            player = %user_id, game = %info.id,
                            "skipping game frame for slow client"
                        );
                    }
                }
            },
            GameBroadcast::RoomMessage { kind, text } => {
                rooms
                    .write()
                    .await
                    .append_game_message(&info.room_code, kind, text);
            },
            GameBroadcast::Ended {
                outcome,
                forced,
                final_state,
            } => {
                finish_game(&info, outcome, forced, final_state, &rooms, &cache).await;
                scheduler.remove_game(info.id);
                break;
            },
        }
    }
    tracing::debug!(game = %info.id, "broadcast forwarder stopped");
}

/// End-of-game handling: reveal losers, clear room linkage, broadcast
/// `gameEnded` with the post-reveal snapshot, bump the leaderboard.
async fn finish_game(
    info: &GameInfo,
    outcome: GameOutcome,
    forced: bool,
    final_state: serde_json::Value,
    rooms: &SharedRooms,
    cache: &SharedCache,
) {
    let room_snapshot = {
        let mut mgr = rooms.write().await;
        // A forced end (timeout, abandonment, panic) reveals nothing.
        if !forced {
            for loser in outcome.last_place() {
                mgr.reveal_confession(&info.room_code, loser, info.id);
            }
        }
        mgr.set_current_game(&info.room_code, None);
        mgr.clear_playing(&info.room_code);
        mgr.append_system_message(&info.room_code, "The game has ended".to_string());

        let room = mgr.snapshot(&info.room_code);
        if let Some(room) = room.clone() {
            mgr.broadcast(
                &info.room_code,
                &ServerEvent::GameEnded {
                    game: GameWire {
                        id: info.id,
                        kind: info.kind,
                        players: info.players.clone(),
                        state: final_state,
                    },
                    winner: outcome.winner,
                    rankings: outcome.rankings.clone(),
                    room,
                },
            );
        }
        room
    };

    if let Some(room) = room_snapshot {
        cache.save_room_snapshot(&room).await;
    }
    if let Some(winner) = outcome.winner {
        cache.record_win(winner).await;
    }
}
