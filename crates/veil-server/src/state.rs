use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::cache::SharedCache;
use crate::config::ServerConfig;
use crate::rate_limit::EventRateLimiter;
use crate::room_manager::RoomManager;
use crate::scheduler::GameScheduler;
use crate::session::{SessionStore, TokenSigner};

pub type SharedRooms = Arc<RwLock<RoomManager>>;
pub type SharedSessions = Arc<RwLock<SessionStore>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub sessions: SharedSessions,
    pub rooms: SharedRooms,
    pub scheduler: Arc<GameScheduler>,
    pub cache: Arc<SharedCache>,
    pub rate_limiter: Arc<EventRateLimiter>,
    pub ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let signer = TokenSigner::new(
            config.auth.token_secret.clone().unwrap_or_default(),
            config.auth.token_ttl_secs(),
        );
        let sessions = SessionStore::new(
            signer,
            Duration::from_secs(config.sessions.idle_timeout_secs),
        );
        let cache = Arc::new(SharedCache::new());
        Self {
            config: Arc::new(config),
            sessions: Arc::new(RwLock::new(sessions)),
            rooms: Arc::new(RwLock::new(RoomManager::new())),
            scheduler: Arc::new(GameScheduler::new()),
            rate_limiter: Arc::new(EventRateLimiter::new(Arc::clone(&cache))),
            cache,
            ws_per_ip: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }
}

/// RAII guard tracking per-IP WebSocket connection count. A synchronous
/// mutex lets `Drop` decrement without spawning a task.
pub struct IpConnectionGuard {
    ip: IpAddr,
    ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
}

impl IpConnectionGuard {
    /// Attempt to acquire a per-IP slot. `None` when the limit is hit.
    pub fn try_acquire(
        ip: IpAddr,
        ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
        max_per_ip: usize,
    ) -> Option<Self> {
        let mut map = ws_per_ip.lock().ok()?;
        let count = map.entry(ip).or_insert(0);
        if *count >= max_per_ip {
            return None;
        }
        *count += 1;
        drop(map);
        Some(Self { ip, ws_per_ip })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.ws_per_ip.lock()
            && let Some(count) = map.get_mut(&self.ip)
        {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.ip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ip_guard_acquires_and_rejects_at_limit() {
        let ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        let guard1 = IpConnectionGuard::try_acquire(ip, Arc::clone(&ws_per_ip), 2);
        assert!(guard1.is_some());
        let guard2 = IpConnectionGuard::try_acquire(ip, Arc::clone(&ws_per_ip), 2);
        assert!(guard2.is_some());
        let guard3 = IpConnectionGuard::try_acquire(ip, Arc::clone(&ws_per_ip), 2);
        assert!(guard3.is_none(), "third connection must be rejected");

        drop(guard1);
        drop(guard2);
    }

    #[test]
    fn ip_guard_drop_decrements_and_cleans_up() {
        let ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        let guard = IpConnectionGuard::try_acquire(ip, Arc::clone(&ws_per_ip), 5).unwrap();
        assert_eq!(*ws_per_ip.lock().unwrap().get(&ip).unwrap(), 1);

        drop(guard);
        assert!(
            ws_per_ip.lock().unwrap().get(&ip).is_none(),
            "entry removed after last guard"
        );
    }
}
