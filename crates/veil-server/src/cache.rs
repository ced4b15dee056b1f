use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use veil_core::ids::{GameId, UserId};

/// Snapshot TTLs from the keyspace contract.
pub const ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const GAME_TTL: Duration = Duration::from_secs(4 * 60 * 60);
pub const MATCHMAKING_TTL: Duration = Duration::from_secs(60);
pub const WORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub const LEADERBOARD_KEY: &str = "leaderboard:global";
pub const ONLINE_KEY: &str = "online:players";

pub fn room_key(code: &str) -> String {
    format!("room:state:{code}")
}

pub fn game_key(id: GameId) -> String {
    format!("game:state:{id}")
}

pub fn matchmaking_key(code: &str) -> String {
    format!("matchmaking:{code}")
}

pub fn word_key(word: &str) -> String {
    format!("word:{}", word.to_lowercase())
}

pub fn rate_key(user: UserId, event: &str) -> String {
    format!("rate:{user}:{event}")
}

#[derive(Debug, Clone, PartialEq)]
enum CacheValue {
    Bytes(Vec<u8>),
    Str(String),
    Set(HashSet<String>),
    Zset(HashMap<String, f64>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    expires_at: Option<Instant>,
    version: u64,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// In-process key-value store with per-key TTL and version-numbered
/// compare-and-set. Authoritative only for ephemeral data; room and game
/// snapshots stored here are save-through copies of in-memory state.
#[derive(Default)]
pub struct SharedCache {
    inner: RwLock<HashMap<String, Entry>>,
}

/// CAS failure carrying the current version (`None` = key absent/expired).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasConflict {
    pub current: Option<u64>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(map: &mut HashMap<String, Entry>, key: String, value: CacheValue, ttl: Option<Duration>) {
        let version = map.get(&key).map(|e| e.version + 1).unwrap_or(1);
        map.insert(
            key,
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
                version,
            },
        );
    }

    pub async fn set_bytes(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> u64 {
        let mut map = self.inner.write().await;
        Self::put(&mut map, key.to_string(), CacheValue::Bytes(bytes), ttl);
        map[key].version
    }

    pub async fn get_bytes(&self, key: &str) -> Option<(Vec<u8>, u64)> {
        let map = self.inner.read().await;
        let entry = map.get(key).filter(|e| e.live())?;
        match &entry.value {
            CacheValue::Bytes(b) => Some((b.clone(), entry.version)),
            _ => None,
        }
    }

    /// Compare-and-set: succeeds when the key's current version matches
    /// `expected` (`None` = key must be absent). Returns the new version.
    pub async fn cas_bytes(
        &self,
        key: &str,
        expected: Option<u64>,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<u64, CasConflict> {
        let mut map = self.inner.write().await;
        let current = map.get(key).filter(|e| e.live()).map(|e| e.version);
        if current != expected {
            return Err(CasConflict { current });
        }
        Self::put(&mut map, key.to_string(), CacheValue::Bytes(bytes), ttl);
        Ok(map[key].version)
    }

    pub async fn set_string(&self, key: &str, value: String, ttl: Option<Duration>) {
        let mut map = self.inner.write().await;
        Self::put(&mut map, key.to_string(), CacheValue::Str(value), ttl);
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        let map = self.inner.read().await;
        match &map.get(key).filter(|e| e.live())?.value {
            CacheValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Add to a set, refreshing the key TTL. Returns the new cardinality.
    pub async fn sadd(&self, key: &str, member: &str, ttl: Option<Duration>) -> usize {
        let mut map = self.inner.write().await;
        match map.get_mut(key).filter(|e| e.live()) {
            Some(entry) => {
                if let CacheValue::Set(set) = &mut entry.value {
                    set.insert(member.to_string());
                    entry.expires_at = ttl.map(|t| Instant::now() + t);
                    entry.version += 1;
                    return set.len();
                }
                // Type clash: overwrite, matching last-write-wins semantics.
                let mut set = HashSet::new();
                set.insert(member.to_string());
                entry.value = CacheValue::Set(set);
                entry.expires_at = ttl.map(|t| Instant::now() + t);
                entry.version += 1;
                1
            },
            None => {
                let mut set = HashSet::new();
                set.insert(member.to_string());
                Self::put(&mut map, key.to_string(), CacheValue::Set(set), ttl);
                1
            },
        }
    }

    pub async fn srem(&self, key: &str, member: &str) {
        let mut map = self.inner.write().await;
        if let Some(entry) = map.get_mut(key).filter(|e| e.live())
            && let CacheValue::Set(set) = &mut entry.value
        {
            set.remove(member);
            entry.version += 1;
        }
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        let map = self.inner.read().await;
        match map.get(key).filter(|e| e.live()).map(|e| &e.value) {
            Some(CacheValue::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub async fn scard(&self, key: &str) -> usize {
        let map = self.inner.read().await;
        match map.get(key).filter(|e| e.live()).map(|e| &e.value) {
            Some(CacheValue::Set(set)) => set.len(),
            _ => 0,
        }
    }

    /// Increment a sorted-set member's score, creating as needed.
    pub async fn zincr(&self, key: &str, member: &str, delta: f64) -> f64 {
        let mut map = self.inner.write().await;
        match map.get_mut(key).filter(|e| e.live()) {
            Some(entry) => {
                if let CacheValue::Zset(zset) = &mut entry.value {
                    let score = zset.entry(member.to_string()).or_insert(0.0);
                    *score += delta;
                    entry.version += 1;
                    return *score;
                }
                let mut zset = HashMap::new();
                zset.insert(member.to_string(), delta);
                entry.value = CacheValue::Zset(zset);
                entry.version += 1;
                delta
            },
            None => {
                let mut zset = HashMap::new();
                zset.insert(member.to_string(), delta);
                Self::put(&mut map, key.to_string(), CacheValue::Zset(zset), None);
                delta
            },
        }
    }

    /// Top `n` members by descending score.
    pub async fn ztop(&self, key: &str, n: usize) -> Vec<(String, f64)> {
        let map = self.inner.read().await;
        let Some(CacheValue::Zset(zset)) = map.get(key).filter(|e| e.live()).map(|e| &e.value)
        else {
            return Vec::new();
        };
        let mut entries: Vec<(String, f64)> =
            zset.iter().map(|(k, &v)| (k.clone(), v)).collect();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(n);
        entries
    }

    pub async fn hset(&self, key: &str, field: &str, value: String, ttl: Option<Duration>) {
        let mut map = self.inner.write().await;
        match map.get_mut(key).filter(|e| e.live()) {
            Some(entry) => {
                if let CacheValue::Hash(hash) = &mut entry.value {
                    hash.insert(field.to_string(), value);
                    entry.version += 1;
                    return;
                }
                let mut hash = HashMap::new();
                hash.insert(field.to_string(), value);
                entry.value = CacheValue::Hash(hash);
                entry.version += 1;
            },
            None => {
                let mut hash = HashMap::new();
                hash.insert(field.to_string(), value);
                Self::put(&mut map, key.to_string(), CacheValue::Hash(hash), ttl);
            },
        }
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        let map = self.inner.read().await;
        match map.get(key).filter(|e| e.live()).map(|e| &e.value) {
            Some(CacheValue::Hash(hash)) => hash.clone(),
            _ => HashMap::new(),
        }
    }

    pub async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    /// Drop expired entries. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.live());
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    // -- Keyspace helpers ---------------------------------------------------

    pub async fn mark_online(&self, user: UserId) {
        self.sadd(ONLINE_KEY, &user.to_string(), None).await;
    }

    pub async fn mark_offline(&self, user: UserId) {
        self.srem(ONLINE_KEY, &user.to_string()).await;
    }

    pub async fn record_win(&self, user: UserId) {
        self.zincr(LEADERBOARD_KEY, &user.to_string(), 1.0).await;
    }

    pub async fn mark_word_valid(&self, word: &str) {
        self.set_string(&word_key(word), "1".to_string(), Some(WORD_TTL))
            .await;
    }

    /// Save-through copy of a room snapshot for cross-attachment restores.
    pub async fn save_room_snapshot(&self, snapshot: &veil_core::room::RoomSnapshot) {
        match rmp_serde::to_vec_named(snapshot) {
            Ok(bytes) => {
                self.set_bytes(&room_key(&snapshot.code), bytes, Some(ROOM_TTL))
                    .await;
            },
            Err(e) => {
                tracing::error!(room = %snapshot.code, error = %e, "failed to encode room snapshot")
            },
        }
    }

    pub async fn load_room_snapshot(&self, code: &str) -> Option<veil_core::room::RoomSnapshot> {
        let (bytes, _) = self.get_bytes(&room_key(code)).await?;
        rmp_serde::from_slice(&bytes).ok()
    }

    pub async fn delete_room_snapshot(&self, code: &str) {
        self.delete(&room_key(code)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_roundtrip_with_versions() {
        let cache = SharedCache::new();
        let v1 = cache.set_bytes("k", vec![1, 2, 3], None).await;
        assert_eq!(v1, 1);
        let (bytes, version) = cache.get_bytes("k").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(version, 1);

        let v2 = cache.set_bytes("k", vec![4], None).await;
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn cas_succeeds_on_matching_version() {
        let cache = SharedCache::new();
        let v1 = cache.set_bytes("k", vec![1], None).await;
        let v2 = cache.cas_bytes("k", Some(v1), vec![2], None).await.unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn cas_conflicts_on_stale_version() {
        let cache = SharedCache::new();
        let v1 = cache.set_bytes("k", vec![1], None).await;
        cache.set_bytes("k", vec![2], None).await;
        let err = cache.cas_bytes("k", Some(v1), vec![3], None).await.unwrap_err();
        assert_eq!(err.current, Some(v1 + 1));
        // Create-if-absent fails when the key exists.
        let err = cache.cas_bytes("k", None, vec![3], None).await.unwrap_err();
        assert!(err.current.is_some());
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent() {
        let cache = SharedCache::new();
        cache
            .set_bytes("k", vec![1], Some(Duration::ZERO))
            .await;
        assert!(cache.get_bytes("k").await.is_none());
        // Sweep physically removes it.
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn sets_add_remove_and_count() {
        let cache = SharedCache::new();
        assert_eq!(cache.sadd("s", "a", None).await, 1);
        assert_eq!(cache.sadd("s", "b", None).await, 2);
        assert_eq!(cache.sadd("s", "a", None).await, 2, "sets deduplicate");
        assert_eq!(cache.scard("s").await, 2);
        cache.srem("s", "a").await;
        assert_eq!(cache.smembers("s").await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn zset_orders_by_score() {
        let cache = SharedCache::new();
        cache.zincr("lb", "alice", 3.0).await;
        cache.zincr("lb", "bob", 1.0).await;
        cache.zincr("lb", "bob", 5.0).await;
        let top = cache.ztop("lb", 2).await;
        assert_eq!(top[0].0, "bob");
        assert_eq!(top[0].1, 6.0);
        assert_eq!(top[1].0, "alice");
    }

    #[tokio::test]
    async fn hash_fields() {
        let cache = SharedCache::new();
        cache.hset("h", "f1", "v1".into(), None).await;
        cache.hset("h", "f2", "v2".into(), None).await;
        let all = cache.hgetall("h").await;
        assert_eq!(all.len(), 2);
        assert_eq!(all["f1"], "v1");
    }

    #[tokio::test]
    async fn room_snapshot_roundtrip() {
        let cache = SharedCache::new();
        let snapshot = veil_core::room::RoomSnapshot {
            code: "ABC123".into(),
            name: "Test".into(),
            description: None,
            host_id: UserId::new(),
            max_players: 20,
            is_public: true,
            has_password: false,
            players: Vec::new(),
            game_pool: veil_core::game::GameKind::ALL.to_vec(),
            current_game_id: None,
        };
        cache.save_room_snapshot(&snapshot).await;
        let loaded = cache.load_room_snapshot("ABC123").await.unwrap();
        assert_eq!(loaded.code, snapshot.code);
        assert_eq!(loaded.host_id, snapshot.host_id);
        cache.delete_room_snapshot("ABC123").await;
        assert!(cache.load_room_snapshot("ABC123").await.is_none());
    }

    #[tokio::test]
    async fn keyspace_helpers() {
        assert_eq!(room_key("ABC123"), "room:state:ABC123");
        assert_eq!(matchmaking_key("ABC123"), "matchmaking:ABC123");
        assert_eq!(word_key("KeDi"), "word:kedi");
        let user = UserId::new();
        assert_eq!(rate_key(user, "createRoom"), format!("rate:{user}:createRoom"));

        let cache = SharedCache::new();
        let user = UserId::new();
        cache.mark_online(user).await;
        assert_eq!(cache.scard(ONLINE_KEY).await, 1);
        cache.mark_offline(user).await;
        assert_eq!(cache.scard(ONLINE_KEY).await, 0);

        cache.record_win(user).await;
        let top = cache.ztop(LEADERBOARD_KEY, 10).await;
        assert_eq!(top[0].1, 1.0);
    }
}
