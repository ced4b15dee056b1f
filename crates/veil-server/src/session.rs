use std::collections::HashMap;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use veil_core::ids::{AttachmentId, SessionId, UserId};
use veil_core::player::avatar_for;
use veil_core::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

/// A registered (possibly guest) user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    pub avatar: String,
    pub is_guest: bool,
}

/// Server-side session binding. Survives attachment loss; only the
/// attachment id is swapped on reattach.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub token: String,
    pub tab_id: Option<String>,
    pub attachment: Option<AttachmentId>,
    pub last_active: Instant,
    pub expires_at: u64,
}

/// Claims embedded in a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub expires_at: u64,
}

/// Stateless HMAC-SHA256 token signer. Format:
/// `v1.<user>.<session>.<expires_at>.<hex sig>`.
#[derive(Clone)]
pub struct TokenSigner {
    secret: String,
    ttl_secs: u64,
}

impl TokenSigner {
    pub fn new(secret: String, ttl_secs: u64) -> Self {
        Self { secret, ttl_secs }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn sign(&self, user_id: UserId, session_id: SessionId, expires_at: u64) -> String {
        let payload = format!("v1.{user_id}.{session_id}.{expires_at}");
        let sig = self.mac(&payload);
        format!("{payload}.{sig}")
    }

    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        let mut parts = token.split('.');
        let (v, user, session, exp, sig) = (
            parts.next()?,
            parts.next()?,
            parts.next()?,
            parts.next()?,
            parts.next()?,
        );
        if v != "v1" || parts.next().is_some() {
            return None;
        }
        let payload = format!("{v}.{user}.{session}.{exp}");

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        let expected = hex::decode(sig).ok()?;
        mac.verify_slice(&expected).ok()?;

        let claims = TokenClaims {
            user_id: UserId::parse(user)?,
            session_id: SessionId::parse(session)?,
            expires_at: exp.parse().ok()?,
        };
        if claims.expires_at <= unix_secs() {
            return None;
        }
        Some(claims)
    }

    fn mac(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Handshake fields presented by a connecting client.
#[derive(Debug, Default)]
pub struct BindRequest {
    pub token: Option<String>,
    pub nickname: Option<String>,
    pub tab_id: Option<String>,
    /// Client explicitly wants a fresh session even with a valid token.
    pub new_session: bool,
}

/// Result of binding an attachment to a session.
#[derive(Debug, Clone)]
pub struct BindOutcome {
    pub session_id: SessionId,
    pub user: User,
    pub token: String,
    pub is_new: bool,
    pub reattached: bool,
}

/// Owns all users and sessions. Mutated only by the gateway and the
/// periodic sweeper.
pub struct SessionStore {
    signer: TokenSigner,
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    by_token: HashMap<String, SessionId>,
    by_attachment: HashMap<AttachmentId, SessionId>,
    idle_timeout: Duration,
    guest_counter: usize,
}

impl SessionStore {
    pub fn new(signer: TokenSigner, idle_timeout: Duration) -> Self {
        Self {
            signer,
            users: HashMap::new(),
            sessions: HashMap::new(),
            by_token: HashMap::new(),
            by_attachment: HashMap::new(),
            idle_timeout,
            guest_counter: 0,
        }
    }

    /// Bind a new attachment: reattach to an existing session when a valid
    /// token (and matching tab) is presented, otherwise create a fresh
    /// session, minting a guest user if the token names nobody we know.
    pub fn bind(&mut self, req: BindRequest, attachment: AttachmentId) -> BindOutcome {
        if !req.new_session
            && let Some(token) = req.token.as_deref()
            && let Some(claims) = self.signer.verify(token)
        {
            // Same token, same tab: this is a reattachment.
            if let Some(&sid) = self.by_token.get(token)
                && let Some(session) = self.sessions.get(&sid)
                && session.tab_id.as_deref() == req.tab_id.as_deref()
            {
                let session = self.sessions.get_mut(&sid).expect("session exists");
                if let Some(old) = session.attachment.take() {
                    self.by_attachment.remove(&old);
                }
                session.attachment = Some(attachment);
                session.last_active = Instant::now();
                self.by_attachment.insert(attachment, sid);
                let user = match self.users.get(&claims.user_id) {
                    Some(u) => u.clone(),
                    // Token is valid but the user record is gone (restart);
                    // rebuild it from the handshake.
                    None => self.mint_user(claims.user_id, req.nickname.clone()),
                };
                tracing::debug!(session = %sid, user = %user.id, "session reattached");
                return BindOutcome {
                    session_id: sid,
                    user,
                    token: token.to_string(),
                    is_new: false,
                    reattached: true,
                };
            }

            // Valid token, no live session (restart) or a different tab:
            // a peer session for the same user.
            let user = match self.users.get(&claims.user_id) {
                Some(u) => u.clone(),
                None => self.mint_user(claims.user_id, req.nickname.clone()),
            };
            let (session_id, token) = self.create_session(user.id, req.tab_id, attachment);
            return BindOutcome {
                session_id,
                user,
                token,
                is_new: false,
                reattached: false,
            };
        }

        // Fresh guest.
        let user = self.mint_user(UserId::new(), req.nickname);
        let (session_id, token) = self.create_session(user.id, req.tab_id, attachment);
        BindOutcome {
            session_id,
            user,
            token,
            is_new: true,
            reattached: false,
        }
    }

    fn mint_user(&mut self, id: UserId, nickname: Option<String>) -> User {
        self.guest_counter += 1;
        let nickname = nickname
            .filter(|n| !n.trim().is_empty())
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| format!("Guest-{}", 1000 + self.guest_counter));
        let user = User {
            id,
            nickname,
            avatar: avatar_for(self.guest_counter).to_string(),
            is_guest: true,
        };
        self.users.insert(id, user.clone());
        user
    }

    fn create_session(
        &mut self,
        user_id: UserId,
        tab_id: Option<String>,
        attachment: AttachmentId,
    ) -> (SessionId, String) {
        let session_id = SessionId::new();
        let expires_at = unix_secs() + self.signer.ttl_secs();
        let token = self.signer.sign(user_id, session_id, expires_at);
        let session = Session {
            id: session_id,
            user_id,
            token: token.clone(),
            tab_id,
            attachment: Some(attachment),
            last_active: Instant::now(),
            expires_at,
        };
        self.by_token.insert(token.clone(), session_id);
        self.by_attachment.insert(attachment, session_id);
        self.sessions.insert(session_id, session);
        tracing::debug!(session = %session_id, user = %user_id, "session created");
        (session_id, token)
    }

    /// Mark an attachment gone. The session survives for reattachment.
    pub fn detach(&mut self, attachment: AttachmentId) -> Option<SessionId> {
        let sid = self.by_attachment.remove(&attachment)?;
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.attachment = None;
            session.last_active = Instant::now();
        }
        Some(sid)
    }

    pub fn lookup_by_attachment(&self, attachment: AttachmentId) -> Option<&Session> {
        let sid = self.by_attachment.get(&attachment)?;
        self.sessions.get(sid)
    }

    pub fn touch(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.last_active = Instant::now();
        }
    }

    /// Server-side revocation: the token keeps verifying statelessly but
    /// the session record is gone, so binding falls back to a new session.
    pub fn expire(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.remove(&session_id) {
            self.by_token.remove(&session.token);
            if let Some(att) = session.attachment {
                self.by_attachment.remove(&att);
            }
        }
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn set_nickname(&mut self, user_id: UserId, nickname: String) -> Option<User> {
        let user = self.users.get_mut(&user_id)?;
        user.nickname = nickname;
        Some(user.clone())
    }

    /// Remove detached sessions idle beyond the timeout or past their
    /// token expiry. Returns the number removed.
    pub fn sweep(&mut self) -> usize {
        let now = unix_secs();
        let idle = self.idle_timeout;
        let dead: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                s.attachment.is_none()
                    && (s.last_active.elapsed() > idle || s.expires_at <= now)
            })
            .map(|s| s.id)
            .collect();
        for sid in &dead {
            self.expire(*sid);
        }
        if !dead.is_empty() {
            tracing::debug!(count = dead.len(), "swept expired sessions");
        }
        dead.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(
            TokenSigner::new("test-secret".into(), 3600),
            Duration::from_secs(3600),
        )
    }

    fn bind_guest(store: &mut SessionStore, nickname: &str) -> (BindOutcome, AttachmentId) {
        let att = AttachmentId::new();
        let outcome = store.bind(
            BindRequest {
                nickname: Some(nickname.into()),
                ..BindRequest::default()
            },
            att,
        );
        (outcome, att)
    }

    #[test]
    fn token_roundtrip() {
        let signer = TokenSigner::new("k".into(), 3600);
        let (user, session) = (UserId::new(), SessionId::new());
        let exp = unix_secs() + 100;
        let token = signer.sign(user, session, exp);
        let claims = signer.verify(&token).expect("token verifies");
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.session_id, session);
        assert_eq!(claims.expires_at, exp);
    }

    #[test]
    fn tampered_token_rejected() {
        let signer = TokenSigner::new("k".into(), 3600);
        let token = signer.sign(UserId::new(), SessionId::new(), unix_secs() + 100);
        let mut forged = token.clone();
        forged.truncate(token.len() - 2);
        forged.push_str("00");
        assert!(signer.verify(&forged).is_none());
        // A different secret must also fail.
        let other = TokenSigner::new("other".into(), 3600);
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn expired_token_rejected() {
        let signer = TokenSigner::new("k".into(), 3600);
        let token = signer.sign(UserId::new(), SessionId::new(), unix_secs().saturating_sub(1));
        assert!(signer.verify(&token).is_none());
    }

    #[test]
    fn fresh_bind_mints_guest() {
        let mut store = store();
        let (outcome, att) = bind_guest(&mut store, "Alice");
        assert!(outcome.is_new);
        assert!(!outcome.reattached);
        assert_eq!(outcome.user.nickname, "Alice");
        assert!(outcome.user.is_guest);
        assert!(store.lookup_by_attachment(att).is_some());
    }

    #[test]
    fn empty_nickname_gets_generated_one() {
        let mut store = store();
        let att = AttachmentId::new();
        let outcome = store.bind(BindRequest::default(), att);
        assert!(outcome.user.nickname.starts_with("Guest-"));
    }

    #[test]
    fn reattach_preserves_session_and_swaps_attachment() {
        let mut store = store();
        let (outcome, att1) = bind_guest(&mut store, "Alice");

        store.detach(att1);
        assert!(store.lookup_by_attachment(att1).is_none());

        let att2 = AttachmentId::new();
        let rebound = store.bind(
            BindRequest {
                token: Some(outcome.token.clone()),
                ..BindRequest::default()
            },
            att2,
        );
        assert!(rebound.reattached);
        assert!(!rebound.is_new);
        assert_eq!(rebound.session_id, outcome.session_id);
        assert_eq!(rebound.user.id, outcome.user.id);
        assert_eq!(
            store.lookup_by_attachment(att2).unwrap().id,
            outcome.session_id
        );
    }

    #[test]
    fn different_tab_creates_peer_session() {
        let mut store = store();
        let att1 = AttachmentId::new();
        let first = store.bind(
            BindRequest {
                nickname: Some("Alice".into()),
                tab_id: Some("tab-1".into()),
                ..BindRequest::default()
            },
            att1,
        );

        let att2 = AttachmentId::new();
        let second = store.bind(
            BindRequest {
                token: Some(first.token.clone()),
                tab_id: Some("tab-2".into()),
                ..BindRequest::default()
            },
            att2,
        );
        assert!(!second.is_new, "same user, not a new identity");
        assert_ne!(second.session_id, first.session_id, "peer session per tab");
        assert_eq!(second.user.id, first.user.id);
        // Both attachments stay live.
        assert!(store.lookup_by_attachment(att1).is_some());
        assert!(store.lookup_by_attachment(att2).is_some());
    }

    #[test]
    fn new_session_flag_forces_fresh_identity() {
        let mut store = store();
        let (outcome, _att) = bind_guest(&mut store, "Alice");
        let att2 = AttachmentId::new();
        let rebound = store.bind(
            BindRequest {
                token: Some(outcome.token),
                new_session: true,
                ..BindRequest::default()
            },
            att2,
        );
        assert!(rebound.is_new);
        assert_ne!(rebound.user.id, outcome.user.id);
    }

    #[test]
    fn expire_revokes_server_side() {
        let mut store = store();
        let (outcome, att) = bind_guest(&mut store, "Alice");
        store.expire(outcome.session_id);
        assert!(store.lookup_by_attachment(att).is_none());

        // The token still verifies statelessly, but binding with it now
        // produces a different session.
        let att2 = AttachmentId::new();
        let rebound = store.bind(
            BindRequest {
                token: Some(outcome.token),
                ..BindRequest::default()
            },
            att2,
        );
        assert!(!rebound.reattached);
        assert_ne!(rebound.session_id, outcome.session_id);
        assert_eq!(rebound.user.id, outcome.user.id, "identity survives");
    }

    #[test]
    fn sweep_removes_detached_idle_sessions() {
        let mut store = SessionStore::new(
            TokenSigner::new("k".into(), 3600),
            Duration::ZERO, // instant idle expiry
        );
        let att = AttachmentId::new();
        let outcome = store.bind(BindRequest::default(), att);
        // Attached sessions are never swept.
        assert_eq!(store.sweep(), 0);

        store.detach(att);
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.session_count(), 0);
        let _ = outcome;
    }
}
