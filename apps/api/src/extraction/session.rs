//! Extraction sessions: transient state of one roster upload until confirm or cancel.
//!
//! Stored behind `SessionStore` so the HTTP layer never touches a global map.
//! In-memory for single-instance deployments and tests, Redis when `REDIS_URL` is set.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::extraction::preprocess::PreprocessNote;
use crate::extraction::retry::ExtractionOutcome;
use crate::matching::{ManualOverride, MatchReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created before the first model call; extraction still running.
    Processing,
    Ready,
    Failed,
    /// Claimed by a confirm request; the roster is being written.
    Confirming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSession {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub blob_url: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub last_error: Option<String>,
    pub degraded: Vec<PreprocessNote>,
    pub outcome: Option<ExtractionOutcome>,
    pub matches: Option<MatchReport>,
    pub overrides: Vec<ManualOverride>,
}

impl ExtractionSession {
    pub fn new(venue_id: Uuid, blob_url: String, mime_type: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            venue_id,
            blob_url,
            mime_type,
            created_at: Utc::now(),
            status: SessionStatus::Processing,
            last_error: None,
            degraded: Vec::new(),
            outcome: None,
            matches: None,
            overrides: Vec::new(),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Session serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Session {0} no longer exists")]
    Missing(Uuid),
}

/// Keyed session repository. Implementations must be safe for concurrent use.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &ExtractionSession) -> Result<(), SessionError>;

    async fn get(&self, id: Uuid) -> Result<Option<ExtractionSession>, SessionError>;

    /// Replaces the stored session with the same id. Fails with
    /// `SessionError::Missing` when it was deleted in the meantime.
    async fn update(&self, session: &ExtractionSession) -> Result<(), SessionError>;

    /// Compare-and-set on the status: moves the session from `from` to `to`
    /// atomically and returns it. `None` when the session is gone or its
    /// status is no longer `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<Option<ExtractionSession>, SessionError>;

    /// Returns `false` when no such session existed.
    async fn delete(&self, id: Uuid) -> Result<bool, SessionError>;

    /// Sessions created more than `ttl` ago.
    async fn list_expired(&self, ttl: Duration) -> Result<Vec<ExtractionSession>, SessionError>;
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, ExtractionSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn all(&self) -> Vec<ExtractionSession> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &ExtractionSession) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExtractionSession>, SessionError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: &ExtractionSession) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or(SessionError::Missing(session.id))?;
        *stored = session.clone();
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<Option<ExtractionSession>, SessionError> {
        let mut sessions = self.sessions.write().await;
        Ok(match sessions.get_mut(&id) {
            Some(stored) if stored.status == from => {
                stored.status = to;
                Some(stored.clone())
            }
            _ => None,
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }

    async fn list_expired(&self, ttl: Duration) -> Result<Vec<ExtractionSession>, SessionError> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired(ttl, now))
            .cloned()
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redis store
// ────────────────────────────────────────────────────────────────────────────

const KEY_PREFIX: &str = "roster:session:";

/// Rounds of read-then-swap before a contended transition gives up.
const TRANSITION_ATTEMPTS: usize = 5;

/// Replaces KEYS[1] with ARGV[2] only while it still holds exactly ARGV[1].
const SWAP_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
    return 1
end
return 0
"#;

/// Sessions as JSON strings under `roster:session:{id}`.
///
/// Keys carry a Redis TTL of twice the session TTL, so a missed janitor
/// sweep cannot leak sessions forever; the janitor still deletes the blobs.
pub struct RedisSessionStore {
    client: redis::Client,
    key_ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(client: redis::Client, session_ttl_secs: u64) -> Self {
        Self {
            client,
            key_ttl_secs: session_ttl_secs.saturating_mul(2).max(1),
        }
    }

    fn key(id: Uuid) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    async fn conn(&self) -> Result<MultiplexedConnection, SessionError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn put(&self, session: &ExtractionSession) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(Self::key(session.id), json, self.key_ttl_secs)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &ExtractionSession) -> Result<(), SessionError> {
        self.put(session).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExtractionSession>, SessionError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(Self::key(id)).await?;
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(SessionError::from)
    }

    async fn update(&self, session: &ExtractionSession) -> Result<(), SessionError> {
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn().await?;
        // SET .. XX replies nil instead of creating a key that was deleted.
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(session.id))
            .arg(json)
            .arg("XX")
            .arg("EX")
            .arg(self.key_ttl_secs)
            .query_async(&mut conn)
            .await?;
        match reply {
            Some(_) => Ok(()),
            None => Err(SessionError::Missing(session.id)),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<Option<ExtractionSession>, SessionError> {
        let key = Self::key(id);
        let script = redis::Script::new(SWAP_SCRIPT);
        let mut conn = self.conn().await?;

        for _ in 0..TRANSITION_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await?;
            let Some(current) = current else {
                return Ok(None);
            };
            let mut session: ExtractionSession = serde_json::from_str(&current)?;
            if session.status != from {
                return Ok(None);
            }
            session.status = to;
            let next = serde_json::to_string(&session)?;
            let swapped: i32 = script
                .key(&key)
                .arg(&current)
                .arg(&next)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                return Ok(Some(session));
            }
        }
        tracing::warn!(session_id = %id, "Session transition lost every swap attempt");
        Ok(None)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SessionError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(Self::key(id)).await?;
        Ok(removed > 0)
    }

    async fn list_expired(&self, ttl: Duration) -> Result<Vec<ExtractionSession>, SessionError> {
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> =
                conn.scan_match(format!("{KEY_PREFIX}*")).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let now = Utc::now();
        let mut expired = Vec::new();
        for key in keys {
            let json: Option<String> = conn.get(&key).await?;
            // Key may have been deleted between SCAN and GET.
            let Some(json) = json else { continue };
            let session: ExtractionSession = serde_json::from_str(&json)?;
            if session.is_expired(ttl, now) {
                expired.push(session);
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ExtractionSession {
        ExtractionSession::new(
            Uuid::new_v4(),
            "s3://rosters/a.png".to_string(),
            "image/png".to_string(),
        )
    }

    #[tokio::test]
    async fn test_in_memory_create_get_update_delete() {
        let store = InMemorySessionStore::new();
        let mut s = session();
        store.create(&s).await.unwrap();

        let loaded = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Processing);

        s.status = SessionStatus::Ready;
        store.update(&s).await.unwrap();
        assert_eq!(store.get(s.id).await.unwrap().unwrap().status, SessionStatus::Ready);

        assert!(store.delete(s.id).await.unwrap());
        assert!(!store.delete(s.id).await.unwrap());
        assert!(store.get(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_after_delete_does_not_recreate() {
        let store = InMemorySessionStore::new();
        let mut s = session();
        store.create(&s).await.unwrap();
        assert!(store.delete(s.id).await.unwrap());

        s.status = SessionStatus::Ready;
        let err = store.update(&s).await.unwrap_err();
        assert!(matches!(err, SessionError::Missing(id) if id == s.id));
        assert!(store.get(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_claims_only_once() {
        let store = InMemorySessionStore::new();
        let mut s = session();
        s.status = SessionStatus::Ready;
        store.create(&s).await.unwrap();

        let (first, second) = tokio::join!(
            store.transition(s.id, SessionStatus::Ready, SessionStatus::Confirming),
            store.transition(s.id, SessionStatus::Ready, SessionStatus::Confirming),
        );
        let claims = [first.unwrap(), second.unwrap()];
        assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);
        assert_eq!(
            store.get(s.id).await.unwrap().unwrap().status,
            SessionStatus::Confirming
        );

        let released = store
            .transition(s.id, SessionStatus::Confirming, SessionStatus::Ready)
            .await
            .unwrap();
        assert_eq!(released.map(|r| r.status), Some(SessionStatus::Ready));
    }

    #[tokio::test]
    async fn test_transition_on_missing_session_is_none() {
        let store = InMemorySessionStore::new();
        let claim = store
            .transition(Uuid::new_v4(), SessionStatus::Ready, SessionStatus::Confirming)
            .await
            .unwrap();
        assert!(claim.is_none());
    }

    #[tokio::test]
    async fn test_list_expired_only_returns_old_sessions() {
        let store = InMemorySessionStore::new();
        let fresh = session();
        let mut stale = session();
        stale.created_at = Utc::now() - Duration::hours(2);
        store.create(&fresh).await.unwrap();
        store.create(&stale).await.unwrap();

        let expired = store.list_expired(Duration::hours(1)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let s = session();
        let json = serde_json::to_string(&s).unwrap();
        let back: ExtractionSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.status, SessionStatus::Processing);
    }
}
