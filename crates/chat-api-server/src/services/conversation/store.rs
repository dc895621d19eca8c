use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::models::chat::SessionId;
use super::error::StoreError;
use super::types::{ContextUpdate, Session, SessionLookup, SessionPolicy, SessionStats};

/// One entry of the store. `data` makes every merge atomic, `turn`
/// serializes whole chat turns for this session across awaits.
struct SessionSlot {
    data: RwLock<Session>,
    turn: Arc<Mutex<()>>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            data: RwLock::new(session),
            turn: Arc::new(Mutex::new(())),
        }
    }

    fn is_busy(&self) -> bool {
        self.turn.try_lock().is_err()
    }
}

/// Held while a chat turn is in flight for a session
pub struct TurnGuard {
    session_id: SessionId,
    _guard: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Thread-safe in-memory conversation session store.
/// Sessions live in a DashMap; each one carries its own locks so
/// unrelated sessions never contend.
pub struct ConversationStore {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    policy: SessionPolicy,
    idle_timeout: chrono::Duration,
}

impl ConversationStore {
    pub fn new(policy: SessionPolicy) -> Self {
        info!(
            "Initializing conversation store: idle_timeout={:?}, max_history_turns={}",
            policy.idle_timeout, policy.max_history_turns
        );
        let idle_timeout =
            chrono::Duration::from_std(policy.idle_timeout).unwrap_or(chrono::Duration::MAX);
        Self {
            sessions: DashMap::new(),
            policy,
            idle_timeout,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Create a session under a freshly generated id
    pub fn create_session(&self, user_id: Option<String>) -> Session {
        loop {
            let session_id = uuid::Uuid::new_v4().to_string();
            match self.sessions.entry(session_id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    let session = Session::new(vacant.key().clone(), user_id, Utc::now());
                    vacant.insert(Arc::new(SessionSlot::new(session.clone())));
                    info!("Created session {}", session.session_id);
                    return session;
                }
            }
        }
    }

    /// Create a session under a caller-supplied id.
    /// A live session already holding the id is returned unchanged,
    /// an expired one is replaced unless a turn is still in flight on it.
    pub fn create_session_with_id(
        &self,
        session_id: &str,
        user_id: Option<String>,
    ) -> Result<Session, StoreError> {
        self.validate_session_id(session_id)?;

        let now = Utc::now();
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().data.read().clone();
                if !existing.is_expired_at(now, self.idle_timeout) {
                    debug!("Session {} already exists, reusing", session_id);
                    return Ok(existing);
                }
                if occupied.get().is_busy() {
                    debug!("Expired session {} still has a turn in flight", session_id);
                    return Err(StoreError::Busy(session_id.to_string()));
                }
                let session = Session::new(session_id.to_string(), user_id, now);
                occupied.insert(Arc::new(SessionSlot::new(session.clone())));
                info!("Replaced expired session {}", session_id);
                Ok(session)
            }
            Entry::Vacant(vacant) => {
                let session = Session::new(session_id.to_string(), user_id, now);
                vacant.insert(Arc::new(SessionSlot::new(session.clone())));
                info!("Created session {}", session_id);
                Ok(session)
            }
        }
    }

    /// Lookup by id. Expired sessions are reported as `NotFound` and lazily
    /// evicted.
    pub fn get_session(&self, session_id: &str) -> SessionLookup {
        match self.live_slot(session_id) {
            Ok(slot) => SessionLookup::Found(slot.data.read().clone()),
            Err(_) => SessionLookup::NotFound,
        }
    }

    /// Merge an update into an existing session. Never creates.
    pub fn update_session(
        &self,
        session_id: &str,
        update: ContextUpdate,
    ) -> Result<Session, StoreError> {
        self.with_live_session(session_id, |data, now| {
            data.apply(update, self.policy.max_history_turns, now);
            debug!(
                "Updated session {} (messages={}, lead_score={})",
                session_id, data.context.message_count, data.context.lead_score
            );
            data.clone()
        })
    }

    /// Flag the session as converted. The flag never reverts; the last
    /// lead id wins.
    pub fn mark_lead_created(&self, session_id: &str, lead_id: &str) -> Result<Session, StoreError> {
        self.with_live_session(session_id, |data, now| {
            if let Some(previous) = data.lead_id.as_deref().filter(|p| *p != lead_id) {
                debug!("Session {} lead id {} replaced by {}", session_id, previous, lead_id);
            }
            data.mark_lead_created(lead_id.to_string(), now);
            info!("Session {} marked lead created (lead_id={})", session_id, lead_id);
            data.clone()
        })
    }

    /// Wait for exclusive turn access to a live session.
    /// Returns None if the session is unknown or expired.
    pub async fn lock_turn(&self, session_id: &str) -> Option<TurnGuard> {
        let slot = self.live_slot(session_id).ok()?;
        let guard = slot.turn.clone().lock_owned().await;

        // Re-check after the wait: the slot may have expired or been replaced
        let still_current = self
            .sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
        if !still_current || slot.data.read().is_expired_at(Utc::now(), self.idle_timeout) {
            return None;
        }

        Some(TurnGuard {
            session_id: session_id.to_string(),
            _guard: guard,
        })
    }

    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Number of physically present sessions, expired ones included
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove expired sessions. Sessions with a turn in flight are skipped.
    /// Returns number of sessions removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let start_len = self.sessions.len();
        self.sessions.retain(|_, slot: &mut Arc<SessionSlot>| {
            slot.is_busy() || !slot.data.read().is_expired_at(now, self.idle_timeout)
        });
        let count = start_len.saturating_sub(self.sessions.len());

        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }

    /// Periodic background sweep
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let every = every.max(Duration::from_secs(1));
        info!("Session sweeper started (interval={:?})", every);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.cleanup_expired();
                debug!("Sweep done: removed={}, remaining={}", removed, self.len());
            }
        })
    }

    /// Full-scan statistics snapshot
    pub fn stats(&self) -> SessionStats {
        let now = Utc::now();
        let mut stats = SessionStats {
            total_sessions: self.sessions.len(),
            ..Default::default()
        };
        let mut score_sum: u64 = 0;

        for entry in self.sessions.iter() {
            let session = entry.value().data.read();
            if session.is_expired_at(now, self.idle_timeout) {
                continue;
            }

            stats.active_sessions += 1;
            stats.total_messages += session.context.message_count;
            score_sum += session.context.lead_score as u64;
            if session.lead_created {
                stats.leads_created += 1;
            }
            if let Some(industry) = &session.context.industry {
                *stats.by_industry.entry(industry.clone()).or_insert(0) += 1;
            }
        }

        if stats.active_sessions > 0 {
            stats.average_lead_score = score_sum as f64 / stats.active_sessions as f64;
        }

        stats
    }

    fn validate_session_id(&self, session_id: &str) -> Result<(), StoreError> {
        if session_id.trim().is_empty() {
            return Err(StoreError::InvalidSessionId("session id is empty".to_string()));
        }
        if session_id.chars().count() > self.policy.max_session_id_len {
            return Err(StoreError::InvalidSessionId(format!(
                "session id longer than {} characters",
                self.policy.max_session_id_len
            )));
        }
        Ok(())
    }

    /// Run `write` on a live session while its map entry is held, so the
    /// sweep cannot evict or replace the slot mid-write.
    fn with_live_session<T>(
        &self,
        session_id: &str,
        write: impl FnOnce(&mut Session, DateTime<Utc>) -> T,
    ) -> Result<T, StoreError> {
        let now = Utc::now();
        {
            let entry = self
                .sessions
                .get(session_id)
                .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
            // Lock order is map shard, then session data, same as the sweep
            let mut data = entry.value().data.write();
            if !data.is_expired_at(now, self.idle_timeout) {
                return Ok(write(&mut *data, now));
            }
        }

        // Expired: give lazy eviction its chance
        let _ = self.live_slot(session_id);
        Err(StoreError::NotFound(session_id.to_string()))
    }

    /// Slot of a non-expired session. Expired slots are evicted here
    /// unless a turn is in flight.
    fn live_slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, StoreError> {
        let slot = match self.sessions.get(session_id) {
            Some(entry) => entry.value().clone(),
            None => return Err(StoreError::NotFound(session_id.to_string())),
        };

        let now = Utc::now();
        if slot.data.read().is_expired_at(now, self.idle_timeout) {
            let removed = self.sessions.remove_if(session_id, |_, current| {
                Arc::ptr_eq(current, &slot) && !current.is_busy()
            });
            if removed.is_some() {
                debug!("Session {} expired, removed from store", session_id);
            }
            return Err(StoreError::NotFound(session_id.to_string()));
        }

        Ok(slot)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}
