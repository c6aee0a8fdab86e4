//! Per-caller sessions with a fixed time-to-live.
//!
//! The registry maps a caller (the SHA-256 of their bearer token) to a
//! [`Session`] holding the caller's identity and a retrieval chain bound to
//! their tenant. Building a chain is expensive, so it happens once per
//! session. Expiry is checked lazily on access against an injected
//! [`Clock`].
//!
//! Each caller has its own async slot lock, so two concurrent first requests
//! from the same caller build exactly one chain, while different callers
//! never wait on each other.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::SessionError;
use crate::models::Identity;
use crate::services::chain::{ChainFactory, RetrievalChain};
use crate::services::identity::IdentityResolver;
use crate::utils::calculate_checksum;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A caller's authenticated binding to their tenant's retrieval chain.
pub struct Session {
    pub session_id: String,
    pub identity: Identity,
    pub chain: Arc<RetrievalChain>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn tenant_id(&self) -> &str {
        &self.identity.tenant_id
    }

    pub fn is_admin(&self) -> bool {
        self.identity.is_admin
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.created_at >= ttl
    }

    pub fn require_admin(&self) -> Result<(), SessionError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(SessionError::Unauthorized)
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<Session>>>>;
type SlotGuard = tokio::sync::OwnedMutexGuard<Option<Arc<Session>>>;

/// Sessions by caller key.
///
/// A slot only leaves the map while its lock is held, and whoever locks a
/// slot checks it is still mapped before writing a session into it.
pub struct SessionRegistry {
    resolver: Arc<dyn IdentityResolver>,
    factory: Arc<dyn ChainFactory>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        factory: Arc<dyn ChainFactory>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            factory,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registry key for a bearer token; raw tokens are never stored.
    pub fn caller_key(bearer_token: &str) -> String {
        calculate_checksum(bearer_token.as_bytes())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The caller's slot, created if missing. Creating one first drops idle
    /// slots whose session is gone or expired.
    fn slot_or_insert(&self, key: &str) -> Slot {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }

        let now = self.clock.now();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|session| !session.is_expired(now, self.ttl)),
            Err(_) => true,
        });
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn existing_slot(&self, key: &str) -> Option<Slot> {
        self.slots().get(key).cloned()
    }

    fn is_mapped(&self, key: &str, slot: &Slot) -> bool {
        self.slots().get(key).is_some_and(|s| Arc::ptr_eq(s, slot))
    }

    /// Remove `slot` if it is still the caller's. The slot's lock must be held.
    fn unmap(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(key);
        }
    }

    /// Lock the caller's slot, starting over if it was unmapped while we
    /// waited for it.
    async fn lock_slot(&self, key: &str) -> (Slot, SlotGuard) {
        loop {
            let slot = self.slot_or_insert(key);
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.is_mapped(key, &slot) {
                return (slot, guard);
            }
        }
    }

    /// Return the caller's live session, resolving identity and building a
    /// chain if there is none or it has expired.
    pub async fn resolve(&self, bearer_token: &str) -> Result<Arc<Session>, SessionError> {
        if bearer_token.trim().is_empty() {
            return Err(SessionError::MissingCredentials);
        }

        let key = Self::caller_key(bearer_token);
        let (slot, mut guard) = self.lock_slot(&key).await;

        let now = self.clock.now();
        if let Some(session) = guard.as_ref() {
            if !session.is_expired(now, self.ttl) {
                return Ok(Arc::clone(session));
            }
            tracing::info!(session_id = %session.session_id, tenant = %session.tenant_id(), "session expired, resolving again");
            *guard = None;
        }

        match self.open_session(bearer_token, now).await {
            Ok(session) => {
                tracing::info!(
                    session_id = %session.session_id,
                    tenant = %session.tenant_id(),
                    admin = session.is_admin(),
                    "session created"
                );
                *guard = Some(Arc::clone(&session));
                Ok(session)
            }
            Err(err) => {
                self.unmap(&key, &slot);
                Err(err)
            }
        }
    }

    async fn open_session(
        &self,
        bearer_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<Session>, SessionError> {
        let identity = self.resolver.resolve(bearer_token).await?;
        if identity.tenant_id.trim().is_empty() {
            return Err(SessionError::IdentityResolution(
                "identity has no tenant".to_string(),
            ));
        }

        let chain = self.factory.build(&identity.tenant_id).await?;
        Ok(Arc::new(Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            identity,
            chain,
            created_at: now,
        }))
    }

    /// The caller's live session without resolving. Absent or expired
    /// sessions are [`SessionError::Expired`].
    pub async fn current(&self, bearer_token: &str) -> Result<Arc<Session>, SessionError> {
        if bearer_token.trim().is_empty() {
            return Err(SessionError::MissingCredentials);
        }

        let key = Self::caller_key(bearer_token);
        let Some(slot) = self.existing_slot(&key) else {
            return Err(SessionError::Expired);
        };

        let mut guard = slot.lock().await;
        match guard.as_ref() {
            Some(session) if !session.is_expired(self.clock.now(), self.ttl) => {
                Ok(Arc::clone(session))
            }
            Some(session) => {
                tracing::info!(session_id = %session.session_id, "session expired");
                *guard = None;
                self.unmap(&key, &slot);
                Err(SessionError::Expired)
            }
            None => Err(SessionError::Expired),
        }
    }

    /// Drop the caller's session. Returns false if there was none.
    pub async fn logout(&self, bearer_token: &str) -> bool {
        let key = Self::caller_key(bearer_token);
        let Some(slot) = self.existing_slot(&key) else {
            return false;
        };

        let mut guard = slot.lock().await;
        let removed = guard.take();
        self.unmap(&key, &slot);

        match removed {
            Some(session) => {
                tracing::info!(session_id = %session.session_id, "logged out");
                true
            }
            None => false,
        }
    }

    /// Rebuild the chain of every live session on `tenant_id`; returns how
    /// many were rebuilt.
    ///
    /// Called after the tenant's index changes. Session ids and creation
    /// times are kept; conversation memory starts fresh. A session whose
    /// chain cannot be rebuilt is dropped, so its caller has to log in again.
    pub async fn refresh_tenant(&self, tenant_id: &str) -> usize {
        let slots: Vec<(String, Slot)> = self
            .slots()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let now = self.clock.now();
        let mut refreshed = 0;
        let mut dropped = 0;
        for (key, slot) in slots {
            let mut guard = slot.lock().await;
            let Some(session) = guard.as_ref() else {
                continue;
            };
            if session.tenant_id() != tenant_id || session.is_expired(now, self.ttl) {
                continue;
            }

            match self.factory.build(tenant_id).await {
                Ok(chain) => {
                    let replacement = Arc::new(Session {
                        session_id: session.session_id.clone(),
                        identity: session.identity.clone(),
                        chain,
                        created_at: session.created_at,
                    });
                    *guard = Some(replacement);
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        tenant = tenant_id,
                        error = %e,
                        "failed to rebuild chain, dropping session"
                    );
                    *guard = None;
                    self.unmap(&key, &slot);
                    dropped += 1;
                }
            }
        }

        if refreshed > 0 || dropped > 0 {
            tracing::info!(tenant = tenant_id, refreshed, dropped, "refreshed sessions");
        }
        refreshed
    }

    /// Live sessions. Slots busy resolving count as live.
    pub fn active_sessions(&self) -> usize {
        let now = self.clock.now();
        self.slots()
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(guard) => guard
                    .as_ref()
                    .is_some_and(|s| !s.is_expired(now, self.ttl)),
                Err(_) => true,
            })
            .count()
    }

    /// Callers with an entry in the registry, live or not.
    pub fn tracked_callers(&self) -> usize {
        self.slots().len()
    }
}
