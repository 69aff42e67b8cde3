//! Session storage contract between the middleware and its host.
//!
//! The middleware only needs a key/value store for per-session state plus,
//! for single-sign-out, the capability to destroy a session by the CAS
//! ticket it was established with. Both are traits so the backing store
//! (in-memory, Redis, database) is the host's choice; implementations own
//! their thread-safety.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// Authenticated CAS identity persisted in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct CasSession {
    pub user: String,
    pub ticket: String,
    pub extra_attributes: HashMap<String, Value>,
    pub proxy_ticket: Option<String>,
    pub client_ip: Option<String>,
}

/// Per-session state written by the middleware.
///
/// A populated `cas` field means the request is authenticated; `anonymous`
/// marks a gateway-mode pass-through with no authenticated user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    pub cas: Option<CasSession>,
    pub anonymous: bool,
}

impl SessionData {
    #[must_use]
    pub fn exists(&self) -> bool {
        self.cas.is_some() || self.anonymous
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Option<SessionData>;
    async fn store(&self, id: &str, data: SessionData);
    async fn clear(&self, id: &str);
}

/// Capability to destroy a session from a CAS single-sign-out notification.
#[async_trait]
pub trait SingleSignOut: Send + Sync {
    /// Returns true when a session keyed by `ticket` existed and was
    /// destroyed.
    async fn destroy_session_by_ticket(&self, ticket: &str) -> bool;
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionData>,
    by_ticket: HashMap<String, String>,
}

/// In-memory session store with a ticket index for single-sign-out,
/// suitable for a single-process deployment.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: RwLock<Inner>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Option<SessionData> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    async fn store(&self, id: &str, data: SessionData) {
        let mut inner = self.inner.write().await;
        if let Some(cas) = &data.cas {
            inner.by_ticket.insert(cas.ticket.clone(), id.to_string());
        }
        inner.sessions.insert(id.to_string(), data);
    }

    async fn clear(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(data) = inner.sessions.remove(id) {
            if let Some(cas) = data.cas {
                inner.by_ticket.remove(&cas.ticket);
            }
        }
    }
}

#[async_trait]
impl SingleSignOut for MemorySessionStore {
    async fn destroy_session_by_ticket(&self, ticket: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_ticket.remove(ticket) {
            Some(id) => inner.sessions.remove(&id).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated(user: &str, ticket: &str) -> SessionData {
        SessionData {
            cas: Some(CasSession {
                user: user.to_string(),
                ticket: ticket.to_string(),
                extra_attributes: HashMap::new(),
                proxy_ticket: None,
                client_ip: Some("10.0.0.1".to_string()),
            }),
            anonymous: false,
        }
    }

    #[tokio::test]
    async fn test_store_load_clear() {
        let store = MemorySessionStore::new();
        store.store("sid-1", authenticated("alice", "ST-1")).await;

        let loaded = store.load("sid-1").await.unwrap();
        assert_eq!(loaded.cas.as_ref().unwrap().user, "alice");
        assert!(loaded.exists());

        store.clear("sid-1").await;
        assert!(store.load("sid-1").await.is_none());
    }

    #[tokio::test]
    async fn test_destroy_session_by_ticket() {
        let store = MemorySessionStore::new();
        store.store("sid-1", authenticated("alice", "ST-1")).await;

        assert!(store.destroy_session_by_ticket("ST-1").await);
        assert!(store.load("sid-1").await.is_none());
        assert!(!store.destroy_session_by_ticket("ST-1").await);
    }

    #[tokio::test]
    async fn test_anonymous_session_exists() {
        let data = SessionData {
            cas: None,
            anonymous: true,
        };
        assert!(data.exists());
        assert!(!SessionData::default().exists());
    }
}
