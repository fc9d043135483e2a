//! Caller sessions and their propagation across task hops.
//!
//! A session is the logical caller identity: an id plus a string property
//! bag, shared by reference between a parent task and everything it forks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct SessionInner {
    id: SessionId,
    guest: bool,
    properties: Mutex<HashMap<String, String>>,
}

/// Cheaply clonable session handle. Clones share the same property bag;
/// equality is identity, not bag contents.
///
/// The bag lock keeps individual operations atomic. Concurrent writers are
/// expected to serialize through their task boundaries.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::build(false)
    }

    fn build(guest: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId(Uuid::new_v4()),
                guest,
                properties: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide session substituted when no caller session exists.
    pub fn guest() -> Self {
        static GUEST: OnceLock<SessionContext> = OnceLock::new();
        GUEST.get_or_init(|| Self::build(true)).clone()
    }

    /// The session bound to the executing worker thread, or the guest
    /// session when the current thread is not a worker.
    pub fn current() -> Self {
        crate::runtime::WorkerThread::session().unwrap_or_else(Self::guest)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn is_guest(&self) -> bool {
        self.inner.guest
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .properties
            .lock()
            .expect("session property lock")
            .get(key)
            .cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .properties
            .lock()
            .expect("session property lock")
            .insert(key.into(), value.into());
    }

    /// Merge `props` into the bag, overwriting existing keys.
    pub fn put_all(&self, props: &HashMap<String, String>) {
        let mut bag = self
            .inner
            .properties
            .lock()
            .expect("session property lock");
        for (key, value) in props {
            bag.insert(key.clone(), value.clone());
        }
    }

    /// Snapshot of the bag at this instant.
    pub fn properties(&self) -> HashMap<String, String> {
        self.inner
            .properties
            .lock()
            .expect("session property lock")
            .clone()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SessionContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SessionContext {}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.inner.id)
            .field("guest", &self.inner.guest)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_is_a_single_shared_instance() {
        assert_eq!(SessionContext::guest(), SessionContext::guest());
        assert!(SessionContext::guest().is_guest());
        assert!(!SessionContext::new().is_guest());
    }

    #[test]
    fn clones_share_the_property_bag() {
        let session = SessionContext::new();
        let alias = session.clone();
        alias.put("u", "alice");
        assert_eq!(session.get("u").as_deref(), Some("alice"));
        assert_eq!(session, alias);
    }

    #[test]
    fn put_all_overwrites_existing_keys() {
        let session = SessionContext::new();
        session.put("a", "1");
        let mut incoming = HashMap::new();
        incoming.insert("a".to_string(), "2".to_string());
        incoming.insert("b".to_string(), "3".to_string());
        session.put_all(&incoming);
        assert_eq!(session.get("a").as_deref(), Some("2"));
        assert_eq!(session.get("b").as_deref(), Some("3"));
    }

    #[test]
    fn distinct_sessions_are_not_equal() {
        assert_ne!(SessionContext::new(), SessionContext::new());
    }

    #[test]
    fn current_off_worker_is_guest() {
        assert!(SessionContext::current().is_guest());
    }
}
