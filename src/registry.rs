// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Global session registry.

use crate::{
    error::SessionError,
    session::{Session, SessionStyle},
};

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, Weak},
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::registry";

/// Global session registry.
///
/// Holds weak handles only: sessions are owned by their control connections
/// and unregister themselves by id when they close. The registry enforces the
/// global uniqueness of session ids and destination hashes.
pub struct SessionRegistry {
    /// Registry state.
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Sessions by id.
    by_id: HashMap<String, Weak<Session>>,

    /// Destination hash to session id.
    by_dest: HashMap<String, String>,

    /// Most recently registered session of each datagram/raw style, used by
    /// legacy V1/V2 send commands that omit a session id.
    recent_by_style: HashMap<SessionStyle, String>,
}

impl RegistryInner {
    /// Drop all state referring to `id`.
    fn purge(&mut self, id: &str) {
        self.by_id.remove(id);
        self.by_dest.retain(|_, dest_id| dest_id != id);
        self.recent_by_style.retain(|_, recent_id| recent_id != id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create new, empty [`SessionRegistry`].
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a session.
    ///
    /// Fails with [`SessionError::DuplicateId`] if the id is taken and with
    /// [`SessionError::DuplicateDest`] if the destination already backs a
    /// live session. Also records the session as the most recent of its style
    /// for the datagram/raw styles.
    pub fn register(&self, session: &Arc<Session>) -> Result<(), SessionError> {
        let mut inner = self.inner.write().expect("lock poisoned");

        let stale = match inner.by_id.get(session.id()) {
            Some(existing) => {
                if existing.upgrade().is_some() {
                    return Err(SessionError::DuplicateId);
                }

                true
            }
            None => false,
        };

        if stale {
            // stale weak handle of a session that never unregistered
            let id = session.id().to_string();
            inner.purge(&id);
        }

        if let Some(hash) = session.dest_key() {
            if let Some(existing_id) = inner.by_dest.get(&hash).cloned() {
                let live = inner
                    .by_id
                    .get(&existing_id)
                    .map_or(false, |existing| existing.upgrade().is_some());

                if live {
                    return Err(SessionError::DuplicateDest);
                }

                inner.purge(&existing_id);
            }

            inner.by_dest.insert(hash, session.id().to_string());
        }

        inner.by_id.insert(session.id().to_string(), Arc::downgrade(session));

        if matches!(
            session.style(),
            SessionStyle::Datagram
                | SessionStyle::Datagram2
                | SessionStyle::Datagram3
                | SessionStyle::Raw
        ) {
            inner.recent_by_style.insert(session.style(), session.id().to_string());
        }

        tracing::debug!(
            target: LOG_TARGET,
            id = %session.id(),
            style = ?session.style(),
            "session registered",
        );

        Ok(())
    }

    /// Unregister a session by id.
    ///
    /// Clears the most-recent-by-style slot only when it points at `id`.
    pub fn unregister(&self, id: &str) {
        self.inner.write().expect("lock poisoned").purge(id);

        tracing::debug!(
            target: LOG_TARGET,
            %id,
            "session unregistered",
        );
    }

    /// Get a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .read()
            .expect("lock poisoned")
            .by_id
            .get(id)
            .and_then(|session| session.upgrade())
    }

    /// Get a session by destination hash.
    pub fn get_by_destination(&self, hash: &str) -> Option<Arc<Session>> {
        let inner = self.inner.read().expect("lock poisoned");

        inner
            .by_dest
            .get(hash)
            .and_then(|id| inner.by_id.get(id))
            .and_then(|session| session.upgrade())
    }

    /// Most recently registered live session of `style`.
    pub fn most_recent_by_style(&self, style: SessionStyle) -> Option<Arc<Session>> {
        let inner = self.inner.read().expect("lock poisoned");

        inner
            .recent_by_style
            .get(&style)
            .and_then(|id| inner.by_id.get(id))
            .and_then(|session| session.upgrade())
    }

    /// All live sessions.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .expect("lock poisoned")
            .by_id
            .values()
            .filter_map(|session| session.upgrade())
            .collect()
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.inner
            .read()
            .expect("lock poisoned")
            .by_id
            .values()
            .filter(|session| session.upgrade().is_some())
            .count()
    }

    /// Close all sessions.
    ///
    /// Snapshots the session list and releases the registry lock before
    /// closing anything: session close callbacks legitimately reenter
    /// [`SessionRegistry::unregister()`], which would deadlock under a held
    /// write lock.
    pub async fn close(&self) {
        let sessions = self.all();

        tracing::info!(
            target: LOG_TARGET,
            count = sessions.len(),
            "closing all sessions",
        );

        for session in sessions {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SessionConfig, destination::Destination};

    fn make_session(
        registry: &Arc<SessionRegistry>,
        id: &str,
        style: SessionStyle,
    ) -> Arc<Session> {
        Arc::new(Session::new(
            id.to_string(),
            style,
            SessionConfig::default(),
            Destination::generate(7),
            Arc::clone(registry),
            false,
        ))
    }

    #[test]
    fn duplicate_id_rejected() {
        let registry = Arc::new(SessionRegistry::new());

        let first = make_session(&registry, "dup", SessionStyle::Stream);
        let second = make_session(&registry, "dup", SessionStyle::Stream);

        assert!(registry.register(&first).is_ok());
        assert_eq!(registry.register(&second), Err(SessionError::DuplicateId));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn duplicate_destination_rejected() {
        let registry = Arc::new(SessionRegistry::new());

        let first = make_session(&registry, "first", SessionStyle::Stream);
        let second = Arc::new(Session::new(
            "second".to_string(),
            SessionStyle::Stream,
            SessionConfig::default(),
            first.destination().clone(),
            Arc::clone(&registry),
            false,
        ));

        assert!(registry.register(&first).is_ok());
        assert_eq!(registry.register(&second), Err(SessionError::DuplicateDest));

        let hash = first.destination().hash_b64();
        assert_eq!(registry.get_by_destination(&hash).unwrap().id(), "first");
        assert!(registry.get_by_destination("bogus").is_none());
    }

    #[test]
    fn subsessions_share_destination() {
        let registry = Arc::new(SessionRegistry::new());

        let primary = make_session(&registry, "primary", SessionStyle::Primary);
        let child = Arc::new(Session::new(
            "child".to_string(),
            SessionStyle::Stream,
            SessionConfig::default(),
            primary.destination().clone(),
            Arc::clone(&registry),
            true,
        ));

        assert!(registry.register(&primary).is_ok());
        assert!(registry.register(&child).is_ok());
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn weak_handles_do_not_extend_lifetime() {
        let registry = Arc::new(SessionRegistry::new());

        let session = make_session(&registry, "short-lived", SessionStyle::Stream);
        registry.register(&session).unwrap();

        assert!(registry.get("short-lived").is_some());
        drop(session);
        assert!(registry.get("short-lived").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn most_recent_by_style_tracking() {
        let registry = Arc::new(SessionRegistry::new());

        let first = make_session(&registry, "first", SessionStyle::Datagram);
        let second = make_session(&registry, "second", SessionStyle::Datagram);
        let raw = make_session(&registry, "raw", SessionStyle::Raw);

        registry.register(&first).unwrap();
        registry.register(&second).unwrap();
        registry.register(&raw).unwrap();

        assert_eq!(
            registry.most_recent_by_style(SessionStyle::Datagram).unwrap().id(),
            "second",
        );
        assert_eq!(registry.most_recent_by_style(SessionStyle::Raw).unwrap().id(), "raw");
        assert!(registry.most_recent_by_style(SessionStyle::Datagram2).is_none());

        // unregistering a non-tracked id leaves the slot alone
        registry.unregister("first");
        assert_eq!(
            registry.most_recent_by_style(SessionStyle::Datagram).unwrap().id(),
            "second",
        );

        // unregistering the tracked id clears the slot
        registry.unregister("second");
        assert!(registry.most_recent_by_style(SessionStyle::Datagram).is_none());
    }

    #[test]
    fn stream_sessions_not_recent_tracked() {
        let registry = Arc::new(SessionRegistry::new());

        let session = make_session(&registry, "stream", SessionStyle::Stream);
        registry.register(&session).unwrap();

        assert!(registry.most_recent_by_style(SessionStyle::Stream).is_none());
    }

    #[tokio::test]
    async fn close_reenters_unregister_without_deadlock() {
        let registry = Arc::new(SessionRegistry::new());

        let first = make_session(&registry, "first", SessionStyle::Stream);
        let second = make_session(&registry, "second", SessionStyle::Datagram);

        registry.register(&first).unwrap();
        registry.register(&second).unwrap();

        // session close calls `unregister`; `close` must have released the lock
        registry.close().await;

        assert_eq!(registry.count(), 0);
        assert!(registry.most_recent_by_style(SessionStyle::Datagram).is_none());
    }
}
