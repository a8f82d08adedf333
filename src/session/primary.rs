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

//! Primary session state: subsession table and incoming-traffic routing.

use crate::{
    config::{SessionConfig, PROTOCOL_STREAMING},
    error::SessionError,
    session::{Session, SessionKind, SessionStyle},
};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::session::primary";

/// Primary session state.
///
/// Subsessions share the primary's destination and tunnel pool; incoming
/// traffic is routed to them by `(port, protocol)`.
pub struct PrimaryState {
    /// Subsession table and routing keys.
    inner: Mutex<PrimaryInner>,
}

#[derive(Default)]
struct PrimaryInner {
    /// Subsessions by id.
    children: HashMap<String, Arc<Session>>,

    /// `(ListenPort, ListenProtocol)` to subsession id. `(0, 0)` is the
    /// default subsession.
    routes: HashMap<(u16, u8), String>,
}

impl Default for PrimaryState {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimaryState {
    /// Create new, empty [`PrimaryState`].
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PrimaryInner::default()),
        }
    }

    /// Number of subsessions.
    pub fn subsession_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").children.len()
    }

    /// Get a subsession by id.
    pub fn subsession(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().expect("lock poisoned").children.get(id).cloned()
    }

    /// Route incoming traffic with the given `(port, protocol)`:
    ///
    /// 1. exact `(port, protocol)` match,
    /// 2. `(port, 0)`, except streaming traffic never goes to a RAW subsession,
    /// 3. `(0, protocol)`,
    /// 4. the default subsession, with the same streaming/RAW exclusion,
    /// 5. no match, traffic is dropped by the caller.
    pub(crate) fn route(&self, port: u16, protocol: u8) -> Option<Arc<Session>> {
        let inner = self.inner.lock().expect("lock poisoned");

        let child_for = |key: (u16, u8)| -> Option<Arc<Session>> {
            inner.routes.get(&key).and_then(|id| inner.children.get(id)).cloned()
        };
        let streaming_to_raw = |child: &Arc<Session>| {
            protocol == PROTOCOL_STREAMING && child.style() == SessionStyle::Raw
        };

        if let Some(child) = child_for((port, protocol)) {
            return Some(child);
        }

        if let Some(child) = child_for((port, 0)) {
            if !streaming_to_raw(&child) {
                return Some(child);
            }
        }

        if let Some(child) = child_for((0, protocol)) {
            return Some(child);
        }

        if let Some(child) = child_for((0, 0)) {
            if !streaming_to_raw(&child) {
                return Some(child);
            }
        }

        None
    }

    /// Take all subsessions, clearing the table.
    pub(crate) fn take_children(&self) -> Vec<Arc<Session>> {
        let mut inner = self.inner.lock().expect("lock poisoned");

        inner.routes.clear();
        inner.children.drain().map(|(_, child)| child).collect()
    }
}

impl Session {
    fn primary_state(&self) -> Result<&PrimaryState, SessionError> {
        match self.kind() {
            SessionKind::Primary(state) => Ok(state),
            _ => Err(SessionError::InvalidSubsessionStyle),
        }
    }

    /// Add a subsession to a primary session.
    ///
    /// The subsession shares the primary's destination and tunnels and is
    /// active immediately. Its id must be unique both globally and among
    /// siblings, and its `(ListenPort, ListenProtocol)` pair must not collide
    /// with a sibling; `(0, 0)` makes it the default subsession.
    pub async fn add_subsession(
        self: &Arc<Self>,
        id: &str,
        style: SessionStyle,
        mut config: SessionConfig,
        port_aware: bool,
    ) -> crate::Result<Arc<Session>> {
        let state = self.primary_state()?;

        if !self.is_active() {
            return Err(SessionError::NotActive.into());
        }

        if style == SessionStyle::Primary {
            return Err(SessionError::InvalidSubsessionStyle.into());
        }

        if config.listen_port == 0 && config.from_port != 0 {
            config.listen_port = config.from_port;
        }

        if style == SessionStyle::Raw && config.listen_protocol == 0 && config.protocol != 0 {
            config.listen_protocol = config.protocol;
        }

        if style == SessionStyle::Raw && config.listen_protocol == PROTOCOL_STREAMING {
            return Err(SessionError::Protocol6Disallowed.into());
        }

        let routing_key = (config.listen_port, config.listen_protocol);

        {
            let inner = state.inner.lock().expect("lock poisoned");

            if inner.children.contains_key(id) {
                return Err(SessionError::DuplicateSubsessionId.into());
            }

            if inner.routes.contains_key(&routing_key) {
                return Err(SessionError::RoutingConflict.into());
            }
        }

        let child = Arc::new(Session::new(
            id.to_string(),
            style,
            config.clone(),
            self.destination.clone(),
            Arc::clone(&self.registry),
            true,
        ));

        self.registry.register(&child)?;
        child.activate(self.tunnel()?);

        if (style.is_datagram_family() || style == SessionStyle::Raw) && config.udp_port != 0 {
            if let Err(error) =
                child.set_forwarding(&config.udp_host, config.udp_port, port_aware).await
            {
                child.close().await;
                return Err(error);
            }
        }

        {
            let mut inner = state.inner.lock().expect("lock poisoned");

            inner.children.insert(id.to_string(), Arc::clone(&child));
            inner.routes.insert(routing_key, id.to_string());
        }

        tracing::info!(
            target: LOG_TARGET,
            primary = %self.id,
            subsession = %id,
            ?style,
            listen_port = routing_key.0,
            listen_protocol = routing_key.1,
            "subsession added",
        );

        Ok(child)
    }

    /// Remove and close a subsession.
    pub async fn remove_subsession(self: &Arc<Self>, id: &str) -> crate::Result<()> {
        let state = self.primary_state()?;

        let child = {
            let mut inner = state.inner.lock().expect("lock poisoned");

            let child = inner.children.remove(id).ok_or(SessionError::NotFound)?;
            inner.routes.retain(|_, child_id| child_id != id);
            child
        };

        child.close().await;

        tracing::info!(
            target: LOG_TARGET,
            primary = %self.id,
            subsession = %id,
            "subsession removed",
        );

        Ok(())
    }

    /// Get a subsession of a primary session.
    pub fn subsession(&self, id: &str) -> Option<Arc<Session>> {
        self.primary_state().ok().and_then(|state| state.subsession(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{destination::Destination, registry::SessionRegistry};

    fn child(id: &str, style: SessionStyle) -> Arc<Session> {
        Arc::new(Session::new(
            id.to_string(),
            style,
            SessionConfig::default(),
            Destination::generate(7),
            Arc::new(SessionRegistry::new()),
            true,
        ))
    }

    fn primary_with(children: Vec<(Arc<Session>, (u16, u8))>) -> PrimaryState {
        let state = PrimaryState::new();

        {
            let mut inner = state.inner.lock().unwrap();

            for (child, key) in children {
                inner.routes.insert(key, child.id().to_string());
                inner.children.insert(child.id().to_string(), child);
            }
        }

        state
    }

    #[test]
    fn routing_order() {
        let state = primary_with(vec![
            (child("a", SessionStyle::Stream), (1234, 0)),
            (child("b", SessionStyle::Raw), (0, 18)),
            (child("d", SessionStyle::Stream), (0, 0)),
        ]);

        // exact port match
        assert_eq!(state.route(1234, 0).unwrap().id(), "a");

        // exact protocol match
        assert_eq!(state.route(0, 18).unwrap().id(), "b");

        // unknown pair goes to the default subsession
        assert_eq!(state.route(9999, 99).unwrap().id(), "d");

        // port match is preferred over protocol match
        assert_eq!(state.route(1234, 18).unwrap().id(), "a");
    }

    #[test]
    fn streaming_never_routes_to_raw() {
        // streaming traffic with only a RAW default available is dropped
        let state = primary_with(vec![(child("raw", SessionStyle::Raw), (0, 0))]);

        assert!(state.route(0, PROTOCOL_STREAMING).is_none());
        assert!(state.route(0, 99).is_some());

        // a RAW subsession on `(port, 0)` is skipped for streaming traffic
        let state = primary_with(vec![
            (child("raw", SessionStyle::Raw), (7777, 0)),
            (child("stream", SessionStyle::Stream), (0, PROTOCOL_STREAMING)),
        ]);

        assert_eq!(state.route(7777, PROTOCOL_STREAMING).unwrap().id(), "stream");
    }

    #[test]
    fn take_children_clears_table() {
        let state = primary_with(vec![
            (child("a", SessionStyle::Stream), (0, 0)),
            (child("b", SessionStyle::Raw), (0, 18)),
        ]);

        assert_eq!(state.take_children().len(), 2);
        assert_eq!(state.subsession_count(), 0);
        assert!(state.route(0, 18).is_none());
    }
}
