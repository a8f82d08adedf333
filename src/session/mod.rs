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

//! Session variants and their shared lifecycle.

use crate::{
    config::{validate_raw_protocol, SessionConfig, MAX_DATAGRAM_SIZE, MAX_RAW_SIZE},
    destination::Destination,
    error::{ConfigError, SessionError},
    i2cp::{RouterEvent, TunnelHandle},
    registry::SessionRegistry,
};

use tokio::{sync::mpsc, task::JoinHandle};

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, OnceLock, RwLock,
    },
    time::{Duration, Instant},
};

pub mod datagram;
pub mod primary;
pub mod raw;
pub mod stream;

pub use datagram::{Datagram2State, DatagramState};
pub use primary::PrimaryState;
pub use raw::RawState;
pub use stream::{InboundStream, StreamState};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::session";

/// Capacity of the per-session router event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of datagram receive queues. New arrivals are dropped when full.
pub(crate) const RECEIVE_QUEUE_CAPACITY: usize = 100;

/// Style of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStyle {
    /// Virtual streams.
    Stream,

    /// Repliable authenticated datagrams.
    Datagram,

    /// Repliable authenticated datagrams with replay protection.
    Datagram2,

    /// Repliable unauthenticated datagrams, sourced by hash.
    Datagram3,

    /// Anonymous datagrams.
    Raw,

    /// Subsession container.
    Primary,
}

impl SessionStyle {
    /// Parse a `STYLE=` value. `MASTER` is an alias for `PRIMARY`.
    pub fn from_str(style: &str) -> Option<Self> {
        match style.to_uppercase().as_str() {
            "STREAM" => Some(Self::Stream),
            "DATAGRAM" => Some(Self::Datagram),
            "DATAGRAM2" => Some(Self::Datagram2),
            "DATAGRAM3" => Some(Self::Datagram3),
            "RAW" => Some(Self::Raw),
            "PRIMARY" | "MASTER" => Some(Self::Primary),
            _ => None,
        }
    }

    /// Wire form of the style.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "STREAM",
            Self::Datagram => "DATAGRAM",
            Self::Datagram2 => "DATAGRAM2",
            Self::Datagram3 => "DATAGRAM3",
            Self::Raw => "RAW",
            Self::Primary => "PRIMARY",
        }
    }

    /// Whether the style is one of the repliable datagram styles.
    pub fn is_datagram_family(&self) -> bool {
        matches!(self, Self::Datagram | Self::Datagram2 | Self::Datagram3)
    }

    /// I2CP protocol of the repliable datagram style.
    pub fn datagram_protocol(&self) -> Option<u8> {
        match self {
            Self::Datagram => Some(crate::config::PROTOCOL_DATAGRAM),
            Self::Datagram2 => Some(crate::config::PROTOCOL_DATAGRAM2),
            Self::Datagram3 => Some(crate::config::PROTOCOL_DATAGRAM3),
            _ => None,
        }
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session is registered but its tunnels are still being built.
    Creating,

    /// Tunnels are built and traffic flows.
    Active,

    /// Session teardown has begun.
    Closing,

    /// Session is gone.
    Closed,
}

/// Repliable datagram delivered to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedDatagram {
    /// Sender: a base64 destination, or for DATAGRAM3 the base64 of the
    /// sender's 32-byte hash.
    pub source: String,

    /// Source port.
    pub from_port: u16,

    /// Destination port.
    pub to_port: u16,

    /// Payload.
    pub data: Vec<u8>,
}

/// Anonymous datagram delivered to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRawDatagram {
    /// Source port.
    pub from_port: u16,

    /// Destination port.
    pub to_port: u16,

    /// I2CP protocol the datagram arrived on.
    pub protocol: u8,

    /// Payload.
    pub data: Vec<u8>,
}

/// Style-specific session state.
pub enum SessionKind {
    /// Virtual stream state.
    Stream(StreamState),

    /// Repliable datagram state.
    Datagram(DatagramState),

    /// Replay-protected repliable datagram state.
    Datagram2(Datagram2State),

    /// Hash-sourced repliable datagram state.
    Datagram3(DatagramState),

    /// Anonymous datagram state.
    Raw(RawState),

    /// Subsession container state.
    Primary(PrimaryState),
}

/// A long-lived session owned by its control connection.
///
/// The global registry observes the session through a weak handle; the
/// session unregisters itself by id when it closes.
pub struct Session {
    /// Globally unique session id (nickname).
    id: String,

    /// Session style.
    style: SessionStyle,

    /// Session configuration.
    config: SessionConfig,

    /// Destination backing the session.
    destination: Destination,

    /// Whether the session is a child of a primary session.
    subsession: bool,

    /// Registry the session unregisters from on close.
    registry: Arc<SessionRegistry>,

    /// Tunnel handle, set once the router reports the tunnels built.
    tunnel: OnceLock<Arc<dyn TunnelHandle>>,

    /// Lifecycle status.
    status: RwLock<SessionStatus>,

    /// Sender half of the router event channel.
    events_tx: mpsc::Sender<RouterEvent>,

    /// Receiver half, consumed by the event pump on activation.
    events_rx: Mutex<Option<mpsc::Receiver<RouterEvent>>>,

    /// Event pump task.
    pump: Mutex<Option<JoinHandle<()>>>,

    /// Idle timer task, when `close_idle` is configured.
    idle_timer: Mutex<Option<JoinHandle<()>>>,

    /// When the session was created.
    created_at: Instant,

    /// Milliseconds between `created_at` and the last send or delivery.
    last_activity: AtomicU64,

    /// Close-once flag.
    closed: AtomicBool,

    /// Style-specific state.
    kind: SessionKind,
}

impl Session {
    /// Create new [`Session`] in `Creating` status.
    pub fn new(
        id: String,
        style: SessionStyle,
        config: SessionConfig,
        destination: Destination,
        registry: Arc<SessionRegistry>,
        subsession: bool,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let kind = match style {
            SessionStyle::Stream => SessionKind::Stream(StreamState::new()),
            SessionStyle::Datagram => SessionKind::Datagram(DatagramState::new()),
            SessionStyle::Datagram2 => SessionKind::Datagram2(Datagram2State::new()),
            SessionStyle::Datagram3 => SessionKind::Datagram3(DatagramState::new()),
            SessionStyle::Raw => SessionKind::Raw(RawState::new(&config)),
            SessionStyle::Primary => SessionKind::Primary(PrimaryState::new()),
        };

        Self {
            id,
            style,
            config,
            destination,
            subsession,
            registry,
            tunnel: OnceLock::new(),
            status: RwLock::new(SessionStatus::Creating),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            pump: Mutex::new(None),
            idle_timer: Mutex::new(None),
            created_at: Instant::now(),
            last_activity: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            kind,
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session style.
    pub fn style(&self) -> SessionStyle {
        self.style
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Destination backing the session.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Whether the session is a child of a primary session.
    pub fn is_subsession(&self) -> bool {
        self.subsession
    }

    /// Registry key for destination uniqueness.
    ///
    /// Subsessions share the primary's destination and register without one.
    pub fn dest_key(&self) -> Option<String> {
        (!self.subsession).then(|| self.destination.hash_b64())
    }

    /// Lifecycle status.
    pub fn status(&self) -> SessionStatus {
        *self.status.read().expect("lock poisoned")
    }

    /// Whether the session is active.
    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    /// Sender half of the router event channel, handed to the backend.
    pub fn event_sender(&self) -> mpsc::Sender<RouterEvent> {
        self.events_tx.clone()
    }

    /// Style-specific state.
    pub(crate) fn kind(&self) -> &SessionKind {
        &self.kind
    }

    /// Record send or delivery activity.
    pub(crate) fn touch(&self) {
        self.last_activity
            .store(self.created_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last send or delivery.
    pub fn idle_time(&self) -> Duration {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        Duration::from_millis(elapsed.saturating_sub(self.last_activity.load(Ordering::Relaxed)))
    }

    /// Activate the session: attach the tunnel handle, start the event pump
    /// and the idle timer, and mark the session active.
    pub fn activate(self: &Arc<Self>, tunnel: Arc<dyn TunnelHandle>) {
        let _ = self.tunnel.set(tunnel);
        *self.status.write().expect("lock poisoned") = SessionStatus::Active;

        if let SessionKind::Datagram2(state) = &self.kind {
            state.start_sweeper();
        }

        // subsessions receive their traffic through the primary's pump
        if !self.subsession {
            if let Some(mut events_rx) = self.events_rx.lock().expect("lock poisoned").take() {
                let session = Arc::clone(self);

                *self.pump.lock().expect("lock poisoned") = Some(tokio::spawn(async move {
                    while let Some(event) = events_rx.recv().await {
                        session.deliver_event(event).await;
                    }
                }));
            }
        }

        if let Some(window) = self.config.close_idle {
            let session = Arc::clone(self);

            *self.idle_timer.lock().expect("lock poisoned") = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(window / 2).await;

                    if session.idle_time() >= window {
                        tracing::info!(
                            target: LOG_TARGET,
                            id = %session.id,
                            "closing idle session",
                        );

                        // close on a separate task: `close` aborts this timer
                        tokio::spawn(async move { session.close().await });
                        break;
                    }
                }
            }));
        }

        tracing::info!(
            target: LOG_TARGET,
            id = %self.id,
            style = ?self.style,
            "session active",
        );
    }

    /// Tunnel handle of the session.
    pub(crate) fn tunnel(&self) -> Result<Arc<dyn TunnelHandle>, SessionError> {
        self.tunnel.get().cloned().ok_or(SessionError::NotActive)
    }

    /// Deliver one router event to the session.
    pub(crate) async fn deliver_event(self: &Arc<Self>, event: RouterEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        self.touch();

        match (&self.kind, event) {
            (SessionKind::Stream(state), RouterEvent::Stream { peer, from_port, to_port, stream }) => {
                state.deliver(InboundStream {
                    stream,
                    peer,
                    from_port,
                    to_port,
                });
            }
            (
                SessionKind::Datagram(state),
                RouterEvent::Datagram { protocol, source, from_port, to_port, payload, .. },
            ) if Some(protocol) == self.style.datagram_protocol() => {
                state
                    .deliver(ReceivedDatagram {
                        source,
                        from_port,
                        to_port,
                        data: payload,
                    })
                    .await;
            }
            (
                SessionKind::Datagram2(state),
                RouterEvent::Datagram { protocol, source, from_port, to_port, nonce, payload },
            ) if protocol == crate::config::PROTOCOL_DATAGRAM2 => {
                state
                    .deliver(
                        ReceivedDatagram {
                            source,
                            from_port,
                            to_port,
                            data: payload,
                        },
                        nonce,
                    )
                    .await;
            }
            (
                SessionKind::Datagram3(state),
                RouterEvent::Datagram { protocol, source, from_port, to_port, payload, .. },
            ) if protocol == crate::config::PROTOCOL_DATAGRAM3 => {
                // hash sources that fail validation are dropped, not surfaced
                if crate::destination::validate_hash_source(&source).is_err() {
                    tracing::debug!(
                        target: LOG_TARGET,
                        id = %self.id,
                        "dropping datagram with invalid source hash",
                    );
                    return;
                }

                state
                    .deliver(ReceivedDatagram {
                        source,
                        from_port,
                        to_port,
                        data: payload,
                    })
                    .await;
            }
            (SessionKind::Raw(state), RouterEvent::Raw { from_port, to_port, protocol, payload }) => {
                state
                    .deliver(ReceivedRawDatagram {
                        from_port,
                        to_port,
                        protocol,
                        data: payload,
                    })
                    .await;
            }
            (SessionKind::Primary(state), event) => {
                let (port, protocol) = event.routing_key();

                match state.route(port, protocol) {
                    Some(child) => Box::pin(child.deliver_event(event)).await,
                    None => tracing::trace!(
                        target: LOG_TARGET,
                        id = %self.id,
                        ?port,
                        ?protocol,
                        "no subsession for incoming traffic, dropping",
                    ),
                }
            }
            _ => tracing::trace!(
                target: LOG_TARGET,
                id = %self.id,
                style = ?self.style,
                "event does not match session style, dropping",
            ),
        }
    }

    /// Send a repliable datagram to `destination`.
    pub async fn send_datagram(
        &self,
        destination: &str,
        payload: &[u8],
        from_port: u16,
        to_port: u16,
    ) -> crate::Result<()> {
        let Some(protocol) = self.style.datagram_protocol() else {
            return Err(SessionError::NotActive.into());
        };

        if payload.is_empty() {
            return Err(ConfigError::EmptyPayload.into());
        }

        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(ConfigError::PayloadTooLarge.into());
        }

        if !self.is_active() {
            return Err(SessionError::NotActive.into());
        }

        self.touch();
        self.tunnel()?
            .send_datagram(protocol, destination, payload, from_port, to_port)
            .await
    }

    /// Send an anonymous datagram to `destination`.
    ///
    /// The effective protocol is `protocol` when non-zero, the session default
    /// otherwise; `{6, 17, 19, 20}` are rejected.
    pub async fn send_raw(
        &self,
        destination: &str,
        payload: &[u8],
        protocol: u8,
        from_port: u16,
        to_port: u16,
    ) -> crate::Result<()> {
        let effective = validate_raw_protocol(match protocol {
            0 => self.config.protocol,
            protocol => protocol,
        })?;

        if payload.is_empty() {
            return Err(ConfigError::EmptyPayload.into());
        }

        if payload.len() > MAX_RAW_SIZE {
            return Err(ConfigError::PayloadTooLarge.into());
        }

        if !self.is_active() {
            return Err(SessionError::NotActive.into());
        }

        self.touch();
        self.tunnel()?
            .send_raw(destination, payload, effective, from_port, to_port)
            .await
    }

    /// Configure UDP forwarding of received datagrams.
    pub async fn set_forwarding(&self, host: &str, port: u16, port_aware: bool) -> crate::Result<()> {
        let forwarder =
            Arc::new(crate::udp::DatagramForwarder::new(host, port, port_aware).await?);

        match &self.kind {
            SessionKind::Datagram(state) | SessionKind::Datagram3(state) => {
                state.set_forwarder(forwarder)
            }
            SessionKind::Datagram2(state) => state.datagram.set_forwarder(forwarder),
            SessionKind::Raw(state) => state.set_forwarder(forwarder),
            _ => return Err(SessionError::InvalidSubsessionStyle.into()),
        }

        Ok(())
    }

    /// Close the session. Idempotent.
    ///
    /// Aborts the event pump and style-specific tasks, closes subsessions,
    /// releases the tunnels (unless shared with a primary) and unregisters
    /// from the registry.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.status.write().expect("lock poisoned") = SessionStatus::Closing;

        tracing::info!(
            target: LOG_TARGET,
            id = %self.id,
            "closing session",
        );

        if let Some(pump) = self.pump.lock().expect("lock poisoned").take() {
            pump.abort();
        }

        if let Some(idle_timer) = self.idle_timer.lock().expect("lock poisoned").take() {
            idle_timer.abort();
        }

        match &self.kind {
            SessionKind::Stream(state) => {
                state.stop_forwarding();
                state.close_inbound();
            }
            SessionKind::Datagram2(state) => state.stop_sweeper(),
            SessionKind::Primary(state) => {
                for child in state.take_children() {
                    Box::pin(child.close()).await;
                }
            }
            _ => {}
        }

        // subsessions share the primary's tunnel pool and must not tear it down
        if !self.subsession {
            if let Some(tunnel) = self.tunnel.get() {
                tunnel.close().await;
            }
        }

        self.registry.unregister(&self.id);
        *self.status.write().expect("lock poisoned") = SessionStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_parsing() {
        assert_eq!(SessionStyle::from_str("STREAM"), Some(SessionStyle::Stream));
        assert_eq!(SessionStyle::from_str("stream"), Some(SessionStyle::Stream));
        assert_eq!(SessionStyle::from_str("DATAGRAM"), Some(SessionStyle::Datagram));
        assert_eq!(SessionStyle::from_str("DATAGRAM2"), Some(SessionStyle::Datagram2));
        assert_eq!(SessionStyle::from_str("DATAGRAM3"), Some(SessionStyle::Datagram3));
        assert_eq!(SessionStyle::from_str("RAW"), Some(SessionStyle::Raw));
        assert_eq!(SessionStyle::from_str("PRIMARY"), Some(SessionStyle::Primary));
        assert_eq!(SessionStyle::from_str("MASTER"), Some(SessionStyle::Primary));
        assert_eq!(SessionStyle::from_str("TRANSIENT"), None);
    }

    #[test]
    fn datagram_protocols() {
        assert_eq!(SessionStyle::Datagram.datagram_protocol(), Some(17));
        assert_eq!(SessionStyle::Datagram2.datagram_protocol(), Some(19));
        assert_eq!(SessionStyle::Datagram3.datagram_protocol(), Some(20));
        assert_eq!(SessionStyle::Stream.datagram_protocol(), None);
        assert_eq!(SessionStyle::Raw.datagram_protocol(), None);
    }
}
