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

//! In-process router backend.
//!
//! Destinations rendezvous by their base64 form, virtual streams are duplex
//! pipes and names resolve from a local table. Backs the test suite and the
//! binary's standalone mode, removing the need for an external router during
//! development.

use crate::{
    config::SessionConfig,
    destination::Destination,
    error::{SessionError, StreamError},
    i2cp::{Readiness, RouterBackend, RouterEvent, StreamIo, TunnelHandle},
    session::SessionStyle,
};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::i2cp::embedded";

/// Buffer size of in-process virtual streams.
const STREAM_BUFFER_SIZE: usize = 32768;

/// In-process [`RouterBackend`].
pub struct EmbeddedRouter {
    /// Rendezvous state.
    inner: Arc<Mutex<RouterInner>>,

    /// Simulated tunnel build latency.
    build_delay: Duration,
}

#[derive(Default)]
struct RouterInner {
    /// Reachable destinations by base64 form.
    endpoints: HashMap<String, Endpoint>,

    /// Base32 address to base64 destination.
    by_b32: HashMap<String, String>,

    /// Hostname to base64 destination.
    names: HashMap<String, String>,
}

struct Endpoint {
    /// Event channel of the owning session.
    events: mpsc::Sender<RouterEvent>,
}

impl Default for EmbeddedRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedRouter {
    /// Create new [`EmbeddedRouter`] with instant tunnel builds.
    pub fn new() -> Self {
        Self::with_build_delay(Duration::ZERO)
    }

    /// Create new [`EmbeddedRouter`] with a simulated tunnel build latency.
    pub fn with_build_delay(build_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RouterInner::default())),
            build_delay,
        }
    }

    /// Register a hostname for [`RouterBackend::lookup()`].
    pub fn register_name(&self, name: &str, destination: &str) {
        self.inner
            .lock()
            .expect("lock poisoned")
            .names
            .insert(name.to_string(), destination.to_string());
    }

    /// Number of reachable destinations.
    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").endpoints.len()
    }
}

impl RouterBackend for EmbeddedRouter {
    fn generate_destination(
        &self,
        signature_type: u16,
    ) -> BoxFuture<'_, crate::Result<Destination>> {
        Box::pin(async move { Ok(Destination::generate(signature_type)) })
    }

    fn create_session<'a>(
        &'a self,
        id: &'a str,
        style: SessionStyle,
        _config: &'a SessionConfig,
        destination: &'a Destination,
        events: mpsc::Sender<RouterEvent>,
    ) -> BoxFuture<'a, crate::Result<Arc<dyn TunnelHandle>>> {
        Box::pin(async move {
            let local = destination.to_b64();
            let local_hash = destination.hash_b64();

            {
                let mut inner = self.inner.lock().expect("lock poisoned");

                if inner.endpoints.contains_key(&local) {
                    return Err(SessionError::DuplicateDest.into());
                }

                inner.endpoints.insert(local.clone(), Endpoint { events });
                inner.by_b32.insert(destination.b32_address(), local.clone());
            }

            // tunnel build callback fires after the simulated latency; session
            // creation awaits it before handing the tunnels out
            let readiness = Readiness::new();
            let signal = readiness.clone();
            let build_delay = self.build_delay;

            tokio::spawn(async move {
                tokio::time::sleep(build_delay).await;
                signal.signal();
            });

            readiness.wait().await;

            tracing::debug!(
                target: LOG_TARGET,
                %id,
                ?style,
                "tunnels built",
            );

            Ok(Arc::new(EmbeddedTunnel {
                inner: Arc::clone(&self.inner),
                local,
                local_hash,
                closed: AtomicBool::new(false),
            }) as Arc<dyn TunnelHandle>)
        })
    }

    fn lookup<'a>(&'a self, name: &'a str) -> BoxFuture<'a, crate::Result<String>> {
        Box::pin(async move {
            let inner = self.inner.lock().expect("lock poisoned");

            if let Some(destination) = inner.names.get(name) {
                return Ok(destination.clone());
            }

            if let Some(destination) = inner.by_b32.get(name) {
                return Ok(destination.clone());
            }

            Err(StreamError::KeyNotFound.into())
        })
    }
}

/// Tunnel handle of one embedded session.
pub struct EmbeddedTunnel {
    /// Rendezvous state.
    inner: Arc<Mutex<RouterInner>>,

    /// Base64 destination of the session.
    local: String,

    /// Base64 hash of the destination, the DATAGRAM3 source form.
    local_hash: String,

    /// Close-once flag.
    closed: AtomicBool,
}

impl EmbeddedTunnel {
    fn target_events(&self, destination: &str) -> Option<mpsc::Sender<RouterEvent>> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .endpoints
            .get(destination)
            .map(|endpoint| endpoint.events.clone())
    }
}

impl TunnelHandle for EmbeddedTunnel {
    fn send_datagram<'a>(
        &'a self,
        protocol: u8,
        destination: &'a str,
        payload: &'a [u8],
        from_port: u16,
        to_port: u16,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            let Some(events) = self.target_events(destination) else {
                // datagrams to unknown destinations vanish into the network
                tracing::trace!(
                    target: LOG_TARGET,
                    "datagram target unknown, dropping",
                );
                return Ok(());
            };

            let source = match protocol {
                crate::config::PROTOCOL_DATAGRAM3 => self.local_hash.clone(),
                _ => self.local.clone(),
            };

            let _ = events
                .send(RouterEvent::Datagram {
                    protocol,
                    source,
                    from_port,
                    to_port,
                    nonce: rand::random(),
                    payload: payload.to_vec(),
                })
                .await;

            Ok(())
        })
    }

    fn send_raw<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a [u8],
        protocol: u8,
        from_port: u16,
        to_port: u16,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            let Some(events) = self.target_events(destination) else {
                tracing::trace!(
                    target: LOG_TARGET,
                    "raw datagram target unknown, dropping",
                );
                return Ok(());
            };

            let _ = events
                .send(RouterEvent::Raw {
                    from_port,
                    to_port,
                    protocol,
                    payload: payload.to_vec(),
                })
                .await;

            Ok(())
        })
    }

    fn connect<'a>(
        &'a self,
        destination: &'a str,
        from_port: u16,
        to_port: u16,
    ) -> BoxFuture<'a, crate::Result<StreamIo>> {
        Box::pin(async move {
            let Some(events) = self.target_events(destination) else {
                return Err(StreamError::CantReachPeer.into());
            };

            let (local_half, remote_half) = tokio::io::duplex(STREAM_BUFFER_SIZE);

            events
                .send(RouterEvent::Stream {
                    peer: self.local.clone(),
                    from_port,
                    to_port,
                    stream: Box::new(remote_half),
                })
                .await
                .map_err(|_| crate::Error::from(StreamError::CantReachPeer))?;

            Ok(Box::new(local_half) as StreamIo)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }

            let mut inner = self.inner.lock().expect("lock poisoned");

            inner.endpoints.remove(&self.local);
            inner.by_b32.retain(|_, destination| destination != &self.local);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_endpoint(
        router: &EmbeddedRouter,
        id: &str,
        style: SessionStyle,
    ) -> (Destination, Arc<dyn TunnelHandle>, mpsc::Receiver<RouterEvent>) {
        let destination = Destination::generate(7);
        let (events_tx, events_rx) = mpsc::channel(16);

        let tunnel = router
            .create_session(id, style, &SessionConfig::default(), &destination, events_tx)
            .await
            .unwrap();

        (destination, tunnel, events_rx)
    }

    #[tokio::test]
    async fn datagram_rendezvous() {
        let router = EmbeddedRouter::new();

        let (alice, alice_tunnel, _alice_rx) =
            create_endpoint(&router, "alice", SessionStyle::Datagram).await;
        let (bob, _bob_tunnel, mut bob_rx) =
            create_endpoint(&router, "bob", SessionStyle::Datagram).await;

        alice_tunnel.send_datagram(17, &bob.to_b64(), b"hello", 7, 9).await.unwrap();

        match bob_rx.recv().await.unwrap() {
            RouterEvent::Datagram { protocol, source, from_port, to_port, payload, .. } => {
                assert_eq!(protocol, 17);
                assert_eq!(source, alice.to_b64());
                assert_eq!(from_port, 7);
                assert_eq!(to_port, 9);
                assert_eq!(payload, b"hello".to_vec());
            }
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn datagram3_source_is_hash() {
        let router = EmbeddedRouter::new();

        let (alice, alice_tunnel, _alice_rx) =
            create_endpoint(&router, "alice", SessionStyle::Datagram3).await;
        let (bob, _bob_tunnel, mut bob_rx) =
            create_endpoint(&router, "bob", SessionStyle::Datagram3).await;

        alice_tunnel.send_datagram(20, &bob.to_b64(), b"hash-sourced", 0, 0).await.unwrap();

        match bob_rx.recv().await.unwrap() {
            RouterEvent::Datagram { source, .. } => {
                assert_eq!(source, alice.hash_b64());
                assert_eq!(source.len(), 44);
            }
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn stream_rendezvous() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let router = EmbeddedRouter::new();

        let (_alice, alice_tunnel, _alice_rx) =
            create_endpoint(&router, "alice", SessionStyle::Stream).await;
        let (bob, _bob_tunnel, mut bob_rx) =
            create_endpoint(&router, "bob", SessionStyle::Stream).await;

        let mut outbound = alice_tunnel.connect(&bob.to_b64(), 0, 0).await.unwrap();
        outbound.write_all(b"ping").await.unwrap();

        match bob_rx.recv().await.unwrap() {
            RouterEvent::Stream { mut stream, .. } => {
                let mut buffer = [0u8; 4];
                stream.read_exact(&mut buffer).await.unwrap();
                assert_eq!(&buffer, b"ping");
            }
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn connect_to_unknown_destination_fails() {
        let router = EmbeddedRouter::new();

        let (_alice, alice_tunnel, _alice_rx) =
            create_endpoint(&router, "alice", SessionStyle::Stream).await;

        match alice_tunnel.connect("bm90LXJlZ2lzdGVyZWQ=", 0, 0).await {
            Err(error) => assert_eq!(error.result_kind(), "CANT_REACH_PEER"),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn lookup_by_name_and_b32() {
        let router = EmbeddedRouter::new();

        let (alice, _tunnel, _rx) = create_endpoint(&router, "alice", SessionStyle::Stream).await;
        router.register_name("alice.i2p", &alice.to_b64());

        assert_eq!(router.lookup("alice.i2p").await.unwrap(), alice.to_b64());
        assert_eq!(router.lookup(&alice.b32_address()).await.unwrap(), alice.to_b64());

        match router.lookup("unknown.i2p").await {
            Err(error) => assert_eq!(error.result_kind(), "KEY_NOT_FOUND"),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn close_removes_endpoint() {
        let router = EmbeddedRouter::new();

        let (_alice, tunnel, _rx) = create_endpoint(&router, "alice", SessionStyle::Stream).await;
        assert_eq!(router.endpoint_count(), 1);

        tunnel.close().await;
        assert_eq!(router.endpoint_count(), 0);

        // close is idempotent
        tunnel.close().await;
        assert_eq!(router.endpoint_count(), 0);
    }
}
