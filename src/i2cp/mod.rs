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

//! Seam towards the I2CP router and the streaming/datagram collaborators.
//!
//! The bridge core multiplexes sessions over one router connection but does
//! not speak the I2CP wire codec itself; it talks to the router through
//! [`RouterBackend`] and per-session [`TunnelHandle`]s, and receives traffic
//! from the router as [`RouterEvent`]s on the session's event channel.

use crate::{config::SessionConfig, destination::Destination, session::SessionStyle};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch},
};

use std::sync::Arc;

pub mod embedded;

pub use embedded::EmbeddedRouter;

/// Boxed bidirectional byte stream.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

/// Bidirectional byte stream handed out by the streaming collaborator.
pub type StreamIo = Box<dyn AsyncIo>;

/// Traffic arriving from the router for a session.
pub enum RouterEvent {
    /// Repliable datagram (protocols 17, 19 and 20).
    Datagram {
        /// I2CP protocol the datagram arrived on.
        protocol: u8,

        /// Sender: a base64 destination, or for protocol 20 the base64 of the
        /// sender's 32-byte hash.
        source: String,

        /// Source port.
        from_port: u16,

        /// Destination port.
        to_port: u16,

        /// Replay-protection nonce assigned by the datagram codec.
        nonce: u64,

        /// Datagram payload.
        payload: Vec<u8>,
    },

    /// Anonymous datagram.
    Raw {
        /// Source port.
        from_port: u16,

        /// Destination port.
        to_port: u16,

        /// I2CP protocol of the datagram.
        protocol: u8,

        /// Datagram payload.
        payload: Vec<u8>,
    },

    /// Inbound virtual stream.
    Stream {
        /// Base64 destination of the remote peer.
        peer: String,

        /// Source port.
        from_port: u16,

        /// Destination port.
        to_port: u16,

        /// The stream itself.
        stream: StreamIo,
    },
}

impl RouterEvent {
    /// `(port, protocol)` pair used for subsession routing.
    pub fn routing_key(&self) -> (u16, u8) {
        match self {
            Self::Datagram { to_port, protocol, .. } => (*to_port, *protocol),
            Self::Raw { to_port, protocol, .. } => (*to_port, *protocol),
            Self::Stream { to_port, .. } => (*to_port, crate::config::PROTOCOL_STREAMING),
        }
    }
}

/// Handle to one session's tunnel pool.
pub trait TunnelHandle: Send + Sync {
    /// Send a repliable datagram over `protocol` (17, 19 or 20).
    fn send_datagram<'a>(
        &'a self,
        protocol: u8,
        destination: &'a str,
        payload: &'a [u8],
        from_port: u16,
        to_port: u16,
    ) -> BoxFuture<'a, crate::Result<()>>;

    /// Send an anonymous datagram.
    fn send_raw<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a [u8],
        protocol: u8,
        from_port: u16,
        to_port: u16,
    ) -> BoxFuture<'a, crate::Result<()>>;

    /// Open a virtual stream to `destination`.
    fn connect<'a>(
        &'a self,
        destination: &'a str,
        from_port: u16,
        to_port: u16,
    ) -> BoxFuture<'a, crate::Result<StreamIo>>;

    /// Tear down the tunnel pool. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// The router-facing surface of the bridge.
pub trait RouterBackend: Send + Sync {
    /// Generate a fresh destination of the given signature type.
    fn generate_destination(
        &self,
        signature_type: u16,
    ) -> BoxFuture<'_, crate::Result<Destination>>;

    /// Create a session for `destination` and build its tunnels.
    ///
    /// Resolves only once the tunnels are ready; `SESSION STATUS` must not be
    /// sent before that. Inbound traffic is delivered on `events`.
    fn create_session<'a>(
        &'a self,
        id: &'a str,
        style: SessionStyle,
        config: &'a SessionConfig,
        destination: &'a Destination,
        events: mpsc::Sender<RouterEvent>,
    ) -> BoxFuture<'a, crate::Result<Arc<dyn TunnelHandle>>>;

    /// Resolve a hostname or base32 address into a base64 destination.
    fn lookup<'a>(&'a self, name: &'a str) -> BoxFuture<'a, crate::Result<String>>;
}

/// One-shot readiness signal: closable once, awaitable by many.
///
/// Router callbacks may fire on a task that is already inside session setup;
/// the callback signals, waiters await, and no lock is held across the wait.
#[derive(Clone)]
pub struct Readiness {
    /// Signal sender.
    tx: watch::Sender<bool>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    /// Create new, unsignaled [`Readiness`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signal readiness. Signaling more than once is a no-op.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    /// Wait until [`Readiness::signal()`] has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();

        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether readiness has been signaled.
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }
}
