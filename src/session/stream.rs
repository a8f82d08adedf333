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

//! Virtual stream session state.

use crate::{
    error::{Error, SessionError, TimeoutKind},
    i2cp::StreamIo,
    session::{Session, SessionKind},
};

use tokio::{io::AsyncWriteExt, net::TcpStream, sync::mpsc, task::JoinHandle};

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::session::stream";

/// Capacity of the inbound stream queue.
const INBOUND_QUEUE_CAPACITY: usize = 16;

/// How long an outbound stream connect may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the forwarder waits for the TCP target to accept.
///
/// If the target accepts in less than this, the inbound I2P connection is
/// accepted; otherwise it is rejected.
const FORWARD_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Inbound virtual stream, queued until an `ACCEPT` or the forwarder picks it up.
pub struct InboundStream {
    /// The stream itself.
    pub stream: StreamIo,

    /// Base64 destination of the remote peer.
    pub peer: String,

    /// Source port.
    pub from_port: u16,

    /// Destination port.
    pub to_port: u16,
}

/// Virtual stream session state.
pub struct StreamState {
    /// Producer half of the inbound stream queue. Dropped when the session
    /// closes so that parked accepts and the forward loop unblock.
    inbound_tx: Mutex<Option<mpsc::Sender<InboundStream>>>,

    /// Consumer half of the inbound stream queue, shared by concurrent accepts.
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundStream>>,

    /// Number of accepts currently waiting.
    pending_accepts: AtomicUsize,

    /// Forward loop task, when `STREAM FORWARD` is active.
    forward: Mutex<Option<JoinHandle<()>>>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    /// Create new [`StreamState`].
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

        Self {
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            pending_accepts: AtomicUsize::new(0),
            forward: Mutex::new(None),
        }
    }

    /// Queue one inbound stream. A full queue rejects the stream by dropping it.
    pub(crate) fn deliver(&self, inbound: InboundStream) {
        match self.inbound_tx.lock().expect("lock poisoned").as_ref() {
            Some(inbound_tx) => {
                if inbound_tx.try_send(inbound).is_err() {
                    tracing::debug!(
                        target: LOG_TARGET,
                        "inbound stream queue full, rejecting stream",
                    );
                }
            }
            None => tracing::trace!(
                target: LOG_TARGET,
                "session closing, rejecting inbound stream",
            ),
        }
    }

    /// Close the inbound queue, cancelling parked accepts.
    pub(crate) fn close_inbound(&self) {
        self.inbound_tx.lock().expect("lock poisoned").take();
    }

    /// Whether an accept listener exists.
    pub(crate) fn has_listener(&self) -> bool {
        self.pending_accepts.load(Ordering::SeqCst) > 0
    }

    /// Whether the forward loop is running.
    pub(crate) fn is_forwarding(&self) -> bool {
        self.forward.lock().expect("lock poisoned").is_some()
    }

    /// Stop the forward loop, if any.
    pub(crate) fn stop_forwarding(&self) {
        if let Some(forward) = self.forward.lock().expect("lock poisoned").take() {
            forward.abort();
        }
    }
}

/// Decrements the pending accept counter also when the accept is cancelled.
struct AcceptGuard<'a>(&'a AtomicUsize);

impl Drop for AcceptGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session {
    fn stream_state(&self) -> Result<&StreamState, SessionError> {
        match self.kind() {
            SessionKind::Stream(state) => Ok(state),
            _ => Err(SessionError::InvalidSubsessionStyle),
        }
    }

    /// Open an outbound virtual stream to `destination`.
    ///
    /// `destination` must already be resolved into base64 form; hostname and
    /// base32 resolution belong to the naming collaborator.
    pub async fn connect(
        &self,
        destination: &str,
        from_port: u16,
        to_port: u16,
    ) -> crate::Result<StreamIo> {
        self.stream_state()?;

        if !self.is_active() {
            return Err(SessionError::NotActive.into());
        }

        self.touch();

        let tunnel = self.tunnel()?;

        match tokio::time::timeout(
            CONNECT_TIMEOUT,
            tunnel.connect(destination, from_port, to_port),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(TimeoutKind::Connect)),
        }
    }

    /// Wait for one inbound virtual stream.
    ///
    /// Fails if forwarding is active. Pre-3.2 clients are restricted to one
    /// accept at a time (`concurrent` false); 3.2 and later permit arbitrary
    /// concurrency.
    pub async fn accept(&self, concurrent: bool) -> crate::Result<InboundStream> {
        let state = self.stream_state()?;

        if state.is_forwarding() {
            return Err(SessionError::ForwardingActive.into());
        }

        if !self.is_active() {
            return Err(SessionError::NotActive.into());
        }

        if !concurrent && state.has_listener() {
            return Err(SessionError::ConcurrentAccept.into());
        }

        state.pending_accepts.fetch_add(1, Ordering::SeqCst);
        let _guard = AcceptGuard(&state.pending_accepts);

        let mut inbound_rx = state.inbound_rx.lock().await;
        inbound_rx.recv().await.ok_or(Error::Cancelled)
    }

    /// Forward inbound virtual streams to a TCP listener at `host:port`.
    ///
    /// Fails if an accept listener exists. The TCP target is dialed with a
    /// three second deadline per inbound stream; targets that do not accept in
    /// time cause the inbound stream to be rejected. Unless `silent`, the
    /// forwarded socket first receives the peer destination on its own line.
    pub fn forward(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        silent: bool,
        port_aware: bool,
    ) -> crate::Result<()> {
        let state = self.stream_state()?;

        if state.has_listener() {
            return Err(SessionError::ListenerActive.into());
        }

        if !self.is_active() {
            return Err(SessionError::NotActive.into());
        }

        let mut forward = state.forward.lock().expect("lock poisoned");

        if forward.is_some() {
            return Err(SessionError::ForwardingActive.into());
        }

        let session = Arc::clone(self);
        let target = format!("{host}:{port}");

        *forward = Some(tokio::spawn(async move {
            let state = match session.stream_state() {
                Ok(state) => state,
                Err(_) => return,
            };

            loop {
                let inbound = {
                    let mut inbound_rx = state.inbound_rx.lock().await;
                    inbound_rx.recv().await
                };

                let Some(mut inbound) = inbound else {
                    return;
                };

                match tokio::time::timeout(FORWARD_DIAL_TIMEOUT, TcpStream::connect(&target)).await
                {
                    Ok(Ok(mut stream)) => {
                        if !silent {
                            let header = match port_aware {
                                true => format!(
                                    "{} FROM_PORT={} TO_PORT={}\n",
                                    inbound.peer, inbound.from_port, inbound.to_port,
                                ),
                                false => format!("{}\n", inbound.peer),
                            };

                            if stream.write_all(header.as_bytes()).await.is_err() {
                                continue;
                            }
                        }

                        tokio::spawn(async move {
                            let _ = tokio::io::copy_bidirectional(&mut inbound.stream, &mut stream)
                                .await;
                        });
                    }
                    _ => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            %target,
                            "forward target did not accept in time, rejecting stream",
                        );
                        drop(inbound);
                    }
                }
            }
        }));

        Ok(())
    }

    /// Whether `STREAM FORWARD` is active on the session.
    pub fn is_forwarding(&self) -> bool {
        match self.kind() {
            SessionKind::Stream(state) => state.is_forwarding(),
            _ => false,
        }
    }

    /// Whether an accept listener exists on the session.
    pub fn has_listener(&self) -> bool {
        match self.kind() {
            SessionKind::Stream(state) => state.has_listener(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn inbound(peer: &str) -> InboundStream {
        let (stream, _other) = duplex(64);

        InboundStream {
            stream: Box::new(stream),
            peer: peer.to_string(),
            from_port: 0,
            to_port: 0,
        }
    }

    #[tokio::test]
    async fn inbound_queue_bounded() {
        let state = StreamState::new();

        for _ in 0..INBOUND_QUEUE_CAPACITY + 4 {
            state.deliver(inbound("peer"));
        }

        let mut inbound_rx = state.inbound_rx.lock().await;

        for _ in 0..INBOUND_QUEUE_CAPACITY {
            assert!(inbound_rx.try_recv().is_ok());
        }
        assert!(inbound_rx.try_recv().is_err());
    }

    #[test]
    fn listener_tracking() {
        let state = StreamState::new();

        assert!(!state.has_listener());
        state.pending_accepts.fetch_add(1, Ordering::SeqCst);
        assert!(state.has_listener());

        {
            let _guard = AcceptGuard(&state.pending_accepts);
        }
        assert!(!state.has_listener());
    }
}
