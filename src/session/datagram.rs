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

//! Repliable datagram session state.

use crate::{
    session::{ReceivedDatagram, Session, SessionKind, RECEIVE_QUEUE_CAPACITY},
    udp::DatagramForwarder,
};

use tokio::{sync::mpsc, task::JoinHandle, time::Instant};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::session::datagram";

/// How long a seen DATAGRAM2 nonce is remembered.
const NONCE_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Shared state of the repliable datagram styles.
///
/// Received datagrams either go out through the UDP forwarder or into a
/// bounded queue; datagrams are best-effort and new arrivals are dropped when
/// the queue is full.
pub struct DatagramState {
    /// Producer half of the receive queue.
    queue_tx: mpsc::Sender<ReceivedDatagram>,

    /// Consumer half of the receive queue.
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<ReceivedDatagram>>,

    /// UDP egress forwarder, when forwarding is enabled.
    forwarder: Mutex<Option<Arc<DatagramForwarder>>>,
}

impl Default for DatagramState {
    fn default() -> Self {
        Self::new()
    }
}

impl DatagramState {
    /// Create new [`DatagramState`].
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);

        Self {
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            forwarder: Mutex::new(None),
        }
    }

    /// Enable UDP forwarding.
    pub(crate) fn set_forwarder(&self, forwarder: Arc<DatagramForwarder>) {
        *self.forwarder.lock().expect("lock poisoned") = Some(forwarder);
    }

    /// Deliver one received datagram.
    ///
    /// Returns `false` if the receive queue was full and the datagram dropped.
    pub(crate) async fn deliver(&self, datagram: ReceivedDatagram) -> bool {
        let forwarder = self.forwarder.lock().expect("lock poisoned").clone();

        match forwarder {
            Some(forwarder) => {
                forwarder.forward_datagram(&datagram).await;
                true
            }
            None => match self.queue_tx.try_send(datagram) {
                Ok(()) => true,
                Err(_) => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        "receive queue full, dropping datagram",
                    );
                    false
                }
            },
        }
    }

    /// Receive the next queued datagram.
    pub(crate) async fn receive(&self) -> Option<ReceivedDatagram> {
        self.queue_rx.lock().await.recv().await
    }
}

/// DATAGRAM2 state: [`DatagramState`] plus replay protection and an optional
/// offline signature.
pub struct Datagram2State {
    /// Shared repliable datagram state.
    pub(crate) datagram: DatagramState,

    /// Seen nonces and when they expire.
    nonces: Arc<Mutex<HashMap<u64, Instant>>>,

    /// Offline signature bytes, defensively copied.
    offline_signature: Mutex<Option<Vec<u8>>>,

    /// Periodic nonce sweeper.
    sweeper: Mutex<Option<JoinHandle<()>>>,

    /// How long a seen nonce is remembered.
    window: Duration,
}

impl Default for Datagram2State {
    fn default() -> Self {
        Self::new()
    }
}

impl Datagram2State {
    /// Create new [`Datagram2State`] with the default replay window.
    pub fn new() -> Self {
        Self::with_window(NONCE_EXPIRY)
    }

    /// Create new [`Datagram2State`] with a custom replay window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            datagram: DatagramState::new(),
            nonces: Arc::new(Mutex::new(HashMap::new())),
            offline_signature: Mutex::new(None),
            sweeper: Mutex::new(None),
            window,
        }
    }

    /// Store a copy of the offline signature bytes.
    pub fn set_offline_signature(&self, signature: &[u8]) {
        *self.offline_signature.lock().expect("lock poisoned") = Some(signature.to_vec());
    }

    /// Offline signature bytes, if set.
    pub fn offline_signature(&self) -> Option<Vec<u8>> {
        self.offline_signature.lock().expect("lock poisoned").clone()
    }

    /// Deliver one received datagram.
    ///
    /// Returns `false` if `nonce` was already seen (replay) or the receive
    /// queue was full.
    pub(crate) async fn deliver(&self, datagram: ReceivedDatagram, nonce: u64) -> bool {
        {
            let mut nonces = self.nonces.lock().expect("lock poisoned");

            if nonces.contains_key(&nonce) {
                tracing::debug!(
                    target: LOG_TARGET,
                    ?nonce,
                    "dropping replayed datagram",
                );
                return false;
            }

            nonces.insert(nonce, Instant::now() + self.window);
        }

        self.datagram.deliver(datagram).await
    }

    /// Start the periodic nonce sweeper.
    ///
    /// The sweeper re-arms at half the expiry window and stops when the
    /// session closes.
    pub(crate) fn start_sweeper(&self) {
        let nonces = Arc::clone(&self.nonces);
        let window = self.window;

        *self.sweeper.lock().expect("lock poisoned") = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(window / 2);
            interval.tick().await;

            loop {
                interval.tick().await;

                let now = Instant::now();
                nonces.lock().expect("lock poisoned").retain(|_, expiry| *expiry > now);
            }
        }));
    }

    /// Stop the nonce sweeper.
    pub(crate) fn stop_sweeper(&self) {
        if let Some(sweeper) = self.sweeper.lock().expect("lock poisoned").take() {
            sweeper.abort();
        }
    }

    #[cfg(test)]
    fn nonce_count(&self) -> usize {
        self.nonces.lock().expect("lock poisoned").len()
    }
}

impl Session {
    /// Receive the next queued repliable datagram.
    ///
    /// Returns `None` for non-datagram styles or once the session closes.
    pub async fn receive_datagram(&self) -> Option<ReceivedDatagram> {
        match self.kind() {
            SessionKind::Datagram(state) | SessionKind::Datagram3(state) => state.receive().await,
            SessionKind::Datagram2(state) => state.datagram.receive().await,
            _ => None,
        }
    }

    /// Store the offline signature of a DATAGRAM2 session.
    pub fn set_offline_signature(&self, signature: &[u8]) -> bool {
        match self.kind() {
            SessionKind::Datagram2(state) => {
                state.set_offline_signature(signature);
                true
            }
            _ => false,
        }
    }
}
