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

//! Anonymous datagram session state.

use crate::{
    config::SessionConfig,
    session::{ReceivedRawDatagram, Session, SessionKind, RECEIVE_QUEUE_CAPACITY},
    udp::DatagramForwarder,
};

use tokio::sync::mpsc;

use std::sync::{Arc, Mutex};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::session::raw";

/// Anonymous datagram session state.
pub struct RawState {
    /// Producer half of the receive queue.
    queue_tx: mpsc::Sender<ReceivedRawDatagram>,

    /// Consumer half of the receive queue.
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<ReceivedRawDatagram>>,

    /// UDP egress forwarder, when forwarding is enabled.
    forwarder: Mutex<Option<Arc<DatagramForwarder>>>,

    /// Whether forwarded datagrams carry a port/protocol header line.
    header_enabled: bool,
}

impl RawState {
    /// Create new [`RawState`] from the session configuration.
    pub fn new(config: &SessionConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);

        Self {
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            forwarder: Mutex::new(None),
            header_enabled: config.header_enabled,
        }
    }

    /// Enable UDP forwarding.
    pub(crate) fn set_forwarder(&self, forwarder: Arc<DatagramForwarder>) {
        *self.forwarder.lock().expect("lock poisoned") = Some(forwarder);
    }

    /// Deliver one received datagram.
    ///
    /// Returns `false` if the receive queue was full and the datagram dropped.
    pub(crate) async fn deliver(&self, datagram: ReceivedRawDatagram) -> bool {
        let forwarder = self.forwarder.lock().expect("lock poisoned").clone();

        match forwarder {
            Some(forwarder) => {
                forwarder.forward_raw(&datagram, self.header_enabled).await;
                true
            }
            None => match self.queue_tx.try_send(datagram) {
                Ok(()) => true,
                Err(_) => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        "receive queue full, dropping raw datagram",
                    );
                    false
                }
            },
        }
    }

    /// Receive the next queued datagram.
    pub(crate) async fn receive(&self) -> Option<ReceivedRawDatagram> {
        self.queue_rx.lock().await.recv().await
    }
}

impl Session {
    /// Receive the next queued anonymous datagram.
    ///
    /// Returns `None` for non-RAW styles or once the session closes.
    pub async fn receive_raw(&self) -> Option<ReceivedRawDatagram> {
        match self.kind() {
            SessionKind::Raw(state) => state.receive().await,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_datagram(protocol: u8, data: &[u8]) -> ReceivedRawDatagram {
        ReceivedRawDatagram {
            from_port: 0,
            to_port: 0,
            protocol,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn queue_drops_when_full() {
        let state = RawState::new(&SessionConfig::default());

        for i in 0..RECEIVE_QUEUE_CAPACITY {
            assert!(state.deliver(raw_datagram(18, &[i as u8])).await);
        }

        assert!(!state.deliver(raw_datagram(18, b"overflow")).await);

        assert_eq!(state.receive().await.unwrap().data, vec![0u8]);
        assert!(state.deliver(raw_datagram(18, b"admitted")).await);
    }
}
