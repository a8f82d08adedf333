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

//! Per-connection state machine and command loop.

use crate::{
    config::MAX_UDP_DATAGRAM_SIZE,
    dispatch::{CommandRouter, HandlerContext, Outcome},
    error::{Error, ProtocolError},
    i2cp::StreamIo,
    proto::{Command, Response},
    server::BridgeState,
    session::{Session, SessionStyle},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
    task::JoinHandle,
};

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::connection";

/// State of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection has been accepted, nothing read yet.
    New,

    /// First line has been read, `HELLO` is expected.
    Handshaking,

    /// Handshake is complete, commands are dispatched.
    Ready,

    /// A session is bound to the connection.
    SessionBound,

    /// Connection is gone.
    Closed,
}

/// Client connection state.
///
/// Owned by the connection task; other tasks interact with the connection
/// only through the session it owns.
pub struct Connection {
    /// Connection state.
    state: ConnectionState,

    /// Negotiated protocol version.
    version: Option<String>,

    /// Authenticated username, if any.
    username: Option<String>,

    /// Session bound to the connection, if any.
    session: Option<Arc<Session>>,

    /// When the connection was accepted.
    created_at: Instant,

    /// When the last line was read.
    last_activity: Instant,

    /// Outstanding server `PING`: text and when it was sent.
    pending_ping: Option<(String, Instant)>,

    /// Session whose receive queue must be drained onto the control socket.
    pending_drain: Option<Arc<Session>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create new [`Connection`] in [`ConnectionState::New`].
    pub fn new() -> Self {
        Self {
            state: ConnectionState::New,
            version: None,
            username: None,
            session: None,
            created_at: Instant::now(),
            last_activity: Instant::now(),
            pending_ping: None,
            pending_drain: None,
        }
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether `HELLO` has completed.
    pub fn is_handshaked(&self) -> bool {
        matches!(self.state, ConnectionState::Ready | ConnectionState::SessionBound)
    }

    /// Record a completed handshake.
    pub fn set_handshaked(&mut self, version: String, username: Option<String>) {
        tracing::debug!(
            target: LOG_TARGET,
            %version,
            ?username,
            "handshake complete",
        );

        self.version = Some(version);
        self.username = username;
        self.state = ConnectionState::Ready;
    }

    /// Negotiated protocol version, if handshaked.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether the negotiated version is at least `3.<minor>`.
    pub fn version_at_least(&self, minor: u32) -> bool {
        self.version
            .as_deref()
            .and_then(|version| version.strip_prefix("3."))
            .and_then(|minor| minor.parse::<u32>().ok())
            .map_or(false, |negotiated| negotiated >= minor)
    }

    /// Whether the connection has authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// Bind a session to the connection.
    ///
    /// A connection is bound to at most one session at a time. Datagram-style
    /// sessions without UDP forwarding have their receive queue drained onto
    /// the control socket.
    pub fn bind_session(&mut self, session: Arc<Session>) {
        debug_assert!(self.session.is_none());

        let drains = matches!(
            session.style(),
            SessionStyle::Datagram
                | SessionStyle::Datagram2
                | SessionStyle::Datagram3
                | SessionStyle::Raw
        ) && !session.config().forwarding_enabled();

        if drains {
            self.pending_drain = Some(Arc::clone(&session));
        }

        self.session = Some(session);
        self.state = ConnectionState::SessionBound;
    }

    /// Session bound to the connection, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Whether a session is bound.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// When the last line was read.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Record read activity.
    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record an outstanding server `PING`.
    pub fn set_pending_ping(&mut self, text: String) {
        self.pending_ping = Some((text, Instant::now()));
    }

    /// Clear the outstanding `PING` on `PONG` receipt.
    pub fn clear_pending_ping(&mut self, text: &str) {
        match self.pending_ping.take() {
            Some((expected, _)) if expected != text => {
                tracing::debug!(
                    target: LOG_TARGET,
                    %expected,
                    received = %text,
                    "pong text mismatch",
                );
            }
            _ => {}
        }
    }

    fn take_pending_drain(&mut self) -> Option<Arc<Session>> {
        self.pending_drain.take()
    }
}

/// What the command loop does next.
enum Flow {
    /// Keep reading commands.
    Continue,

    /// Close the connection.
    Close,

    /// Splice the control socket with an outbound stream, then close.
    Splice(StreamIo),

    /// Wait for an inbound stream, splice, then close.
    Accept {
        /// Session accepting the stream.
        session: Arc<Session>,

        /// Whether the peer line is suppressed.
        silent: bool,
    },
}

/// Runs the command loop of one accepted connection.
pub struct ConnectionHandler {
    /// Buffered read half of the control socket.
    reader: BufReader<OwnedReadHalf>,

    /// Write half of the control socket, shared with the datagram drainer.
    writer: Arc<Mutex<OwnedWriteHalf>>,

    /// Connection state.
    connection: Connection,

    /// Shared bridge state.
    bridge: Arc<BridgeState>,

    /// Datagram drainer task, when a datagram session is bound.
    drainer: Option<JoinHandle<()>>,

    /// Peer address, for logging.
    peer: SocketAddr,
}

impl ConnectionHandler {
    /// Create new [`ConnectionHandler`] for an accepted socket.
    pub fn new(stream: TcpStream, peer: SocketAddr, bridge: Arc<BridgeState>) -> Self {
        let (read_half, write_half) = stream.into_split();

        Self {
            reader: BufReader::new(read_half),
            writer: Arc::new(Mutex::new(write_half)),
            connection: Connection::new(),
            bridge,
            drainer: None,
            peer,
        }
    }

    /// Run the connection until it closes.
    pub async fn run(mut self) {
        tracing::debug!(
            target: LOG_TARGET,
            peer = %self.peer,
            "connection accepted",
        );

        loop {
            let deadline = self.read_deadline();

            match tokio::time::timeout(deadline, read_line_limited(
                &mut self.reader,
                self.bridge.config.max_line_len,
            ))
            .await
            {
                Err(_) => match self.on_timeout().await {
                    Flow::Continue => {}
                    _ => break,
                },
                Ok(Ok(None)) => break,
                Ok(Err(error)) => {
                    // best-effort final response before closing
                    let response = Response::with_action("SESSION", "STATUS").error(&error);
                    let _ = self.write_response(&response).await;
                    break;
                }
                Ok(Ok(Some(line))) => {
                    self.connection.update_activity();

                    match self.handle_line(&line).await {
                        Flow::Continue => {}
                        Flow::Close => break,
                        Flow::Splice(stream) => {
                            self.splice(stream).await;
                            break;
                        }
                        Flow::Accept { session, silent } => {
                            self.accept_then_splice(session, silent).await;
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Read deadline for the next line.
    ///
    /// Before `HELLO` the handshake deadline governs, afterwards the command
    /// deadline; an outstanding `PING` lowers it to the pong deadline so that
    /// the timeout surfaces can be told apart.
    fn read_deadline(&self) -> Duration {
        let config = &self.bridge.config;
        let read = match self.connection.is_handshaked() {
            true => config.command_timeout,
            false => config.handshake_timeout,
        };

        match &self.connection.pending_ping {
            Some((_, sent_at)) => {
                read.min(config.pong_timeout.saturating_sub(sent_at.elapsed()))
            }
            None => read,
        }
    }

    /// Handle one read timeout.
    async fn on_timeout(&mut self) -> Flow {
        let overdue_pong = self
            .connection
            .pending_ping
            .as_ref()
            .map_or(false, |(_, sent_at)| {
                sent_at.elapsed() >= self.bridge.config.pong_timeout
            });

        if overdue_pong {
            let response = Response::with_action("SESSION", "STATUS")
                .result("I2P_ERROR")
                .key("MESSAGE", "connection timeout: PONG not received");
            let _ = self.write_response(&response).await;
            return Flow::Close;
        }

        if !self.connection.is_handshaked() {
            let response = Response::with_action("HELLO", "REPLY")
                .result("I2P_ERROR")
                .key("MESSAGE", "connection timeout: HELLO not received");
            let _ = self.write_response(&response).await;
            return Flow::Close;
        }

        // an idle 3.2+ connection gets one PING and the pong window before
        // the connection is declared dead
        if self.connection.version_at_least(2) && self.connection.pending_ping.is_none() {
            let text = format!("{:08x}", rand::random::<u32>());

            if self.write_line(format!("PING {text}\n").as_bytes()).await.is_err() {
                return Flow::Close;
            }

            self.connection.set_pending_ping(text);
            return Flow::Continue;
        }

        let response = Response::with_action("SESSION", "STATUS")
            .result("I2P_ERROR")
            .key("MESSAGE", "connection timeout: no command received");
        let _ = self.write_response(&response).await;
        Flow::Close
    }

    /// Handle one command line.
    async fn handle_line(&mut self, line: &str) -> Flow {
        let line = line.trim();

        if line.is_empty() {
            return Flow::Continue;
        }

        if self.connection.state() == ConnectionState::New {
            self.connection.state = ConnectionState::Handshaking;
        }

        let verb = line.split_whitespace().next().unwrap_or("").to_uppercase();

        // handshake gate: nothing but HELLO before the handshake
        if !self.connection.is_handshaked() && verb != "HELLO" {
            let response = Response::with_action("HELLO", "REPLY")
                .error(&ProtocolError::HandshakeNotComplete.into());

            return match self.write_response(&response).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            };
        }

        // auth gate
        if self.bridge.auth.is_enabled()
            && !self.connection.is_authenticated()
            && verb != "HELLO"
            && verb != "AUTH"
        {
            let response = Response::new(verb).error(&ProtocolError::AuthRequired.into());

            return match self.write_response(&response).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            };
        }

        // ping/pong are connection-level: PING is answered in place, PONG
        // clears the outstanding ping and gets no reply
        if verb == "PING" {
            let text = line[4..].trim();
            let pong = match text.is_empty() {
                true => "PONG\n".to_string(),
                false => format!("PONG {text}\n"),
            };

            return match self.write_line(pong.as_bytes()).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            };
        }

        if verb == "PONG" {
            self.connection.clear_pending_ping(line[4..].trim());
            return Flow::Continue;
        }

        let mut command = match Command::parse(line) {
            Ok(command) => command,
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    peer = %self.peer,
                    %line,
                    "malformed command",
                );

                let response = Response::with_action(verb, "REPLY").error(&error.into());

                return match self.write_response(&response).await {
                    Ok(()) => Flow::Continue,
                    Err(_) => Flow::Close,
                };
            }
        };

        // `SIZE=`-bearing commands are followed by payload bytes which must be
        // consumed before the next command line
        if (command.verb == "DATAGRAM" || command.verb == "RAW")
            && command.action.as_deref() == Some("SEND")
        {
            let size = command.option("SIZE").and_then(|size| size.parse::<usize>().ok());

            let Some(size) = size.filter(|size| *size <= MAX_UDP_DATAGRAM_SIZE) else {
                // without a trustworthy size the stream cannot be resynced
                let response = Response::with_action(command.verb.clone(), "STATUS")
                    .result("I2P_ERROR")
                    .key("MESSAGE", "invalid SIZE");
                let _ = self.write_response(&response).await;
                return Flow::Close;
            };

            let mut payload = vec![0u8; size];
            if self.reader.read_exact(&mut payload).await.is_err() {
                return Flow::Close;
            }

            command.payload = payload;
        }

        let Some(handler) = self.bridge.router.route(&command) else {
            let response = CommandRouter::unknown_command(&command);

            return match self.write_response(&response).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            };
        };

        let outcome = {
            let mut context = HandlerContext {
                bridge: &self.bridge,
                connection: &mut self.connection,
            };

            handler(&mut context, &command).await
        };

        self.process_outcome(outcome).await
    }

    /// Apply the outcome of a handler.
    async fn process_outcome(&mut self, outcome: Outcome) -> Flow {
        match outcome {
            Outcome::Reply(response) => {
                if self.write_response(&response).await.is_err() {
                    return Flow::Close;
                }

                self.start_drainer();
                Flow::Continue
            }
            Outcome::Silent => {
                self.start_drainer();
                Flow::Continue
            }
            Outcome::Quit(response) => {
                let _ = self.write_response(&response).await;
                Flow::Close
            }
            Outcome::ConnectStream { stream, silent } => {
                if !silent {
                    let response = Response::with_action("STREAM", "STATUS").ok();

                    if self.write_response(&response).await.is_err() {
                        return Flow::Close;
                    }
                }

                Flow::Splice(stream)
            }
            Outcome::AcceptStream { session, silent } => {
                if !silent {
                    let response = Response::with_action("STREAM", "STATUS").ok();

                    if self.write_response(&response).await.is_err() {
                        return Flow::Close;
                    }
                }

                Flow::Accept { session, silent }
            }
        }
    }

    /// Start the datagram drainer if a freshly bound session needs one.
    fn start_drainer(&mut self) {
        let Some(session) = self.connection.take_pending_drain() else {
            return;
        };

        let writer = Arc::clone(&self.writer);
        let port_aware = self.connection.version_at_least(2);

        self.drainer = Some(tokio::spawn(async move {
            drain_received(session, writer, port_aware).await;
        }));
    }

    /// Wait for one inbound stream, then splice the control socket with it.
    ///
    /// Closing the control socket, or any stray bytes on it, cancel the
    /// accept.
    async fn accept_then_splice(&mut self, session: Arc<Session>, silent: bool) {
        let concurrent = self.connection.version_at_least(2);

        let inbound = {
            let reader = &mut self.reader;

            tokio::select! {
                inbound = session.accept(concurrent) => inbound,
                _ = reader.fill_buf() => Err(Error::Cancelled),
            }
        };

        match inbound {
            Ok(inbound) => {
                if !silent {
                    let peer = match self.connection.version_at_least(2) {
                        true => format!(
                            "{} FROM_PORT={} TO_PORT={}\n",
                            inbound.peer, inbound.from_port, inbound.to_port,
                        ),
                        false => format!("{}\n", inbound.peer),
                    };

                    if self.write_line(peer.as_bytes()).await.is_err() {
                        return;
                    }
                }

                self.splice(inbound.stream).await;
            }
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    peer = %self.peer,
                    ?error,
                    "stream accept failed",
                );

                if !silent {
                    let response = Response::with_action("STREAM", "STATUS").error(&error);
                    let _ = self.write_response(&response).await;
                }
            }
        }
    }

    /// Splice the control socket with `stream` until either side closes.
    async fn splice(&mut self, stream: StreamIo) {
        let (mut remote_read, mut remote_write) = tokio::io::split(stream);
        let mut writer = self.writer.lock().await;
        let reader = &mut self.reader;

        tokio::select! {
            _ = tokio::io::copy(reader, &mut remote_write) => {}
            _ = tokio::io::copy(&mut remote_read, &mut *writer) => {}
        }

        let _ = writer.flush().await;
    }

    /// Write one response line.
    async fn write_response(&self, response: &Response) -> std::io::Result<()> {
        self.write_line(response.to_line().as_bytes()).await
    }

    /// Write raw bytes to the control socket.
    async fn write_line(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;

        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Close the connection: stop the drainer and release the session.
    async fn shutdown(&mut self) {
        if let Some(drainer) = self.drainer.take() {
            drainer.abort();
        }

        if let Some(session) = self.connection.session.take() {
            session.close().await;
        }

        self.connection.state = ConnectionState::Closed;

        tracing::debug!(
            target: LOG_TARGET,
            peer = %self.peer,
            "connection closed",
        );
    }
}

/// Drain received datagrams of a bound session onto the control socket.
async fn drain_received(
    session: Arc<Session>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    port_aware: bool,
) {
    loop {
        let framed = match session.style() {
            SessionStyle::Raw => match session.receive_raw().await {
                Some(datagram) => {
                    let mut response = Response::with_action("RAW", "RECEIVED")
                        .key("SIZE", datagram.data.len().to_string());

                    if port_aware {
                        response = response
                            .key("FROM_PORT", datagram.from_port.to_string())
                            .key("TO_PORT", datagram.to_port.to_string())
                            .key("PROTOCOL", datagram.protocol.to_string());
                    }

                    let mut framed = response.to_line().into_bytes();
                    framed.extend_from_slice(&datagram.data);
                    framed
                }
                None => return,
            },
            _ => match session.receive_datagram().await {
                Some(datagram) => {
                    let mut response = Response::with_action("DATAGRAM", "RECEIVED")
                        .key("DESTINATION", datagram.source.clone())
                        .key("SIZE", datagram.data.len().to_string());

                    if port_aware {
                        response = response
                            .key("FROM_PORT", datagram.from_port.to_string())
                            .key("TO_PORT", datagram.to_port.to_string());
                    }

                    let mut framed = response.to_line().into_bytes();
                    framed.extend_from_slice(&datagram.data);
                    framed
                }
                None => return,
            },
        };

        let mut writer = writer.lock().await;

        if writer.write_all(&framed).await.is_err() {
            return;
        }

        let _ = writer.flush().await;
    }
}

/// Read one line, bounded by `max_len`.
///
/// Returns `Ok(None)` on a clean end of stream.
async fn read_line_limited(
    reader: &mut BufReader<OwnedReadHalf>,
    max_len: usize,
) -> crate::Result<Option<String>> {
    let mut line = Vec::new();

    loop {
        let (consumed, done) = {
            let buffer = reader.fill_buf().await?;

            if buffer.is_empty() {
                return Ok(None);
            }

            match buffer.iter().position(|byte| byte == &b'\n') {
                Some(position) => {
                    line.extend_from_slice(&buffer[..position]);
                    (position + 1, true)
                }
                None => {
                    line.extend_from_slice(buffer);
                    (buffer.len(), false)
                }
            }
        };

        reader.consume(consumed);

        if line.len() > max_len {
            return Err(ProtocolError::LineTooLong.into());
        }

        if done {
            let line =
                String::from_utf8(line).map_err(|_| Error::from(ProtocolError::InvalidSyntax))?;
            return Ok(Some(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let mut connection = Connection::new();
        assert_eq!(connection.state(), ConnectionState::New);
        assert!(!connection.is_handshaked());

        connection.state = ConnectionState::Handshaking;
        assert!(!connection.is_handshaked());

        connection.set_handshaked("3.3".to_string(), None);
        assert_eq!(connection.state(), ConnectionState::Ready);
        assert!(connection.is_handshaked());
        assert!(!connection.is_authenticated());
    }

    #[test]
    fn version_comparison() {
        let mut connection = Connection::new();
        assert!(!connection.version_at_least(0));

        connection.set_handshaked("3.1".to_string(), None);
        assert!(connection.version_at_least(0));
        assert!(connection.version_at_least(1));
        assert!(!connection.version_at_least(2));

        let mut connection = Connection::new();
        connection.set_handshaked("3.3".to_string(), None);
        assert!(connection.version_at_least(2));
        assert!(connection.version_at_least(3));
        assert!(!connection.version_at_least(4));
    }

    #[test]
    fn pending_ping_bookkeeping() {
        let mut connection = Connection::new();
        assert!(connection.pending_ping.is_none());

        connection.set_pending_ping("abc".to_string());
        assert!(connection.pending_ping.is_some());

        connection.clear_pending_ping("abc");
        assert!(connection.pending_ping.is_none());

        // mismatched text still clears the record
        connection.set_pending_ping("abc".to_string());
        connection.clear_pending_ping("xyz");
        assert!(connection.pending_ping.is_none());
    }
}
