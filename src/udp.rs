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

//! UDP datagram plane: the port-7655 ingress listener and the per-session
//! egress forwarder.

use crate::{
    config::{parse_port, parse_protocol, MAX_UDP_DATAGRAM_SIZE},
    error::ConfigError,
    registry::SessionRegistry,
    session::{ReceivedDatagram, ReceivedRawDatagram, SessionStyle},
};

use tokio::net::UdpSocket;

use std::{net::SocketAddr, sync::Arc};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::udp";

/// Parsed header of one ingress datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressHeader {
    /// Protocol version, `3.x`.
    pub version: String,

    /// Session nickname.
    pub nickname: String,

    /// Base64 destination to send to.
    pub destination: String,

    /// Source port override.
    pub from_port: Option<u16>,

    /// Destination port override.
    pub to_port: Option<u16>,

    /// Protocol override for RAW sessions.
    pub protocol: Option<u8>,

    /// Crypto tags to send along.
    pub send_tags: Option<i64>,

    /// Low tag threshold.
    pub tag_threshold: Option<i64>,

    /// Expiration of the datagram, seconds since the epoch.
    pub expires: Option<i64>,

    /// Whether to bundle the leaseset.
    pub send_leaseset: Option<bool>,
}

/// Parse one ingress datagram into its header and payload.
///
/// The wire form is `<version> <nickname> <destination>[ KEY=VALUE]*\n`
/// followed by the payload. Returns `None` on any malformed header; ingress
/// parse failures are silently dropped by the listener.
pub fn parse_ingress(datagram: &[u8]) -> Option<(IngressHeader, &[u8])> {
    let newline = datagram.iter().position(|byte| byte == &b'\n')?;
    let header = std::str::from_utf8(&datagram[..newline]).ok()?;
    let payload = &datagram[newline + 1..];

    let mut tokens = header.split_whitespace();

    let version = tokens.next()?;
    if !is_supported_version(version) {
        return None;
    }

    let nickname = tokens.next().filter(|nickname| !nickname.is_empty())?;
    let destination = tokens.next().filter(|destination| !destination.is_empty())?;

    let mut parsed = IngressHeader {
        version: version.to_string(),
        nickname: nickname.to_string(),
        destination: destination.to_string(),
        from_port: None,
        to_port: None,
        protocol: None,
        send_tags: None,
        tag_threshold: None,
        expires: None,
        send_leaseset: None,
    };

    for token in tokens {
        let (key, value) = token.split_once('=')?;

        match key {
            "FROM_PORT" => parsed.from_port = Some(parse_port(value).ok()?),
            "TO_PORT" => parsed.to_port = Some(parse_port(value).ok()?),
            "PROTOCOL" => parsed.protocol = Some(parse_protocol(value).ok()?),
            "SEND_TAGS" => parsed.send_tags = value.parse().ok(),
            "TAG_THRESHOLD" => parsed.tag_threshold = value.parse().ok(),
            "EXPIRES" => parsed.expires = value.parse().ok(),
            "SEND_LEASESET" => {
                parsed.send_leaseset = match value {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                }
            }
            // unknown keys are silently ignored
            _ => {}
        }
    }

    Some((parsed, payload))
}

/// `3.x` version check for ingress headers.
fn is_supported_version(version: &str) -> bool {
    match version.strip_prefix("3.") {
        Some(minor) => !minor.is_empty() && minor.bytes().all(|byte| byte.is_ascii_digit()),
        None => false,
    }
}

/// Ingress listener on the SAM UDP port.
///
/// Routes datagrams to sessions by nickname; only id lookups go through the
/// registry handle.
pub struct DatagramListener {
    /// The UDP socket.
    socket: UdpSocket,

    /// Registry for nickname lookups.
    registry: Arc<SessionRegistry>,
}

impl DatagramListener {
    /// Bind a new [`DatagramListener`] to `address`.
    pub async fn bind(address: &str, registry: Arc<SessionRegistry>) -> crate::Result<Self> {
        let socket = UdpSocket::bind(address).await?;

        tracing::info!(
            target: LOG_TARGET,
            address = %socket.local_addr()?,
            "udp datagram plane listening",
        );

        Ok(Self { socket, registry })
    }

    /// Local address of the listener.
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.socket.local_addr().map_err(From::from)
    }

    /// Run the ingress loop.
    pub async fn run(self) {
        let mut buffer = vec![0u8; MAX_UDP_DATAGRAM_SIZE];

        loop {
            let nread = match self.socket.recv_from(&mut buffer).await {
                Ok((nread, _)) => nread,
                Err(error) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        ?error,
                        "udp receive failed",
                    );
                    continue;
                }
            };

            self.handle_datagram(&buffer[..nread]).await;
        }
    }

    /// Parse and route one ingress datagram.
    async fn handle_datagram(&self, datagram: &[u8]) {
        let Some((header, payload)) = parse_ingress(datagram) else {
            tracing::trace!(
                target: LOG_TARGET,
                "malformed ingress datagram, dropping",
            );
            return;
        };

        let Some(session) = self.registry.get(&header.nickname) else {
            tracing::trace!(
                target: LOG_TARGET,
                nickname = %header.nickname,
                "no session for ingress datagram, dropping",
            );
            return;
        };

        let from_port = header.from_port.unwrap_or(session.config().from_port);
        let to_port = header.to_port.unwrap_or(session.config().to_port);

        let result = match session.style() {
            SessionStyle::Raw => {
                session
                    .send_raw(
                        &header.destination,
                        payload,
                        header.protocol.unwrap_or(0),
                        from_port,
                        to_port,
                    )
                    .await
            }
            SessionStyle::Datagram | SessionStyle::Datagram2 | SessionStyle::Datagram3 => {
                session.send_datagram(&header.destination, payload, from_port, to_port).await
            }
            style => {
                tracing::trace!(
                    target: LOG_TARGET,
                    nickname = %header.nickname,
                    ?style,
                    "session style cannot send datagrams, dropping",
                );
                return;
            }
        };

        if let Err(error) = result {
            tracing::debug!(
                target: LOG_TARGET,
                nickname = %header.nickname,
                ?error,
                "ingress datagram send failed",
            );
        }
    }
}

/// Egress forwarder of one session.
///
/// Owns a UDP socket bound to an ephemeral port plus the client's target
/// address. All sends are best-effort; write errors are ignored.
pub struct DatagramForwarder {
    /// The UDP socket.
    socket: UdpSocket,

    /// Target address datagrams are forwarded to.
    target: SocketAddr,

    /// Whether repliable framing carries `FROM_PORT`/`TO_PORT`.
    port_aware: bool,
}

impl DatagramForwarder {
    /// Create new [`DatagramForwarder`] towards `host:port`.
    pub async fn new(host: &str, port: u16, port_aware: bool) -> crate::Result<Self> {
        if port == 0 {
            return Err(ConfigError::InvalidForwardingPort.into());
        }

        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or(ConfigError::InvalidForwardingPort)?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            target,
            port_aware,
        })
    }

    /// Forward one repliable datagram.
    pub async fn forward_datagram(&self, datagram: &ReceivedDatagram) {
        let framed = frame_datagram(datagram, self.port_aware);

        if let Err(error) = self.socket.send_to(&framed, self.target).await {
            tracing::trace!(
                target: LOG_TARGET,
                ?error,
                "datagram forward failed",
            );
        }
    }

    /// Forward one raw datagram.
    pub async fn forward_raw(&self, datagram: &ReceivedRawDatagram, header: bool) {
        let framed = frame_raw(datagram, header);

        if let Err(error) = self.socket.send_to(&framed, self.target).await {
            tracing::trace!(
                target: LOG_TARGET,
                ?error,
                "raw datagram forward failed",
            );
        }
    }
}

/// Frame a repliable datagram for UDP egress.
pub(crate) fn frame_datagram(datagram: &ReceivedDatagram, port_aware: bool) -> Vec<u8> {
    let header = match port_aware {
        true => format!(
            "{} FROM_PORT={} TO_PORT={}\n",
            datagram.source, datagram.from_port, datagram.to_port,
        ),
        false => format!("{}\n", datagram.source),
    };

    let mut framed = header.into_bytes();
    framed.extend_from_slice(&datagram.data);
    framed
}

/// Frame a raw datagram for UDP egress.
pub(crate) fn frame_raw(datagram: &ReceivedRawDatagram, header: bool) -> Vec<u8> {
    match header {
        true => {
            let header = format!(
                "FROM_PORT={} TO_PORT={} PROTOCOL={}\n",
                datagram.from_port, datagram.to_port, datagram.protocol,
            );

            let mut framed = header.into_bytes();
            framed.extend_from_slice(&datagram.data);
            framed
        }
        false => datagram.data.clone(),
    }
}
