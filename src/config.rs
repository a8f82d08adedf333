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

use crate::error::ConfigError;

use std::{collections::HashMap, time::Duration};

/// Default port for the SAM TCP control socket.
pub const SAM_TCP_PORT: u16 = 7656;

/// Default port for the SAM UDP datagram socket.
pub const SAM_UDP_PORT: u16 = 7655;

/// Default port of the I2CP router.
pub const I2CP_PORT: u16 = 7654;

/// Oldest protocol version the bridge negotiates.
pub const VERSION_MIN: &str = "3.0";

/// Newest protocol version the bridge negotiates.
pub const VERSION_MAX: &str = "3.3";

/// Maximum payload size for repliable datagrams.
pub const MAX_DATAGRAM_SIZE: usize = 31744;

/// Maximum payload size for raw datagrams.
pub const MAX_RAW_SIZE: usize = 32768;

/// Maximum size of a UDP datagram on the SAM UDP socket, header included.
pub const MAX_UDP_DATAGRAM_SIZE: usize = 65536;

/// I2CP protocol number reserved for streaming.
pub const PROTOCOL_STREAMING: u8 = 6;

/// I2CP protocol number of repliable datagrams.
pub const PROTOCOL_DATAGRAM: u8 = 17;

/// I2CP protocol number of authenticated datagrams with replay protection.
pub const PROTOCOL_DATAGRAM2: u8 = 19;

/// I2CP protocol number of hash-sourced repliable datagrams.
pub const PROTOCOL_DATAGRAM3: u8 = 20;

/// Protocol numbers RAW sessions must not use.
pub const FORBIDDEN_RAW_PROTOCOLS: [u8; 4] = [
    PROTOCOL_STREAMING,
    PROTOCOL_DATAGRAM,
    PROTOCOL_DATAGRAM2,
    PROTOCOL_DATAGRAM3,
];

/// Default protocol for RAW sessions.
pub const DEFAULT_RAW_PROTOCOL: u8 = 18;

/// Bridge-wide configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// TCP control socket listen address.
    ///
    /// Defaults to `127.0.0.1:7656`.
    pub tcp_listen: String,

    /// UDP datagram socket listen address.
    ///
    /// Defaults to `127.0.0.1:7655`.
    pub udp_listen: String,

    /// Address of the I2CP router.
    ///
    /// Defaults to `127.0.0.1:7654`.
    pub i2cp_addr: String,

    /// Maximum length of one command line, in bytes.
    pub max_line_len: usize,

    /// Read deadline before `HELLO` has been received.
    pub handshake_timeout: Duration,

    /// Read deadline after `HELLO` has been received.
    pub command_timeout: Duration,

    /// Deadline for a `PONG` answering an outstanding `PING`.
    pub pong_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tcp_listen: format!("127.0.0.1:{SAM_TCP_PORT}"),
            udp_listen: format!("127.0.0.1:{SAM_UDP_PORT}"),
            i2cp_addr: format!("127.0.0.1:{I2CP_PORT}"),
            max_line_len: 65536,
            handshake_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-session configuration, parsed from `SESSION CREATE`/`SESSION ADD` options.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signature type of the destination.
    ///
    /// Defaults to `7` (Ed25519).
    pub signature_type: u16,

    /// Leaseset encryption types.
    ///
    /// Defaults to `[4, 0]`.
    pub encryption_types: Vec<u16>,

    /// Inbound tunnel quantity.
    pub inbound_quantity: u8,

    /// Inbound tunnel length, in hops.
    pub inbound_length: u8,

    /// Inbound backup tunnel quantity.
    pub inbound_backup_quantity: u8,

    /// Outbound tunnel quantity.
    pub outbound_quantity: u8,

    /// Outbound tunnel length, in hops.
    pub outbound_length: u8,

    /// Outbound backup tunnel quantity.
    pub outbound_backup_quantity: u8,

    /// Default source port of outgoing traffic.
    pub from_port: u16,

    /// Default destination port of outgoing traffic.
    pub to_port: u16,

    /// I2CP protocol for RAW sessions.
    ///
    /// Defaults to `18`; `{6, 17, 19, 20}` are forbidden.
    pub protocol: u8,

    /// Whether forwarded raw datagrams carry a port/protocol header line.
    pub header_enabled: bool,

    /// Subsession routing key: port.
    pub listen_port: u16,

    /// Subsession routing key: protocol.
    pub listen_protocol: u8,

    /// Idle period after which tunnel count is reduced, if any.
    pub reduce_idle: Option<Duration>,

    /// Idle period after which the session is closed, if any.
    pub close_idle: Option<Duration>,

    /// Whether received datagrams bypass per-message acknowledgement.
    pub fast_receive: bool,

    /// Host to which received datagrams are forwarded over UDP.
    pub udp_host: String,

    /// Port to which received datagrams are forwarded over UDP.
    ///
    /// `0` disables forwarding.
    pub udp_port: u16,

    /// Raw offline signature block, if the destination uses offline keys.
    pub offline_signature: Option<Vec<u8>>,

    /// Opaque `i2cp.*`/`streaming.*` options passed through to the router.
    pub i2cp_options: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signature_type: 7,
            encryption_types: vec![4, 0],
            inbound_quantity: 3,
            inbound_length: 3,
            inbound_backup_quantity: 0,
            outbound_quantity: 3,
            outbound_length: 3,
            outbound_backup_quantity: 0,
            from_port: 0,
            to_port: 0,
            protocol: DEFAULT_RAW_PROTOCOL,
            header_enabled: false,
            listen_port: 0,
            listen_protocol: 0,
            reduce_idle: None,
            close_idle: None,
            fast_receive: true,
            udp_host: "127.0.0.1".to_string(),
            udp_port: 0,
            offline_signature: None,
            i2cp_options: HashMap::new(),
        }
    }
}

impl SessionConfig {
    /// Parse a [`SessionConfig`] from the options of a `SESSION CREATE`/`SESSION ADD` command.
    ///
    /// Unrecognized options that are not `i2cp.*`/`streaming.*` passthrough are ignored.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = options.get("SIGNATURE_TYPE") {
            config.signature_type = parse_signature_type(value)?;
        }

        if let Some(value) = options.get("FROM_PORT") {
            config.from_port = parse_port(value)?;
        }

        if let Some(value) = options.get("TO_PORT") {
            config.to_port = parse_port(value)?;
        }

        if let Some(value) = options.get("PROTOCOL") {
            config.protocol = parse_protocol(value)?;
        }

        if let Some(value) = options.get("HEADER") {
            config.header_enabled = value.eq_ignore_ascii_case("true");
        }

        if let Some(value) = options.get("LISTEN_PORT") {
            config.listen_port = parse_port(value)?;
        }

        if let Some(value) = options.get("LISTEN_PROTOCOL") {
            config.listen_protocol = parse_protocol(value)?;
        }

        if let Some(value) = options.get("HOST") {
            config.udp_host = value.clone();
        }

        if let Some(value) = options.get("PORT") {
            config.udp_port =
                parse_port(value).map_err(|_| ConfigError::InvalidForwardingPort)?;
        }

        for (key, field) in [
            ("inbound.quantity", &mut config.inbound_quantity),
            ("inbound.length", &mut config.inbound_length),
            ("inbound.backupQuantity", &mut config.inbound_backup_quantity),
            ("outbound.quantity", &mut config.outbound_quantity),
            ("outbound.length", &mut config.outbound_length),
            ("outbound.backupQuantity", &mut config.outbound_backup_quantity),
        ] {
            if let Some(value) = options.get(key) {
                *field = parse_tunnel_option(value)?;
            }
        }

        for (key, value) in options {
            if key.starts_with("i2cp.") || key.starts_with("streaming.") {
                config.i2cp_options.insert(key.clone(), value.clone());
            }
        }

        if let Some(value) = config.i2cp_options.get("i2cp.reduceIdleTime") {
            config.reduce_idle = parse_millis(value);
        }

        if let Some(value) = config.i2cp_options.get("i2cp.closeIdleTime") {
            config.close_idle = parse_millis(value);
        }

        if let Some(value) = config.i2cp_options.get("i2cp.fastReceive") {
            config.fast_receive = value.eq_ignore_ascii_case("true");
        }

        if let Some(value) = config.i2cp_options.get("i2cp.leaseSetEncType") {
            config.encryption_types = value
                .split(',')
                .map(|value| value.trim().parse::<u16>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| ConfigError::InvalidTunnelConfig)?;
        }

        Ok(config)
    }

    /// Whether UDP forwarding is enabled for the session.
    pub fn forwarding_enabled(&self) -> bool {
        self.udp_port != 0
    }
}

/// Validate a RAW protocol number.
pub fn validate_raw_protocol(protocol: u8) -> Result<u8, ConfigError> {
    if FORBIDDEN_RAW_PROTOCOLS.contains(&protocol) {
        return Err(ConfigError::InvalidProtocol);
    }

    Ok(protocol)
}

/// Parse a port, rejecting anything outside `0..=65535`.
pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<i64>()
        .ok()
        .filter(|port| (0..=65535).contains(port))
        .map(|port| port as u16)
        .ok_or(ConfigError::InvalidPort)
}

/// Parse a protocol number, rejecting anything outside `0..=255`.
pub fn parse_protocol(value: &str) -> Result<u8, ConfigError> {
    value
        .parse::<i64>()
        .ok()
        .filter(|protocol| (0..=255).contains(protocol))
        .map(|protocol| protocol as u8)
        .ok_or(ConfigError::InvalidProtocol)
}

fn parse_signature_type(value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidTunnelConfig)
}

fn parse_tunnel_option(value: &str) -> Result<u8, ConfigError> {
    value
        .parse::<i64>()
        .ok()
        .filter(|count| (0..=16).contains(count))
        .map(|count| count as u8)
        .ok_or(ConfigError::InvalidTunnelConfig)
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_millis)
}
