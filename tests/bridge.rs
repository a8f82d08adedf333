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

//! End-to-end tests of the bridge over loopback TCP, backed by the
//! in-process router.

use sam_bridge::{
    config::BridgeConfig,
    destination::Destination,
    i2cp::{EmbeddedRouter, RouterBackend},
    proto::Command,
    server::{BridgeState, SamBridge},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::oneshot,
};

use std::{net::SocketAddr, sync::Arc, time::Duration};

/// A running bridge plus everything a test needs to poke it.
struct TestBridge {
    /// TCP control socket address.
    addr: SocketAddr,

    /// UDP datagram plane address.
    udp_addr: SocketAddr,

    /// Shared bridge state.
    state: Arc<BridgeState>,

    /// The in-process router.
    router: Arc<EmbeddedRouter>,

    /// Dropping this shuts the bridge down.
    _shutdown: oneshot::Sender<()>,
}

async fn start_bridge() -> TestBridge {
    start_bridge_with_config(BridgeConfig::default()).await
}

async fn start_bridge_with_config(mut config: BridgeConfig) -> TestBridge {
    config.tcp_listen = "127.0.0.1:0".to_string();
    config.udp_listen = "127.0.0.1:0".to_string();

    let router = Arc::new(EmbeddedRouter::new());
    let bridge = SamBridge::new(config, Arc::clone(&router) as Arc<dyn RouterBackend>)
        .await
        .unwrap();

    let addr = bridge.local_addr().unwrap();
    let udp_addr = bridge.udp_addr();
    let state = Arc::clone(bridge.state());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(bridge.run_with_shutdown(async {
        let _ = shutdown_rx.await;
    }));

    TestBridge {
        addr,
        udp_addr,
        state,
        router,
        _shutdown: shutdown_tx,
    }
}

/// A SAM client connection.
struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read_half, write_half) = TcpStream::connect(addr).await.unwrap().into_split();

        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();

        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("response within deadline")
            .unwrap();

        line.trim_end().to_string()
    }

    async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buffer = vec![0u8; len];

        tokio::time::timeout(Duration::from_secs(5), self.reader.read_exact(&mut buffer))
            .await
            .expect("payload within deadline")
            .unwrap();

        buffer
    }

    async fn hello(&mut self) -> String {
        self.send("HELLO VERSION MIN=3.0 MAX=3.3").await;
        let reply = self.read_line().await;
        assert!(reply.contains("RESULT=OK"), "unexpected hello reply: {reply}");
        reply
    }

    /// Create a session and return its private destination key.
    async fn create_session(&mut self, style: &str, id: &str) -> String {
        self.send(&format!(
            "SESSION CREATE STYLE={style} ID={id} DESTINATION=TRANSIENT"
        ))
        .await;

        let reply = self.read_line().await;
        assert!(reply.contains("RESULT=OK"), "session create failed: {reply}");

        let parsed = Command::parse(&reply).unwrap();
        parsed.option("DESTINATION").unwrap().to_string()
    }
}

fn destination_of(private_key: &str) -> String {
    Destination::from_private_b64(private_key).unwrap().to_b64()
}

#[tokio::test]
async fn handshake() {
    let bridge = start_bridge().await;
    let mut client = Client::connect(bridge.addr).await;

    client.send("HELLO VERSION MIN=3.0 MAX=3.3").await;
    assert_eq!(client.read_line().await, "HELLO REPLY RESULT=OK VERSION=3.3");
}

#[tokio::test]
async fn handshake_caps_to_client_maximum() {
    let bridge = start_bridge().await;
    let mut client = Client::connect(bridge.addr).await;

    client.send("HELLO VERSION MIN=3.0 MAX=3.1").await;
    assert_eq!(client.read_line().await, "HELLO REPLY RESULT=OK VERSION=3.1");
}

#[tokio::test]
async fn handshake_no_version_overlap() {
    let bridge = start_bridge().await;
    let mut client = Client::connect(bridge.addr).await;

    client.send("HELLO VERSION MIN=3.4 MAX=3.9").await;
    assert_eq!(client.read_line().await, "HELLO REPLY RESULT=NOVERSION");
}

#[tokio::test]
async fn commands_rejected_before_handshake() {
    let bridge = start_bridge().await;
    let mut client = Client::connect(bridge.addr).await;

    client.send("SESSION CREATE STYLE=STREAM ID=x").await;
    let reply = client.read_line().await;

    assert!(reply.contains("I2P_ERROR"), "unexpected reply: {reply}");
    assert!(reply.to_lowercase().contains("handshake"), "unexpected reply: {reply}");

    // the connection stays open and can still handshake
    client.hello().await;
}

#[tokio::test]
async fn authentication_required() {
    let bridge = start_bridge().await;
    bridge.state.auth.add_user("admin", "secret").unwrap();
    bridge.state.auth.set_enabled(true);

    // no credentials
    let mut client = Client::connect(bridge.addr).await;
    client.send("HELLO VERSION MIN=3.0 MAX=3.3").await;
    assert!(client.read_line().await.contains("RESULT=I2P_ERROR"));

    // wrong password
    let mut client = Client::connect(bridge.addr).await;
    client.send("HELLO VERSION MIN=3.0 MAX=3.3 USER=admin PASSWORD=wrong").await;
    assert!(client.read_line().await.contains("RESULT=I2P_ERROR"));

    // correct credentials
    let mut client = Client::connect(bridge.addr).await;
    client.send("HELLO VERSION MIN=3.0 MAX=3.3 USER=admin PASSWORD=secret").await;
    assert!(client.read_line().await.contains("RESULT=OK"));

    // non-HELLO commands are gated until authenticated
    let mut client = Client::connect(bridge.addr).await;
    client.send("NAMING LOOKUP NAME=host.i2p").await;
    let reply = client.read_line().await;
    assert!(reply.contains("authentication required"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn duplicate_session_id() {
    let bridge = start_bridge().await;

    let mut first = Client::connect(bridge.addr).await;
    first.hello().await;
    first.create_session("STREAM", "dup").await;

    let mut second = Client::connect(bridge.addr).await;
    second.hello().await;
    second.send("SESSION CREATE STYLE=STREAM ID=dup DESTINATION=TRANSIENT").await;

    let reply = second.read_line().await;
    assert!(
        reply.starts_with("SESSION STATUS RESULT=DUPLICATED_ID"),
        "unexpected reply: {reply}",
    );
}

#[tokio::test]
async fn session_released_on_connection_close() {
    let bridge = start_bridge().await;

    {
        let mut client = Client::connect(bridge.addr).await;
        client.hello().await;
        client.create_session("STREAM", "ephemeral").await;
        assert_eq!(bridge.state.registry.count(), 1);
    }

    // closing the control connection destroys the session
    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.state.registry.count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session unregistered after close");
}

#[tokio::test]
async fn stream_connect_accept() {
    let bridge = start_bridge().await;

    let mut alice = Client::connect(bridge.addr).await;
    alice.hello().await;
    alice.create_session("STREAM", "alice").await;

    let mut bob = Client::connect(bridge.addr).await;
    bob.hello().await;
    let bob_dest = destination_of(&bob.create_session("STREAM", "bob").await);

    // bob accepts on a separate control connection
    let mut acceptor = Client::connect(bridge.addr).await;
    acceptor.hello().await;
    acceptor.send("STREAM ACCEPT ID=bob").await;
    assert_eq!(acceptor.read_line().await, "STREAM STATUS RESULT=OK");

    // alice dials bob
    let mut connector = Client::connect(bridge.addr).await;
    connector.hello().await;
    connector.send(&format!("STREAM CONNECT ID=alice DESTINATION={bob_dest}")).await;
    assert_eq!(connector.read_line().await, "STREAM STATUS RESULT=OK");

    // the acceptor first receives the peer destination
    let peer = acceptor.read_line().await;
    let alice_dest = peer.split_whitespace().next().unwrap();
    assert!(peer.contains("FROM_PORT=0"), "unexpected peer line: {peer}");
    assert!(!alice_dest.is_empty());

    // data flows both ways
    connector.send_raw(b"ping\n").await;
    assert_eq!(acceptor.read_line().await, "ping");

    acceptor.send_raw(b"pong\n").await;
    assert_eq!(connector.read_line().await, "pong");
}

#[tokio::test]
async fn stream_connect_unknown_session() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;
    client.send("STREAM CONNECT ID=ghost DESTINATION=aGVsbG8=").await;

    let reply = client.read_line().await;
    assert!(reply.starts_with("STREAM STATUS RESULT=INVALID_ID"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn stream_connect_unreachable_peer() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;
    client.create_session("STREAM", "lonely").await;

    let peer = Destination::generate(7).to_b64();

    let mut connector = Client::connect(bridge.addr).await;
    connector.hello().await;
    connector.send(&format!("STREAM CONNECT ID=lonely DESTINATION={peer}")).await;

    let reply = connector.read_line().await;
    assert!(
        reply.starts_with("STREAM STATUS RESULT=CANT_REACH_PEER"),
        "unexpected reply: {reply}",
    );
}

#[tokio::test]
async fn stream_forward() {
    let bridge = start_bridge().await;

    // the server the session forwards inbound streams to
    let target = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();

    let mut alice = Client::connect(bridge.addr).await;
    alice.hello().await;
    let alice_dest = destination_of(&alice.create_session("STREAM", "alice").await);

    let mut forwarder = Client::connect(bridge.addr).await;
    forwarder.hello().await;
    forwarder.send(&format!("STREAM FORWARD ID=alice PORT={target_port}")).await;
    assert_eq!(forwarder.read_line().await, "STREAM STATUS RESULT=OK");

    let mut bob = Client::connect(bridge.addr).await;
    bob.hello().await;
    bob.create_session("STREAM", "bob").await;

    let mut connector = Client::connect(bridge.addr).await;
    connector.hello().await;
    connector.send(&format!("STREAM CONNECT ID=bob DESTINATION={alice_dest}")).await;
    assert_eq!(connector.read_line().await, "STREAM STATUS RESULT=OK");

    connector.send_raw(b"forwarded data\n").await;

    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), target.accept())
        .await
        .expect("forwarded connection")
        .unwrap();

    let mut reader = BufReader::new(stream);

    // non-silent forwards receive the peer destination first
    let mut peer = String::new();
    reader.read_line(&mut peer).await.unwrap();
    assert!(!peer.trim().is_empty());

    let mut data = String::new();
    reader.read_line(&mut data).await.unwrap();
    assert_eq!(data.trim_end(), "forwarded data");
}

#[tokio::test]
async fn accept_forward_mutual_exclusion() {
    let bridge = start_bridge().await;

    let target = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();

    let mut alice = Client::connect(bridge.addr).await;
    alice.hello().await;
    alice.create_session("STREAM", "alice").await;

    let mut forwarder = Client::connect(bridge.addr).await;
    forwarder.hello().await;
    forwarder.send(&format!("STREAM FORWARD ID=alice PORT={target_port}")).await;
    assert_eq!(forwarder.read_line().await, "STREAM STATUS RESULT=OK");

    // accept while forwarding is refused
    let mut acceptor = Client::connect(bridge.addr).await;
    acceptor.hello().await;
    acceptor.send("STREAM ACCEPT ID=alice").await;

    let reply = acceptor.read_line().await;
    assert!(reply.contains("RESULT=I2P_ERROR"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn datagrams_over_control_socket() {
    let bridge = start_bridge().await;

    let mut carol = Client::connect(bridge.addr).await;
    carol.hello().await;
    let carol_dest = destination_of(&carol.create_session("DATAGRAM", "carol").await);

    let mut dave = Client::connect(bridge.addr).await;
    dave.hello().await;
    let dave_dest = destination_of(&dave.create_session("DATAGRAM", "dave").await);

    // dave sends over the control socket, the payload follows the line
    dave.send_raw(format!("DATAGRAM SEND DESTINATION={carol_dest} SIZE=5\n").as_bytes())
        .await;
    dave.send_raw(b"hello").await;

    // carol's connection has no forwarding port so the datagram is written
    // onto her control socket
    let header = carol.read_line().await;
    let parsed = Command::parse(&header).unwrap();

    assert_eq!(parsed.verb, "DATAGRAM");
    assert_eq!(parsed.action.as_deref(), Some("RECEIVED"));
    assert_eq!(parsed.option("DESTINATION"), Some(dave_dest.as_str()));
    assert_eq!(parsed.option("SIZE"), Some("5"));
    assert_eq!(carol.read_exact(5).await, b"hello".to_vec());
}

#[tokio::test]
async fn datagram_size_validation() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;
    let dest = destination_of(&client.create_session("DATAGRAM", "sender").await);

    // empty payloads are rejected
    client.send_raw(format!("DATAGRAM SEND DESTINATION={dest} SIZE=0\n").as_bytes()).await;

    let reply = client.read_line().await;
    assert!(reply.starts_with("DATAGRAM STATUS RESULT=I2P_ERROR"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn udp_plane_round_trip() {
    let bridge = start_bridge().await;

    // alice forwards received datagrams to a local UDP socket
    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_port = receiver.local_addr().unwrap().port();

    let mut alice = Client::connect(bridge.addr).await;
    alice.hello().await;
    alice
        .send(&format!(
            "SESSION CREATE STYLE=DATAGRAM ID=alice DESTINATION=TRANSIENT \
             HOST=127.0.0.1 PORT={receiver_port}"
        ))
        .await;

    let reply = alice.read_line().await;
    assert!(reply.contains("RESULT=OK"), "session create failed: {reply}");
    let alice_dest =
        destination_of(Command::parse(&reply).unwrap().option("DESTINATION").unwrap());

    let mut bob = Client::connect(bridge.addr).await;
    bob.hello().await;
    let bob_dest = destination_of(&bob.create_session("DATAGRAM", "bob").await);

    // bob sends through the UDP ingress port
    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut datagram = format!("3.3 bob {alice_dest}\n").into_bytes();
    datagram.extend_from_slice(b"udp hello");
    sender.send_to(&datagram, bridge.udp_addr).await.unwrap();

    // the bridge forwards the received datagram to alice's UDP socket
    let mut buffer = vec![0u8; 65536];
    let nread = tokio::time::timeout(Duration::from_secs(5), receiver.recv(&mut buffer))
        .await
        .expect("forwarded datagram")
        .unwrap();

    let forwarded = &buffer[..nread];
    let newline = forwarded.iter().position(|byte| byte == &b'\n').unwrap();
    let header = std::str::from_utf8(&forwarded[..newline]).unwrap();

    assert!(header.starts_with(&bob_dest), "unexpected header: {header}");
    assert!(header.contains("FROM_PORT=0"), "unexpected header: {header}");
    assert_eq!(&forwarded[newline + 1..], b"udp hello");
}

#[tokio::test]
async fn udp_plane_drops_malformed_and_unknown() {
    let bridge = start_bridge().await;

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // none of these crash the plane or produce a reply
    sender.send_to(b"garbage", bridge.udp_addr).await.unwrap();
    sender.send_to(b"2.0 nick dest\npayload", bridge.udp_addr).await.unwrap();
    sender.send_to(b"3.3 ghost dest\npayload", bridge.udp_addr).await.unwrap();

    // the plane is still alive afterwards
    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;
}

#[tokio::test]
async fn primary_session_with_subsessions() {
    let bridge = start_bridge().await;

    let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let receiver_port = receiver.local_addr().unwrap().port();

    let mut primary = Client::connect(bridge.addr).await;
    primary.hello().await;
    let primary_dest = destination_of(&primary.create_session("PRIMARY", "prim").await);

    // datagram subsession listening on port 7777, forwarding to our socket
    primary
        .send(&format!(
            "SESSION ADD STYLE=DATAGRAM ID=sub-dg LISTEN_PORT=7777 \
             HOST=127.0.0.1 PORT={receiver_port}"
        ))
        .await;
    assert!(primary.read_line().await.contains("RESULT=OK"));

    // sibling id collision
    primary.send("SESSION ADD STYLE=RAW ID=sub-dg").await;
    let reply = primary.read_line().await;
    assert!(reply.contains("RESULT=DUPLICATED_ID"), "unexpected reply: {reply}");

    // routing key collision
    primary.send("SESSION ADD STYLE=STREAM ID=sub-other LISTEN_PORT=7777").await;
    let reply = primary.read_line().await;
    assert!(reply.contains("RESULT=I2P_ERROR"), "unexpected reply: {reply}");

    // MASTER is an alias for PRIMARY and cannot be nested
    primary.send("SESSION ADD STYLE=MASTER ID=nested").await;
    let reply = primary.read_line().await;
    assert!(reply.contains("RESULT=I2P_ERROR"), "unexpected reply: {reply}");

    // traffic to port 7777 reaches the subsession and is forwarded
    let mut bob = Client::connect(bridge.addr).await;
    bob.hello().await;
    bob.create_session("DATAGRAM", "bob").await;

    bob.send_raw(
        format!("DATAGRAM SEND DESTINATION={primary_dest} TO_PORT=7777 SIZE=6\n").as_bytes(),
    )
    .await;
    bob.send_raw(b"routed").await;

    let mut buffer = vec![0u8; 65536];
    let nread = tokio::time::timeout(Duration::from_secs(5), receiver.recv(&mut buffer))
        .await
        .expect("routed datagram")
        .unwrap();

    let forwarded = &buffer[..nread];
    let newline = forwarded.iter().position(|byte| byte == &b'\n').unwrap();
    assert_eq!(&forwarded[newline + 1..], b"routed");

    // subsession removal
    primary.send("SESSION REMOVE ID=sub-dg").await;
    assert!(primary.read_line().await.contains("RESULT=OK"));

    primary.send("SESSION REMOVE ID=sub-dg").await;
    let reply = primary.read_line().await;
    assert!(reply.contains("RESULT=INVALID_ID"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn naming_lookup() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;
    let dest = destination_of(&client.create_session("STREAM", "me-session").await);

    // ME resolves the bound session
    client.send("NAMING LOOKUP NAME=ME").await;
    let reply = client.read_line().await;
    let parsed = Command::parse(&reply).unwrap();
    assert_eq!(parsed.option("RESULT"), Some("OK"));
    assert_eq!(parsed.option("VALUE"), Some(dest.as_str()));

    // registered names resolve through the router
    bridge.router.register_name("host.i2p", &dest);

    let mut other = Client::connect(bridge.addr).await;
    other.hello().await;
    other.send("NAMING LOOKUP NAME=host.i2p").await;
    let reply = other.read_line().await;
    assert!(reply.contains("RESULT=OK"), "unexpected reply: {reply}");
    assert!(reply.contains("VALUE="), "unexpected reply: {reply}");

    // unknown names
    other.send("NAMING LOOKUP NAME=unknown.i2p").await;
    let reply = other.read_line().await;
    assert!(reply.contains("RESULT=KEY_NOT_FOUND"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn dest_generate() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;

    client.send("DEST GENERATE SIGNATURE_TYPE=7").await;
    let reply = client.read_line().await;
    let parsed = Command::parse(&reply).unwrap();

    let public = parsed.option("PUB").unwrap();
    let private = parsed.option("PRIV").unwrap();

    // the private key restores the advertised destination
    assert_eq!(Destination::from_private_b64(private).unwrap().to_b64(), public);

    // generation does not register anything
    assert_eq!(bridge.state.registry.count(), 0);
}

#[tokio::test]
async fn ping_pong() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;

    client.send("PING are-you-there").await;
    assert_eq!(client.read_line().await, "PONG are-you-there");

    client.send("PING").await;
    assert_eq!(client.read_line().await, "PONG");
}

#[tokio::test]
async fn unknown_command() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;

    client.send("BOGUS ACTION KEY=VALUE").await;
    assert_eq!(
        client.read_line().await,
        "BOGUS REPLY RESULT=I2P_ERROR MESSAGE=\"unknown command\"",
    );
}

#[tokio::test]
async fn quit_closes_connection() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;

    client.send("QUIT").await;
    assert!(client.read_line().await.contains("RESULT=OK"));

    // the socket is closed afterwards
    let mut line = String::new();
    let nread = tokio::time::timeout(
        Duration::from_secs(5),
        client.reader.read_line(&mut line),
    )
    .await
    .expect("eof within deadline")
    .unwrap();
    assert_eq!(nread, 0);
}

#[tokio::test]
async fn handshake_timeout() {
    let bridge = start_bridge_with_config(BridgeConfig {
        handshake_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let mut client = Client::connect(bridge.addr).await;

    let reply = client.read_line().await;
    assert!(
        reply.contains("connection timeout: HELLO not received"),
        "unexpected reply: {reply}",
    );
}

#[tokio::test]
async fn command_timeout_pre_32_client() {
    let bridge = start_bridge_with_config(BridgeConfig {
        command_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let mut client = Client::connect(bridge.addr).await;
    client.send("HELLO VERSION MIN=3.0 MAX=3.1").await;
    assert!(client.read_line().await.contains("RESULT=OK"));

    let reply = client.read_line().await;
    assert!(
        reply.contains("connection timeout: no command received"),
        "unexpected reply: {reply}",
    );
}

#[tokio::test]
async fn idle_32_client_gets_pinged() {
    let bridge = start_bridge_with_config(BridgeConfig {
        command_timeout: Duration::from_millis(200),
        pong_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;

    // the idle connection receives a PING; answering it keeps it alive
    let ping = client.read_line().await;
    let text = ping.strip_prefix("PING ").expect("server ping");
    client.send(&format!("PONG {text}")).await;

    // another idle period, this time the PING goes unanswered
    let ping = client.read_line().await;
    assert!(ping.starts_with("PING "), "unexpected line: {ping}");

    let reply = client.read_line().await;
    assert!(
        reply.contains("connection timeout: PONG not received"),
        "unexpected reply: {reply}",
    );
}

#[tokio::test]
async fn auth_runtime_management() {
    let bridge = start_bridge().await;

    let mut client = Client::connect(bridge.addr).await;
    client.hello().await;

    client.send("AUTH ADD USER=admin PASSWORD=secret").await;
    assert_eq!(client.read_line().await, "AUTH STATUS RESULT=OK");

    client.send("AUTH LIST").await;
    assert_eq!(client.read_line().await, "AUTH STATUS RESULT=OK USERS=admin");

    client.send("AUTH ENABLE").await;
    assert_eq!(client.read_line().await, "AUTH STATUS RESULT=OK");
    assert!(bridge.state.auth.is_enabled());

    client.send("AUTH DISABLE").await;
    assert_eq!(client.read_line().await, "AUTH STATUS RESULT=OK");

    client.send("AUTH REMOVE USER=admin").await;
    assert_eq!(client.read_line().await, "AUTH STATUS RESULT=OK");

    client.send("AUTH REMOVE USER=admin").await;
    assert!(client.read_line().await.contains("no such user"));
}

#[tokio::test]
async fn datagram3_sources_are_hashes() {
    let bridge = start_bridge().await;

    let mut alice = Client::connect(bridge.addr).await;
    alice.hello().await;
    let alice_dest = destination_of(&alice.create_session("DATAGRAM3", "alice3").await);

    let mut bob = Client::connect(bridge.addr).await;
    bob.hello().await;
    let bob_private = bob.create_session("DATAGRAM3", "bob3").await;
    let bob_hash = Destination::from_private_b64(&bob_private).unwrap().hash_b64();

    bob.send_raw(format!("DATAGRAM SEND DESTINATION={alice_dest} SIZE=4\n").as_bytes()).await;
    bob.send_raw(b"dg3!").await;

    let header = alice.read_line().await;
    let parsed = Command::parse(&header).unwrap();

    // the source is the 44-char base64 of the sender's hash, usable for a
    // NAMING LOOKUP of the b32 address
    let source = parsed.option("DESTINATION").unwrap();
    assert_eq!(source, bob_hash);
    assert_eq!(source.len(), 44);
    assert_eq!(alice.read_exact(4).await, b"dg3!".to_vec());

    let b32 = sam_bridge::destination::hash_to_b32(source).unwrap();
    assert_eq!(b32.len(), 60);
    assert!(b32.ends_with(".b32.i2p"));

    let mut resolver = Client::connect(bridge.addr).await;
    resolver.hello().await;
    resolver.send(&format!("NAMING LOOKUP NAME={b32}")).await;
    let reply = resolver.read_line().await;
    assert!(reply.contains("RESULT=OK"), "unexpected reply: {reply}");
}
