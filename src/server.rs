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

//! The bridge server: accept loop, connection set and graceful shutdown.

use crate::{
    auth::AuthStore,
    config::BridgeConfig,
    connection::ConnectionHandler,
    dispatch::CommandRouter,
    handlers,
    i2cp::RouterBackend,
    registry::SessionRegistry,
    udp::DatagramListener,
};

use tokio::{net::TcpListener, task::JoinSet};

use std::{future::Future, net::SocketAddr, sync::Arc};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::server";

/// State shared by all connections of the bridge.
pub struct BridgeState {
    /// Bridge configuration.
    pub config: BridgeConfig,

    /// Global session registry.
    pub registry: Arc<SessionRegistry>,

    /// Credential store.
    pub auth: Arc<AuthStore>,

    /// Router backend.
    pub backend: Arc<dyn RouterBackend>,

    /// Command router.
    pub router: CommandRouter,
}

/// The SAM bridge server.
pub struct SamBridge {
    /// Shared state.
    state: Arc<BridgeState>,

    /// TCP control socket listener.
    tcp_listener: TcpListener,

    /// UDP datagram plane task.
    udp_task: tokio::task::JoinHandle<()>,

    /// Local address of the UDP datagram plane.
    udp_addr: SocketAddr,

    /// Connection tasks.
    connections: JoinSet<()>,
}

impl SamBridge {
    /// Create new [`SamBridge`]: bind the TCP and UDP sockets and register
    /// the command handlers.
    pub async fn new(
        config: BridgeConfig,
        backend: Arc<dyn RouterBackend>,
    ) -> crate::Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let auth = Arc::new(AuthStore::new());

        let mut router = CommandRouter::new();
        handlers::register_all(&mut router);

        let tcp_listener = TcpListener::bind(&config.tcp_listen).await?;
        let udp_listener = DatagramListener::bind(&config.udp_listen, Arc::clone(&registry)).await?;
        let udp_addr = udp_listener.local_addr()?;
        let udp_task = tokio::spawn(udp_listener.run());

        tracing::info!(
            target: LOG_TARGET,
            tcp = %tcp_listener.local_addr()?,
            udp = %udp_addr,
            "sam bridge listening",
        );

        Ok(Self {
            state: Arc::new(BridgeState {
                config,
                registry,
                auth,
                backend,
                router,
            }),
            tcp_listener,
            udp_task,
            udp_addr,
            connections: JoinSet::new(),
        })
    }

    /// Shared bridge state.
    pub fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    /// Local address of the TCP control socket.
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.tcp_listener.local_addr().map_err(From::from)
    }

    /// Local address of the UDP datagram plane.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Run the bridge until `ctrl-c`.
    pub async fn run(self) -> crate::Result<()> {
        self.run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run the bridge until `shutdown` resolves.
    pub async fn run_with_shutdown(mut self, shutdown: impl Future<Output = ()>) -> crate::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.tcp_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = ConnectionHandler::new(stream, peer, Arc::clone(&self.state));
                        self.connections.spawn(handler.run());
                    }
                    Err(error) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            ?error,
                            "accept failed",
                        );
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!(
                        target: LOG_TARGET,
                        "shutdown requested",
                    );
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Tear the bridge down: stop accepting, close connections, then close
    /// all sessions through the registry. Every step is best-effort.
    async fn shutdown(mut self) {
        drop(self.tcp_listener);
        self.udp_task.abort();

        self.connections.abort_all();
        while self.connections.join_next().await.is_some() {}

        self.state.registry.close().await;

        tracing::info!(
            target: LOG_TARGET,
            "sam bridge stopped",
        );
    }
}
