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

use anyhow::Context;
use clap::Parser;
use sam_bridge::{config::BridgeConfig, i2cp::EmbeddedRouter, server::SamBridge};
use tracing_subscriber::EnvFilter;

use std::{process::ExitCode, sync::Arc};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::main";

/// Exit code for configuration and startup failures.
const EXIT_CONFIG: u8 = 1;

/// Exit code for an unreachable I2CP router.
const EXIT_ROUTER_UNREACHABLE: u8 = 2;

/// SAMv3.3 bridge between local client applications and the I2P network.
#[derive(Parser)]
#[command(name = "sam-bridge", version, about)]
struct Args {
    /// TCP control socket listen address.
    #[arg(long)]
    listen: Option<String>,

    /// UDP datagram socket listen address.
    #[arg(long)]
    udp: Option<String>,

    /// Address of the I2CP router.
    #[arg(long)]
    i2cp: Option<String>,

    /// Run against the in-process router instead of an external one.
    #[arg(long)]
    standalone: bool,

    /// Lower the log filter to debug.
    #[arg(long)]
    debug: bool,

    /// Credentials to preload, as `user:password`. Repeatable.
    #[arg(long = "auth-user")]
    auth_users: Vec<String>,

    /// Require authentication on every connection.
    #[arg(long)]
    auth_required: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let debug = args.debug || std::env::var("SAM_DEBUG").is_ok();
    let default_filter = match debug {
        true => "sam_bridge=debug",
        false => "sam_bridge=info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = BridgeConfig::default();

    // environment overrides take precedence over flags
    if let Some(listen) = std::env::var("SAM_LISTEN").ok().or(args.listen) {
        config.tcp_listen = listen;
    }

    if let Some(udp) = std::env::var("SAM_UDP").ok().or(args.udp) {
        config.udp_listen = udp;
    }

    if let Some(i2cp) = std::env::var("I2CP_ADDR").ok().or(args.i2cp) {
        config.i2cp_addr = i2cp;
    }

    match run(args.standalone, args.auth_users, args.auth_required, config).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(
                target: LOG_TARGET,
                ?error,
                "startup failed",
            );
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn run(
    standalone: bool,
    auth_users: Vec<String>,
    auth_required: bool,
    config: BridgeConfig,
) -> anyhow::Result<ExitCode> {
    let backend = match standalone {
        true => {
            tracing::info!(
                target: LOG_TARGET,
                "running in standalone mode with the in-process router",
            );

            Arc::new(EmbeddedRouter::new())
        }
        false => {
            if tokio::net::TcpStream::connect(&config.i2cp_addr).await.is_err() {
                tracing::error!(
                    target: LOG_TARGET,
                    address = %config.i2cp_addr,
                    "i2cp router unreachable",
                );
                return Ok(ExitCode::from(EXIT_ROUTER_UNREACHABLE));
            }

            // the external-router backend is pluggable through
            // `i2cp::RouterBackend`; this build only bundles the in-process
            // router
            tracing::error!(
                target: LOG_TARGET,
                "no i2cp backend configured, rerun with --standalone",
            );
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let bridge = SamBridge::new(config, backend).await.context("failed to start bridge")?;

    for entry in auth_users {
        let (user, password) = entry
            .split_once(':')
            .context("auth user entries take the form user:password")?;

        bridge
            .state()
            .auth
            .add_user(user, password)
            .ok()
            .context("auth usernames must not be empty")?;
    }

    if auth_required {
        bridge.state().auth.set_enabled(true);
    }

    bridge.run().await.context("bridge terminated abnormally")?;

    Ok(ExitCode::SUCCESS)
}
