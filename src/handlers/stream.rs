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

//! `STREAM CONNECT`/`STREAM ACCEPT`/`STREAM FORWARD` handlers.

use crate::{
    config::parse_port,
    dispatch::{HandlerContext, Outcome},
    error::SessionError,
    proto::{Command, Response},
    session::{Session, SessionStyle},
};

use std::sync::Arc;

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::handlers::stream";

fn status_error(error: &crate::Error) -> Outcome {
    Outcome::Reply(Response::with_action("STREAM", "STATUS").error(error))
}

fn status_message(result: &str, message: &str) -> Outcome {
    Outcome::Reply(
        Response::with_action("STREAM", "STATUS").result(result).key("MESSAGE", message),
    )
}

/// Look up the stream session the command targets.
///
/// Stream commands arrive on their own control connection and reference the
/// session by id.
fn target_session(
    context: &HandlerContext<'_>,
    command: &Command,
) -> Result<Arc<Session>, Outcome> {
    if context.connection.has_session() {
        return Err(status_message(
            "I2P_ERROR",
            "stream commands require a connection without a bound session",
        ));
    }

    let Some(id) = command.option("ID") else {
        return Err(status_message("I2P_ERROR", "missing ID"));
    };

    let Some(session) = context.bridge.registry.get(id) else {
        return Err(status_message("INVALID_ID", "no session with the given ID"));
    };

    if session.style() != SessionStyle::Stream {
        return Err(status_message("I2P_ERROR", "session is not a stream session"));
    }

    Ok(session)
}

/// Handle `STREAM CONNECT`.
///
/// Hostnames and base32 addresses are resolved through the naming
/// collaborator before dialing.
pub async fn handle_connect(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let session = match target_session(context, command) {
        Ok(session) => session,
        Err(outcome) => return outcome,
    };

    let Some(destination) = command.option("DESTINATION").filter(|dest| !dest.is_empty()) else {
        return status_message("I2P_ERROR", "missing DESTINATION");
    };

    let silent = command.option_bool("SILENT");

    let from_port = match command.option("FROM_PORT").map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(error)) => return status_error(&error.into()),
        None => session.config().from_port,
    };

    let to_port = match command.option("TO_PORT").map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(error)) => return status_error(&error.into()),
        None => session.config().to_port,
    };

    // resolve hostnames and base32 addresses into a full destination
    let destination = match destination.ends_with(".i2p") {
        true => match context.bridge.backend.lookup(destination).await {
            Ok(resolved) => resolved,
            Err(_) => return status_message("INVALID_KEY", "destination could not be resolved"),
        },
        false => destination.to_string(),
    };

    match session.connect(&destination, from_port, to_port).await {
        Ok(stream) => {
            tracing::debug!(
                target: LOG_TARGET,
                id = %session.id(),
                "outbound stream established",
            );

            Outcome::ConnectStream { stream, silent }
        }
        Err(error) => status_error(&error),
    }
}

/// Handle `STREAM ACCEPT`.
pub async fn handle_accept(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let session = match target_session(context, command) {
        Ok(session) => session,
        Err(outcome) => return outcome,
    };

    let silent = command.option_bool("SILENT");

    if session.is_forwarding() {
        return status_error(&SessionError::ForwardingActive.into());
    }

    if !context.connection.version_at_least(2) && session.has_listener() {
        return status_error(&SessionError::ConcurrentAccept.into());
    }

    Outcome::AcceptStream { session, silent }
}

/// Handle `STREAM FORWARD`.
pub async fn handle_forward(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let session = match target_session(context, command) {
        Ok(session) => session,
        Err(outcome) => return outcome,
    };

    let port = match command.option("PORT").map(parse_port) {
        Some(Ok(port)) if port != 0 => port,
        _ => return status_message("I2P_ERROR", "missing or invalid PORT"),
    };

    let host = command.option("HOST").unwrap_or("127.0.0.1").to_string();
    let silent = command.option_bool("SILENT");

    // TLS towards the forward target belongs to an outer layer
    if command.option_bool("SSL") {
        tracing::warn!(
            target: LOG_TARGET,
            id = %session.id(),
            "SSL forwarding requested, dialing plain TCP",
        );
    }

    let port_aware = context.connection.version_at_least(2);

    match session.forward(&host, port, silent, port_aware) {
        Ok(()) => {
            tracing::info!(
                target: LOG_TARGET,
                id = %session.id(),
                %host,
                ?port,
                "forwarding inbound streams",
            );

            match silent {
                true => Outcome::Silent,
                false => Outcome::Reply(Response::with_action("STREAM", "STATUS").ok()),
            }
        }
        Err(error) => status_error(&error),
    }
}
