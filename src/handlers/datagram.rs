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

//! `DATAGRAM SEND`/`RAW SEND` handlers, the V1/V2-compatible send path over
//! the control socket.

use crate::{
    config::{parse_port, parse_protocol},
    dispatch::{HandlerContext, Outcome},
    proto::{Command, Response},
    session::{Session, SessionStyle},
};

use std::sync::Arc;

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::handlers::datagram";

fn status_error(verb: &str, error: &crate::Error) -> Outcome {
    Outcome::Reply(Response::with_action(verb.to_string(), "STATUS").error(error))
}

fn status_message(verb: &str, message: &str) -> Outcome {
    Outcome::Reply(
        Response::with_action(verb.to_string(), "STATUS")
            .result("I2P_ERROR")
            .key("MESSAGE", message),
    )
}

/// Resolve the session a send targets: the session bound to this connection,
/// the most recently created session of the legacy style, or an explicit
/// `ID=`, in that precedence.
fn target_session(
    context: &HandlerContext<'_>,
    command: &Command,
    legacy_style: SessionStyle,
    accepts: fn(SessionStyle) -> bool,
) -> Option<Arc<Session>> {
    if let Some(session) = context.connection.session() {
        if accepts(session.style()) {
            return Some(Arc::clone(session));
        }
    }

    if let Some(session) = context.bridge.registry.most_recent_by_style(legacy_style) {
        return Some(session);
    }

    command.option("ID").and_then(|id| context.bridge.registry.get(id))
}

/// Handle `DATAGRAM SEND`.
///
/// Success is silent; failures are reported as a single status line.
pub async fn handle_datagram_send(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let Some(session) = target_session(
        context,
        command,
        SessionStyle::Datagram,
        |style| style.is_datagram_family(),
    ) else {
        return status_message("DATAGRAM", "no datagram session available");
    };

    let Some(destination) = command.option("DESTINATION").filter(|dest| !dest.is_empty()) else {
        return status_message("DATAGRAM", "missing DESTINATION");
    };

    let from_port = match command.option("FROM_PORT").map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(error)) => return status_error("DATAGRAM", &error.into()),
        None => session.config().from_port,
    };

    let to_port = match command.option("TO_PORT").map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(error)) => return status_error("DATAGRAM", &error.into()),
        None => session.config().to_port,
    };

    match session.send_datagram(destination, &command.payload, from_port, to_port).await {
        Ok(()) => Outcome::Silent,
        Err(error) => {
            tracing::debug!(
                target: LOG_TARGET,
                id = %session.id(),
                ?error,
                "datagram send failed",
            );

            status_error("DATAGRAM", &error)
        }
    }
}

/// Handle `RAW SEND`.
pub async fn handle_raw_send(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let Some(session) = target_session(context, command, SessionStyle::Raw, |style| {
        style == SessionStyle::Raw
    }) else {
        return status_message("RAW", "no raw session available");
    };

    let Some(destination) = command.option("DESTINATION").filter(|dest| !dest.is_empty()) else {
        return status_message("RAW", "missing DESTINATION");
    };

    let protocol = match command.option("PROTOCOL").map(parse_protocol) {
        Some(Ok(protocol)) => protocol,
        Some(Err(error)) => return status_error("RAW", &error.into()),
        None => 0,
    };

    let from_port = match command.option("FROM_PORT").map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(error)) => return status_error("RAW", &error.into()),
        None => session.config().from_port,
    };

    let to_port = match command.option("TO_PORT").map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(error)) => return status_error("RAW", &error.into()),
        None => session.config().to_port,
    };

    match session.send_raw(destination, &command.payload, protocol, from_port, to_port).await {
        Ok(()) => Outcome::Silent,
        Err(error) => {
            tracing::debug!(
                target: LOG_TARGET,
                id = %session.id(),
                ?error,
                "raw send failed",
            );

            status_error("RAW", &error)
        }
    }
}
