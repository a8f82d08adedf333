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

//! `SESSION CREATE`/`SESSION ADD`/`SESSION REMOVE` handlers.

use crate::{
    config::{validate_raw_protocol, SessionConfig},
    destination::{Destination, OfflineSignature, BASE64_I2P},
    dispatch::{HandlerContext, Outcome},
    error::StreamError,
    proto::{Command, Response},
    session::{Session, SessionStyle},
};

use std::sync::Arc;

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::handlers::session";

fn status_error(error: &crate::Error) -> Outcome {
    Outcome::Reply(Response::with_action("SESSION", "STATUS").error(error))
}

fn status_message(message: &str) -> Outcome {
    Outcome::Reply(
        Response::with_action("SESSION", "STATUS")
            .result("I2P_ERROR")
            .key("MESSAGE", message),
    )
}

/// Handle `SESSION CREATE`.
///
/// Parses the style and option set, creates and registers the session, waits
/// for the router to build its tunnels and only then replies, carrying the
/// destination's private key.
pub async fn handle_create(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    if context.connection.has_session() {
        return status_message("session already bound to this connection");
    }

    let Some(style) = command.option("STYLE").and_then(SessionStyle::from_str) else {
        return status_message("missing or unknown STYLE");
    };

    let Some(id) = command.option("ID").filter(|id| !id.is_empty()) else {
        return status_message("missing ID");
    };

    let mut config = match SessionConfig::from_options(&command.options) {
        Ok(config) => config,
        Err(error) => return status_error(&error.into()),
    };

    if style == SessionStyle::Raw {
        if let Err(error) = validate_raw_protocol(config.protocol) {
            return status_error(&error.into());
        }
    }

    let mut destination = match command.option("DESTINATION").unwrap_or("TRANSIENT") {
        "TRANSIENT" => {
            match context.bridge.backend.generate_destination(config.signature_type).await {
                Ok(destination) => destination,
                Err(error) => return status_error(&error),
            }
        }
        key => match Destination::from_private_b64(key) {
            Ok(destination) => destination,
            Err(error) => return status_error(&error.into()),
        },
    };

    if let Some(blob) = command.option("OFFLINE_SIGNATURE") {
        let signature = BASE64_I2P
            .decode(blob.as_bytes())
            .map_err(|_| StreamError::InvalidKey)
            .and_then(|raw| OfflineSignature::from_bytes(&raw));

        match signature {
            Ok(signature) => {
                config.offline_signature = Some(signature.raw.clone());
                destination.set_offline_signature(signature);
            }
            Err(error) => return status_error(&error.into()),
        }
    }

    let session = Arc::new(Session::new(
        id.to_string(),
        style,
        config.clone(),
        destination,
        Arc::clone(&context.bridge.registry),
        false,
    ));

    // register before the tunnel build so competing CREATEs with the same id
    // or destination fail fast
    if let Err(error) = context.bridge.registry.register(&session) {
        return status_error(&error.into());
    }

    let tunnel = match context
        .bridge
        .backend
        .create_session(id, style, &config, session.destination(), session.event_sender())
        .await
    {
        Ok(tunnel) => tunnel,
        Err(error) => {
            session.close().await;
            return status_error(&error);
        }
    };

    session.activate(tunnel);

    if let Some(signature) = session.config().offline_signature.clone() {
        session.set_offline_signature(&signature);
    }

    let port_aware = context.connection.version_at_least(2);

    if (style.is_datagram_family() || style == SessionStyle::Raw)
        && session.config().forwarding_enabled()
    {
        let config = session.config().clone();

        if let Err(error) = session.set_forwarding(&config.udp_host, config.udp_port, port_aware).await
        {
            session.close().await;
            return status_error(&error);
        }
    }

    let private_key = session.destination().private_key_b64();

    tracing::info!(
        target: LOG_TARGET,
        %id,
        ?style,
        "session created",
    );

    context.connection.bind_session(session);

    Outcome::Reply(
        Response::with_action("SESSION", "STATUS").ok().key("DESTINATION", private_key),
    )
}

/// Handle `SESSION ADD`: add a subsession to the bound primary session.
pub async fn handle_add(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let Some(primary) = context.connection.session().cloned() else {
        return status_message("no session bound to this connection");
    };

    if primary.style() != SessionStyle::Primary {
        return status_message("session is not a primary session");
    }

    let Some(style) = command.option("STYLE").and_then(SessionStyle::from_str) else {
        return status_message("missing or unknown STYLE");
    };

    let Some(id) = command.option("ID").filter(|id| !id.is_empty()) else {
        return status_message("missing ID");
    };

    let config = match SessionConfig::from_options(&command.options) {
        Ok(config) => config,
        Err(error) => return status_error(&error.into()),
    };

    if style == SessionStyle::Raw {
        if let Err(error) = validate_raw_protocol(config.protocol) {
            return status_error(&error.into());
        }
    }

    let port_aware = context.connection.version_at_least(2);

    match primary.add_subsession(id, style, config, port_aware).await {
        Ok(_) => Outcome::Reply(
            Response::with_action("SESSION", "STATUS").ok().key("ID", id.to_string()),
        ),
        Err(error) => status_error(&error),
    }
}

/// Handle `SESSION REMOVE`: close and remove a subsession of the bound
/// primary session.
pub async fn handle_remove(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let Some(primary) = context.connection.session().cloned() else {
        return status_message("no session bound to this connection");
    };

    if primary.style() != SessionStyle::Primary {
        return status_message("session is not a primary session");
    }

    let Some(id) = command.option("ID").filter(|id| !id.is_empty()) else {
        return status_message("missing ID");
    };

    match primary.remove_subsession(id).await {
        Ok(()) => Outcome::Reply(
            Response::with_action("SESSION", "STATUS").ok().key("ID", id.to_string()),
        ),
        Err(error) => status_error(&error),
    }
}
