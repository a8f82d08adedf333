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

//! `NAMING LOOKUP` and `DEST GENERATE` handlers.

use crate::{
    dispatch::{HandlerContext, Outcome},
    proto::{Command, Response},
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::handlers::naming";

/// Handle `NAMING LOOKUP`.
///
/// `NAME=ME` resolves to the destination of the session bound to this
/// connection; everything else goes through the naming collaborator.
pub async fn handle_lookup(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let Some(name) = command.option("NAME").filter(|name| !name.is_empty()) else {
        return Outcome::Reply(
            Response::with_action("NAMING", "REPLY")
                .result("I2P_ERROR")
                .key("MESSAGE", "missing NAME"),
        );
    };

    if name == "ME" {
        return match context.connection.session() {
            Some(session) => Outcome::Reply(
                Response::with_action("NAMING", "REPLY")
                    .ok()
                    .key("NAME", "ME")
                    .key("VALUE", session.destination().to_b64()),
            ),
            None => Outcome::Reply(
                Response::with_action("NAMING", "REPLY")
                    .result("I2P_ERROR")
                    .key("MESSAGE", "no session bound to this connection"),
            ),
        };
    }

    match context.bridge.backend.lookup(name).await {
        Ok(destination) => Outcome::Reply(
            Response::with_action("NAMING", "REPLY")
                .ok()
                .key("NAME", name.to_string())
                .key("VALUE", destination),
        ),
        Err(error) => {
            tracing::debug!(
                target: LOG_TARGET,
                %name,
                ?error,
                "naming lookup failed",
            );

            Outcome::Reply(
                Response::with_action("NAMING", "REPLY")
                    .result(error.result_kind())
                    .key("NAME", name.to_string()),
            )
        }
    }
}

/// Handle `DEST GENERATE`: create a fresh destination without registering it.
pub async fn handle_generate(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let signature_type = match command.option("SIGNATURE_TYPE") {
        Some(value) => match value.parse::<u16>() {
            Ok(signature_type) => signature_type,
            Err(_) => {
                return Outcome::Reply(
                    Response::with_action("DEST", "REPLY")
                        .result("I2P_ERROR")
                        .key("MESSAGE", "invalid SIGNATURE_TYPE"),
                );
            }
        },
        None => 7,
    };

    match context.bridge.backend.generate_destination(signature_type).await {
        Ok(destination) => Outcome::Reply(
            Response::with_action("DEST", "REPLY")
                .key("PUB", destination.to_b64())
                .key("PRIV", destination.private_key_b64()),
        ),
        Err(error) => Outcome::Reply(Response::with_action("DEST", "REPLY").error(&error)),
    }
}
