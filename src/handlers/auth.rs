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

//! `AUTH` handler: runtime credential management.

use crate::{
    dispatch::{HandlerContext, Outcome},
    proto::{Command, Response},
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::handlers::auth";

fn status_ok() -> Outcome {
    Outcome::Reply(Response::with_action("AUTH", "STATUS").ok())
}

fn status_message(message: &str) -> Outcome {
    Outcome::Reply(
        Response::with_action("AUTH", "STATUS")
            .result("I2P_ERROR")
            .key("MESSAGE", message),
    )
}

/// Handle `AUTH ENABLE|DISABLE|ADD|REMOVE|LIST`.
pub async fn handle_auth(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let auth = &context.bridge.auth;

    match command.action.as_deref() {
        Some("ENABLE") => {
            auth.set_enabled(true);

            tracing::info!(
                target: LOG_TARGET,
                "authentication enabled",
            );
            status_ok()
        }
        Some("DISABLE") => {
            auth.set_enabled(false);

            tracing::info!(
                target: LOG_TARGET,
                "authentication disabled",
            );
            status_ok()
        }
        Some("ADD") => {
            let Some(user) = command.option("USER") else {
                return status_message("missing USER");
            };
            let Some(password) = command.option("PASSWORD") else {
                return status_message("missing PASSWORD");
            };

            match auth.add_user(user, password) {
                Ok(()) => status_ok(),
                Err(()) => status_message("username must not be empty"),
            }
        }
        Some("REMOVE") => {
            let Some(user) = command.option("USER") else {
                return status_message("missing USER");
            };

            match auth.remove_user(user) {
                Ok(()) => status_ok(),
                Err(()) => status_message("no such user"),
            }
        }
        Some("LIST") => Outcome::Reply(
            Response::with_action("AUTH", "STATUS")
                .ok()
                .key("USERS", auth.list_users().join(" ")),
        ),
        _ => status_message("unknown AUTH action"),
    }
}
