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

//! `HELLO VERSION` handler.

use crate::{
    config::{VERSION_MAX, VERSION_MIN},
    dispatch::{HandlerContext, Outcome},
    proto::{Command, Response},
};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::handlers::hello";

/// Parse a `3.<minor>` version string into its minor number.
///
/// A bare `3` counts as `3.0`.
fn parse_version(version: &str) -> Option<u32> {
    match version {
        "3" => Some(0),
        version => version.strip_prefix("3.").and_then(|minor| minor.parse().ok()),
    }
}

/// Negotiate a version within both the client's `[min, max]` and the bridge's
/// `[3.0, 3.3]` window.
fn negotiate(client_min: u32, client_max: u32) -> Option<u32> {
    let bridge_min = parse_version(VERSION_MIN).expect("valid version constant");
    let bridge_max = parse_version(VERSION_MAX).expect("valid version constant");

    let negotiated = client_max.min(bridge_max);

    (negotiated >= client_min.max(bridge_min)).then_some(negotiated)
}

/// Handle `HELLO VERSION`.
pub async fn handle_version(context: &mut HandlerContext<'_>, command: &Command) -> Outcome {
    let client_min = command.option("MIN").map(parse_version);
    let client_max = command.option("MAX").map(parse_version);

    // an unparseable bound means no version can be agreed on
    let (client_min, client_max) = match (client_min, client_max) {
        (Some(None), _) | (_, Some(None)) => {
            return Outcome::Reply(
                Response::with_action("HELLO", "REPLY").result("NOVERSION"),
            );
        }
        (min, max) => (min.flatten().unwrap_or(0), max.flatten().unwrap_or(u32::MAX)),
    };

    let Some(version) = negotiate(client_min, client_max) else {
        return Outcome::Reply(Response::with_action("HELLO", "REPLY").result("NOVERSION"));
    };

    let version = format!("3.{version}");

    // credentials are verified only when authentication is required
    let username = match context.bridge.auth.is_enabled() {
        true => match (command.option("USER"), command.option("PASSWORD")) {
            (Some(user), Some(password)) => {
                if !context.bridge.auth.check_password(user, password) {
                    return Outcome::Reply(
                        Response::with_action("HELLO", "REPLY")
                            .result("I2P_ERROR")
                            .key("MESSAGE", "invalid credentials"),
                    );
                }

                Some(user.to_string())
            }
            _ => {
                return Outcome::Reply(
                    Response::with_action("HELLO", "REPLY")
                        .result("I2P_ERROR")
                        .key("MESSAGE", "USER and PASSWORD required"),
                );
            }
        },
        false => None,
    };

    tracing::debug!(
        target: LOG_TARGET,
        %version,
        authenticated = username.is_some(),
        "handshake negotiated",
    );

    context.connection.set_handshaked(version.clone(), username);

    Outcome::Reply(Response::with_action("HELLO", "REPLY").ok().key("VERSION", version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_negotiation() {
        // full overlap settles on the newest common version
        assert_eq!(negotiate(0, 3), Some(3));
        assert_eq!(negotiate(0, u32::MAX), Some(3));

        // client caps below the bridge maximum
        assert_eq!(negotiate(0, 1), Some(1));
        assert_eq!(negotiate(1, 1), Some(1));

        // no overlap
        assert_eq!(negotiate(4, u32::MAX), None);
    }

    #[test]
    fn version_strings() {
        assert_eq!(parse_version("3.0"), Some(0));
        assert_eq!(parse_version("3.3"), Some(3));
        assert_eq!(parse_version("3"), Some(0));
        assert_eq!(parse_version("2.0"), None);
        assert_eq!(parse_version("3.x"), None);
    }
}
