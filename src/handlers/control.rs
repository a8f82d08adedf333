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

//! `QUIT`/`STOP`/`EXIT` and `HELP` handlers.

use crate::{
    dispatch::{HandlerContext, Outcome},
    proto::{Command, Response},
};

/// Commands the bridge understands, reported by `HELP`.
const HELP_TEXT: &str = "HELLO SESSION STREAM DATAGRAM RAW NAMING DEST PING PONG AUTH QUIT STOP EXIT HELP";

/// Handle `QUIT`, `STOP` and `EXIT`: close the connection, releasing its
/// session.
pub async fn handle_quit(_context: &mut HandlerContext<'_>, _command: &Command) -> Outcome {
    Outcome::Quit(
        Response::with_action("SESSION", "STATUS").ok().key("MESSAGE", "closing connection"),
    )
}

/// Handle `HELP`.
pub async fn handle_help(_context: &mut HandlerContext<'_>, _command: &Command) -> Outcome {
    Outcome::Reply(
        Response::with_action("HELP", "REPLY").ok().key("MESSAGE", HELP_TEXT),
    )
}
