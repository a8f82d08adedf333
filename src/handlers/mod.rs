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

//! Command handlers.

use crate::{
    dispatch::{CommandRouter, HandlerContext, Outcome},
    proto::Command,
};

use futures::future::BoxFuture;

pub mod auth;
pub mod control;
pub mod datagram;
pub mod hello;
pub mod naming;
pub mod session;
pub mod stream;

macro_rules! handler {
    ($name:ident, $handler:path) => {
        fn $name<'a, 'b>(
            context: &'a mut HandlerContext<'b>,
            command: &'a Command,
        ) -> BoxFuture<'a, Outcome> {
            Box::pin($handler(context, command))
        }
    };
}

handler!(hello_version, hello::handle_version);
handler!(session_create, session::handle_create);
handler!(session_add, session::handle_add);
handler!(session_remove, session::handle_remove);
handler!(stream_connect, stream::handle_connect);
handler!(stream_accept, stream::handle_accept);
handler!(stream_forward, stream::handle_forward);
handler!(datagram_send, datagram::handle_datagram_send);
handler!(raw_send, datagram::handle_raw_send);
handler!(naming_lookup, naming::handle_lookup);
handler!(dest_generate, naming::handle_generate);
handler!(auth_command, auth::handle_auth);
handler!(quit_command, control::handle_quit);
handler!(help_command, control::handle_help);

/// Register every handler. Called once at startup.
pub fn register_all(router: &mut CommandRouter) {
    router.register("HELLO VERSION", hello_version);
    router.register("SESSION CREATE", session_create);
    router.register("SESSION ADD", session_add);
    router.register("SESSION REMOVE", session_remove);
    router.register("STREAM CONNECT", stream_connect);
    router.register("STREAM ACCEPT", stream_accept);
    router.register("STREAM FORWARD", stream_forward);
    router.register("DATAGRAM SEND", datagram_send);
    router.register("RAW SEND", raw_send);
    router.register("NAMING LOOKUP", naming_lookup);
    router.register("DEST GENERATE", dest_generate);
    router.register("AUTH", auth_command);
    router.register("QUIT", quit_command);
    router.register("STOP", quit_command);
    router.register("EXIT", quit_command);
    router.register("HELP", help_command);
}
