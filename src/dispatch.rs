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

//! Command dispatch: `"VERB"`/`"VERB ACTION"` to handler routing.

use crate::{
    connection::Connection,
    i2cp::StreamIo,
    proto::{Command, Response},
    server::BridgeState,
    session::Session,
};

use futures::future::BoxFuture;

use std::{collections::HashMap, sync::Arc};

/// Logging target for the file.
const LOG_TARGET: &str = "sam_bridge::dispatch";

/// What the connection does after a handler ran.
pub enum Outcome {
    /// Write a response line and keep reading commands.
    Reply(Response),

    /// Write nothing and keep reading commands.
    Silent,

    /// Write a response line and close the connection.
    Quit(Response),

    /// The control socket becomes the data pipe of an outbound stream.
    ConnectStream {
        /// The established stream.
        stream: StreamIo,

        /// Whether the success reply is suppressed.
        silent: bool,
    },

    /// The control socket waits for one inbound stream and becomes its pipe.
    AcceptStream {
        /// The session accepting the stream.
        session: Arc<Session>,

        /// Whether the success reply and the peer line are suppressed.
        silent: bool,
    },
}

/// Context handed to handlers.
pub struct HandlerContext<'a> {
    /// Shared bridge state.
    pub bridge: &'a Arc<BridgeState>,

    /// The connection the command arrived on.
    pub connection: &'a mut Connection,
}

/// Handler function: a pure transformer from context and parsed command to an
/// [`Outcome`].
pub type Handler = for<'a, 'b> fn(&'a mut HandlerContext<'b>, &'a Command) -> BoxFuture<'a, Outcome>;

/// Command router.
///
/// Routing picks the most specific entry: `"VERB ACTION"` before bare
/// `"VERB"`. Registration happens once at startup.
pub struct CommandRouter {
    /// Dispatch key to handler.
    handlers: HashMap<&'static str, Handler>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    /// Create new, empty [`CommandRouter`].
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a dispatch key.
    ///
    /// Registering the same key twice is a startup bug.
    pub fn register(&mut self, key: &'static str, handler: Handler) {
        let previous = self.handlers.insert(key, handler);

        if previous.is_some() {
            tracing::warn!(
                target: LOG_TARGET,
                %key,
                "handler registered twice",
            );
            debug_assert!(false);
        }
    }

    /// Find the handler for a command, most specific entry first.
    pub fn route(&self, command: &Command) -> Option<Handler> {
        self.handlers
            .get(command.dispatch_key().as_str())
            .or_else(|| self.handlers.get(command.verb.as_str()))
            .copied()
    }

    /// Response for a command no handler is registered for.
    pub fn unknown_command(command: &Command) -> Response {
        Response::with_action(command.verb.clone(), "REPLY")
            .result("I2P_ERROR")
            .key("MESSAGE", "unknown command")
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
