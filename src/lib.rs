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

#![doc = include_str!("../README.md")]

pub mod auth;
pub mod config;
pub mod connection;
pub mod destination;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod i2cp;
pub mod proto;
pub mod registry;
pub mod server;
pub mod session;
pub mod udp;

pub use auth::AuthStore;
pub use config::{BridgeConfig, SessionConfig};
pub use destination::Destination;
pub use error::{ConfigError, Error, ProtocolError, SessionError, StreamError};
pub use registry::SessionRegistry;
pub use server::SamBridge;
pub use session::{SessionStatus, SessionStyle};

/// Result type of the crate.
pub type Result<T> = core::result::Result<T, error::Error>;
