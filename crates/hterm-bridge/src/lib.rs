//! hterm-bridge: drive pseudo-terminal sessions over plain HTTP requests.
//!
//! A browser terminal polls the server with three POST operations, each
//! naming a client-chosen session id:
//!
//! - `/write` delivers keystrokes to the session's process.
//! - `/read` returns whatever the process printed since the last read.
//! - `/setSize` resizes the session's terminal.
//!
//! # Architecture
//!
//! - [`SessionRegistry`] maps ids to live [`Session`]s and starts each one at
//!   most once.
//! - [`SessionStarter`] produces the [`DuplexStream`] behind a new session;
//!   [`CommandStarter`] and [`AllowListStarter`] spawn processes on a
//!   [`PtyStream`].
//! - [`dispatch`] holds the axum handlers and the [`BridgeState`] they share.
//! - [`WindowSize`] translates cell counts into terminal geometry.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod pty;
pub mod registry;
pub mod resize;
pub mod session;
pub mod starter;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::BridgeConfig;
pub use dispatch::{router, BridgeState};
pub use envelope::{EmptyResponse, ReadResponse, RequestEnvelope};
pub use error::{BridgeError, StartError};
pub use pty::{Command, PtyStream};
pub use registry::SessionRegistry;
pub use resize::WindowSize;
pub use session::Session;
pub use starter::{AllowListStarter, CommandStarter, SessionStarter, COMMAND_PARAM};
pub use stream::DuplexStream;
