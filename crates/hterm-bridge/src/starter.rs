//! Session creation capabilities.
//!
//! The bridge never spawns processes itself; it asks a [`SessionStarter`] for
//! a stream the first time it sees a session id. Variants are plain
//! implementations of the trait and are injected when building the server.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};

use crate::error::StartError;
use crate::pty::{Command, PtyStream};
use crate::resize::WindowSize;
use crate::stream::DuplexStream;

/// Key in the `extra` map naming the command an [`AllowListStarter`] runs.
pub const COMMAND_PARAM: &str = "command";

const TERM: &str = "xterm-256color";

#[async_trait]
pub trait SessionStarter: Send + Sync + 'static {
    /// Produces a new stream for a session. `params` is the `extra` map of
    /// the request that created the session.
    async fn start(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Arc<dyn DuplexStream>, StartError>;
}

/// Runs the same command for every session and ignores `params`.
#[derive(Clone, Debug)]
pub struct CommandStarter {
    command: Command,
    size: WindowSize,
}

impl CommandStarter {
    pub fn new(command: Command) -> Self {
        Self {
            command: command.env("TERM", TERM),
            size: WindowSize::default(),
        }
    }

    pub fn from_line(line: &str) -> Result<Self, StartError> {
        Ok(Self::new(Command::parse(line)?))
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[async_trait]
impl SessionStarter for CommandStarter {
    async fn start(
        &self,
        _params: &HashMap<String, String>,
    ) -> Result<Arc<dyn DuplexStream>, StartError> {
        spawn_on_pty(self.command.clone(), self.size).await
    }
}

/// Runs the command named by `params["command"]`, but only if it exactly
/// matches one of the permitted command lines.
#[derive(Clone, Debug)]
pub struct AllowListStarter {
    permitted: Vec<String>,
    size: WindowSize,
}

impl AllowListStarter {
    pub fn new<I, S>(permitted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permitted: permitted.into_iter().map(Into::into).collect(),
            size: WindowSize::default(),
        }
    }

    pub fn is_permitted(&self, command: &str) -> bool {
        self.permitted.iter().any(|allowed| allowed == command)
    }

    /// Resolves the command a session would run, without spawning it.
    pub fn resolve(&self, params: &HashMap<String, String>) -> Result<Command, StartError> {
        let requested = params.get(COMMAND_PARAM).map(String::as_str).unwrap_or("");
        if !self.is_permitted(requested) {
            warn!(command = requested, "rejected command outside allow list");
            return Err(StartError::CommandNotPermitted(requested.to_string()));
        }
        Ok(Command::parse(requested)?.env("TERM", TERM))
    }
}

#[async_trait]
impl SessionStarter for AllowListStarter {
    async fn start(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Arc<dyn DuplexStream>, StartError> {
        let command = self.resolve(params)?;
        spawn_on_pty(command, self.size).await
    }
}

async fn spawn_on_pty(
    command: Command,
    size: WindowSize,
) -> Result<Arc<dyn DuplexStream>, StartError> {
    let stream = task::spawn_blocking(move || {
        info!(program = %command.program, "starting session process");
        PtyStream::spawn(&command, size)
    })
    .await
    .map_err(|err| StartError::Join(err.to_string()))??;
    Ok(Arc::new(stream))
}
