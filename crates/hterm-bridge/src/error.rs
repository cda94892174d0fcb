use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`SessionStarter`](crate::starter::SessionStarter).
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid command: {0}")]
    CommandNotPermitted(String),
    #[error("no command to run")]
    MissingCommand,
    #[error("failed to spawn session: {0}")]
    Spawn(String),
    #[error("session start task failed: {0}")]
    Join(String),
}

/// Anything that can go wrong while serving a bridge request. Every variant
/// is rendered as a 500 carrying the message text.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid request body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("required field session_id is missing")]
    MissingSessionId,
    #[error("write request missing required data")]
    MissingData,
    #[error("invalid columns/rows: {columns}/{rows}")]
    InvalidSize { columns: i64, rows: i64 },
    #[error("{0}")]
    Start(#[from] StartError),
    #[error("session start timed out after {0:?}")]
    StartTimeout(Duration),
    #[error("session stream error: {0}")]
    Io(#[from] io::Error),
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
