//! HTTP surface of the bridge.
//!
//! Every operation is a POST carrying a [`RequestEnvelope`]. Handlers decode
//! and validate the envelope, resolve the session through the registry
//! (starting it on first contact), then act on its stream. Any failure is
//! reported as a single 500 whose body is the error text.

use axum::{extract::State, routing::post, Json, Router};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::envelope::{EmptyResponse, ReadResponse, RequestEnvelope};
use crate::error::BridgeError;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::starter::SessionStarter;

pub type BridgeResult<T> = Result<Json<T>, BridgeError>;

/// Shared state behind every handler: one registry per server instance.
#[derive(Clone)]
pub struct BridgeState {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SessionRegistry,
    starter: Arc<dyn SessionStarter>,
    config: BridgeConfig,
}

impl BridgeState {
    pub fn new(starter: Arc<dyn SessionStarter>, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                starter,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    async fn resolve(&self, envelope: &RequestEnvelope) -> Result<Arc<Session>, BridgeError> {
        let extra = envelope.extra();
        let create = self.inner.registry.get_or_create(
            &envelope.session_id,
            &extra,
            self.inner.starter.as_ref(),
        );
        let session = match self.inner.config.start_timeout {
            Some(limit) => tokio::time::timeout(limit, create)
                .await
                .map_err(|_| BridgeError::StartTimeout(limit))??,
            None => create.await?,
        };
        Ok(session)
    }

    /// Waits for output, then drains whatever else is already buffered up
    /// to the response cap.
    async fn collect_output(&self, session: &Session) -> io::Result<ReadResponse> {
        let config = &self.inner.config;
        let stream = session.stream();
        let mut buf = vec![0u8; config.read_buffer_len()];

        let first = match config.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    debug!(session_id = session.id(), "read timed out with no output");
                    return Ok(ReadResponse::default());
                }
            },
            None => stream.read(&mut buf).await?,
        };
        if first == 0 {
            return Ok(ReadResponse::ended(session.decode_output(&[], true)));
        }

        let mut output = buf[..first].to_vec();
        let mut more = false;
        let mut ended = false;
        loop {
            let room = config.max_read_bytes.saturating_sub(output.len());
            if room == 0 {
                more = true;
                break;
            }
            let want = room.min(buf.len());
            match stream.try_read(&mut buf[..want])? {
                None => break,
                Some(0) => {
                    ended = true;
                    break;
                }
                Some(n) => output.extend_from_slice(&buf[..n]),
            }
        }

        debug!(session_id = session.id(), bytes = output.len(), more, "read output");
        Ok(ReadResponse {
            data: session.decode_output(&output, ended),
            more,
            ended,
        })
    }
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/write", post(write))
        .route("/read", post(read))
        .route("/setSize", post(set_size))
        .with_state(state)
}

async fn write(State(state): State<BridgeState>, body: Bytes) -> BridgeResult<EmptyResponse> {
    handle_write(&state, &body)
        .await
        .inspect_err(|err| warn!(op = "write", error = %err, "request failed"))
}

async fn read(State(state): State<BridgeState>, body: Bytes) -> BridgeResult<ReadResponse> {
    handle_read(&state, &body)
        .await
        .inspect_err(|err| warn!(op = "read", error = %err, "request failed"))
}

async fn set_size(State(state): State<BridgeState>, body: Bytes) -> BridgeResult<EmptyResponse> {
    handle_set_size(&state, &body)
        .await
        .inspect_err(|err| warn!(op = "setSize", error = %err, "request failed"))
}

async fn handle_write(state: &BridgeState, body: &[u8]) -> BridgeResult<EmptyResponse> {
    let envelope = RequestEnvelope::decode(body)?;
    let payload = envelope.write_payload()?;
    let session = state.resolve(&envelope).await?;

    session.stream().write_all(payload).await?;
    debug!(session_id = session.id(), bytes = payload.len(), "wrote input");
    Ok(Json(EmptyResponse {}))
}

async fn handle_read(state: &BridgeState, body: &[u8]) -> BridgeResult<ReadResponse> {
    let envelope = RequestEnvelope::decode(body)?;
    let session = state.resolve(&envelope).await?;

    let response = state.collect_output(&session).await?;
    if response.ended {
        info!(session_id = session.id(), "session output ended; process finished");
        state.registry().remove(session.id(), &session);
    }
    Ok(Json(response))
}

async fn handle_set_size(state: &BridgeState, body: &[u8]) -> BridgeResult<EmptyResponse> {
    let envelope = RequestEnvelope::decode(body)?;
    let size = envelope.window_size()?;
    let session = state.resolve(&envelope).await?;

    session.stream().resize(size).await?;
    info!(
        session_id = session.id(),
        cols = size.cols,
        rows = size.rows,
        "resized terminal"
    );
    Ok(Json(EmptyResponse {}))
}
