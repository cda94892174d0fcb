use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::BridgeError;
use crate::resize::WindowSize;

/// Body shared by `/write`, `/read` and `/setSize`.
///
/// Fields that do not apply to an operation are ignored, and absent fields
/// decode to their zero value so validation can report them uniformly.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub session_id: String,
    /// Session-creation parameters; only used when the session is new.
    #[serde(default)]
    pub extra: Option<HashMap<String, String>>,

    // write
    #[serde(default)]
    pub data: String,

    // setSize
    #[serde(default)]
    pub columns: i64,
    #[serde(default)]
    pub rows: i64,
}

impl RequestEnvelope {
    /// Decodes a request body and checks the common fields.
    pub fn decode(body: &[u8]) -> Result<Self, BridgeError> {
        let envelope: Self = serde_json::from_slice(body)?;
        if envelope.session_id.is_empty() {
            return Err(BridgeError::MissingSessionId);
        }
        Ok(envelope)
    }

    pub fn extra(&self) -> HashMap<String, String> {
        self.extra.clone().unwrap_or_default()
    }

    /// Bytes a write request delivers to the process.
    pub fn write_payload(&self) -> Result<&[u8], BridgeError> {
        if self.data.is_empty() {
            return Err(BridgeError::MissingData);
        }
        Ok(self.data.as_bytes())
    }

    /// Geometry a resize request applies.
    pub fn window_size(&self) -> Result<WindowSize, BridgeError> {
        let invalid = || BridgeError::InvalidSize {
            columns: self.columns,
            rows: self.rows,
        };
        let columns = u16::try_from(self.columns).map_err(|_| invalid())?;
        let rows = u16::try_from(self.rows).map_err(|_| invalid())?;
        if columns == 0 || rows == 0 {
            return Err(invalid());
        }
        Ok(WindowSize::from_cells(rows, columns))
    }
}

/// Success body for `/write` and `/setSize`: always `{}`.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmptyResponse {}

/// Success body for `/read`.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResponse {
    pub data: String,
    /// The response was capped and more output is already waiting.
    #[serde(default, skip_serializing_if = "is_false")]
    pub more: bool,
    /// The process has exited; the session is gone.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ended: bool,
}

impl ReadResponse {
    pub fn ended(data: String) -> Self {
        Self {
            data,
            more: false,
            ended: true,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}
