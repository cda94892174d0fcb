use std::time::Duration;

pub const DEFAULT_READ_CHUNK: usize = 4096;
pub const DEFAULT_MAX_READ_BYTES: usize = 64 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(25);
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for the request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Size of each read from a session's output.
    pub read_chunk: usize,
    /// Cap on the bytes returned by a single `/read`.
    pub max_read_bytes: usize,
    /// How long `/read` waits for output before answering with no data.
    /// `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
    /// How long session creation may take. `None` waits indefinitely.
    pub start_timeout: Option<Duration>,
}

impl BridgeConfig {
    /// Buffer size for one read: never larger than a whole response.
    pub(crate) fn read_buffer_len(&self) -> usize {
        self.read_chunk.min(self.max_read_bytes).max(1)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_chunk: DEFAULT_READ_CHUNK,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            start_timeout: Some(DEFAULT_START_TIMEOUT),
        }
    }
}
