use std::fmt;
use std::sync::{Arc, Mutex};

use crate::stream::DuplexStream;

/// Upper bound on bytes of an incomplete UTF-8 sequence.
const MAX_UTF8_TAIL: usize = 3;

/// One logical terminal: a client-chosen id bound to one backing stream.
pub struct Session {
    id: String,
    stream: Arc<dyn DuplexStream>,
    utf8_tail: Mutex<Vec<u8>>,
}

impl Session {
    pub fn new(id: impl Into<String>, stream: Arc<dyn DuplexStream>) -> Self {
        Self {
            id: id.into(),
            stream,
            utf8_tail: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream(&self) -> &dyn DuplexStream {
        self.stream.as_ref()
    }

    /// Converts process output to text for the JSON response.
    ///
    /// A multi-byte character split across two reads is held back and
    /// completed on the next call. Bytes that can never form valid UTF-8
    /// become U+FFFD. Pass `flush = true` when no further output will come.
    pub fn decode_output(&self, bytes: &[u8], flush: bool) -> String {
        let mut tail = match self.utf8_tail.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut pending = std::mem::take(&mut *tail);
        pending.extend_from_slice(bytes);

        let keep = if flush { 0 } else { incomplete_suffix_len(&pending) };
        let split = pending.len() - keep;
        *tail = pending.split_off(split);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Length of a trailing, possibly-valid but unfinished UTF-8 sequence.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    let window = bytes.len().min(MAX_UTF8_TAIL);
    for back in 1..=window {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return 0,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
