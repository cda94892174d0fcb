use async_trait::async_trait;
use std::io;

use crate::resize::WindowSize;

/// A byte stream connected to one backing process.
///
/// Input and output are independent directions: a write may proceed while
/// another task is parked in [`read`](DuplexStream::read).
#[async_trait]
pub trait DuplexStream: Send + Sync + 'static {
    /// Delivers every byte of `data` to the process, or fails.
    async fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// Waits until output is available and copies up to `buf.len()` bytes.
    /// Returns `Ok(0)` once the process has closed its side of the stream.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// output.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Copies output that is already buffered without waiting. `Ok(None)`
    /// means nothing is available right now; `Ok(Some(0))` means end of
    /// stream.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Applies new terminal geometry. Streams without a terminal device may
    /// accept and ignore it.
    async fn resize(&self, size: WindowSize) -> io::Result<()>;
}
