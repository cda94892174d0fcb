//! In-memory stand-ins for the process side of a session.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::error::StartError;
use crate::resize::WindowSize;
use crate::starter::SessionStarter;
use crate::stream::DuplexStream;

/// A stream whose output is fed by the test and whose input is recorded.
pub(crate) struct ScriptedStream {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    output: tokio::sync::Mutex<Output>,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<WindowSize>>,
    fail_resize: bool,
}

struct Output {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    leftover: Vec<u8>,
}

impl Output {
    fn deliver(&mut self, mut chunk: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.leftover = chunk.split_off(n);
        }
        n
    }
}

impl ScriptedStream {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            output: tokio::sync::Mutex::new(Output {
                rx,
                leftover: Vec::new(),
            }),
            written: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
            fail_resize: false,
        }
    }

    pub(crate) fn without_terminal() -> Self {
        Self {
            fail_resize: true,
            ..Self::new()
        }
    }

    /// Queues bytes as if the process had printed them.
    pub(crate) fn emit(&self, bytes: &[u8]) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            tx.send(bytes.to_vec()).unwrap();
        }
    }

    /// Simulates the process exiting.
    pub(crate) fn hang_up(&self) {
        self.tx.lock().unwrap().take();
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) fn sizes(&self) -> Vec<WindowSize> {
        self.sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DuplexStream for ScriptedStream {
    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut output = self.output.lock().await;
        if !output.leftover.is_empty() {
            let chunk = std::mem::take(&mut output.leftover);
            return Ok(output.deliver(chunk, buf));
        }
        let next = output.rx.recv().await;
        match next {
            Some(chunk) => Ok(output.deliver(chunk, buf)),
            None => Ok(0),
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Ok(mut output) = self.output.try_lock() else {
            return Ok(None);
        };
        if !output.leftover.is_empty() {
            let chunk = std::mem::take(&mut output.leftover);
            return Ok(Some(output.deliver(chunk, buf)));
        }
        let next = output.rx.try_recv();
        match next {
            Ok(chunk) => Ok(Some(output.deliver(chunk, buf))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Ok(Some(0)),
        }
    }

    async fn resize(&self, size: WindowSize) -> io::Result<()> {
        if self.fail_resize {
            return Err(io::Error::other("inappropriate ioctl for device"));
        }
        self.sizes.lock().unwrap().push(size);
        Ok(())
    }
}

/// Starter that hands out [`ScriptedStream`]s and counts invocations.
pub(crate) struct CountingStarter {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    terminal: bool,
    params: Mutex<Vec<HashMap<String, String>>>,
    streams: Mutex<Vec<Arc<ScriptedStream>>>,
}

impl CountingStarter {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            delay: None,
            terminal: true,
            params: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub(crate) fn failing_first(count: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(count),
            ..Self::new()
        }
    }

    /// Streams from this starter reject resizes like a pipe would.
    pub(crate) fn without_terminal() -> Self {
        Self {
            terminal: false,
            ..Self::new()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_params(&self) -> Vec<HashMap<String, String>> {
        self.params.lock().unwrap().clone()
    }

    /// The stream handed to the most recently created session.
    pub(crate) fn last_stream(&self) -> Arc<ScriptedStream> {
        self.streams
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session started yet")
    }
}

#[async_trait]
impl SessionStarter for CountingStarter {
    async fn start(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Arc<dyn DuplexStream>, StartError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.params.lock().unwrap().push(params.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StartError::Spawn("scripted failure".into()));
        }
        let stream = Arc::new(if self.terminal {
            ScriptedStream::new()
        } else {
            ScriptedStream::without_terminal()
        });
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}
