use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task;
use tracing::{debug, trace, warn};

use crate::error::StartError;
use crate::resize::WindowSize;
use crate::stream::DuplexStream;

const READ_CHUNK: usize = 4096;
const OUTPUT_QUEUE_DEPTH: usize = 64;

/// Linux reports a hung-up PTY master as EIO rather than a zero-length read.
#[cfg(unix)]
const EIO: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Splits `line` on whitespace. No quoting or variable expansion.
    pub fn parse(line: &str) -> Result<Self, StartError> {
        let mut parts = line.split_whitespace();
        let program = parts.next().ok_or(StartError::MissingCommand)?;
        Ok(Self::new(program).args(parts))
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// A child process attached to a pseudo-terminal.
///
/// Output is pumped by a dedicated reader thread into a bounded queue so that
/// async reads never block a runtime worker and stay cancel-safe.
pub struct PtyStream {
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    output: tokio::sync::Mutex<OutputQueue>,
}

impl PtyStream {
    /// Opens a PTY and spawns `command` on it. Blocks while the OS creates
    /// the process; async callers should run it on the blocking pool.
    pub fn spawn(command: &Command, size: WindowSize) -> Result<Self, StartError> {
        let pair = open_pair(size)?;
        let child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|err| StartError::Spawn(format!("spawn {}: {err}", command.program)))?;
        // The slave end must close in this process or reads never see hang-up.
        drop(pair.slave);

        let master = pair.master;
        let reader = master
            .try_clone_reader()
            .map_err(|err| StartError::Spawn(format!("clone PTY reader: {err}")))?;
        let writer = master
            .take_writer()
            .map_err(|err| StartError::Spawn(format!("take PTY writer: {err}")))?;

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
        let program = command.program.clone();
        thread::Builder::new()
            .name(format!("pty-reader-{program}"))
            .spawn(move || pump_output(reader, tx))
            .map_err(|err| StartError::Spawn(format!("start PTY reader thread: {err}")))?;

        debug!(program = %command.program, args = ?command.args, "spawned PTY child");
        Ok(Self {
            master: Mutex::new(master),
            child: Mutex::new(Some(child)),
            writer: Arc::new(Mutex::new(writer)),
            output: tokio::sync::Mutex::new(OutputQueue::new(rx)),
        })
    }

    #[cfg(test)]
    fn process_id(&self) -> Option<u32> {
        self.child
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(|child| child.process_id()))
    }
}

impl Drop for PtyStream {
    fn drop(&mut self) {
        let child = match self.child.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut child) = child else {
            return;
        };
        let _ = child.kill();
        // Reaping blocks until the process is gone; keep it off runtime workers.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || reap(child));
            }
            Err(_) => reap(child),
        }
    }
}

fn reap(mut child: Box<dyn Child + Send + Sync>) {
    match child.wait() {
        Ok(status) => debug!(?status, "PTY child reaped"),
        Err(err) => warn!(error = %err, "failed to reap PTY child"),
    }
}

#[async_trait]
impl DuplexStream for PtyStream {
    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let writer = self.writer.clone();
        let data = data.to_vec();
        task::spawn_blocking(move || {
            let mut guard = writer
                .lock()
                .map_err(|_| io::Error::other("PTY writer lock poisoned"))?;
            guard.write_all(&data)?;
            guard.flush()
        })
        .await
        .map_err(|err| io::Error::other(format!("join PTY write task: {err}")))?
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.output.lock().await;
        if let Some(n) = queue.take_buffered(buf) {
            return Ok(n);
        }
        let next = queue.rx.recv().await;
        match next {
            Some(Ok(chunk)) => Ok(queue.deliver(chunk, buf)),
            Some(Err(err)) => Err(err),
            None => {
                queue.closed = true;
                Ok(0)
            }
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        // Another request is already parked on this session's output.
        let Ok(mut queue) = self.output.try_lock() else {
            return Ok(None);
        };
        if let Some(n) = queue.take_buffered(buf) {
            return Ok(Some(n));
        }
        let next = queue.rx.try_recv();
        match next {
            Ok(Ok(chunk)) => Ok(Some(queue.deliver(chunk, buf))),
            Ok(Err(err)) => Err(err),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                queue.closed = true;
                Ok(Some(0))
            }
        }
    }

    async fn resize(&self, size: WindowSize) -> io::Result<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| io::Error::other("PTY master lock poisoned"))?;
        master
            .resize(size.into())
            .map_err(|err| io::Error::other(format!("resize PTY: {err}")))
    }
}

struct OutputQueue {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    leftover: Vec<u8>,
    closed: bool,
}

impl OutputQueue {
    fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            leftover: Vec::new(),
            closed: false,
        }
    }

    /// Serves bytes held back from an earlier oversized chunk, or the
    /// end-of-stream marker once the pump has gone away.
    fn take_buffered(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.leftover.is_empty() {
            let chunk = std::mem::take(&mut self.leftover);
            return Some(self.deliver(chunk, buf));
        }
        if self.closed {
            return Some(0);
        }
        None
    }

    fn deliver(&mut self, mut chunk: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.leftover = chunk.split_off(n);
        }
        n
    }
}

fn open_pair(size: WindowSize) -> Result<PtyPair, StartError> {
    native_pty_system()
        .openpty(size.into())
        .map_err(|err| StartError::Spawn(format!("open PTY pair: {err}")))
}

fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                trace!(bytes = n, "PTY output");
                if tx.blocking_send(Ok(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_hangup(&err) => break,
            Err(err) => {
                warn!(error = %err, "PTY read failed");
                let _ = tx.blocking_send(Err(err));
                break;
            }
        }
    }
    debug!("PTY reader finished");
}

#[cfg(unix)]
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EIO)
}

#[cfg(not(unix))]
fn is_hangup(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parse_splits_on_whitespace() {
        let command = Command::parse("  man   bash ").unwrap();
        assert_eq!(command.program, "man");
        assert_eq!(command.args, vec!["bash".to_string()]);
    }

    #[test_timeout::timeout]
    fn parse_rejects_blank_line() {
        assert!(matches!(
            Command::parse("   "),
            Err(StartError::MissingCommand)
        ));
    }

    #[test_timeout::timeout]
    fn oversized_chunk_is_split_across_reads() {
        let (_tx, rx) = mpsc::channel(1);
        let mut queue = OutputQueue::new(rx);
        let mut buf = [0u8; 4];
        assert_eq!(queue.deliver(b"abcdef".to_vec(), &mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(queue.take_buffered(&mut buf), Some(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(queue.take_buffered(&mut buf), None);
    }

    #[cfg(unix)]
    #[test_timeout::tokio_timeout_test(20)]
    async fn echoes_through_cat() {
        let stream = PtyStream::spawn(&Command::new("cat"), WindowSize::default()).unwrap();
        stream.write_all(b"bridge-check\n").await.unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        while !String::from_utf8_lossy(&output).contains("bridge-check") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "cat exited early");
            output.extend_from_slice(&buf[..n]);
        }
    }

    #[cfg(unix)]
    #[test_timeout::tokio_timeout_test(20)]
    async fn exit_is_reported_as_end_of_stream() {
        let stream = PtyStream::spawn(&Command::new("true"), WindowSize::default()).unwrap();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if stream.read(&mut buf).await.unwrap() == 0 {
                break;
            }
        }
        assert_eq!(stream.try_read(&mut buf).unwrap(), Some(0));
    }

    #[cfg(unix)]
    #[test_timeout::tokio_timeout_test(20)]
    async fn dropping_stream_kills_and_reaps_child() {
        let stream = PtyStream::spawn(&Command::new("cat"), WindowSize::default()).unwrap();
        let pid = stream.process_id().expect("child pid").to_string();
        drop(stream);

        for _ in 0..100 {
            let alive = std::process::Command::new("kill")
                .args(["-0", &pid])
                .stderr(std::process::Stdio::null())
                .status()
                .unwrap()
                .success();
            if !alive {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("child {pid} still present after drop");
    }
}
