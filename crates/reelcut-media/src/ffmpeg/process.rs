//! FFmpeg subprocess plumbing.

use crossbeam_channel::{unbounded, Receiver};
use reelcut_core::{ReelError, Result};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

use crate::bitstream::{AccessUnitSplitter, AdtsHeader, AdtsReader};

/// Size of each read from an FFmpeg stdout pipe.
const PIPE_CHUNK: usize = 64 * 1024;

/// Path of the ffmpeg binary, as resolved by ffmpeg-sidecar.
pub fn ffmpeg_binary() -> PathBuf {
    ffmpeg_sidecar::paths::ffmpeg_path()
}

/// Whether an ffmpeg binary can be executed.
pub fn ffmpeg_available() -> bool {
    Command::new(ffmpeg_binary())
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// A running ffmpeg child. Killed and reaped on drop.
pub struct FfmpegProcess {
    label: String,
    child: Child,
    stderr_thread: Option<JoinHandle<()>>,
}

impl FfmpegProcess {
    /// Spawn ffmpeg with `args`, piping stdout (and stdin when `with_stdin`).
    /// Stderr is forwarded to the debug log.
    pub fn spawn(label: impl Into<String>, args: &[String], with_stdin: bool) -> Result<Self> {
        let label = label.into();
        let mut command = Command::new(ffmpeg_binary());
        command
            .args(["-hide_banner", "-nostats", "-loglevel", "error"])
            .args(args)
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(label = %label, args = ?args, "spawning ffmpeg");

        let mut child = command
            .spawn()
            .map_err(|e| ReelError::Media(format!("Failed to spawn ffmpeg ({}): {}", label, e)))?;

        let stderr_thread = child.stderr.take().map(|mut stderr| {
            let label = label.clone();
            thread::spawn(move || {
                let mut text = String::new();
                if stderr.read_to_string(&mut text).is_ok() {
                    for line in text.lines().filter(|l| !l.trim().is_empty()) {
                        debug!(target: "ffmpeg", label = %label, "{}", line);
                    }
                }
            })
        });

        Ok(Self {
            label,
            child,
            stderr_thread,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child
            .stdin
            .take()
            .ok_or_else(|| ReelError::Media(format!("ffmpeg ({}) stdin unavailable", self.label)))
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| ReelError::Media(format!("ffmpeg ({}) stdout unavailable", self.label)))
    }

    /// Terminate the child if it is still running.
    pub fn kill(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => trace!(label = %self.label, %status, "ffmpeg already exited"),
            _ => {
                if let Err(e) = self.child.kill() {
                    warn!(label = %self.label, "killing ffmpeg failed: {}", e);
                }
                let _ = self.child.wait();
            }
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Incremental parser for an encoder's stdout.
pub trait StreamParser: Send + 'static {
    type Item: Send + 'static;

    fn push(&mut self, bytes: &[u8]) -> Result<Vec<Self::Item>>;

    /// Whatever is left once the pipe closes.
    fn finish(&mut self) -> Option<Self::Item>;
}

impl StreamParser for AccessUnitSplitter {
    type Item = Vec<u8>;

    fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(AccessUnitSplitter::push(self, bytes))
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        AccessUnitSplitter::finish(self)
    }
}

impl StreamParser for AdtsReader {
    type Item = (AdtsHeader, Vec<u8>);

    fn push(&mut self, bytes: &[u8]) -> Result<Vec<Self::Item>> {
        AdtsReader::push(self, bytes)
    }

    fn finish(&mut self) -> Option<Self::Item> {
        if self.remaining() > 0 {
            warn!(bytes = self.remaining(), "discarding truncated ADTS frame");
        }
        None
    }
}

/// Event delivered by a pipe reader thread.
#[derive(Debug)]
pub enum PipeEvent<T> {
    Item(T),
    Failed(String),
    Closed,
}

/// Read `stdout` on a dedicated thread, parse it with `parser` and forward
/// the items over a channel. `Closed` (or `Failed`) is always the last event.
pub fn spawn_reader<P: StreamParser>(
    label: &str,
    mut stdout: ChildStdout,
    mut parser: P,
) -> Result<(Receiver<PipeEvent<P::Item>>, JoinHandle<()>)> {
    let (tx, rx) = unbounded();
    let handle = thread::Builder::new()
        .name(format!("ffmpeg-{}-reader", label))
        .spawn(move || {
            let mut chunk = vec![0u8; PIPE_CHUNK];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) => {
                        if let Some(item) = parser.finish() {
                            let _ = tx.send(PipeEvent::Item(item));
                        }
                        let _ = tx.send(PipeEvent::Closed);
                        return;
                    }
                    Ok(n) => match parser.push(&chunk[..n]) {
                        Ok(items) => {
                            for item in items {
                                if tx.send(PipeEvent::Item(item)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(PipeEvent::Failed(e.to_string()));
                            return;
                        }
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(PipeEvent::Failed(e.to_string()));
                        return;
                    }
                }
            }
        })
        .map_err(|e| ReelError::Internal(format!("failed to spawn reader thread: {}", e)))?;
    Ok((rx, handle))
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
pub fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Seconds argument for `-ss` and friends.
pub fn seconds_arg(us: i64) -> String {
    format!("{}.{:06}", us / 1_000_000, us % 1_000_000)
}
