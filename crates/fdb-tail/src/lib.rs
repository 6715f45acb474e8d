//! File follower adapter.
//!
//! Implements the `fdb-core` follow ports by polling a growing log file and
//! publishing complete lines on a bounded channel. A trailing line without its
//! newline is held back until the rest arrives. Truncation (copytruncate log
//! rotation, server restart with a fresh log) restarts reading from offset 0.

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use fdb_core::{
    domain::{RawLine, StartPosition},
    errors::Error,
    ports::{FileFollower, FollowSource},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct TailConfig {
    /// How often the file is checked for new data once caught up.
    pub poll_interval: Duration,
    /// Lines buffered between the follower and its consumer.
    pub channel_capacity: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            channel_capacity: 256,
        }
    }
}

/// A running follow of one file.
pub struct FileTail {
    lines: Option<mpsc::Receiver<RawLine>>,
    offset: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FileTail {
    /// Start following `path` from `start`.
    ///
    /// A file that does not exist yet is waited for (and then read from its
    /// beginning). Any other open failure is returned. An offset that lands
    /// inside a line skips the rest of that line.
    pub async fn follow(
        path: impl Into<PathBuf>,
        start: StartPosition,
        cfg: TailConfig,
    ) -> Result<Self> {
        let path = path.into();

        let opened = match File::open(&path).await {
            Ok(mut file) => {
                let (pos, mid_line) = initial_position(&mut file, start).await?;
                Some(Opened {
                    file,
                    pos,
                    mid_line,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "log file does not exist yet, waiting for it");
                None
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let offset = Arc::new(AtomicU64::new(opened.as_ref().map_or(0, |o| o.pos)));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(cfg.channel_capacity.max(1));

        let task = tokio::spawn(follow_loop(
            path,
            opened,
            cfg.poll_interval,
            tx,
            offset.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            lines: Some(rx),
            offset,
            cancel,
            task: Some(task),
        })
    }
}

#[async_trait]
impl FileFollower for FileTail {
    fn take_lines(&mut self) -> Option<mpsc::Receiver<RawLine>> {
        self.lines.take()
    }

    fn tell(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    async fn stop(&mut self) -> Result<u64> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::External(format!("log follower task failed: {e}")))?;
        }
        Ok(self.tell())
    }
}

impl Drop for FileTail {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// [`FollowSource`] backed by [`FileTail`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FileFollowSource {
    cfg: TailConfig,
}

impl FileFollowSource {
    pub fn new(cfg: TailConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl FollowSource for FileFollowSource {
    async fn follow(&self, path: &Path, start: StartPosition) -> Result<Box<dyn FileFollower>> {
        Ok(Box::new(FileTail::follow(path, start, self.cfg).await?))
    }
}

/// An opened file positioned for reading.
struct Opened {
    file: File,
    pos: u64,
    /// `pos` is inside a line; its remainder is dropped.
    mid_line: bool,
}

/// Seek to the start position. Also reports whether an explicit offset landed
/// inside a line.
async fn initial_position(file: &mut File, start: StartPosition) -> Result<(u64, bool)> {
    let len = file.metadata().await?.len();
    let pos = match start {
        StartPosition::Start => return Ok((0, false)),
        StartPosition::End => len,
        StartPosition::Offset(n) if n > len => {
            tracing::warn!(offset = n, len, "start offset past end of file, starting at end");
            len
        }
        StartPosition::Offset(n) => n,
    };

    let mid_line = match start {
        StartPosition::Offset(_) if pos > 0 => {
            file.seek(SeekFrom::Start(pos - 1)).await?;
            file.read_u8().await? != b'\n'
        }
        _ => {
            file.seek(SeekFrom::Start(pos)).await?;
            false
        }
    };
    if mid_line {
        tracing::info!(offset = pos, "start offset is inside a line, skipping to the next one");
    }
    Ok((pos, mid_line))
}

async fn follow_loop(
    path: PathBuf,
    opened: Option<Opened>,
    poll: Duration,
    tx: mpsc::Sender<RawLine>,
    offset: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let Opened {
        file,
        mut pos,
        mut mid_line,
    } = match opened {
        Some(v) => v,
        None => loop {
            tokio::select! {
              _ = cancel.cancelled() => return,
              _ = ticker.tick() => {}
            }
            match File::open(&path).await {
                Ok(f) => {
                    tracing::info!(path = %path.display(), "log file appeared");
                    break Opened {
                        file: f,
                        pos: 0,
                        mid_line: false,
                    };
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to open log file");
                }
            }
        },
    };

    let mut reader = BufReader::new(file);
    // Bytes of an unfinished last line; `pos` only counts complete lines.
    let mut pending: Vec<u8> = Vec::new();

    loop {
        loop {
            match reader.read_until(b'\n', &mut pending).await {
                Ok(0) => break,
                Ok(_) if pending.last() != Some(&b'\n') => break,
                Ok(_) => {
                    pos += pending.len() as u64;
                    if mid_line {
                        mid_line = false;
                        pending.clear();
                        offset.store(pos, Ordering::SeqCst);
                        continue;
                    }
                    let line = decode_line(std::mem::take(&mut pending));
                    offset.store(pos, Ordering::SeqCst);
                    tokio::select! {
                      _ = cancel.cancelled() => return,
                      sent = tx.send(line) => {
                        if sent.is_err() {
                          tracing::debug!("line consumer gone, stopping follower");
                          return;
                        }
                      }
                    }
                }
                Err(e) => {
                    pending.clear();
                    tracing::debug!(error = %e, "log read failed");
                    if tx.send(RawLine::failed(Error::Io(e))).await.is_err() {
                        return;
                    }
                    break;
                }
            }
        }

        match reader.get_ref().metadata().await {
            Ok(md) if md.len() < pos + pending.len() as u64 => {
                tracing::warn!(
                    path = %path.display(),
                    len = md.len(),
                    offset = pos,
                    "log file truncated, reading from the start"
                );
                match reader.seek(SeekFrom::Start(0)).await {
                    Ok(_) => {
                        pos = 0;
                        mid_line = false;
                        pending.clear();
                        offset.store(0, Ordering::SeqCst);
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to rewind truncated log file"),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "failed to stat log file"),
        }

        tokio::select! {
          _ = cancel.cancelled() => return,
          _ = ticker.tick() => {}
        }
    }
}

/// Strip the line ending and decode. Invalid UTF-8 becomes a read error.
fn decode_line(mut raw: Vec<u8>) -> RawLine {
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }
    match String::from_utf8(raw) {
        Ok(text) => RawLine::ok(text),
        Err(e) => RawLine::failed(Error::Io(io::Error::new(io::ErrorKind::InvalidData, e))),
    }
}
