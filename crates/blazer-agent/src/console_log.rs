//! Size-rotated capture of an instance's stdout/stderr.
//!
//! The pipes must be drained continuously; a full pipe blocks the JVM.

use std::path::{Path, PathBuf};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    sync::mpsc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
    /// Lines the manager itself writes, such as the exec line.
    Manager,
}

impl Stream {
    pub fn tag(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
            Stream::Manager => "blazer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub stream: Stream,
    pub text: String,
}

impl ConsoleLine {
    pub fn manager(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Manager,
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        format!(
            "[{}] {}\n",
            self.stream.tag(),
            self.text.trim_end_matches(['\r', '\n'])
        )
    }
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

/// `console.log` plus `console.log.1 ..= console.log.<keep>`.
struct ConsoleLog {
    path: PathBuf,
    max_bytes: u64,
    keep: usize,
    written: u64,
    file: tokio::fs::File,
}

impl ConsoleLog {
    async fn open(path: PathBuf, max_bytes: u64, keep: usize) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let file = open_append(&path).await?;
        let written = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            keep,
            written,
            file,
        })
    }

    fn rotated(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    async fn roll(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        // The oldest generation is overwritten by the shift.
        for n in (1..self.keep).rev() {
            let _ = tokio::fs::rename(self.rotated(n), self.rotated(n + 1)).await;
        }
        let _ = tokio::fs::rename(&self.path, self.rotated(1)).await;
        self.file = open_append(&self.path).await?;
        self.written = 0;
        Ok(())
    }

    async fn append(&mut self, line: &ConsoleLine) -> std::io::Result<()> {
        let record = line.render();
        let len = record.len() as u64;
        // A single oversized line still lands in a fresh file rather than
        // rolling an empty one.
        if self.max_bytes > 0 && self.written > 0 && self.written + len > self.max_bytes {
            self.roll().await?;
        }
        self.file.write_all(record.as_bytes()).await?;
        self.written += len;
        Ok(())
    }
}

pub fn console_log_path(folder: &Path) -> PathBuf {
    folder.join("logs").join("console.log")
}

/// Start the writer task for one instance. If the file cannot be opened, lines
/// are still consumed so the child never blocks on a full pipe.
pub async fn spawn_console_sink(
    instance: &str,
    path: PathBuf,
    max_bytes: u64,
    keep: usize,
) -> mpsc::UnboundedSender<ConsoleLine> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ConsoleLine>();
    let instance = instance.to_string();
    let mut log = match ConsoleLog::open(path.clone(), max_bytes, keep).await {
        Ok(log) => Some(log),
        Err(err) => {
            tracing::warn!(%instance, path = %path.display(), %err, "console log unavailable; output is discarded");
            None
        }
    };

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let Some(current) = log.as_mut() else {
                continue;
            };
            if let Err(err) = current.append(&line).await {
                tracing::warn!(%instance, path = %path.display(), %err, "console log write failed; output is discarded");
                log = None;
            }
        }
        if let Some(mut current) = log {
            let _ = current.file.flush().await;
        }
    });

    tx
}

/// Forward every line of `reader` to `sink`. Invalid UTF-8 is replaced, not
/// treated as end of stream.
pub fn pipe_lines<R>(reader: R, stream: Stream, sink: mpsc::UnboundedSender<ConsoleLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = ConsoleLine {
                        stream,
                        text: String::from_utf8_lossy(&buf).into_owned(),
                    };
                    if sink.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
