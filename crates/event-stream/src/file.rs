use crate::{EventStream, StreamError, StreamRecord};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// How often the log file is re-read while waiting for records.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An event stream persisted as an append-only JSON lines file.
///
/// Offsets count lines from the start of the stream. The cursor file next to
/// the log (`.checkpoint`) holds the offset of the first line in the log and
/// the first pending offset, so consumption resumes where it left off after a
/// restart. Once every line is checkpointed the log is truncated.
///
/// Only new bytes are read on each call. A line that cannot be decoded is
/// delivered with its raw bytes as payload, so consumers can drop and
/// checkpoint it. An unterminated last line is left alone until the next
/// append terminates it.
///
/// Other processes may append to the log. Only one process may consume it.
pub struct FileEventStream {
    name: String,
    log_path: PathBuf,
    cursor_path: PathBuf,
    state: Mutex<State>,
    published: Notify,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    /// The offset of the first line in the log file.
    base: u64,
    /// The first offset that was not yet checkpointed.
    next: u64,
}

#[derive(Default)]
struct State {
    cursor: Cursor,
    /// The number of log bytes that were split into lines.
    scanned: u64,
    /// The offset of the next complete line.
    end: u64,
    /// Bytes after the last line break.
    tail: Vec<u8>,
    pending: VecDeque<StreamRecord>,
}

#[derive(Serialize, Deserialize)]
struct LogLine {
    enqueued_at: DateTime<Utc>,
    payload: String,
}

impl FileEventStream {
    /// Opens the stream, creating the log file as needed.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let name = name.into();
        let log_path = path.as_ref().to_path_buf();
        let cursor_path = sibling(&log_path, ".checkpoint");

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Touch the log so that readers never observe a missing file.
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        let cursor = match fs::read(&cursor_path).await {
            Ok(content) => serde_json::from_slice::<Cursor>(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Cursor::default(),
            Err(e) => return Err(e.into()),
        };

        let stream = Self {
            name,
            log_path,
            cursor_path,
            state: Mutex::new(State {
                cursor,
                end: cursor.base,
                ..Default::default()
            }),
            published: Notify::new(),
        };

        let mut state = stream.state.lock().await;
        stream.refresh(&mut state).await?;
        debug!(
            stream = %stream.name,
            path = ?stream.log_path,
            base = cursor.base,
            checkpoint = cursor.next,
            pending = state.pending.len(),
            "Opened file event stream"
        );
        drop(state);

        Ok(stream)
    }

    /// Splits the bytes appended since the last call into records.
    async fn refresh(&self, state: &mut State) -> Result<(), StreamError> {
        let mut file = fs::File::open(&self.log_path).await?;
        let length = file.metadata().await?.len();
        if length < state.scanned {
            return Err(StreamError::BackendSpecific(
                format!("the log of stream {} was truncated externally", self.name).into(),
            ));
        }

        file.seek(SeekFrom::Start(state.scanned)).await?;
        let mut buffer = Vec::with_capacity((length - state.scanned) as usize);
        file.read_to_end(&mut buffer).await?;

        let mut consumed = 0;
        while let Some(position) = buffer[consumed..].iter().position(|b| *b == b'\n') {
            let line = &buffer[consumed..consumed + position];
            consumed += position + 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let offset = state.end;
            state.end += 1;
            if offset >= state.cursor.next {
                state.pending.push_back(self.parse(offset, line));
            }
        }

        state.scanned += consumed as u64;
        state.tail = buffer.split_off(consumed);
        Ok(())
    }

    fn parse(&self, offset: u64, line: &[u8]) -> StreamRecord {
        let decoded = serde_json::from_slice::<LogLine>(line)
            .ok()
            .and_then(|line| {
                let payload = STANDARD.decode(line.payload).ok()?;
                Some((line.enqueued_at, payload))
            });

        match decoded {
            Some((enqueued_at, payload)) => StreamRecord {
                offset,
                enqueued_at,
                payload: Bytes::from(payload),
            },
            None => {
                warn!(stream = %self.name, offset, "Delivering undecodable line as is");
                StreamRecord {
                    offset,
                    // Sorts before any replay cutoff.
                    enqueued_at: DateTime::<Utc>::MIN_UTC,
                    payload: Bytes::copy_from_slice(line),
                }
            }
        }
    }

    async fn persist(&self, cursor: Cursor) -> Result<(), StreamError> {
        let staged = sibling(&self.cursor_path, ".tmp");
        fs::write(&staged, serde_json::to_vec(&cursor)?).await?;
        fs::rename(&staged, &self.cursor_path).await?;
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl EventStream for FileEventStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: Bytes) -> Result<u64, StreamError> {
        let line = LogLine {
            enqueued_at: Utc::now(),
            payload: STANDARD.encode(&payload),
        };

        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;

        let mut serialized = Vec::new();
        let mut offset = state.end;
        if !state.tail.is_empty() {
            // Terminate the line of an interrupted append.
            serialized.push(b'\n');
            if !state.tail.iter().all(u8::is_ascii_whitespace) {
                offset += 1;
            }
        }
        serialized.extend(serde_json::to_vec(&line)?);
        serialized.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(&serialized).await?;
        file.flush().await?;
        drop(state);

        trace!(stream = %self.name, offset, "Published record");
        self.published.notify_waiters();
        Ok(offset)
    }

    async fn receive(
        &self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<StreamRecord>, StreamError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let records: Vec<StreamRecord> = {
                let mut state = self.state.lock().await;
                self.refresh(&mut state).await?;
                state.pending.iter().take(max_records).cloned().collect()
            };
            if !records.is_empty() {
                return Ok(records);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(records);
            }

            let wait = POLL_INTERVAL.min(deadline - now);
            let _ = tokio::time::timeout(wait, self.published.notified()).await;
        }
    }

    async fn checkpoint(&self, record: &StreamRecord) -> Result<(), StreamError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await?;
        if record.offset >= state.end {
            return Err(StreamError::InvalidCheckpoint {
                stream: self.name.clone(),
                offset: record.offset,
            });
        }

        let next = record.offset + 1;
        if next <= state.cursor.next {
            return Ok(());
        }

        while state.pending.front().map_or(false, |r| r.offset < next) {
            state.pending.pop_front();
        }

        let mut cursor = Cursor {
            base: state.cursor.base,
            next,
        };

        // The cursor is persisted before truncating, so a crash in between
        // redelivers the old lines instead of skipping new ones.
        let drained = state.pending.is_empty()
            && state.tail.is_empty()
            && fs::metadata(&self.log_path).await?.len() == state.scanned;
        if drained {
            cursor.base = next;
        }

        self.persist(cursor).await?;
        state.cursor = cursor;

        if drained {
            let file = fs::OpenOptions::new().write(true).open(&self.log_path).await?;
            file.set_len(0).await?;
            state.scanned = 0;
            debug!(stream = %self.name, base = next, "Compacted stream log");
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), StreamError> {
        fs::metadata(&self.log_path).await?;
        Ok(())
    }
}
