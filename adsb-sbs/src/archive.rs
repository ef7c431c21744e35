//! Message archives: timestamped recordings of an SBS stream.
//!
//! Each record is the receive time followed by the raw SBS line:
//!
//! ```text
//! 2017-03-25T10:41:45.384000+00:00,MSG,3,1,1,7C79B7,1,...\r\n
//! ```
//!
//! Keeping the receive time lets a session be replayed faster or slower
//! than real time while preserving the spacing between messages.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, error, warn};

use crate::error::{Result, SbsError};

/// Record terminator, the same as the SBS stream delimiter.
const TERMINATOR: &str = "\r\n";

/// Default archive size before rollover (8 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 1 << 23;

/// Default number of rotated files kept.
pub const DEFAULT_BACKUP_COUNT: u32 = 3;

/// Replay delays at or below this are skipped.
pub const MIN_REPLAY_DELAY: Duration = Duration::from_millis(40);

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// An append-only archive file that rotates by size.
///
/// Once the file size plus the next message and its terminator (the
/// timestamp prefix is not counted) reaches `max_bytes`, the file is
/// renamed to `<path>.1` (shifting older backups up to `<path>.<backup_count>`
/// and dropping the oldest) and a fresh file is started. With `max_bytes`
/// or `backup_count` of 0 the file grows without limit.
#[derive(Debug)]
pub struct RotatingArchive {
    path: PathBuf,
    file: Option<File>,
    max_bytes: u64,
    backup_count: u32,
}

impl RotatingArchive {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64, backup_count: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        debug!("Recording messages to {}", path.display());
        Ok(RotatingArchive {
            path,
            file: Some(file),
            max_bytes,
            backup_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append `record` stamped with the current time.
    pub fn emit(&mut self, record: &str) -> Result<()> {
        self.emit_at(record, Utc::now())
    }

    /// Append `record` stamped with `timestamp`.
    pub fn emit_at(&mut self, record: &str, timestamp: DateTime<Utc>) -> Result<()> {
        if self.file.is_none() {
            warn!("Attempted to write to archive but no stream exists");
            return Ok(());
        }

        let line = format!(
            "{},{record}{TERMINATOR}",
            timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
        );
        // the size check counts the message and terminator, not the timestamp
        if self.should_rollover((record.len() + TERMINATOR.len()) as u64)? {
            self.rollover()?;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    fn should_rollover(&self, record_len: u64) -> Result<bool> {
        if self.max_bytes == 0 || self.backup_count == 0 {
            return Ok(false);
        }
        let Some(file) = self.file.as_ref() else {
            return Ok(false);
        };
        let size = file.metadata()?.len();
        // an empty file is never rotated, even for an oversized record
        Ok(size > 0 && size + record_len >= self.max_bytes)
    }

    /// Rotate now: `.N-1 → .N`, ..., `base → .1`, then reopen `base`.
    pub fn rollover(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        if self.backup_count > 0 {
            for i in (1..self.backup_count).rev() {
                let src = self.backup_path(i);
                let dst = self.backup_path(i + 1);
                if src.exists() {
                    if dst.exists() {
                        fs::remove_file(&dst)?;
                    }
                    fs::rename(&src, &dst)?;
                }
            }
            let first = self.backup_path(1);
            if first.exists() {
                fs::remove_file(&first)?;
            }
            if self.path.exists() {
                fs::rename(&self.path, &first)?;
            }
            debug!("Rotated archive {}", self.path.display());
        }

        self.file = Some(open_append(&self.path)?);
        Ok(())
    }

    /// Path of backup number `n` (`<path>.<n>`).
    pub fn backup_path(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// A shareable on/off switch around a `RotatingArchive`.
///
/// Clones share the same archive, so a reader task can record lines while
/// the owner starts and stops recording.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Option<RotatingArchive>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RotatingArchive>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start recording to `path`. Warns and keeps the current archive if
    /// already recording.
    pub fn start(&self, path: &Path, max_bytes: u64, backup_count: u32) -> Result<()> {
        let mut archive = self.lock();
        if archive.is_some() {
            warn!("Attempted to start recording messages but already recording!");
            return Ok(());
        }
        *archive = Some(RotatingArchive::open(path, max_bytes, backup_count)?);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if let Some(mut archive) = self.lock().take() {
            archive.close()?;
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.lock().is_some()
    }

    /// Archive `line` if recording. Write failures are logged, not returned.
    pub fn record(&self, line: &str) {
        if let Some(archive) = self.lock().as_mut() {
            if let Err(e) = archive.emit(line) {
                error!("Problem storing message to archive: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One archived message.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub timestamp: DateTime<Utc>,
    /// Raw SBS line, without delimiter.
    pub message: String,
}

/// Split an archive line into its timestamp and message.
pub fn parse_record(line: &str) -> std::result::Result<ArchiveRecord, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (timestamp, message) = line
        .split_once(',')
        .ok_or_else(|| "missing timestamp separator".to_string())?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| format!("bad timestamp {timestamp:?}: {e}"))?
        .with_timezone(&Utc);
    Ok(ArchiveRecord {
        timestamp,
        message: message.to_string(),
    })
}

/// Iterator over the records in an archive file.
pub struct ArchiveReader {
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

impl Iterator for ArchiveReader {
    type Item = Result<ArchiveRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_record(&line).map_err(|reason| SbsError::InvalidArchive {
                line: self.line_no,
                reason,
            }));
        }
    }
}

/// Open an archive for reading. A missing file yields no records.
pub fn read_archive(path: impl AsRef<Path>) -> Result<ArchiveReader> {
    let path = path.as_ref();
    let lines = if path.exists() {
        Some(BufReader::new(File::open(path)?).lines())
    } else {
        None
    };
    Ok(ArchiveReader { lines, line_no: 0 })
}

/// How long to wait before replaying a record received at `next` when the
/// previous one arrived at `previous`. `None` means send immediately: the
/// rate is 0 or less, time went backwards, or the gap is too short to matter.
pub fn replay_delay(previous: DateTime<Utc>, next: DateTime<Utc>, rate: f64) -> Option<Duration> {
    if rate <= 0.0 {
        return None;
    }
    let interval = (next - previous).to_std().ok()?;
    let delay = Duration::try_from_secs_f64(interval.as_secs_f64() / rate).unwrap_or(Duration::MAX);
    (delay > MIN_REPLAY_DELAY).then_some(delay)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
