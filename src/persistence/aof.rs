//! Append-Only Log
//!
//! The log is a best-effort durability trail: one text line per mutating
//! command, appended under the log's own mutex. Before every write the log
//! checks that its file still exists; if it was removed out-of-band the file
//! is recreated and writing continues. Records written before the removal
//! are not recovered.

use crate::persistence::record::{DecodeError, LogRecord};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the append-only log.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: DecodeError },
}

/// When appended data is forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FsyncPolicy {
    /// `sync_data` after every append
    Always,
    /// Leave flushing to the operating system
    #[default]
    Os,
}

/// Records read back from a log file.
#[derive(Debug, Default)]
pub struct LoadedLog {
    pub records: Vec<LogRecord>,
    /// Lines that could not be decoded and were skipped
    pub skipped: Vec<AofError>,
}

/// The append-only log file.
#[derive(Debug)]
pub struct AppendOnlyLog {
    path: PathBuf,
    fsync: FsyncPolicy,
    writer: Mutex<Writer>,
}

#[derive(Debug)]
struct Writer {
    file: File,
    /// The file may end in a partial line that the next record must not
    /// be glued onto
    torn: bool,
}

impl AppendOnlyLog {
    /// Opens (creating if necessary) the log at `path` in append mode.
    ///
    /// If the existing file ends in a partial line, left behind by a crash
    /// in the middle of a write, the next append starts on a fresh line.
    pub fn open(path: impl Into<PathBuf>, fsync: FsyncPolicy) -> Result<Self, AofError> {
        let path = path.into();
        let file = open_append(&path)?;
        let torn = ends_mid_line(&path).map_err(|source| AofError::Io {
            path: path.clone(),
            source,
        })?;
        if torn {
            warn!(path = %path.display(), "Append-only log ends in a partial line");
        }

        Ok(Self {
            path,
            fsync,
            writer: Mutex::new(Writer { file, torn }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    ///
    /// If the file has been removed since the last write it is reopened
    /// first. After a failed write the next record is preceded by a line
    /// break so that it never continues a partially written line.
    pub fn append(&self, record: &LogRecord) -> Result<(), AofError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.path.exists() {
            warn!(path = %self.path.display(), "Append-only log was removed, recreating it");
            writer.file = open_append(&self.path)?;
            writer.torn = false;
        }

        let mut line = String::new();
        if writer.torn {
            line.push('\n');
        }
        line.push_str(&record.encode());
        line.push('\n');

        let Writer { file, torn } = &mut *writer;
        match file.write_all(line.as_bytes()) {
            Ok(()) => *torn = false,
            Err(source) => {
                *torn = true;
                return Err(self.io_error(source));
            }
        }

        match self.fsync {
            FsyncPolicy::Always => file.sync_data().map_err(|source| self.io_error(source)),
            FsyncPolicy::Os => Ok(()),
        }
    }

    /// Flushes everything written so far to stable storage.
    pub fn sync(&self) -> Result<(), AofError> {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.file.sync_all().map_err(|source| self.io_error(source))
    }

    /// Reads every record in the log at `path`, in order.
    ///
    /// A missing file yields no records. Lines that fail to decode, such as
    /// a final line torn by a crash, are skipped and reported in
    /// [`LoadedLog::skipped`].
    pub fn read_records(path: impl AsRef<Path>) -> Result<LoadedLog, AofError> {
        let path = path.as_ref();
        let io_error = |source: io::Error| AofError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No append-only log to read");
                return Ok(LoadedLog::default());
            }
            Err(e) => return Err(io_error(e)),
        };

        let mut loaded = LoadedLog::default();
        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(io_error)?;
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }

            match LogRecord::decode(&text) {
                Ok(record) => loaded.records.push(record),
                Err(reason) => loaded.skipped.push(AofError::Malformed {
                    line: index + 1,
                    reason,
                }),
            }
        }

        Ok(loaded)
    }

    fn io_error(&self, source: io::Error) -> AofError {
        AofError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn open_append(path: &Path) -> Result<File, AofError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AofError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Returns true if the file at `path` is non-empty and does not end in a
/// line break.
fn ends_mid_line(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ValueKind;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set(key: &'static str, value: &'static str) -> LogRecord {
        LogRecord::Set {
            key: Bytes::from(key),
            value: Bytes::from(value),
            kind: ValueKind::String,
            ttl: Some(Duration::from_secs(120)),
            written_at: 1_000,
        }
    }

    #[test]
    fn test_append_writes_one_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        let log = AppendOnlyLog::open(&path, FsyncPolicy::Os).unwrap();

        log.append(&set("a", "1")).unwrap();
        log.append(&LogRecord::Del {
            key: Bytes::from("a"),
            written_at: 2_000,
        })
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "SET a 1 string 120000 1000\nDEL a \"\" - 0 2000\n"
        );
    }

    #[test]
    fn test_append_recreates_removed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        let log = AppendOnlyLog::open(&path, FsyncPolicy::Always).unwrap();

        log.append(&set("a", "1")).unwrap();
        std::fs::remove_file(&path).unwrap();
        log.append(&set("b", "2")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "SET b 2 string 120000 1000\n");
    }

    #[test]
    fn test_append_fails_when_file_cannot_be_recreated() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let path = nested.join("aof.log");
        let log = AppendOnlyLog::open(&path, FsyncPolicy::Os).unwrap();

        std::fs::remove_dir_all(&nested).unwrap();

        let result = log.append(&set("a", "1"));
        assert!(matches!(result, Err(AofError::Io { .. })));
    }

    #[test]
    fn test_existing_contents_are_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");

        AppendOnlyLog::open(&path, FsyncPolicy::Os)
            .unwrap()
            .append(&set("a", "1"))
            .unwrap();
        let log = AppendOnlyLog::open(&path, FsyncPolicy::Os).unwrap();
        log.append(&set("b", "2")).unwrap();
        log.sync().unwrap();

        let loaded = AppendOnlyLog::read_records(&path).unwrap();
        assert_eq!(loaded.records, vec![set("a", "1"), set("b", "2")]);
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_append_after_torn_tail_starts_new_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        std::fs::write(&path, "SET a 1 string 120000 1000\nSET b \"tor").unwrap();

        let log = AppendOnlyLog::open(&path, FsyncPolicy::Os).unwrap();
        log.append(&set("c", "3")).unwrap();
        log.append(&set("d", "4")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "SET a 1 string 120000 1000\nSET b \"tor\nSET c 3 string 120000 1000\nSET d 4 string 120000 1000\n"
        );

        let loaded = AppendOnlyLog::read_records(&path).unwrap();
        assert_eq!(
            loaded.records,
            vec![set("a", "1"), set("c", "3"), set("d", "4")]
        );
        assert_eq!(loaded.skipped.len(), 1);
        assert!(matches!(
            loaded.skipped[0],
            AofError::Malformed { line: 2, .. }
        ));
    }

    #[test]
    fn test_ends_mid_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");

        std::fs::write(&path, "").unwrap();
        assert!(!ends_mid_line(&path).unwrap());
        std::fs::write(&path, "SET a 1 string 120000 1000\n").unwrap();
        assert!(!ends_mid_line(&path).unwrap());
        std::fs::write(&path, "SET a 1 str").unwrap();
        assert!(ends_mid_line(&path).unwrap());
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = AppendOnlyLog::read_records(dir.path().join("absent.log")).unwrap();
        assert!(loaded.records.is_empty());
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_read_skips_malformed_and_torn_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aof.log");
        std::fs::write(
            &path,
            "SET a 1 string 120000 1000\ngarbage\n\nDEL a \"\" - 0 2000\nSET b \"tor",
        )
        .unwrap();

        let loaded = AppendOnlyLog::read_records(&path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.skipped.len(), 2);
        assert!(matches!(
            loaded.skipped[0],
            AofError::Malformed { line: 2, .. }
        ));
        assert!(matches!(
            loaded.skipped[1],
            AofError::Malformed { line: 5, .. }
        ));
    }
}
