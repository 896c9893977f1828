//! Append-only per-device log files.
//!
//! Each device index owns exactly one file, `<prefix>_<index>.<ext>`, inside
//! the configured directory. A [`LogFile`] is held by its ingestor for the
//! whole ingestion cycle; deletion goes through the same handle so no other
//! task ever touches an open log.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use seriallog_core::{LogEncoding, TimestampedMessage};

/// Written when an ingestion cycle starts.
pub const START_MARKER: &str = "---------------- new logging started ----------------";

/// Written when an ingestion cycle ends without a delete.
pub const END_MARKER: &str = "---------------- logging ended ----------------";

/// Terminates every record and marker.
pub const RECORD_TERMINATOR: &str = "\r\n";

/// Errors that can occur while persisting logs.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to open log {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to write log {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to remove log {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("Failed to read log {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("No log for device {index}")]
    NotFound { index: usize },
}

/// Naming and encoding rules for the per-device logs.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
    prefix: String,
    extension: String,
    encoding: LogEncoding,
}

impl LogStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
        encoding: LogEncoding,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            encoding,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn encoding(&self) -> LogEncoding {
        self.encoding
    }

    /// Path of the log for `index`.
    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", self.prefix, index, self.extension))
    }

    /// Opens (creating if needed) the log for `index` in append mode.
    pub async fn open(&self, index: usize) -> Result<LogFile, PersistError> {
        let path = self.path_for(index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| PersistError::Open {
                path: path.clone(),
                source,
            })?;

        debug!(index, path = %path.display(), "Log opened");

        Ok(LogFile {
            file,
            path,
            encoding: self.encoding,
        })
    }

    /// Reads the whole log for `index`.
    pub async fn read(&self, index: usize) -> Result<Vec<u8>, PersistError> {
        let path = self.path_for(index);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PersistError::NotFound { index }),
            Err(source) => Err(PersistError::Read { path, source }),
        }
    }
}

/// An open log owned by one ingestion cycle.
#[derive(Debug)]
pub struct LogFile {
    file: File,
    path: PathBuf,
    encoding: LogEncoding,
}

impl LogFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_start_marker(&mut self) -> Result<(), PersistError> {
        self.write_record(START_MARKER).await
    }

    /// Appends `[timestamp] line` and syncs it to disk.
    pub async fn append(&mut self, message: &TimestampedMessage) -> Result<(), PersistError> {
        self.write_record(&message.log_record()).await
    }

    /// Writes the end marker followed by two blank lines and closes the file.
    pub async fn finish(mut self) -> Result<(), PersistError> {
        let trailer = format!("{END_MARKER}{RECORD_TERMINATOR}{RECORD_TERMINATOR}");
        self.write_record(&trailer).await
    }

    /// Closes and deletes the file without writing an end marker.
    ///
    /// Returns `false` if the file was already gone.
    pub async fn remove(self) -> Result<bool, PersistError> {
        let Self { file, path, .. } = self;
        drop(file);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(PersistError::Remove { path, source }),
        }
    }

    async fn write_record(&mut self, text: &str) -> Result<(), PersistError> {
        let mut bytes = self.encoding.encode(text);
        bytes.extend_from_slice(RECORD_TERMINATOR.as_bytes());

        let result = async {
            self.file.write_all(&bytes).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;

        result.map_err(|source| PersistError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
