//! # File Snapshot Store
//!
//! One file: `[u64 LE snapshot_version][snapshot bytes]`.
//!
//! Saves write a sibling temp file, sync it and rename it over the target,
//! so readers never see a partially written snapshot.

use super::{SnapshotStore, StoredSnapshot};
use crate::formats::peek_schema_version;
use crate::types::IsgError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const VERSION_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

fn io_err(path: &Path, e: std::io::Error) -> IsgError {
    IsgError::IoError(format!("{}: {}", path.display(), e))
}

impl FileSnapshotStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, bytes: &[u8], snapshot_version: u64) -> Result<(), IsgError> {
        peek_schema_version(bytes)?;
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp).map_err(|e| io_err(&temp, e))?;
            file.write_all(&snapshot_version.to_le_bytes())
                .and_then(|()| file.write_all(bytes))
                .and_then(|()| file.sync_all())
                .map_err(|e| io_err(&temp, e))?;
        }
        fs::rename(&temp, &self.path).map_err(|e| io_err(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot saved to file");
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredSnapshot>, IsgError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let Some((version, bytes)) = contents.split_first_chunk::<VERSION_PREFIX_LEN>() else {
            return Err(IsgError::SerializationError(format!(
                "{}: truncated snapshot file",
                self.path.display()
            )));
        };
        Ok(Some(StoredSnapshot {
            schema_version: peek_schema_version(bytes)?,
            snapshot_version: u64::from_le_bytes(*version),
            bytes: bytes.to_vec(),
        }))
    }

    fn clear(&self) -> Result<(), IsgError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.path, e)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
