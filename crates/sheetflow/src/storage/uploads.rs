//! Scratch storage for uploaded files awaiting processing.

use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StorageError;
use crate::sanitize::sanitize_filename;

/// Writes uploads under one directory with collision-free names.
#[derive(Debug, Clone)]
pub struct UploadStore {
    directory: PathBuf,
}

impl UploadStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stores `content` as `<uuid>-<sanitized name>` and returns its path.
    pub fn save(&self, content: &[u8], original_name: &str) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.directory).map_err(|e| StorageError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })?;

        let filename = format!("{}-{}", Uuid::new_v4(), sanitize_filename(original_name));
        let path = self.directory.join(filename);

        // create_new guards against overwriting a file we did not write.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(content).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        log::debug!("Stored upload {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    pub fn release(&self, path: &Path) -> Result<(), StorageError> {
        release_file(path)
    }
}

/// Deletes a processed source file. A file that is already gone is not an error.
pub fn release_file(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Source file {} already removed", path.display());
            Ok(())
        }
        Err(e) => Err(StorageError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
