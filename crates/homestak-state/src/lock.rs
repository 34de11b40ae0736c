use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Advisory, process-exclusive lock over one execution key, held for the
/// duration of a run. Backed by an exclusively-created lock file; dropped
/// (and the file removed) when the guard goes out of scope.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock at `path`, failing with [`StoreError::LockConflict`]
    /// if another run already holds it.
    pub fn acquire(path: &Path, holder: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut f) => {
                use std::io::Write;
                let _ = write!(f, "{holder}");
                Ok(RunLock {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = std::fs::read_to_string(path).unwrap_or_default();
                Err(StoreError::LockConflict { holder: existing })
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
