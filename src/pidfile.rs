use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A PID file held exclusively locked for the process lifetime.
///
/// The lock doubles as a single-instance guard: a second daemon pointed at
/// the same path fails to acquire. The file is removed when the guard drops.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

/// Errors produced while acquiring the PID file.
#[derive(Debug)]
pub enum PidFileError {
    /// Another process holds the lock.
    AlreadyLocked { path: PathBuf },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for PidFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PidFileError::AlreadyLocked { path } => {
                write!(
                    f,
                    "pid file {} is locked by another instance",
                    path.display()
                )
            }
            PidFileError::Io { path, source } => {
                write!(f, "pid file error at {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for PidFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PidFileError::AlreadyLocked { .. } => None,
            PidFileError::Io { source, .. } => Some(source),
        }
    }
}

impl PidFile {
    /// Create (or reuse) the file at `path`, take an exclusive lock, and
    /// write the current pid into it.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        let io_err = |source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;

        file.try_lock_exclusive().map_err(|e| {
            if e.kind() == fs2::lock_contended_error().kind() {
                PidFileError::AlreadyLocked {
                    path: path.to_path_buf(),
                }
            } else {
                io_err(e)
            }
        })?;

        // Lock held from here on; clear stale content from a previous run
        file.set_len(0).map_err(io_err)?;
        writeln!(file, "{}", std::process::id()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}
