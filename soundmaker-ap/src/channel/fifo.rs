//! Named pipe creation and identity tracking

use crate::error::{Error, Result};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, info, warn};

/// Permissions of the event pipe: any local user may write
pub const FIFO_MODE: u32 = 0o666;

/// Device and inode of the object currently at the pipe path
///
/// If an external step deletes and recreates the pipe, writers open the new
/// inode while an old read handle would wait on the old one forever. Comparing
/// identities tells the reader it must reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FifoIdentity {
    /// Identity of the FIFO at `path`, or `None` if it is missing or not a FIFO
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.file_type().is_fifo() {
            return None;
        }
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Make sure a world-writable FIFO exists at `path`
///
/// - Missing: created with mode 0666 regardless of umask
/// - Regular file or other non-FIFO in the way: removed and recreated
/// - Existing FIFO: permissions relaxed to 0666 when we are allowed to; a FIFO
///   owned by another user (after ownership hardening) is used as is
pub fn ensure_fifo(path: &Path) -> Result<FifoIdentity> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => {
            if meta.permissions().mode() & 0o777 != FIFO_MODE {
                if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(FIFO_MODE)) {
                    debug!(
                        "Could not relax permissions on {} (likely owned by another user): {}",
                        path.display(),
                        e
                    );
                }
            }
            debug!("Using existing event pipe: {}", path.display());
        }
        Ok(_) => {
            warn!("{} exists but is not a FIFO, replacing it", path.display());
            fs::remove_file(path).map_err(|source| Error::Channel {
                path: path.to_path_buf(),
                source,
            })?;
            create_fifo(path)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create_fifo(path)?,
        Err(source) => {
            return Err(Error::Channel {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    FifoIdentity::of(path).ok_or_else(|| Error::Channel {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "event pipe vanished"),
    })
}

fn create_fifo(path: &Path) -> Result<()> {
    let channel_err = |source| Error::Channel {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(channel_err)?;
        }
    }

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        channel_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path contains a NUL byte",
        ))
    })?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE as libc::mode_t) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Lost a race with another creator; the FIFO is there either way
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            return Err(channel_err(err));
        }
    }

    // mkfifo honours the umask, so set the mode explicitly
    fs::set_permissions(path, fs::Permissions::from_mode(FIFO_MODE)).map_err(channel_err)?;
    info!("Created event pipe {} with permissions 666", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_world_writable_fifo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events");

        let identity = ensure_fifo(&path).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.permissions().mode() & 0o777, FIFO_MODE);
        assert_eq!(FifoIdentity::of(&path), Some(identity));
    }

    #[test]
    fn test_existing_fifo_is_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events");

        let first = ensure_fifo(&path).unwrap();
        let second = ensure_fifo(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tightened_fifo_is_relaxed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events");
        ensure_fifo(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        ensure_fifo(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, FIFO_MODE);
    }

    #[test]
    fn test_regular_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events");
        fs::write(&path, b"stale").unwrap();
        assert_eq!(FifoIdentity::of(&path), None);

        ensure_fifo(&path).unwrap();
        assert!(fs::metadata(&path).unwrap().file_type().is_fifo());
    }

    #[test]
    fn test_recreated_fifo_has_new_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events");
        let before = ensure_fifo(&path).unwrap();

        // Keep the old inode alive so it cannot be recycled for the new FIFO
        let keep = dir.path().join("old-events");
        fs::rename(&path, &keep).unwrap();
        let after = ensure_fifo(&path).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_missing_parent_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("soundmaker").join("events");
        ensure_fifo(&path).unwrap();
        assert!(FifoIdentity::of(&path).is_some());
    }
}
