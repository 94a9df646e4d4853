//! State file publication for the LED controller
//!
//! The LED controller polls a small text file holding one [`AudioState`] tag.
//! Every write goes to a sibling temp file first and is renamed into place,
//! so a reader sees either the old tag or the new one, never a partial write.

use crate::error::{Error, Result};
use soundmaker_common::AudioState;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes the settled audio state to a well-known path
#[derive(Debug, Clone)]
pub struct StatePublisher {
    path: PathBuf,
}

impl StatePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the state file with `state`'s tag
    ///
    /// The file is world-readable (0644).
    pub fn publish(&self, state: AudioState) -> Result<()> {
        let publish_err = |source| Error::Publish {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(publish_err)?;
            }
        }

        let tmp = temp_path(&self.path);
        {
            let mut file = fs::File::create(&tmp).map_err(publish_err)?;
            file.write_all(format!("{}\n", state.as_tag()).as_bytes())
                .map_err(publish_err)?;
            file.set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(publish_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(publish_err)?;

        debug!("Published state '{}' to {}", state, self.path.display());
        Ok(())
    }
}

/// `<path>.tmp`, next to the state file
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read a published state file back
pub fn read_published(path: &Path) -> Result<AudioState> {
    let content = fs::read_to_string(path)?;
    Ok(content.parse::<AudioState>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_publish_writes_tag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("soundmaker_state");
        let publisher = StatePublisher::new(&path);

        publisher.publish(AudioState::Streaming).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "streaming\n");
        assert_eq!(read_published(&path).unwrap(), AudioState::Streaming);
    }

    #[test]
    fn test_publish_overwrites_previous_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("soundmaker_state");
        let publisher = StatePublisher::new(&path);

        publisher.publish(AudioState::Streaming).unwrap();
        publisher.publish(AudioState::AirPlay).unwrap();

        assert_eq!(read_published(&path).unwrap(), AudioState::AirPlay);
        assert!(!temp_path(&path).exists(), "temp file must be renamed away");
    }

    #[test]
    fn test_temp_file_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/run/soundmaker_state")),
            PathBuf::from("/run/soundmaker_state.tmp")
        );
        assert_eq!(
            temp_path(Path::new("/run/state.txt")),
            PathBuf::from("/run/state.txt.tmp")
        );
    }

    #[test]
    fn test_state_path_ending_in_tmp_is_not_truncated_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("soundmaker_state.tmp");
        let publisher = StatePublisher::new(&path);

        publisher.publish(AudioState::Streaming).unwrap();
        publisher.publish(AudioState::AirPlay).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "airplay\n");
        assert!(!dir.path().join("soundmaker_state.tmp.tmp").exists());
    }

    #[test]
    fn test_published_file_is_world_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("soundmaker_state");
        StatePublisher::new(&path).publish(AudioState::Idle).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_missing_parent_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("state");
        StatePublisher::new(&path).publish(AudioState::Idle).unwrap();
        assert_eq!(read_published(&path).unwrap(), AudioState::Idle);
    }

    #[test]
    fn test_unwritable_location_is_publish_error() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let publisher = StatePublisher::new(blocker.join("state"));

        let err = publisher.publish(AudioState::Idle).unwrap_err();
        assert!(matches!(err, Error::Publish { .. }));
    }
}
