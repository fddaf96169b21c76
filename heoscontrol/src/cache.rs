use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{HeosError, Result};
use crate::model::{GroupEntry, PlayerEntry};

/// On-disk form of the registry: a YAML document with `players` and
/// `groups` sequences.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub players: Vec<PlayerEntry>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

impl RegistrySnapshot {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| HeosError::CacheIo {
            path: path.to_path_buf(),
            source,
        })?;

        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&text).map_err(|e| HeosError::CacheFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes the snapshot next to `path`, then renames it over `path`.
    ///
    /// A crash leaves either the previous file or the new one, never a mix.
    /// An existing file keeps its permissions; a new one is private to the
    /// owner.
    pub fn write(&self, path: &Path) -> Result<()> {
        let io_err = |source: std::io::Error| HeosError::CacheIo {
            path: path.to_path_buf(),
            source,
        };

        let yaml = serde_yaml::to_string(self).map_err(|e| HeosError::CacheFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut tmp = NamedTempFile::new_in(parent_dir(path)).map_err(io_err)?;
        if let Ok(previous) = fs::metadata(path) {
            tmp.as_file()
                .set_permissions(previous.permissions())
                .map_err(io_err)?;
        }
        tmp.write_all(yaml.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        debug!("Wrote registry cache {}", path.display());
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot {
            players: vec![
                PlayerEntry {
                    name: "Kitchen".to_string(),
                    model: "HEOS 1".to_string(),
                    host: "192.168.1.20".to_string(),
                    id: -1465850739,
                },
                PlayerEntry {
                    name: "Office".to_string(),
                    model: "HEOS 3".to_string(),
                    host: "192.168.1.21".to_string(),
                    id: 12,
                },
            ],
            groups: vec![GroupEntry {
                name: "Whole Home".to_string(),
                id: -21,
                leader: "Kitchen".to_string(),
                members: vec!["Office".to_string()],
            }],
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".heos");

        snapshot().write(&path).unwrap();
        assert_eq!(RegistrySnapshot::read(&path).unwrap(), snapshot());

        // only the target file remains
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".heos");

        snapshot().write(&path).unwrap();
        RegistrySnapshot::default().write(&path).unwrap();
        assert_eq!(RegistrySnapshot::read(&path).unwrap(), RegistrySnapshot::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".heos");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        snapshot().write(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        assert_eq!(RegistrySnapshot::read(&path).unwrap(), snapshot());
    }

    #[test]
    fn test_yaml_layout() {
        let yaml = serde_yaml::to_string(&snapshot()).unwrap();
        assert!(yaml.contains("players:"));
        assert!(yaml.contains("- name: Kitchen"));
        assert!(yaml.contains("leader: Kitchen"));
        assert!(yaml.contains("members:\n  - Office"));
    }

    #[test]
    fn test_read_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = RegistrySnapshot::read(&dir.path().join("missing"));
        assert!(matches!(missing, Err(HeosError::CacheIo { .. })));

        let garbage = dir.path().join("garbage");
        fs::write(&garbage, "players: 12\n").unwrap();
        assert!(matches!(
            RegistrySnapshot::read(&garbage),
            Err(HeosError::CacheFormat { .. })
        ));

        let empty = dir.path().join("empty");
        fs::write(&empty, "").unwrap();
        assert_eq!(RegistrySnapshot::read(&empty).unwrap(), RegistrySnapshot::default());
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new(".heos")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/tmp/.heos")), PathBuf::from("/tmp"));
    }
}
