//! Directory-based configuration source.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::source::{normalize_path, unmarshal, SharedUnmarshal, Source};
use super::unmarshal::Unmarshal;
use super::ConfigError;

/// A directory of configuration files.
///
/// Every regular file directly inside the directory is loaded, in file name
/// order, so later files override earlier ones. Subdirectories are skipped,
/// including symlinks that resolve to directories; symlinks to files are
/// loaded from their resolved path.
///
/// A directory that does not exist, and a file that cannot be read, contribute
/// nothing. Failing to resolve a symlink or stat its target is an error.
pub struct DirSource<T> {
    path: PathBuf,
    unmarshal: Option<SharedUnmarshal<T>>,
}

impl<T> DirSource<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            unmarshal: None,
        }
    }

    /// Decodes each file with `unmarshal` instead of YAML.
    pub fn with_unmarshal(mut self, unmarshal: impl Unmarshal<T> + 'static) -> Self {
        self.unmarshal = Some(Arc::new(unmarshal));
        self
    }

    #[cfg(feature = "clap")]
    pub(crate) fn with_shared_unmarshal(mut self, unmarshal: Option<SharedUnmarshal<T>>) -> Self {
        self.unmarshal = unmarshal;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists `dir` sorted by file name. A directory that can't be listed has
    /// no entries.
    fn entries(dir: &Path) -> Vec<(OsString, PathBuf)> {
        let listing = match fs::read_dir(dir).and_then(|entries| entries.collect::<Result<Vec<_>, _>>()) {
            Ok(listing) => listing,
            Err(e) => {
                debug!(
                    event = "config.dir.not_found",
                    dir = %dir.display(),
                    error = %e
                );
                return Vec::new();
            }
        };

        let mut entries: Vec<(OsString, PathBuf)> = listing
            .into_iter()
            .map(|entry| (entry.file_name(), entry.path()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The file to read for a directory entry, or `None` if it is a
    /// directory or a symlink to one.
    fn resolve(dir: &Path, name: &OsString, path: PathBuf) -> Result<Option<PathBuf>, ConfigError> {
        let file_type = fs::symlink_metadata(&path)
            .map_err(|source| ConfigError::Stat {
                path: path.clone(),
                source,
            })?
            .file_type();

        if file_type.is_file() {
            return Ok(Some(path));
        }
        if file_type.is_dir() {
            debug!(
                event = "config.dir.subdir_skipped",
                dir = %dir.display(),
                subdir = ?name
            );
            return Ok(None);
        }

        let resolved = fs::canonicalize(&path).map_err(|source| ConfigError::SymlinkResolve {
            path: path.clone(),
            source,
        })?;
        let metadata = fs::metadata(&resolved).map_err(|source| ConfigError::Stat {
            path: resolved.clone(),
            source,
        })?;
        if metadata.is_dir() {
            debug!(
                event = "config.dir.subdir_skipped",
                dir = %dir.display(),
                symlink_subdir = ?name
            );
            return Ok(None);
        }
        Ok(Some(resolved))
    }
}

impl<T: Serialize + DeserializeOwned> Source<T> for DirSource<T> {
    /// Entries are handled one at a time, so a failing entry leaves the
    /// files before it applied to `target`.
    fn load(&self, target: &mut T) -> Result<(), ConfigError> {
        let dir = normalize_path(&self.path);

        let mut loaded = Vec::new();
        for (name, path) in Self::entries(&dir) {
            let Some(file) = Self::resolve(&dir, &name, path)? else {
                continue;
            };

            let bytes = match fs::read(&file) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(
                        event = "config.dir.file_unreadable",
                        file = %file.display(),
                        error = %e
                    );
                    continue;
                }
            };

            unmarshal(&bytes, target, self.unmarshal.as_ref()).map_err(|e| ConfigError::InFile {
                path: file.clone(),
                source: Box::new(e),
            })?;
            loaded.push(file.display().to_string());
        }

        debug!(
            event = "config.dir.loaded",
            dir = %self.path.display(),
            files = ?loaded
        );
        Ok(())
    }

    fn identity(&self) -> String {
        format!("dirsource:{}", self.path.display())
    }
}

impl<T> Clone for DirSource<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            unmarshal: self.unmarshal.clone(),
        }
    }
}

impl<T> fmt::Debug for DirSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirSource")
            .field("path", &self.path)
            .field("custom_unmarshal", &self.unmarshal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    type Map = BTreeMap<String, String>;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.yml", r#"{"foo":"bar"}"#);

        let mut target = Map::new();
        DirSource::new(dir.path()).load(&mut target).unwrap();

        assert_eq!(target["foo"], "bar");
    }

    #[test]
    fn test_files_merge_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        // Written out of order so creation order can't be what's observed.
        write(dir.path(), "b.yml", r#"{"foo":"from-b"}"#);
        write(dir.path(), "a.yml", r#"{"foo":"from-a","hip":"hop"}"#);
        write(dir.path(), "c.yml", r#"{"zip":"zap"}"#);

        let mut target = Map::new();
        DirSource::new(dir.path()).load(&mut target).unwrap();

        assert_eq!(target["foo"], "from-b");
        assert_eq!(target["hip"], "hop");
        assert_eq!(target["zip"], "zap");
    }

    #[test]
    fn test_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();

        let mut target = Map::new();
        target.insert("keep".into(), "me".into());
        DirSource::new(dir.path().join("absent"))
            .load(&mut target)
            .unwrap();

        assert_eq!(target.len(), 1);
    }

    #[test]
    fn test_subdirectories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", r#"{"foo":"bar"}"#);
        write(dir.path(), "nested/z.yml", r#"{"foo":"nested"}"#);

        let mut target = Map::new();
        DirSource::new(dir.path()).load(&mut target).unwrap();

        assert_eq!(target["foo"], "bar");
    }

    #[test]
    fn test_decode_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.yml", "foo: [");

        let mut target = Map::new();
        let err = DirSource::new(dir.path()).load(&mut target).unwrap_err();

        match err {
            ConfigError::InFile { path, .. } => assert!(path.ends_with("bad.yml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_struct_target_across_files() {
        #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
        struct Cfg {
            #[serde(rename = "not_foo", default)]
            foo: String,
            #[serde(rename = "not_hip", default)]
            hip: String,
        }

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.yml", r#"{"not_foo":"bar","not_hip":"hop"}"#);
        write(dir.path(), "config2.yml", r#"{"not_foo":"baz"}"#);

        let mut target = Cfg::default();
        DirSource::new(dir.path()).load(&mut target).unwrap();

        assert_eq!(
            target,
            Cfg {
                foo: "baz".into(),
                hip: "hop".into()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        use std::os::unix::fs::symlink;

        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "linked.yml", r#"{"linked":"yes"}"#);
        write(outside.path(), "subdir/x.yml", r#"{"linked":"from-subdir"}"#);

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", r#"{"own":"yes"}"#);
        symlink(outside.path().join("linked.yml"), dir.path().join("b.yml")).unwrap();
        symlink(outside.path().join("subdir"), dir.path().join("c")).unwrap();

        let mut target = Map::new();
        DirSource::new(dir.path()).load(&mut target).unwrap();

        assert_eq!(target["own"], "yes");
        assert_eq!(target["linked"], "yes");
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_is_error_after_earlier_files() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", r#"{"foo":"a"}"#);
        symlink(dir.path().join("missing"), dir.path().join("z.yml")).unwrap();

        let mut target = Map::new();
        let err = DirSource::new(dir.path()).load(&mut target).unwrap_err();

        assert!(matches!(err, ConfigError::SymlinkResolve { .. }));
        assert_eq!(target["foo"], "a");
    }

    #[test]
    fn test_entry_removed_after_listing_is_stat_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "gone.yml", r#"{"foo":"bar"}"#);
        let entries = DirSource::<Map>::entries(dir.path());
        fs::remove_file(dir.path().join("gone.yml")).unwrap();

        let (name, path) = entries.into_iter().next().unwrap();
        let err = DirSource::<Map>::resolve(dir.path(), &name, path).unwrap_err();

        assert!(matches!(err, ConfigError::Stat { ref path, .. } if path.ends_with("gone.yml")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", r#"{"first":"yes"}"#);
        write(dir.path(), "b.yml", r#"{"locked":"yes"}"#);
        write(dir.path(), "c.yml", r#"{"last":"yes"}"#);
        let locked = dir.path().join("b.yml");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Permission bits don't stop a privileged user.
        let unreadable = fs::read(&locked).is_err();

        let mut target = Map::new();
        let result = DirSource::new(dir.path()).load(&mut target);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        result.unwrap();
        assert_eq!(target["first"], "yes");
        assert_eq!(target["last"], "yes");
        if unreadable {
            assert!(!target.contains_key("locked"));
        }
    }
}
