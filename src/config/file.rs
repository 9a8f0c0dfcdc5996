//! File-based configuration source.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::source::{normalize_path, unmarshal, SharedUnmarshal, Source};
use super::unmarshal::Unmarshal;
use super::ConfigError;

/// A configuration source that loads from a single file.
///
/// A leading `~/` is expanded to the home directory. A file that does not
/// exist or cannot be read contributes nothing; only a decode failure is an
/// error.
pub struct FileSource<T> {
    path: PathBuf,
    unmarshal: Option<SharedUnmarshal<T>>,
}

impl<T> FileSource<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            unmarshal: None,
        }
    }

    /// Decodes the file with `unmarshal` instead of YAML.
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
}

impl<T: Serialize + DeserializeOwned> Source<T> for FileSource<T> {
    fn load(&self, target: &mut T) -> Result<(), ConfigError> {
        let bytes = match std::fs::read(normalize_path(&self.path)) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(
                    event = "config.file.not_found",
                    file = %self.path.display(),
                    error = %e
                );
                return Ok(());
            }
        };

        unmarshal(&bytes, target, self.unmarshal.as_ref())?;

        debug!(event = "config.file.loaded", file = %self.path.display());
        Ok(())
    }

    fn identity(&self) -> String {
        format!("filesource:{}", self.path.display())
    }
}

impl<T> Clone for FileSource<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            unmarshal: self.unmarshal.clone(),
        }
    }
}

impl<T> fmt::Debug for FileSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("custom_unmarshal", &self.unmarshal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Stage, TomlUnmarshal};
    use serial_test::serial;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    type Map = BTreeMap<String, String>;

    #[test]
    fn test_file_source_loads_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"foo":"bar"}}"#).unwrap();

        let mut target = Map::new();
        FileSource::new(file.path()).load(&mut target).unwrap();

        assert_eq!(target["foo"], "bar");
    }

    #[test]
    fn test_file_source_missing_is_noop() {
        let mut target = Map::new();
        target.insert("keep".into(), "me".into());

        FileSource::new("/nonexistent/path/config.yml")
            .load(&mut target)
            .unwrap();

        assert_eq!(target.len(), 1);
        assert_eq!(target["keep"], "me");
    }

    #[test]
    fn test_file_source_malformed_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "foo: [").unwrap();

        let mut target = Map::new();
        let err = FileSource::new(file.path()).load(&mut target).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Yaml {
                stage: Stage::Decode,
                ..
            }
        ));
    }

    #[test]
    fn test_file_source_custom_unmarshal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "foo = \"bar\"").unwrap();

        let mut target = Map::new();
        FileSource::new(file.path())
            .with_unmarshal(TomlUnmarshal)
            .load(&mut target)
            .unwrap();

        assert_eq!(target["foo"], "bar");
    }

    #[test]
    #[serial]
    fn test_file_source_home_relative() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.yml"), r#"{"foo":"bar"}"#).unwrap();
        let original = std::env::var_os("HOME");
        std::env::set_var("HOME", home.path());

        let mut target = Map::new();
        let result = FileSource::new("~/config.yml").load(&mut target);

        match original {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
        result.unwrap();
        assert_eq!(target["foo"], "bar");
    }

    #[test]
    fn test_file_source_identity() {
        let source: FileSource<Map> = FileSource::new("/etc/app.yml");
        assert_eq!(source.identity(), "filesource:/etc/app.yml");
    }
}
