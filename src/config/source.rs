use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use super::unmarshal::{Unmarshal, YamlUnmarshal};
use super::ConfigError;

/// Something configuration can be loaded from.
///
/// `load` decodes the source directly onto `target`, overwriting the fields it
/// defines and leaving the others alone.
pub trait Source<T>: Send + Sync {
    fn load(&self, target: &mut T) -> Result<(), ConfigError>;

    /// A human-readable name for logs and errors, e.g. `filesource:/etc/app.yml`.
    fn identity(&self) -> String;
}

pub(crate) type SharedUnmarshal<T> = Arc<dyn Unmarshal<T>>;

/// Decodes `bytes` with `custom`, or as YAML if none was configured.
pub(crate) fn unmarshal<T>(
    bytes: &[u8],
    target: &mut T,
    custom: Option<&SharedUnmarshal<T>>,
) -> Result<(), ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    match custom {
        Some(custom) => custom.unmarshal(bytes, target),
        None => YamlUnmarshal.unmarshal(bytes, target),
    }
}

/// Expands a leading `~/` to the user's home directory.
///
/// If the home directory cannot be determined the path is returned unchanged.
pub fn normalize_path(path: &Path) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) else {
        return path.to_path_buf();
    };

    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => {
            trace!(
                event = "config.path.home_unresolved",
                path = %path.display()
            );
            path.to_path_buf()
        }
    }
}
