//! Decoding source bytes onto a typed target.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::node::{self, Node};
use super::walk::walk;
use super::{ConfigError, Stage};
use crate::template::{Executor, Template};

/// Decodes raw source bytes onto an existing target.
///
/// Implementations must overwrite only the fields present in `bytes` and leave
/// the rest of `target` as it was, so that sources layer on top of each other.
pub trait Unmarshal<T>: Send + Sync {
    fn unmarshal(&self, bytes: &[u8], target: &mut T) -> Result<(), ConfigError>;
}

impl<T, F> Unmarshal<T> for F
where
    F: Fn(&[u8], &mut T) -> Result<(), ConfigError> + Send + Sync,
{
    fn unmarshal(&self, bytes: &[u8], target: &mut T) -> Result<(), ConfigError> {
        self(bytes, target)
    }
}

/// Decodes YAML (and therefore JSON). Used when a source has no unmarshaler.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlUnmarshal;

impl<T: Serialize + DeserializeOwned> Unmarshal<T> for YamlUnmarshal {
    fn unmarshal(&self, bytes: &[u8], target: &mut T) -> Result<(), ConfigError> {
        let document = decode_yaml(bytes, Stage::Decode)?;
        merge_into(target, document)
    }
}

/// Decodes strict JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonUnmarshal;

impl<T: Serialize + DeserializeOwned> Unmarshal<T> for JsonUnmarshal {
    fn unmarshal(&self, bytes: &[u8], target: &mut T) -> Result<(), ConfigError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(ConfigError::json(Stage::Decode))?;
        merge_into(target, value.into())
    }
}

/// Decodes TOML.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlUnmarshal;

impl<T: Serialize + DeserializeOwned> Unmarshal<T> for TomlUnmarshal {
    fn unmarshal(&self, bytes: &[u8], target: &mut T) -> Result<(), ConfigError> {
        let table: toml::Table = toml::from_str(std::str::from_utf8(bytes)?)?;
        merge_into(target, toml::Value::Table(table).into())
    }
}

/// Decodes YAML, passing every scalar value through an [`Executor`] first.
///
/// The bytes are decoded into a [`Node`] tree, each leaf is executed, the tree
/// is written back out as YAML and that text is decoded onto the target. A
/// leaf may therefore expand into a mapping or sequence without the target's
/// type being known while walking.
#[derive(Clone)]
pub struct ValueTemplateUnmarshal {
    executor: Arc<dyn Executor>,
}

impl ValueTemplateUnmarshal {
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    /// Renders the document tree for `bytes` without decoding it into a target.
    pub fn render(&self, bytes: &[u8]) -> Result<Node, ConfigError> {
        let mut document = decode_yaml(bytes, Stage::Decode)?;
        walk(&mut document, |path, value| {
            self.executor.execute(&path.to_string(), value)
        })?;

        let text = serde_yaml::to_string(&document).map_err(ConfigError::yaml(Stage::Reserialize))?;
        decode_yaml(text.as_bytes(), Stage::Redecode)
    }
}

impl Default for ValueTemplateUnmarshal {
    /// Uses a [`Template`] with the provider functions registered.
    fn default() -> Self {
        Self::new(Template::with_default_funcs())
    }
}

impl std::fmt::Debug for ValueTemplateUnmarshal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueTemplateUnmarshal").finish_non_exhaustive()
    }
}

impl<T: Serialize + DeserializeOwned> Unmarshal<T> for ValueTemplateUnmarshal {
    fn unmarshal(&self, bytes: &[u8], target: &mut T) -> Result<(), ConfigError> {
        let document = self.render(bytes)?;
        merge_into(target, document)
    }
}

fn decode_yaml(bytes: &[u8], stage: Stage) -> Result<Node, ConfigError> {
    let value: serde_yaml::Value = serde_yaml::from_slice(bytes).map_err(ConfigError::yaml(stage))?;
    Ok(value.into())
}

/// Merges a decoded document onto `target`, field by field.
///
/// The target's current state is captured as a document, `document` is merged
/// over it and the result decoded back into `T` from YAML text. Going through
/// text lets a key like `1` decode into either a string or an integer key. On
/// error `target` is left untouched.
pub fn merge_into<T>(target: &mut T, document: Node) -> Result<(), ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    if document.is_null() {
        return Ok(());
    }

    let mut merged: Node = serde_yaml::to_value(&*target)
        .map_err(ConfigError::yaml(Stage::Snapshot))?
        .into();
    node::merge(&mut merged, document);

    let text = serde_yaml::to_string(&merged).map_err(ConfigError::yaml(Stage::Reserialize))?;
    *target = serde_yaml::from_str(&text).map_err(ConfigError::yaml(Stage::TypedDecode))?;
    Ok(())
}
