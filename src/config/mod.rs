//! Configuration sources and loading.

mod builder;
mod dir;
mod error;
mod file;
pub mod node;
mod raw;
mod source;
mod unmarshal;
mod walk;

pub use builder::Sources;
pub use dir::DirSource;
pub use error::{ConfigError, Stage};
pub use file::FileSource;
pub use node::Node;
pub use raw::RawSource;
pub use source::{normalize_path, Source};
pub use unmarshal::{
    merge_into, JsonUnmarshal, TomlUnmarshal, Unmarshal, ValueTemplateUnmarshal, YamlUnmarshal,
};
pub use walk::{walk, KeyPath};

#[cfg(feature = "clap")]
pub(crate) use source::SharedUnmarshal;
