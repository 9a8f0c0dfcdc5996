pub mod config;
pub mod loader;
pub mod provider;
pub mod template;
mod error;

#[cfg(feature = "clap")]
pub mod cli;

pub use config::{
    ConfigError, DirSource, FileSource, Node, RawSource, Source, Sources, Unmarshal,
    ValueTemplateUnmarshal,
};
pub use error::Error;
pub use loader::ConfigLoader;
pub use template::{Executor, FuncMap, Template};
