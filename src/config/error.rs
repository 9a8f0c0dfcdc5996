use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The step of a decode round trip that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Decoding the raw source bytes into a document tree.
    Decode,
    /// Serializing the current state of the target before merging.
    Snapshot,
    /// Writing a document tree back to text.
    Reserialize,
    /// Decoding a templated document again after it was written back to text.
    Redecode,
    /// Decoding the merged document into the typed target.
    TypedDecode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decode => "decode",
            Stage::Snapshot => "snapshot target",
            Stage::Reserialize => "reserialize",
            Stage::Redecode => "decode reserialized",
            Stage::TypedDecode => "decode into target",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("yaml {stage}: {source}")]
    Yaml {
        stage: Stage,
        source: serde_yaml::Error,
    },

    #[error("json {stage}: {source}")]
    Json {
        stage: Stage,
        source: serde_json::Error,
    },

    #[error("toml decode: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("failed to resolve symlink '{path}': {source}")]
    SymlinkResolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to stat '{path}': {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    InFile {
        path: PathBuf,
        source: Box<ConfigError>,
    },

    #[error("walk {path}: {source}")]
    Walk {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("load {identity}: {source}")]
    Source {
        identity: String,
        source: Box<ConfigError>,
    },

    #[error("{0}")]
    Custom(String),
}

impl ConfigError {
    /// Creates an error for use by custom unmarshalers.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub(crate) fn yaml(stage: Stage) -> impl FnOnce(serde_yaml::Error) -> Self {
        move |source| Self::Yaml { stage, source }
    }

    pub(crate) fn json(stage: Stage) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Json { stage, source }
    }
}
