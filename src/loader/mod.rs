//! Application-facing configuration loader.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{trace, Dispatch};

use crate::config::{Source, Sources};
use crate::Error;

/// Writes a loaded configuration in some output format.
pub type Formatter<T> =
    Arc<dyn Fn(&mut dyn io::Write, &T) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Holds the sources an application loads its configuration from, and the
/// configuration once loaded.
///
/// Default sources are configured in code. Sources added at runtime (usually
/// one per command-line flag occurrence) replace the defaults entirely: the
/// first one added switches the loader away from the defaults, and the rest
/// append after it.
///
/// The configuration is loaded on the first call to [`config()`](Self::config)
/// and cached after that.
///
/// ## Example
///
/// ```no_run
/// use configloader::{ConfigLoader, FileSource, Sources};
/// use std::collections::BTreeMap;
///
/// type Cfg = BTreeMap<String, String>;
///
/// let mut loader = ConfigLoader::<Cfg>::builder()
///     .with_default_sources(Sources::new().with_file("/etc/myapp.yml"))
///     .with_json_output()
///     .build();
///
/// // e.g. from `--config ./local.yml`
/// loader.add_source(Box::new(FileSource::new("./local.yml")));
///
/// let config = loader.config()?;
/// # Ok::<(), configloader::Error>(())
/// ```
pub struct ConfigLoader<T> {
    default_sources: Sources<T>,
    sources: Sources<T>,
    config: Option<T>,
    outputs: BTreeMap<String, Formatter<T>>,
    dispatch: Option<Dispatch>,
}

impl<T> ConfigLoader<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    /// Creates a new builder for constructing a `ConfigLoader`.
    pub fn builder() -> ConfigLoaderBuilder<T> {
        ConfigLoaderBuilder::new()
    }

    /// Appends a runtime source.
    ///
    /// The first runtime source replaces the default sources. Has no effect on
    /// a configuration that has already been loaded.
    pub fn add_source(&mut self, source: Box<dyn Source<T>>) {
        if self.sources.is_empty() {
            trace!(event = "config.flag.source_initial", source = %source.identity());
        } else {
            trace!(event = "config.flag.source_added", source = %source.identity());
        }
        self.sources.push(source);
    }

    /// The sources [`config()`](Self::config) loads from.
    pub fn active_sources(&self) -> &Sources<T> {
        if self.sources.is_empty() {
            &self.default_sources
        } else {
            &self.sources
        }
    }

    /// Returns the configuration, loading it on the first call.
    pub fn config(&mut self) -> Result<&T, Error> {
        if self.config.is_none() {
            let loaded = self.load()?;
            self.config = Some(loaded);
        }
        Ok(self.config.get_or_insert_with(T::default))
    }

    fn load(&self) -> Result<T, Error> {
        let mut target = T::default();
        let sources = self.active_sources();
        match &self.dispatch {
            Some(dispatch) => {
                tracing::dispatcher::with_default(dispatch, || sources.load(&mut target))?
            }
            None => sources.load(&mut target)?,
        }
        Ok(target)
    }

    /// The names of the registered output formats, sorted.
    pub fn formats(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }

    /// Loads the configuration if needed and writes it to `writer` in the
    /// output format registered as `format`.
    pub fn write_config(&mut self, format: &str, writer: &mut dyn io::Write) -> Result<(), Error> {
        let formatter = self
            .outputs
            .get(format)
            .cloned()
            .ok_or_else(|| Error::UnknownFormat {
                name: format.to_string(),
                available: self.formats().join(", "),
            })?;

        let config = self.config()?;
        formatter(writer, config).map_err(Error::Output)
    }
}

impl<T> fmt::Debug for ConfigLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("default_sources", &self.default_sources)
            .field("sources", &self.sources)
            .field("loaded", &self.config.is_some())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for constructing a [`ConfigLoader`].
///
/// Starts with no default sources and the `yaml` output format.
#[must_use = "builders do nothing until .build() is called"]
pub struct ConfigLoaderBuilder<T> {
    default_sources: Sources<T>,
    outputs: BTreeMap<String, Formatter<T>>,
    dispatch: Option<Dispatch>,
}

impl<T> ConfigLoaderBuilder<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    fn new() -> Self {
        let mut outputs: BTreeMap<String, Formatter<T>> = BTreeMap::new();
        outputs.insert("yaml".to_string(), Arc::new(write_yaml::<T>));
        Self {
            default_sources: Sources::new(),
            outputs,
            dispatch: None,
        }
    }

    /// Sets the sources used when no runtime source is added.
    pub fn with_default_sources(mut self, sources: Sources<T>) -> Self {
        self.default_sources = sources;
        self
    }

    /// Registers an output format, replacing any format with the same name.
    pub fn with_output<F>(mut self, name: impl Into<String>, formatter: F) -> Self
    where
        F: Fn(&mut dyn io::Write, &T) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.outputs.insert(name.into(), Arc::new(formatter));
        self
    }

    /// Registers the `json` output format.
    pub fn with_json_output(self) -> Self {
        self.with_output("json", write_json::<T>)
    }

    /// Sends load diagnostics to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn build(self) -> ConfigLoader<T> {
        ConfigLoader {
            default_sources: self.default_sources,
            sources: Sources::new(),
            config: None,
            outputs: self.outputs,
            dispatch: self.dispatch,
        }
    }
}

fn write_yaml<T: Serialize>(
    writer: &mut dyn io::Write,
    config: &T,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    serde_yaml::to_writer(writer, config)?;
    Ok(())
}

fn write_json<T: Serialize>(
    writer: &mut dyn io::Write,
    config: &T,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    serde_json::to_writer_pretty(&mut *writer, config)?;
    writeln!(writer)?;
    Ok(())
}
