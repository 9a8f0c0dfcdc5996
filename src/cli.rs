//! Command-line integration with `clap`.
//!
//! [`SourceFlags`] adds repeatable source flags (`--config <FILE>`,
//! `--config-dir <DIR>`, ...) to a command. Every occurrence becomes one source,
//! in command-line order, and any occurrence at all replaces the loader's
//! default sources. [`config_command`] adds a `config` subcommand that prints
//! the loaded configuration.

use std::io;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{DirSource, FileSource, SharedUnmarshal, Source, Unmarshal};
use crate::loader::ConfigLoader;
use crate::Error;

/// Builds a source from a flag value.
pub type SourceFactory<T> = Arc<dyn Fn(&str) -> Box<dyn Source<T>> + Send + Sync>;

struct SourceFlag<T> {
    name: &'static str,
    short: Option<char>,
    help: &'static str,
    value_name: &'static str,
    factory: SourceFactory<T>,
}

/// A set of source flags.
///
/// ```no_run
/// use clap::Command;
/// use configloader::cli::SourceFlags;
/// use configloader::ConfigLoader;
/// use std::collections::BTreeMap;
///
/// type Cfg = BTreeMap<String, String>;
///
/// let flags = SourceFlags::<Cfg>::new()
///     .file("config", "location of one or more config files")
///     .dir("config-dir", "location of one or more config directories");
/// let matches = flags.register(Command::new("app")).get_matches();
///
/// let mut loader = ConfigLoader::<Cfg>::builder().build();
/// flags.apply(&matches, &mut loader);
/// ```
pub struct SourceFlags<T> {
    flags: Vec<SourceFlag<T>>,
}

impl<T> SourceFlags<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    pub fn new() -> Self {
        Self { flags: Vec::new() }
    }

    /// A flag whose values are YAML files.
    pub fn file(self, name: &'static str, help: &'static str) -> Self {
        self.file_source(name, help, None)
    }

    /// A flag whose values are files decoded with `unmarshal`.
    pub fn file_with(
        self,
        name: &'static str,
        help: &'static str,
        unmarshal: impl Unmarshal<T> + 'static,
    ) -> Self {
        self.file_source(name, help, Some(Arc::new(unmarshal)))
    }

    fn file_source(
        self,
        name: &'static str,
        help: &'static str,
        unmarshal: Option<SharedUnmarshal<T>>,
    ) -> Self {
        self.flag(name, help, "FILE", move |value: &str| {
            Box::new(FileSource::new(value).with_shared_unmarshal(unmarshal.clone()))
                as Box<dyn Source<T>>
        })
    }

    /// A flag whose values are directories of YAML files.
    pub fn dir(self, name: &'static str, help: &'static str) -> Self {
        self.dir_source(name, help, None)
    }

    /// A flag whose values are directories of files decoded with `unmarshal`.
    pub fn dir_with(
        self,
        name: &'static str,
        help: &'static str,
        unmarshal: impl Unmarshal<T> + 'static,
    ) -> Self {
        self.dir_source(name, help, Some(Arc::new(unmarshal)))
    }

    fn dir_source(
        self,
        name: &'static str,
        help: &'static str,
        unmarshal: Option<SharedUnmarshal<T>>,
    ) -> Self {
        self.flag(name, help, "DIR", move |value: &str| {
            Box::new(DirSource::new(value).with_shared_unmarshal(unmarshal.clone()))
                as Box<dyn Source<T>>
        })
    }

    /// A flag whose values are turned into sources by `factory`.
    pub fn source<F>(self, name: &'static str, help: &'static str, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn Source<T>> + Send + Sync + 'static,
    {
        self.flag(name, help, "SOURCE", factory)
    }

    fn flag<F>(
        mut self,
        name: &'static str,
        help: &'static str,
        value_name: &'static str,
        factory: F,
    ) -> Self
    where
        F: Fn(&str) -> Box<dyn Source<T>> + Send + Sync + 'static,
    {
        self.flags.push(SourceFlag {
            name,
            short: None,
            help,
            value_name,
            factory: Arc::new(factory),
        });
        self
    }

    /// Gives the most recently added flag a short form.
    pub fn short(mut self, short: char) -> Self {
        if let Some(flag) = self.flags.last_mut() {
            flag.short = Some(short);
        }
        self
    }

    /// Adds the flags to `command` as global, repeatable options.
    pub fn register(&self, command: Command) -> Command {
        self.flags.iter().fold(command, |command, flag| {
            let mut arg = Arg::new(flag.name)
                .long(flag.name)
                .help(flag.help)
                .value_name(flag.value_name)
                .action(ArgAction::Append)
                .global(true);
            if let Some(short) = flag.short {
                arg = arg.short(short);
            }
            command.arg(arg)
        })
    }

    /// Adds a source to `loader` for every flag occurrence in `matches`, in
    /// the order they appeared on the command line.
    pub fn apply(&self, matches: &ArgMatches, loader: &mut ConfigLoader<T>) {
        let mut occurrences: Vec<(usize, &SourceFlag<T>, &String)> = Vec::new();
        for flag in &self.flags {
            let Ok(Some(values)) = matches.try_get_many::<String>(flag.name) else {
                continue;
            };
            let Some(indices) = matches.indices_of(flag.name) else {
                continue;
            };
            occurrences.extend(indices.zip(values).map(|(index, value)| (index, flag, value)));
        }
        occurrences.sort_by_key(|(index, _, _)| *index);

        for (_, flag, value) in occurrences {
            loader.add_source((flag.factory)(value));
        }
    }
}

impl<T> Default for SourceFlags<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The `config` subcommand, printing the loaded configuration.
///
/// An `--output` option is added when the loader has more than one output
/// format; otherwise the configuration is always printed as YAML.
pub fn config_command<T>(loader: &ConfigLoader<T>) -> Command
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    let command = Command::new("config").about("Print out the config data.");

    let formats = loader.formats();
    if formats.len() < 2 {
        return command;
    }
    command.arg(
        Arg::new("output")
            .long("output")
            .default_value("yaml")
            .help(format!("Format of output, one of: {}", formats.join(", "))),
    )
}

/// Runs the subcommand built by [`config_command`].
pub fn run_config_command<T>(
    loader: &mut ConfigLoader<T>,
    matches: &ArgMatches,
    out: &mut dyn io::Write,
) -> Result<(), Error>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    let format = matches
        .try_get_one::<String>("output")
        .ok()
        .flatten()
        .map_or("yaml", String::as_str);

    loader.write_config(format, out)?;
    out.flush()?;
    Ok(())
}
