use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, Dispatch};

use super::dir::DirSource;
use super::file::FileSource;
use super::raw::RawSource;
use super::source::Source;
use super::ConfigError;

/// An ordered list of configuration sources.
///
/// Sources are applied in registration order onto the same target, so later
/// sources override the fields earlier ones set and leave the rest alone.
/// Mappings merge recursively; other values (including sequences) are
/// replaced entirely.
///
/// ## Example
///
/// ```no_run
/// use configloader::Sources;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct MyConfig {
///     name: String,
///     port: u16,
/// }
///
/// let config: MyConfig = Sources::new()
///     .with_raw("name: demo\nport: 8080")
///     .with_file("/etc/myapp/config.yml")
///     .with_dir("~/.config/myapp/conf.d")
///     .build()?;
/// # Ok::<(), configloader::ConfigError>(())
/// ```
#[must_use = "sources do nothing until loaded"]
pub struct Sources<T> {
    sources: Vec<Box<dyn Source<T>>>,
    dispatch: Option<Dispatch>,
}

impl<T> Sources<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            dispatch: None,
        }
    }

    /// Appends a source. It overrides every source added before it.
    pub fn with_source(mut self, source: impl Source<T> + 'static) -> Self {
        self.push(Box::new(source));
        self
    }

    pub fn push(&mut self, source: Box<dyn Source<T>>) {
        self.sources.push(source);
    }

    /// Sends the diagnostics emitted while loading to `dispatch` instead of
    /// the caller's current default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The identity of every source, in load order.
    pub fn identities(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.identity()).collect()
    }

    /// Loads every source onto `target`, in order.
    ///
    /// Stops at the first failing source. Whatever earlier sources already
    /// wrote to `target` stays there.
    pub fn load(&self, target: &mut T) -> Result<(), ConfigError> {
        match &self.dispatch {
            Some(dispatch) => {
                tracing::dispatcher::with_default(dispatch, || self.load_all(target))
            }
            None => self.load_all(target),
        }
    }

    fn load_all(&self, target: &mut T) -> Result<(), ConfigError> {
        for source in &self.sources {
            let identity = source.identity();
            debug!(event = "config.source.load_started", source = %identity);

            source.load(target).map_err(|e| ConfigError::Source {
                identity,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}

impl<T> Sources<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Appends in-memory YAML.
    pub fn with_raw(self, data: impl Into<Vec<u8>>) -> Self {
        self.with_source(RawSource::new(data))
    }

    /// Appends a YAML file. A missing file is skipped.
    pub fn with_file(self, path: impl AsRef<Path>) -> Self {
        self.with_source(FileSource::new(path))
    }

    /// Appends every YAML file in a directory. A missing directory is skipped.
    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.with_source(DirSource::new(path))
    }

    /// Loads every source onto `T::default()`.
    pub fn build(&self) -> Result<T, ConfigError>
    where
        T: Default,
    {
        let mut target = T::default();
        self.load(&mut target)?;
        Ok(target)
    }
}

impl<T> Default for Sources<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<Box<dyn Source<T>>> for Sources<T> {
    fn from_iter<I: IntoIterator<Item = Box<dyn Source<T>>>>(iter: I) -> Self {
        Self {
            sources: iter.into_iter().collect(),
            dispatch: None,
        }
    }
}

impl<T> Extend<Box<dyn Source<T>>> for Sources<T> {
    fn extend<I: IntoIterator<Item = Box<dyn Source<T>>>>(&mut self, iter: I) {
        self.sources.extend(iter);
    }
}

impl<T> fmt::Debug for Sources<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sources")
            .field("sources", &self.identities())
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Stage, ValueTemplateUnmarshal};
    use crate::template::{str_arg, FuncMap, Template};
    use serde::Deserialize;
    use serde_json::Value;
    use serial_test::serial;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    type Map = BTreeMap<String, String>;

    fn map(pairs: &[(&str, &str)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_later_sources_override() {
        let target: Map = Sources::new()
            .with_raw(r#"{"foo":"bar","hip":"hop"}"#)
            .with_raw(r#"{"foo":"baz"}"#)
            .build()
            .unwrap();

        assert_eq!(target, map(&[("foo", "baz"), ("hip", "hop")]));
    }

    #[test]
    fn test_sequential_apply_matches_single_pass() {
        let a = r#"{"foo":"a","only_a":"1","nested":{"x":"a"}}"#;
        let b = r#"{"foo":"b","nested":{"y":"b"}}"#;

        let mut one_pass: BTreeMap<String, Value> = BTreeMap::new();
        Sources::new()
            .with_raw(a)
            .with_raw(b)
            .load(&mut one_pass)
            .unwrap();

        let mut stepwise: BTreeMap<String, Value> = BTreeMap::new();
        Sources::new().with_raw(a).load(&mut stepwise).unwrap();
        RawSource::new(b).load(&mut stepwise).unwrap();

        assert_eq!(one_pass, stepwise);
        assert_eq!(one_pass["nested"], serde_json::json!({"x": "a", "y": "b"}));
    }

    #[test]
    fn test_missing_sources_leave_target_unchanged() {
        let dir = tempfile::tempdir().unwrap();

        let mut target = map(&[("keep", "me")]);
        Sources::new()
            .with_file(dir.path().join("absent.yml"))
            .with_dir(dir.path().join("absent.d"))
            .load(&mut target)
            .unwrap();

        assert_eq!(target, map(&[("keep", "me")]));
    }

    #[test]
    fn test_file_and_dir_layering() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Cfg {
            #[serde(default)]
            name: String,
            #[serde(default)]
            port: u16,
            #[serde(default)]
            debug: bool,
        }

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("base.yml");
        std::fs::write(&file, "name: base\nport: 80\n").unwrap();
        let confd = dir.path().join("conf.d");
        std::fs::create_dir(&confd).unwrap();
        std::fs::write(confd.join("10-port.yml"), "port: 8080\n").unwrap();
        std::fs::write(confd.join("20-debug.yml"), "debug: true\n").unwrap();

        let cfg: Cfg = Sources::new()
            .with_raw("name: default\ndebug: false")
            .with_file(&file)
            .with_dir(&confd)
            .build()
            .unwrap();

        assert_eq!(cfg.name, "base");
        assert_eq!(cfg.port, 8080);
        assert!(cfg.debug);
    }

    #[test]
    #[serial]
    fn test_home_relative_file() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.yml"), r#"{"foo":"bar"}"#).unwrap();
        let original = std::env::var_os("HOME");
        std::env::set_var("HOME", home.path());

        let result: Result<Map, _> = Sources::new().with_file("~/config.yml").build();

        match original {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
        assert_eq!(result.unwrap(), map(&[("foo", "bar")]));
    }

    #[test]
    fn test_error_names_failing_source_and_keeps_partial_merge() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.yml");
        std::fs::write(&bad, "foo: [").unwrap();

        let mut target = Map::new();
        let err = Sources::new()
            .with_raw(r#"{"foo":"bar"}"#)
            .with_file(&bad)
            .with_raw(r#"{"foo":"never"}"#)
            .load(&mut target)
            .unwrap_err();

        match &err {
            ConfigError::Source { identity, source } => {
                assert_eq!(identity, &format!("filesource:{}", bad.display()));
                assert!(matches!(
                    **source,
                    ConfigError::Yaml {
                        stage: Stage::Decode,
                        ..
                    }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(target, map(&[("foo", "bar")]));
    }

    #[test]
    fn test_templated_source() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Creds {
            #[serde(default)]
            password: String,
        }

        let mut funcs = FuncMap::new();
        funcs.insert("password", |args: &[Value]| {
            Ok(Value::from(format!("pass-for-{}", str_arg(args, 0)?)))
        });
        let source = RawSource::new(r#"password: '{{password "example.com"}}'"#)
            .with_unmarshal(ValueTemplateUnmarshal::new(Template::new(funcs)));

        let creds: Creds = Sources::new().with_source(source).build().unwrap();

        assert_eq!(creds.password, "pass-for-example.com");
    }

    #[test]
    fn test_identities_and_collect() {
        let sources: Sources<Map> = vec![
            Box::new(RawSource::new("a: b")) as Box<dyn Source<Map>>,
            Box::new(FileSource::new("/etc/app.yml")),
            Box::new(DirSource::new("/etc/app.d")),
        ]
        .into_iter()
        .collect();

        assert_eq!(sources.len(), 3);
        assert_eq!(
            sources.identities(),
            vec![
                "rawsource".to_string(),
                "filesource:/etc/app.yml".to_string(),
                "dirsource:/etc/app.d".to_string(),
            ]
        );
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_injected_dispatch_receives_events() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut target = Map::new();
        Sources::new()
            .with_file("/nonexistent/app.yml")
            .with_dispatch(Dispatch::new(subscriber))
            .load(&mut target)
            .unwrap();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("config.source.load_started"), "{output}");
        assert!(output.contains("config.file.not_found"), "{output}");
    }
}
