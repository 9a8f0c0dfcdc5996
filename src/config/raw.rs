//! In-memory configuration source.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::source::{unmarshal, SharedUnmarshal, Source};
use super::unmarshal::Unmarshal;
use super::ConfigError;

/// Configuration held in memory, typically compiled-in defaults.
pub struct RawSource<T> {
    data: Vec<u8>,
    unmarshal: Option<SharedUnmarshal<T>>,
}

impl<T> RawSource<T> {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            unmarshal: None,
        }
    }

    /// Decodes the data with `unmarshal` instead of YAML.
    pub fn with_unmarshal(mut self, unmarshal: impl Unmarshal<T> + 'static) -> Self {
        self.unmarshal = Some(Arc::new(unmarshal));
        self
    }
}

impl<T: Serialize + DeserializeOwned> Source<T> for RawSource<T> {
    fn load(&self, target: &mut T) -> Result<(), ConfigError> {
        unmarshal(&self.data, target, self.unmarshal.as_ref())
    }

    fn identity(&self) -> String {
        "rawsource".to_string()
    }
}

impl<T> Clone for RawSource<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            unmarshal: self.unmarshal.clone(),
        }
    }
}

impl<T> fmt::Debug for RawSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSource")
            .field("len", &self.data.len())
            .field("custom_unmarshal", &self.unmarshal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JsonUnmarshal;
    use std::collections::BTreeMap;

    #[test]
    fn test_raw_source_loads_yaml() {
        let mut target: BTreeMap<String, String> = BTreeMap::new();

        RawSource::new(r#"{"foo":"bar"}"#).load(&mut target).unwrap();

        assert_eq!(target["foo"], "bar");
    }

    #[test]
    fn test_raw_source_custom_unmarshal() {
        let mut target: BTreeMap<String, String> = BTreeMap::new();
        let source = RawSource::new("foo: bar").with_unmarshal(JsonUnmarshal);

        assert!(source.load(&mut target).is_err());
        assert!(target.is_empty());
    }

    #[test]
    fn test_raw_source_identity() {
        assert_eq!(Source::<BTreeMap<String, String>>::identity(&RawSource::new("")), "rawsource");
    }
}
