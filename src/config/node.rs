//! Untyped document tree used while decoding and templating a source.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_yaml::Number;

pub type Mapping = BTreeMap<Key, Node>;

/// A node of a decoded configuration document.
///
/// Every input format is normalized to this shape. YAML tags are dropped;
/// mapping keys are scalars addressed by their text (see [`Key`]).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<Node>),
    Mapping(Mapping),
}

impl Node {
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up a key if this node is a mapping.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping().and_then(|m| m.get(key))
    }
}

/// Merges `overlay` onto `base`.
///
/// Mappings are merged recursively; every other value (sequences included)
/// replaces what was there. A null overlay at the root leaves `base` alone,
/// which is how an empty document behaves.
pub fn merge(base: &mut Node, overlay: Node) {
    match (base, overlay) {
        (_, Node::Null) => {}
        (Node::Mapping(base), Node::Mapping(overlay)) => deep_merge(base, overlay),
        (base, overlay) => *base = overlay,
    }
}

fn deep_merge(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Node::Mapping(base_map)), Node::Mapping(overlay_map)) => {
                deep_merge(base_map, overlay_map);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// A mapping key.
///
/// Keys compare by their text, so `1` and `"1"` address the same entry, but a
/// key keeps its scalar type when the tree is written back out. When a merge
/// overwrites an entry the existing key, and so its type, is kept.
#[derive(Debug, Clone)]
pub struct Key {
    text: String,
    scalar: Node,
}

impl Key {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The key as it appeared in the document.
    pub fn scalar(&self) -> &Node {
        &self.scalar
    }
}

impl From<String> for Key {
    fn from(text: String) -> Self {
        Self {
            scalar: Node::String(text.clone()),
            text,
        }
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.scalar.serialize(serializer)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => n.serialize(serializer),
            Node::String(s) => serializer.serialize_str(s),
            Node::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n.into())
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<serde_yaml::Value> for Node {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;

        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Sequence(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Mapping(entries) => Node::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| (yaml_key(k), Node::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Node::from(tagged.value),
        }
    }
}

fn yaml_key(key: serde_yaml::Value) -> Key {
    use serde_yaml::Value;

    match key {
        Value::String(s) => Key::from(s),
        Value::Number(n) => Key {
            text: n.to_string(),
            scalar: Node::Number(n),
        },
        Value::Bool(b) => Key {
            text: b.to_string(),
            scalar: Node::Bool(b),
        },
        Value::Null => Key {
            text: "null".to_string(),
            scalar: Node::Null,
        },
        Value::Tagged(tagged) => yaml_key(tagged.value),
        complex => Key::from(
            serde_yaml::to_string(&complex)
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default(),
        ),
    }
}

impl From<Node> for serde_yaml::Value {
    fn from(node: Node) -> Self {
        use serde_yaml::Value;

        match node {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(b),
            Node::Number(n) => Value::Number(n),
            Node::String(s) => Value::String(s),
            Node::Sequence(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            Node::Mapping(entries) => Value::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| (Value::from(k.scalar), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(json_number(&n)),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Object(entries) => Node::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| (Key::from(k), Node::from(v)))
                    .collect(),
            ),
        }
    }
}

fn json_number(n: &serde_json::Number) -> Number {
    if let Some(i) = n.as_i64() {
        Number::from(i)
    } else if let Some(u) = n.as_u64() {
        Number::from(u)
    } else {
        Number::from(n.as_f64().unwrap_or(f64::NAN))
    }
}

impl From<toml::Value> for Node {
    fn from(value: toml::Value) -> Self {
        use toml::Value;

        match value {
            Value::String(s) => Node::String(s),
            Value::Integer(i) => Node::Number(i.into()),
            Value::Float(f) => Node::Number(f.into()),
            Value::Boolean(b) => Node::Bool(b),
            Value::Datetime(dt) => Node::String(dt.to_string()),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Table(table) => Node::Mapping(
                table
                    .into_iter()
                    .map(|(k, v)| (Key::from(k), Node::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Node {
        serde_yaml::from_str::<serde_yaml::Value>(s).unwrap().into()
    }

    #[test]
    fn test_merge_overrides_and_keeps() {
        let mut base = yaml("{foo: bar, hip: hop}");
        merge(&mut base, yaml("{foo: baz}"));

        assert_eq!(base, yaml("{foo: baz, hip: hop}"));
    }

    #[test]
    fn test_merge_nested_mappings() {
        let mut base = yaml("db: {host: localhost, port: 5432}");
        merge(&mut base, yaml("db: {port: 6543}"));

        assert_eq!(base, yaml("db: {host: localhost, port: 6543}"));
    }

    #[test]
    fn test_merge_replaces_sequences() {
        let mut base = yaml("hosts: [a, b, c]");
        merge(&mut base, yaml("hosts: [d]"));

        assert_eq!(base, yaml("hosts: [d]"));
    }

    #[test]
    fn test_merge_null_document_is_noop() {
        let mut base = yaml("{foo: bar}");
        merge(&mut base, Node::Null);

        assert_eq!(base, yaml("{foo: bar}"));
    }

    #[test]
    fn test_keys_are_looked_up_by_text() {
        let node = yaml("1: one\ntrue: yes-ish\n");

        assert_eq!(node.get("1"), Some(&Node::from("one")));
        assert_eq!(node.get("true"), Some(&Node::from("yes-ish")));
    }

    #[test]
    fn test_key_types_survive_round_trip() {
        let text = "1: one\nname: n\ntrue: yes\n";

        let value: serde_yaml::Value = yaml(text).into();

        assert_eq!(value, serde_yaml::from_str::<serde_yaml::Value>(text).unwrap());
    }

    #[test]
    fn test_merge_keeps_existing_key_type() {
        let mut base = Node::from(serde_json::json!({"1": "a"}));
        merge(&mut base, yaml("1: b"));

        let mapping = base.as_mapping().unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(base.get("1"), Some(&Node::from("b")));
        assert_eq!(mapping.keys().next().unwrap().scalar(), &Node::from("1"));
    }

    #[test]
    fn test_tags_are_dropped() {
        let node = yaml("value: !secret hunter2");

        assert_eq!(node.get("value"), Some(&Node::from("hunter2")));
    }

    #[test]
    fn test_from_json() {
        let node = Node::from(serde_json::json!({"a": [1, true, null], "b": 1.5}));

        assert_eq!(
            node.get("a"),
            Some(&Node::Sequence(vec![Node::from(1i64), Node::Bool(true), Node::Null]))
        );
        assert_eq!(node.get("b"), Some(&Node::Number(1.5f64.into())));
    }

    #[test]
    fn test_from_toml_datetime_becomes_string() {
        let table: toml::Value = toml::from_str("at = 1979-05-27T07:32:00Z").unwrap();
        let node = Node::from(table);

        assert_eq!(node.get("at"), Some(&Node::from("1979-05-27T07:32:00Z")));
    }
}
