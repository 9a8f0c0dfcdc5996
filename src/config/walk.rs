//! Depth-first traversal of a document tree.

use std::fmt;

use super::node::Node;
use super::ConfigError;

/// Location of a node in a document, one segment per level.
///
/// Mapping keys are used by their text and sequence positions as their decimal index.
/// Displayed as `/a/b/0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Calls `visit` for every scalar leaf under `root`, replacing the leaf with
/// the returned value.
///
/// Mappings and sequences are descended into but never passed to `visit`. The
/// first error stops the walk and is returned with the path of the failing
/// leaf.
pub fn walk<F, E>(root: &mut Node, mut visit: F) -> Result<(), ConfigError>
where
    F: FnMut(&KeyPath, Node) -> Result<Node, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut path = KeyPath::default();
    walk_node(root, &mut path, &mut visit)
}

fn walk_node<F, E>(node: &mut Node, path: &mut KeyPath, visit: &mut F) -> Result<(), ConfigError>
where
    F: FnMut(&KeyPath, Node) -> Result<Node, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match node {
        Node::Mapping(entries) => {
            for (key, value) in entries.iter_mut() {
                path.push(key.as_str());
                walk_node(value, path, visit)?;
                path.pop();
            }
        }
        Node::Sequence(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                path.push(index.to_string());
                walk_node(item, path, visit)?;
                path.pop();
            }
        }
        Node::Null | Node::Bool(_) | Node::Number(_) | Node::String(_) => {
            let leaf = std::mem::take(node);
            *node = visit(path, leaf).map_err(|e| ConfigError::Walk {
                path: path.to_string(),
                source: e.into(),
            })?;
        }
    }
    Ok(())
}
