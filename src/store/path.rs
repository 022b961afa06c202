//! Dot-path addressing into the state tree and the segment-indexed
//! subscription trie backing the notification cascade.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::errors::{RuntimeError, RuntimeResult};

/// Split and validate a dot-delimited path. Empty paths and empty segments
/// (`"a..b"`, `".a"`) are configuration errors.
pub fn parse(path: &str) -> RuntimeResult<Vec<&str>> {
    if path.is_empty() {
        return Err(RuntimeError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RuntimeError::InvalidPath {
            path: path.to_string(),
            reason: "path contains an empty segment".to_string(),
        });
    }
    Ok(segments)
}

/// Resolve `segments` against `tree`. Objects are traversed by key, arrays
/// by numeric segment. A missing or mismatched segment yields `None`.
pub fn get_at<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments {
        node = match node {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(node)
}

/// Write `value` at `segments`, lazily creating intermediate objects. An
/// intermediate that exists but is not an object is replaced wholesale.
pub fn set_at(tree: &mut Value, segments: &[&str], value: Value) {
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        node = ensure_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let last = segments[segments.len() - 1];
    ensure_object(node).insert(last.to_string(), value);
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Remove the value at `segments`, returning it if present. Intermediate
/// containers are left in place.
pub fn remove_at(tree: &mut Value, segments: &[&str]) -> Option<Value> {
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        node = node.as_object_mut()?.get_mut(*segment)?;
    }
    let last = segments[segments.len() - 1];
    node.as_object_mut()?.remove(last)
}

/// Segment-indexed mapping from path prefix to subscriber set. One trie node
/// per path segment; the cascade walks the changed path once instead of
/// re-deriving ancestor strings per write.
pub struct PathTrie<T> {
    root: TrieNode<T>,
}

struct TrieNode<T> {
    children: HashMap<String, TrieNode<T>>,
    items: Vec<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            items: Vec::new(),
        }
    }
}

impl<T: Clone> PathTrie<T> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
        }
    }

    pub fn insert(&mut self, segments: &[&str], item: T) {
        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.items.push(item);
    }

    /// Items registered exactly at `segments`.
    pub fn exact(&self, segments: &[&str]) -> Vec<T> {
        let mut node = &self.root;
        for segment in segments {
            match node.children.get(*segment) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        node.items.clone()
    }

    /// Items registered on every strict ancestor of `segments`, nearest
    /// ancestor first, paired with the ancestor's segment depth.
    pub fn ancestors(&self, segments: &[&str]) -> Vec<(usize, Vec<T>)> {
        let mut nodes = Vec::with_capacity(segments.len());
        let mut node = &self.root;
        for segment in segments {
            match node.children.get(*segment) {
                Some(child) => {
                    node = child;
                    nodes.push(node);
                }
                None => break,
            }
        }

        let mut collected = Vec::new();
        // Skip the exact node; walk prefixes from the nearest ancestor out.
        for depth in (1..segments.len()).rev() {
            if let Some(node) = nodes.get(depth - 1) {
                if !node.items.is_empty() {
                    collected.push((depth, node.items.clone()));
                }
            }
        }
        collected
    }

    /// Drop items rejected by `keep` and prune empty subtrees.
    pub fn retain<F: Fn(&T) -> bool>(&mut self, keep: F) {
        Self::retain_node(&mut self.root, &keep);
    }

    fn retain_node<F: Fn(&T) -> bool>(node: &mut TrieNode<T>, keep: &F) {
        node.items.retain(|item| keep(item));
        for child in node.children.values_mut() {
            Self::retain_node(child, keep);
        }
        node.children
            .retain(|_, child| !child.items.is_empty() || !child.children.is_empty());
    }
}

impl<T: Clone> Default for PathTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_empty_and_malformed() {
        assert!(parse("").is_err());
        assert!(parse("a..b").is_err());
        assert!(parse(".a").is_err());
        assert_eq!(parse("agent.status").unwrap(), vec!["agent", "status"]);
    }

    #[test]
    fn get_at_traverses_objects_and_arrays() {
        let tree = json!({"agents": {"list": [{"id": "a"}, {"id": "b"}]}});
        assert_eq!(
            get_at(&tree, &["agents", "list", "1", "id"]),
            Some(&json!("b"))
        );
        assert_eq!(get_at(&tree, &["agents", "missing"]), None);
        assert_eq!(get_at(&tree, &["agents", "list", "oops"]), None);
    }

    #[test]
    fn set_at_creates_intermediate_objects() {
        let mut tree = json!({});
        set_at(&mut tree, &["a", "b", "c"], json!(1));
        assert_eq!(tree, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_at_replaces_scalar_intermediates() {
        let mut tree = json!({"a": 5});
        set_at(&mut tree, &["a", "b"], json!(true));
        assert_eq!(tree, json!({"a": {"b": true}}));
    }

    #[test]
    fn remove_at_returns_removed_value() {
        let mut tree = json!({"a": {"b": 2}});
        assert_eq!(remove_at(&mut tree, &["a", "b"]), Some(json!(2)));
        assert_eq!(remove_at(&mut tree, &["a", "b"]), None);
        assert_eq!(tree, json!({"a": {}}));
    }

    #[test]
    fn trie_exact_and_ancestor_lookup() {
        let mut trie = PathTrie::new();
        trie.insert(&["a", "b", "c"], 1);
        trie.insert(&["a", "b"], 2);
        trie.insert(&["a"], 3);
        trie.insert(&["x"], 4);

        assert_eq!(trie.exact(&["a", "b", "c"]), vec![1]);
        assert_eq!(
            trie.ancestors(&["a", "b", "c"]),
            vec![(2, vec![2]), (1, vec![3])]
        );
        assert!(trie.ancestors(&["x"]).is_empty());
    }

    #[test]
    fn trie_retain_prunes_empty_branches() {
        let mut trie = PathTrie::new();
        trie.insert(&["a", "b"], 1);
        trie.insert(&["a"], 2);
        trie.retain(|item| *item != 1);
        assert!(trie.exact(&["a", "b"]).is_empty());
        assert_eq!(trie.exact(&["a"]), vec![2]);
    }
}
