//! Prefix-tree upstream resolution.
//!
//! A [`RouteTree`] is built once from the ordered `path -> upstream`
//! list in the config and is read-only afterwards, so it can be shared
//! across request tasks behind an `Arc` without locking.
//!
//! Patterns and request paths are split on `/` with empty segments
//! skipped. A `*` segment matches any single segment. Lookup walks the
//! tree one segment at a time, preferring a literal child over the
//! wildcard child, and stops at the first segment neither matches. The
//! result is the value of the node where the walk stopped, which may be
//! absent even when an ancestor has a value.

use std::collections::HashMap;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTree<V> {
    children: HashMap<String, RouteTree<V>>,
    value: Option<V>,
}

impl<V> Default for RouteTree<V> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            value: None,
        }
    }
}

/// Non-empty `/`-separated segments of a path or pattern.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl<V> RouteTree<V> {
    /// Build a tree from `(pattern, value)` pairs in order.
    ///
    /// When two patterns normalize to the same segment sequence the later
    /// one overwrites the earlier one.
    pub fn build<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
    {
        let mut root = Self::default();
        for (pattern, value) in entries {
            root.insert(pattern.as_ref(), value);
        }
        root
    }

    fn insert(&mut self, pattern: &str, value: V) -> Option<V> {
        let mut node = self;
        for segment in segments(pattern) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.value.replace(value)
    }

    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&V> {
        let mut node = self;
        for segment in segments(path) {
            if let Some(child) = node.children.get(segment) {
                node = child;
            } else if let Some(child) = node.children.get(WILDCARD) {
                node = child;
            } else {
                break;
            }
        }
        node.value.as_ref()
    }

    /// Number of nodes holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.values().map(Self::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
