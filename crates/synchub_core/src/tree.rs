//! Path-keyed trie with recursive remove and rename.
//!
//! [`PathTree`] is the index behind each user's metadata tree. Besides
//! point lookups it supports moving and deleting whole subtrees; both
//! report every affected entry to a visitor exactly once, as a
//! [`TreeEvent`], so the caller can keep per-entry bookkeeping (such as
//! content references) in step with the tree.

use std::collections::BTreeMap;
use std::mem;
use synchub_types::FilePath;

/// One entry affected by a recursive tree operation.
#[derive(Debug, PartialEq, Eq)]
pub enum TreeEvent<'a, V> {
    /// The entry at `path` was removed.
    Deleted {
        /// Where the entry was.
        path: &'a FilePath,
        /// The removed value.
        value: &'a V,
    },
    /// The entry moved from `from` to `to`.
    Moved {
        /// Where the entry was.
        from: &'a FilePath,
        /// Where the entry is now.
        to: &'a FilePath,
        /// The moved value.
        value: &'a V,
    },
}

#[derive(Debug, Clone)]
struct Node<V> {
    path: FilePath,
    value: Option<V>,
    children: BTreeMap<String, Node<V>>,
}

impl<V> Node<V> {
    fn new(path: FilePath) -> Self {
        Self {
            path,
            value: None,
            children: BTreeMap::new(),
        }
    }

    fn count(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.values().map(Node::count).sum::<usize>()
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    fn collect<'a>(&'a self, out: &mut Vec<(&'a FilePath, &'a V)>) {
        if let Some(value) = &self.value {
            out.push((&self.path, value));
        }
        for child in self.children.values() {
            child.collect(out);
        }
    }

    fn rebase(&mut self, from: &FilePath, to: &FilePath) {
        if let Some(path) = self.path.rebase(from, to) {
            self.path = path;
        }
        for child in self.children.values_mut() {
            child.rebase(from, to);
        }
    }

    fn prune(&mut self, segments: &[String]) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        if let Some(child) = self.children.get_mut(first) {
            child.prune(rest);
            if child.is_empty() {
                self.children.remove(first);
            }
        }
    }
}

/// A trie of values keyed by [`FilePath`].
///
/// Intermediate nodes without a value are created on insert and pruned
/// again once they hold nothing. The root path is a valid key.
#[derive(Debug, Clone)]
pub struct PathTree<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for PathTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PathTree<V> {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::new(FilePath::root()),
            len: 0,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the tree holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, path: &FilePath) -> Option<&Node<V>> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, path: &FilePath) -> Option<&mut Node<V>> {
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    /// Returns the entry at `path`.
    #[must_use]
    pub fn get(&self, path: &FilePath) -> Option<&V> {
        self.node(path).and_then(|node| node.value.as_ref())
    }

    /// Returns the entry at `path` mutably.
    pub fn get_mut(&mut self, path: &FilePath) -> Option<&mut V> {
        self.node_mut(path).and_then(|node| node.value.as_mut())
    }

    /// Returns true if `path` holds an entry.
    #[must_use]
    pub fn contains(&self, path: &FilePath) -> bool {
        self.get(path).is_some()
    }

    /// Sets the entry at `path`, returning the previous one.
    pub fn insert(&mut self, path: &FilePath, value: V) -> Option<V> {
        let mut node = &mut self.root;
        for (depth, segment) in path.segments().iter().enumerate() {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::new(path.prefix(depth + 1)));
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Removes the entry at `path` only, keeping anything below it.
    pub fn remove(&mut self, path: &FilePath) -> Option<V> {
        let value = self.node_mut(path)?.value.take()?;
        self.len -= 1;
        self.root.prune(path.segments());
        Some(value)
    }

    fn detach(&mut self, path: &FilePath) -> Option<Node<V>> {
        let node = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => {
                let node = self.node_mut(&parent)?.children.remove(name)?;
                self.root.prune(parent.segments());
                node
            }
            _ => mem::replace(&mut self.root, Node::new(FilePath::root())),
        };
        self.len -= node.count();
        Some(node)
    }

    fn attach(&mut self, path: &FilePath, subtree: Node<V>) {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            self.len = subtree.count();
            self.root = subtree;
            return;
        };
        let mut node = &mut self.root;
        for (depth, segment) in parent.segments().iter().enumerate() {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::new(parent.prefix(depth + 1)));
        }
        self.len += subtree.count();
        node.children.insert(name.to_string(), subtree);
    }

    /// Removes `path` and everything below it.
    ///
    /// The visitor sees each removed entry once, parents before children.
    /// Returns the entry that was at `path` itself.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error. The subtree is removed regardless.
    pub fn remove_recursive<E, F>(&mut self, path: &FilePath, mut visitor: F) -> Result<Option<V>, E>
    where
        F: FnMut(TreeEvent<'_, V>) -> Result<(), E>,
    {
        let Some(mut subtree) = self.detach(path) else {
            return Ok(None);
        };
        let mut entries = Vec::new();
        subtree.collect(&mut entries);
        for (path, value) in entries {
            visitor(TreeEvent::Deleted { path, value })?;
        }
        Ok(subtree.value.take())
    }

    /// Moves `from` and everything below it to `to`.
    ///
    /// Returns `false` without changes if `from` does not exist, `to` is
    /// already in use, or `to` lies inside `from`. The visitor sees each
    /// moved entry once, parents before children.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error. The subtree is moved regardless.
    pub fn rename_recursive<E, F>(&mut self, from: &FilePath, to: &FilePath, mut visitor: F) -> Result<bool, E>
    where
        F: FnMut(TreeEvent<'_, V>) -> Result<(), E>,
    {
        if to.starts_with(from) || self.node(to).is_some() || self.node(from).is_none() {
            return Ok(false);
        }
        let Some(mut subtree) = self.detach(from) else {
            return Ok(false);
        };
        subtree.rebase(from, to);
        self.attach(to, subtree);

        let Some(moved) = self.node(to) else {
            return Ok(true);
        };
        let mut entries = Vec::new();
        moved.collect(&mut entries);
        for (path, value) in entries {
            if let Some(old) = path.rebase(to, from) {
                visitor(TreeEvent::Moved {
                    from: &old,
                    to: path,
                    value,
                })?;
            }
        }
        Ok(true)
    }

    /// Entries strictly below `path`, parents before children.
    #[must_use]
    pub fn descendants(&self, path: &FilePath) -> Vec<(&FilePath, &V)> {
        let mut out = Vec::new();
        if let Some(node) = self.node(path) {
            for child in node.children.values() {
                child.collect(&mut out);
            }
        }
        out
    }

    /// Entries directly below `path`, in name order.
    #[must_use]
    pub fn children(&self, path: &FilePath) -> Vec<(&FilePath, &V)> {
        self.node(path)
            .map(|node| {
                node.children
                    .values()
                    .filter_map(|child| child.value.as_ref().map(|v| (&child.path, v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All entries, parents before children.
    #[must_use]
    pub fn entries(&self) -> Vec<(&FilePath, &V)> {
        let mut out = Vec::new();
        self.root.collect(&mut out);
        out
    }
}
