//! Ordered collections of nodes

use crate::network::node::Node;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

/// An ordered list of nodes. May contain duplicates until `uniq`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slice(Vec<Arc<Node>>);

impl Slice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Arc<Node>) {
        self.0.push(node);
    }

    /// Set of nodestrs, for membership tests
    pub fn to_map(&self) -> HashSet<String> {
        self.0.iter().map(|n| n.nodestr().to_string()).collect()
    }

    /// Drop later duplicates, keeping first-seen order
    pub fn uniq(&self) -> Slice {
        let mut seen = HashSet::with_capacity(self.0.len());
        self.0
            .iter()
            .filter(|n| seen.insert(n.nodestr()))
            .cloned()
            .collect()
    }

    /// New slice with `other` appended; no deduplication
    pub fn extend(&self, other: &Slice) -> Slice {
        self.0.iter().chain(other.0.iter()).cloned().collect()
    }

    pub fn nodestrs(&self) -> Vec<String> {
        self.0.iter().map(|n| n.nodestr().to_string()).collect()
    }

    pub fn into_inner(self) -> Vec<Arc<Node>> {
        self.0
    }
}

impl Deref for Slice {
    type Target = [Arc<Node>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Arc<Node>>> for Slice {
    fn from(nodes: Vec<Arc<Node>>) -> Self {
        Self(nodes)
    }
}

impl FromIterator<Arc<Node>> for Slice {
    fn from_iter<I: IntoIterator<Item = Arc<Node>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Slice {
    type Item = Arc<Node>;
    type IntoIter = std::vec::IntoIter<Arc<Node>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Slice {
    type Item = &'a Arc<Node>;
    type IntoIter = std::slice::Iter<'a, Arc<Node>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
