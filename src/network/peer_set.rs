//! Known-peer collection
//!
//! The relay task only needs [`PeerSampler::random`]; [`PeerSet`] is the
//! in-memory implementation the node runs with.

use crate::network::node::{Node, NodeConfig};
use crate::network::slice::Slice;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Random sampling of known peers
#[async_trait]
pub trait PeerSampler: Send + Sync {
    /// Up to `max` random peers not in `exclude`; `max == 0` means no limit
    async fn random(&self, exclude: &Slice, max: usize) -> Slice;
}

/// Shuffle `nodes` and keep at most `max` (all when `max == 0`)
fn sample(mut nodes: Vec<Arc<Node>>, max: usize) -> Slice {
    nodes.shuffle(&mut rand::thread_rng());
    if max > 0 {
        nodes.truncate(max);
    }
    nodes.into()
}

/// Thread-safe set of known peers, unique by nodestr
#[derive(Debug, Default)]
pub struct PeerSet {
    nodes: RwLock<Vec<Arc<Node>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Returns false if it was already known.
    pub async fn add(&self, node: Arc<Node>) -> bool {
        let mut nodes = self.nodes.write().await;
        if nodes.iter().any(|n| n.nodestr() == node.nodestr()) {
            return false;
        }
        log::info!("Added node: {}", node);
        nodes.push(node);
        true
    }

    /// Remove a node by nodestr. Returns true if it was known.
    pub async fn remove(&self, nodestr: &str) -> bool {
        let mut nodes = self.nodes.write().await;
        let before = nodes.len();
        nodes.retain(|n| n.nodestr() != nodestr);
        let removed = nodes.len() != before;
        if removed {
            log::info!("Removed node: {}", nodestr);
        }
        removed
    }

    pub async fn contains(&self, nodestr: &str) -> bool {
        let nodes = self.nodes.read().await;
        nodes.iter().any(|n| n.nodestr() == nodestr)
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Snapshot of all known nodes, in insertion order
    pub async fn nodes(&self) -> Slice {
        self.nodes.read().await.iter().cloned().collect()
    }

    /// Load an init node list: one nodestr per line, blank and `#` lines
    /// skipped. Malformed lines are logged and skipped.
    pub async fn load_init_nodes(
        &self,
        path: &Path,
        config: &Arc<NodeConfig>,
    ) -> Result<usize, io::Error> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("Init node list {:?} not found", path);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let mut added = 0;
        for line in data.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Node::new(line, config) {
                Ok(node) => {
                    if self.add(Arc::new(node)).await {
                        added += 1;
                    }
                }
                Err(e) => log::warn!("Skipping init node {:?}: {}", line, e),
            }
        }
        Ok(added)
    }
}

#[async_trait]
impl PeerSampler for PeerSet {
    async fn random(&self, exclude: &Slice, max: usize) -> Slice {
        let excluded = exclude.to_map();
        let candidates: Vec<Arc<Node>> = self
            .nodes
            .read()
            .await
            .iter()
            .filter(|n| !excluded.contains(n.nodestr()))
            .cloned()
            .collect();
        sample(candidates, max)
    }
}
