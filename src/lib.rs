//! gou-node: a shinGETsu-compatible P2P bulletin-board node
//!
//! This crate provides the node's membership layer:
//! - Nodestr-addressed peers and the ping/join/node/bye verbs
//! - NAT detection state and relay tunnels through cooperating peers
//! - Peer collections and a random-sampling peer set
//! - An HTTP responder for the same verbs
//!
//! # Example
//!
//! ```rust,no_run
//! use gou_node::config::RegexList;
//! use gou_node::network::{HttpTransport, Myself, Node, NodeConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), gou_node::network::NodeError> {
//! let myself = Arc::new(Myself::new(8000, "/server.cgi", ""));
//! let config = Arc::new(NodeConfig::new(
//!     myself,
//!     RegexList::new(),
//!     RegexList::new(),
//!     Arc::new(HttpTransport::new()),
//! ));
//!
//! let node = Node::new("192.168.0.3:8000/server.cgi", &config)?;
//! let my_ip = node.ping().await?;
//! println!("I am {}", my_ip);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod network;

pub use config::{NetworkMode, RegexList, Settings};
pub use network::{Myself, NatState, Node, NodeConfig, NodeError, PeerSet, Slice};
