//! P2P Networking module
//!
//! Peer representation, membership verbs and NAT relay handling.
//!
//! # Features
//! - Nodestr parsing and the ping/join/node/bye verbs
//! - NAT/relay state of this node
//! - Relay maintenance over WebSocket tunnels
//! - Known-peer set with random sampling
//! - HTTP protocol responder

pub mod myself;
pub mod node;
pub mod peer_set;
pub mod relay;
pub mod server;
pub mod slice;
pub mod transport;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testutil;

pub use myself::{Myself, NatState};
pub use node::{normalize_nodestr, Node, NodeConfig, NodeError, CLIENT_ID};
pub use peer_set::{PeerSampler, PeerSet};
pub use relay::{RelayMaintainer, RelayTask};
pub use server::{router, ServerState};
pub use slice::Slice;
pub use transport::{HttpTransport, Transport};
pub use tunnel::{
    serve_tunnel, RelayConnector, RelayRequest, RelayResponse, RequestHandler, Tunnel,
    WsRelayConnector,
};
