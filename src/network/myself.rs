//! This node's identity and NAT/relay state
//!
//! `Myself` tracks how the outside world reaches us:
//! - `Direct`: our own address is reachable
//! - `Port0Undiscovered`: behind NAT, no relay yet
//! - `Relayed`: tunneled through a peer; peers address us through it

use crate::network::node::{normalize_nodestr, Node, NodeConfig, NodeError};
use crate::network::peer_set::PeerSampler;
use crate::network::relay::{RelayMaintainer, RelayTask};
use crate::network::tunnel::{RelayConnector, RequestHandler};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

/// NAT/relay state of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatState {
    Direct,
    Port0Undiscovered,
    Relayed,
}

#[derive(Debug, Default)]
struct MyselfState {
    /// Public address as observed by peers
    ip: Option<IpAddr>,
    /// Not directly reachable
    port0: bool,
    /// Only ever set while `port0` is true
    relay_server: Option<Arc<Node>>,
}

impl MyselfState {
    fn nat_state(&self) -> NatState {
        match (self.port0, &self.relay_server) {
            (false, _) => NatState::Direct,
            (true, None) => NatState::Port0Undiscovered,
            (true, Some(_)) => NatState::Relayed,
        }
    }

    fn host(&self, server_name: &str) -> String {
        let host = if !server_name.is_empty() {
            server_name.to_string()
        } else {
            match self.ip {
                Some(IpAddr::V6(ip)) => format!("[{}]", ip),
                Some(ip) => ip.to_string(),
                None => String::new(),
            }
        };

        match &self.relay_server {
            Some(relay) => format!("{}/relay/{}", relay.nodestr(), host),
            None => host,
        }
    }
}

/// This node
#[derive(Debug)]
pub struct Myself {
    port: u16,
    path: String,
    server_name: String,
    state: RwLock<MyselfState>,
    relay_attached: Notify,
}

impl Myself {
    pub fn new(port: u16, path: &str, server_name: &str) -> Self {
        Self {
            port,
            path: path.to_string(),
            server_name: server_name.to_string(),
            state: RwLock::new(MyselfState::default()),
            relay_attached: Notify::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn state(&self) -> NatState {
        self.state.read().await.nat_state()
    }

    /// True if tunneled through a relay
    pub async fn is_relayed(&self) -> bool {
        self.state().await == NatState::Relayed
    }

    /// True if behind NAT and not relayed yet
    pub async fn is_port0(&self) -> bool {
        self.state().await == NatState::Port0Undiscovered
    }

    /// Mark this node as behind NAT (or not). Leaving port0 drops any relay.
    pub async fn set_port0(&self, port0: bool) {
        let mut state = self.state.write().await;
        state.port0 = port0;
        if !port0 {
            state.relay_server = None;
        }
    }

    pub async fn ip(&self) -> Option<IpAddr> {
        self.state.read().await.ip
    }

    /// Record our observed IP. Malformed input is logged and ignored.
    pub async fn set_ip(&self, ip: &str) {
        match ip.trim().parse::<IpAddr>() {
            Ok(ip) => self.state.write().await.ip = Some(ip),
            Err(_) => log::warn!("IP {:?} is in illegal format", ip),
        }
    }

    /// Nodestr of the relay server, if relayed
    pub async fn relay_server(&self) -> Option<String> {
        self.state
            .read()
            .await
            .relay_server
            .as_ref()
            .map(|relay| relay.nodestr().to_string())
    }

    /// Start using `relay`. Refused unless behind NAT.
    pub async fn attach_relay(&self, relay: Arc<Node>) -> bool {
        let mut state = self.state.write().await;
        if !state.port0 {
            log::warn!("Not behind NAT, refusing relay {}", relay);
            return false;
        }
        log::info!("Relayed by {}", relay);
        state.relay_server = Some(relay);
        self.relay_attached.notify_waiters();
        true
    }

    /// Wait until a relay is attached
    pub async fn wait_relayed(&self) {
        loop {
            let attached = self.relay_attached.notified();
            if self.is_relayed().await {
                return;
            }
            attached.await;
        }
    }

    /// Stop using the current relay, returning it
    pub async fn detach_relay(&self) -> Option<Arc<Node>> {
        let relay = self.state.write().await.relay_server.take();
        if let Some(relay) = &relay {
            log::info!("Relay {} detached", relay);
        }
        relay
    }

    /// Route `path` through the relay's proxy when relayed
    pub async fn proxy_url(&self, path: &str) -> String {
        match &self.state.read().await.relay_server {
            Some(relay) => format!("{}/proxy/{}", relay.nodestr(), path),
            None => path.to_string(),
        }
    }

    /// Our nodestr as peers should address us
    pub async fn nodestr(&self) -> Result<String, NodeError> {
        let host = self.state.read().await.host(&self.server_name);
        normalize_nodestr(&format!("{}:{}{}", host, self.port, self.path))
    }

    pub async fn toxstring(&self) -> Result<String, NodeError> {
        Ok(self.nodestr().await?.replace('/', "+"))
    }

    /// Our peer-facing view as a `Node`
    pub async fn to_node(&self, config: &Arc<NodeConfig>) -> Result<Node, NodeError> {
        Node::new(&self.nodestr().await?, config)
    }

    /// `ip:port/path`, ignoring server name and relay
    pub async fn ip_port_path(&self, config: &Arc<NodeConfig>) -> Result<Node, NodeError> {
        let ip = self
            .ip()
            .await
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        Node::from_parts(&ip, &self.path, self.port, config)
    }

    /// Origin offered when opening a relay tunnel
    pub async fn origin(&self) -> String {
        match self.ip().await {
            Some(ip) => format!("http://{}", ip),
            None => "http://".to_string(),
        }
    }

    /// Spawn the relay maintenance task
    pub fn try_relay(
        self: &Arc<Self>,
        peers: Arc<dyn PeerSampler>,
        connector: Arc<dyn RelayConnector>,
        handler: Arc<dyn RequestHandler>,
        retry_interval: Duration,
    ) -> RelayTask {
        RelayMaintainer::new(Arc::clone(self), peers, connector, handler)
            .with_retry_interval(retry_interval)
            .spawn()
    }
}
