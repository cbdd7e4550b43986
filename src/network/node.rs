//! Remote peer representation and protocol client
//!
//! A `Node` is identified by its nodestr (`host:port/path`). All protocol
//! verbs are built on [`Node::talk`], a single GET returning body lines.

use crate::config::{RegexList, DEFAULT_REQUEST_TIMEOUT};
use crate::network::myself::Myself;
use crate::network::transport::Transport;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

/// Client identifier sent in the user agent
pub const CLIENT_ID: &str = "0.8alpha";

const PONG: &str = "PONG";
const WELCOME: &str = "WELCOME";
const BYEBYE: &str = "BYEBYE";

/// digits, a slash, then a path without colons or spaces
static NODESTR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+/[^: ]+$").expect("nodestr pattern is valid"));

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Bad nodestr format: {0}")]
    Format(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("{0} is not allowed")]
    AccessDenied(String),
}

/// Shared, read-only configuration every `Node` carries
pub struct NodeConfig {
    /// This node
    pub myself: Arc<Myself>,
    pub node_allow: RegexList,
    pub node_deny: RegexList,
    /// Version advertised in the user agent
    pub version: String,
    pub request_timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl NodeConfig {
    pub fn new(
        myself: Arc<Myself>,
        node_allow: RegexList,
        node_deny: RegexList,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            myself,
            node_allow,
            node_deny,
            version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn user_agent(&self) -> String {
        format!("shinGETsuPlus/{} (Gou/{})", CLIENT_ID, self.version)
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("version", &self.version)
            .field("request_timeout", &self.request_timeout)
            .field("node_allow", &self.node_allow.len())
            .field("node_deny", &self.node_deny.len())
            .finish()
    }
}

/// Trim, restore `+` to `/` and validate a nodestr
pub fn normalize_nodestr(nodestr: &str) -> Result<String, NodeError> {
    let nodestr = nodestr.trim();
    if nodestr.is_empty() {
        log::warn!("nodestr is empty");
        return Err(NodeError::Format("nodestr is empty".to_string()));
    }

    let nodestr = nodestr.replace('+', "/");
    if !NODESTR_PATTERN.is_match(&nodestr) {
        log::warn!("bad nodestr format: {}", nodestr);
        return Err(NodeError::Format(nodestr));
    }
    Ok(nodestr)
}

/// Join host and port the way a socket address prints (IPv6 bracketed)
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// A remote peer
pub struct Node {
    nodestr: String,
    /// Set once a relay attempt through this node fails. Written only by
    /// the relay task; other readers may see a stale value.
    cannot_relay: AtomicBool,
    config: Arc<NodeConfig>,
}

impl Node {
    /// Validate `nodestr` and build a node
    pub fn new(nodestr: &str, config: &Arc<NodeConfig>) -> Result<Self, NodeError> {
        Ok(Self {
            nodestr: normalize_nodestr(nodestr)?,
            cannot_relay: AtomicBool::new(false),
            config: Arc::clone(config),
        })
    }

    /// Build a node from host, path and port
    pub fn from_parts(
        host: &str,
        path: &str,
        port: u16,
        config: &Arc<NodeConfig>,
    ) -> Result<Self, NodeError> {
        let nodestr = join_host_port(host, port) + &path.replace('+', "/");
        Self::new(&nodestr, config)
    }

    pub fn nodestr(&self) -> &str {
        &self.nodestr
    }

    pub fn config(&self) -> &Arc<NodeConfig> {
        &self.config
    }

    /// Nodestr with `/` replaced by `+`, for use as a single path segment
    pub fn toxstring(&self) -> String {
        self.nodestr.replace('/', "+")
    }

    pub fn cannot_relay(&self) -> bool {
        self.cannot_relay.load(Ordering::Relaxed)
    }

    pub fn mark_cannot_relay(&self) {
        self.cannot_relay.store(true, Ordering::Relaxed);
    }

    /// Denied only if not on the allow list and on the deny list
    pub fn is_allowed(&self) -> bool {
        self.config.node_allow.check(&self.nodestr) || !self.config.node_deny.check(&self.nodestr)
    }

    /// Send `message` to this node and return the response lines
    pub async fn talk(&self, message: &str, via_proxy: bool) -> Result<Vec<String>, NodeError> {
        let target = if message.starts_with('/') {
            format!("{}{}", self.nodestr, message)
        } else {
            format!("{}/{}", self.nodestr, message)
        };
        let url = if via_proxy {
            format!("http://{}", self.config.myself.proxy_url(&target).await)
        } else {
            format!("http://{}", target)
        };

        log::debug!("Talk: {}", url);
        let result = self
            .config
            .transport
            .get_lines(&url, &self.config.user_agent(), self.config.request_timeout)
            .await;
        if let Err(e) = &result {
            log::warn!("{}: {}", url, e);
        }
        result
    }

    /// Ping this node; on success our observed IP is recorded and returned
    pub async fn ping(&self) -> Result<String, NodeError> {
        let res = self.talk("/ping", false).await?;

        if res.len() == 2 && res[0] == PONG {
            log::info!("Ponged by {}, I am {}", self.nodestr, res[1]);
            self.config.myself.set_ip(&res[1]).await;
            return Ok(res[1].clone());
        }

        log::warn!("/ping {}: unexpected response {:?}", self.nodestr, res);
        Err(NodeError::Protocol(format!(
            "{} connected, but not ponged",
            self.nodestr
        )))
    }

    /// Ask this node to add us. Returns another node it introduced, if any.
    pub async fn join(&self) -> Result<Option<Node>, NodeError> {
        if !self.is_allowed() {
            log::warn!("{} is not allowed", self.nodestr);
            return Err(NodeError::AccessDenied(self.nodestr.clone()));
        }

        let message = format!("/join/{}", self.config.myself.toxstring().await?);
        let res = self.talk(&message, true).await?;
        log::debug!("Response of join from {}: {:?}", self.nodestr, res);

        match res.as_slice() {
            [] => Err(NodeError::Protocol(format!(
                "empty response to /join from {}",
                self.nodestr
            ))),
            [only] => {
                if only == WELCOME {
                    Ok(None)
                } else {
                    Err(NodeError::Protocol(format!(
                        "not welcomed by {}",
                        self.nodestr
                    )))
                }
            }
            // The introduced node is parsed before the greeting is checked.
            [greeting, introduced, ..] => {
                let introduced = Node::new(introduced, &self.config)?;
                if greeting != WELCOME {
                    return Err(NodeError::Protocol(format!(
                        "not welcomed by {} (introduced {})",
                        self.nodestr, introduced
                    )));
                }
                Ok(Some(introduced))
            }
        }
    }

    /// Ask this node for another node it knows
    pub async fn get_node(&self) -> Result<Node, NodeError> {
        let res = self
            .talk("/node", false)
            .await
            .map_err(|e| NodeError::Network(format!("/node {} error: {}", self.nodestr, e)))?;

        match res.first() {
            Some(nodestr) => Node::new(nodestr, &self.config),
            None => Err(NodeError::Protocol(format!(
                "empty response to /node from {}",
                self.nodestr
            ))),
        }
    }

    /// Say goodbye. Failures are logged and reported as `false`.
    pub async fn bye(&self) -> bool {
        let me = match self.config.myself.nodestr().await {
            Ok(me) => me,
            Err(e) => {
                log::warn!("/bye {}: {}", self.nodestr, e);
                return false;
            }
        };

        match self.talk(&format!("/bye/{}", me), true).await {
            Ok(res) => res.first().map(|line| line == BYEBYE).unwrap_or(false),
            Err(e) => {
                log::warn!("/bye {} error: {}", self.nodestr, e);
                false
            }
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.nodestr == other.nodestr
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nodestr.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nodestr)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("nodestr", &self.nodestr)
            .field("cannot_relay", &self.cannot_relay())
            .finish()
    }
}
