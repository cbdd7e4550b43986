//! CLI commands for the node
//!
//! Implements all command handlers for the CLI interface.

use crate::config::{NetworkMode, RegexList, Settings};
use crate::network::{
    router, HttpTransport, Myself, Node, NodeConfig, PeerSet, RelayConnector, RelayTask,
    RequestHandler, ServerState, Slice, Transport, WsRelayConnector,
};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub settings: Settings,
    pub config: Arc<NodeConfig>,
    pub peers: Arc<PeerSet>,
    connector: Arc<dyn RelayConnector>,
}

impl AppState {
    /// Initialize application state
    pub fn new(settings: Settings) -> CliResult<Self> {
        let connector = Arc::new(WsRelayConnector::new(settings.request_timeout()));
        Self::with_network(settings, Arc::new(HttpTransport::new()), connector)
    }

    /// Initialize with a given transport and relay connector
    pub fn with_network(
        settings: Settings,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn RelayConnector>,
    ) -> CliResult<Self> {
        let node_allow = RegexList::load(&settings.node_allow_file)?;
        let node_deny = RegexList::load(&settings.node_deny_file)?;
        log::info!(
            "Loaded {} allow and {} deny patterns",
            node_allow.len(),
            node_deny.len()
        );

        let myself = Arc::new(Myself::new(
            settings.port,
            &settings.path,
            &settings.server_name,
        ));
        let config = NodeConfig::new(myself, node_allow, node_deny, transport)
            .with_request_timeout(settings.request_timeout());

        Ok(Self {
            settings,
            config: Arc::new(config),
            peers: Arc::new(PeerSet::new()),
            connector,
        })
    }

    fn node(&self, nodestr: &str) -> CliResult<Node> {
        Ok(Node::new(nodestr, &self.config)?)
    }
}

/// Ping a node and show our observed address
pub async fn cmd_ping(state: &AppState, nodestr: &str) -> CliResult<()> {
    let node = state.node(nodestr)?;
    let ip = node.ping().await?;

    println!("✅ {} ponged", node);
    println!("   🌐 Observed address: {}", ip);
    Ok(())
}

/// Ask a node for another node
pub async fn cmd_get_node(state: &AppState, nodestr: &str) -> CliResult<()> {
    let node = state.node(nodestr)?;
    let other = node.get_node().await?;

    println!("{}", other);
    Ok(())
}

/// Join a node
pub async fn cmd_join(state: &AppState, nodestr: &str) -> CliResult<()> {
    let node = state.node(nodestr)?;
    node.ping().await?;

    match node.join().await? {
        Some(other) => {
            println!("✅ Joined {}", node);
            println!("   👋 Introduced: {}", other);
        }
        None => println!("✅ Joined {}", node),
    }
    Ok(())
}

/// Say goodbye to a node
pub async fn cmd_bye(state: &AppState, nodestr: &str) -> CliResult<()> {
    let node = state.node(nodestr)?;

    if node.bye().await {
        println!("👋 {} said bye", node);
    } else {
        println!("⚠️  {} did not answer bye", node);
    }
    Ok(())
}

/// Ping every init node; the replies tell us our own address
async fn ping_init_nodes(state: &AppState) -> Slice {
    let mut reachable = Slice::new();

    for node in state.peers.nodes().await {
        match node.ping().await {
            Ok(_) => reachable.push(node),
            Err(e) => log::warn!("Init node {} unreachable: {}", node, e),
        }
    }

    reachable
}

/// Join `nodes`; introduced nodes are added to the peer set
async fn join_nodes(state: &AppState, nodes: Slice) -> usize {
    let mut joined = 0;

    for node in nodes {
        match node.join().await {
            Ok(introduced) => {
                joined += 1;
                if let Some(other) = introduced {
                    state.peers.add(Arc::new(other)).await;
                }
            }
            Err(e) => log::warn!("Cannot join {}: {}", node, e),
        }
    }

    joined
}

/// Bring the node onto the network. Behind NAT, joining waits until a
/// relay is attached so peers record the relayed address.
async fn announce(state: &AppState, app: &Router, relay_task: &mut Option<RelayTask>) -> usize {
    let reachable = ping_init_nodes(state).await;

    if state.settings.mode == NetworkMode::Relay {
        let myself = &state.config.myself;
        let handler: Arc<dyn RequestHandler> = Arc::new(app.clone());
        *relay_task = Some(myself.try_relay(
            state.peers.clone(),
            state.connector.clone(),
            handler,
            state.settings.relay_retry_interval(),
        ));

        log::info!("Waiting for a relay before joining");
        myself.wait_relayed().await;
    }

    join_nodes(state, reachable).await
}

/// Serve on `listener` and join the network until `shutdown` fires
pub async fn serve_node(
    state: &AppState,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> CliResult<()> {
    let loaded = state
        .peers
        .load_init_nodes(&state.settings.initnode_list, &state.config)
        .await?;
    log::info!("Loaded {} init nodes", loaded);

    let myself = &state.config.myself;
    if state.settings.mode == NetworkMode::Relay {
        myself.set_port0(true).await;
    }

    let app = router(ServerState {
        config: state.config.clone(),
        peers: state.peers.clone(),
    });

    log::info!("Listening on {}", listener.local_addr()?);
    let server = tokio::spawn({
        let app = app.clone();
        let shutdown = shutdown.clone();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        }
    });

    println!("✅ Node started");
    println!("   🔌 Port: {}", myself.port());

    let mut relay_task = None;
    tokio::select! {
        _ = shutdown.cancelled() => {}
        joined = announce(state, &app, &mut relay_task) => {
            println!("   🤝 Joined: {}/{} init nodes", joined, loaded);
            if let Ok(nodestr) = myself.nodestr().await {
                println!("   📛 Nodestr: {}", nodestr);
            }
            shutdown.cancelled().await;
        }
    }

    log::info!("Node shutting down...");
    if let Some(task) = relay_task {
        task.cancel().await;
    }
    for node in state.peers.nodes().await {
        node.bye().await;
    }

    server.await??;
    Ok(())
}

/// Run the node until Ctrl-C
pub async fn cmd_run(state: &AppState) -> CliResult<()> {
    let listener = TcpListener::bind(("0.0.0.0", state.settings.port)).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {}", e);
            }
            shutdown.cancel();
        }
    });

    serve_node(state, listener, shutdown).await
}
