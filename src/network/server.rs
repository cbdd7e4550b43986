//! HTTP protocol responder
//!
//! Answers the membership verbs other nodes send us. The same router
//! serves direct connections and requests arriving through a relay tunnel.
//!
//! # Endpoints (under the node path, e.g. `/server.cgi`)
//! - `GET /ping` - `PONG` and the caller's address
//! - `GET /node` - one known node
//! - `GET /join/{node}` - add the caller, maybe introduce another node
//! - `GET /bye/{node}` - forget the caller

use crate::network::node::{normalize_nodestr, Node, NodeConfig};
use crate::network::peer_set::{PeerSampler, PeerSet};
use crate::network::slice::Slice;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state for the responder
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<NodeConfig>,
    pub peers: Arc<PeerSet>,
}

/// Build the protocol router
pub fn router(state: ServerState) -> Router {
    let base = state.config.myself.path().trim_end_matches('/').to_string();

    Router::new()
        .route(&format!("{}/ping", base), get(ping))
        .route(&format!("{}/node", base), get(node))
        .route(&format!("{}/join/{{*node}}", base), get(join))
        .route(&format!("{}/bye/{{*node}}", base), get(bye))
        .with_state(state)
}

/// Caller address: the socket peer on direct connections. Requests arriving
/// through a relay tunnel carry no socket, so the relay's `X-Forwarded-For`
/// first hop is used instead.
fn remote_addr(request: &Request) -> Option<String> {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip().to_string());
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn ping(request: Request) -> String {
    let remote = remote_addr(&request).unwrap_or_default();
    log::debug!("Pinged by {}", remote);
    format!("PONG\n{}\n", remote)
}

async fn node(State(state): State<ServerState>) -> String {
    match state.peers.random(&Slice::new(), 1).await.first() {
        Some(node) => format!("{}\n", node.nodestr()),
        None => String::new(),
    }
}

async fn join(State(state): State<ServerState>, Path(nodestr): Path<String>) -> Response {
    let node = match Node::new(&nodestr, &state.config) {
        Ok(node) => Arc::new(node),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if !node.is_allowed() {
        log::info!("Join from {} denied", node);
        return StatusCode::FORBIDDEN.into_response();
    }
    if let Ok(me) = state.config.myself.nodestr().await {
        if me == node.nodestr() {
            return StatusCode::BAD_REQUEST.into_response();
        }
    }

    let exclude: Slice = vec![Arc::clone(&node)].into();
    let introduced = state.peers.random(&exclude, 1).await;
    state.peers.add(node).await;

    let mut body = String::from("WELCOME\n");
    if let Some(other) = introduced.first() {
        body.push_str(other.nodestr());
        body.push('\n');
    }
    body.into_response()
}

async fn bye(State(state): State<ServerState>, Path(nodestr): Path<String>) -> Response {
    match normalize_nodestr(&nodestr) {
        Ok(nodestr) => {
            state.peers.remove(&nodestr).await;
            "BYEBYE\n".into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegexList;
    use crate::network::testutil::{test_config, test_config_with};
    use crate::network::transport::body_lines;
    use axum::body::Body;
    use tower::ServiceExt;

    async fn get_lines(app: &Router, uri: &str) -> (StatusCode, Vec<String>) {
        let mut request = axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 7], 40000))));

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, body_lines(&String::from_utf8_lossy(&body)))
    }

    fn state(config: Arc<NodeConfig>) -> ServerState {
        ServerState {
            config,
            peers: Arc::new(PeerSet::new()),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let (config, _) = test_config();
        let app = router(state(config));

        let (status, lines) = get_lines(&app, "/server.cgi/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lines, vec!["PONG", "198.51.100.7"]);
    }

    #[tokio::test]
    async fn test_ping_forwarded() {
        let (config, _) = test_config();
        let app = router(state(config));

        let request = axum::http::Request::builder()
            .uri("/server.cgi/ping")
            .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body_lines(&String::from_utf8_lossy(&body)), vec!["PONG", "203.0.113.9"]);
    }

    #[tokio::test]
    async fn test_ping_direct_ignores_forwarded() {
        let (config, _) = test_config();
        let app = router(state(config));

        let mut request = axum::http::Request::builder()
            .uri("/server.cgi/ping")
            .header("X-Forwarded-For", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 7], 40000))));

        let response = app.oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body_lines(&String::from_utf8_lossy(&body)), vec!["PONG", "198.51.100.7"]);
    }

    #[tokio::test]
    async fn test_join_node_bye() {
        let (config, _) = test_config();
        let state = state(config);
        let peers = state.peers.clone();
        let app = router(state);

        let (_, lines) = get_lines(&app, "/server.cgi/node").await;
        assert!(lines.is_empty());

        let (status, lines) = get_lines(&app, "/server.cgi/join/1.1.1.1:8000+server.cgi").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lines, vec!["WELCOME"]);

        let (_, lines) = get_lines(&app, "/server.cgi/join/2.2.2.2:8000+server.cgi").await;
        assert_eq!(lines, vec!["WELCOME", "1.1.1.1:8000/server.cgi"]);
        assert_eq!(peers.len().await, 2);

        let (_, lines) = get_lines(&app, "/server.cgi/node").await;
        assert_eq!(lines.len(), 1);

        let (_, lines) = get_lines(&app, "/server.cgi/bye/1.1.1.1:8000/server.cgi").await;
        assert_eq!(lines, vec!["BYEBYE"]);
        assert!(!peers.contains("1.1.1.1:8000/server.cgi").await);
    }

    #[tokio::test]
    async fn test_join_rejected() {
        let (config, _) = test_config_with(
            RegexList::new(),
            RegexList::from_patterns(["^10\\."]).unwrap(),
        );
        let state = state(config);
        let peers = state.peers.clone();
        let app = router(state);

        let (status, _) = get_lines(&app, "/server.cgi/join/10.0.0.1:8000+server.cgi").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = get_lines(&app, "/server.cgi/join/garbage").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(peers.is_empty().await);
    }
}
