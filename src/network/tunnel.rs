//! Relay tunnel client
//!
//! A node behind NAT opens a WebSocket to a peer's `/request_relay/`
//! endpoint. The peer then forwards inbound HTTP requests over the socket
//! as JSON text frames, and we answer each one with a JSON response frame.

use crate::network::node::NodeError;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::Router;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tower::ServiceExt;

/// Largest response body forwarded through a tunnel
pub const MAX_RELAY_BODY: usize = 8 * 1024 * 1024;

/// An HTTP request forwarded by the relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub id: u64,
    pub method: String,
    /// Path and query
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

/// Our answer to a `RelayRequest`. Bodies are UTF-8 text; a handler
/// reply that is not is answered with a 502 instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub id: u64,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl RelayResponse {
    pub fn error(id: u64, status: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            headers: Vec::new(),
            body: message.into(),
        }
    }
}

/// Serves requests arriving through a relay tunnel
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn serve(&self, request: RelayRequest) -> RelayResponse;
}

#[async_trait]
impl RequestHandler for Router {
    async fn serve(&self, request: RelayRequest) -> RelayResponse {
        let id = request.id;

        let mut builder = Request::builder()
            .method(request.method.as_str())
            .uri(request.path.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_request = match builder.body(Body::from(request.body)) {
            Ok(r) => r,
            Err(e) => return RelayResponse::error(id, 400, e.to_string()),
        };

        let response = match self.clone().oneshot(http_request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let (parts, body) = response.into_parts();
        let body = match axum::body::to_bytes(body, MAX_RELAY_BODY).await {
            Ok(body) => body,
            Err(e) => return RelayResponse::error(id, 500, e.to_string()),
        };

        let body = match String::from_utf8(body.to_vec()) {
            Ok(body) => body,
            Err(_) => {
                log::warn!("Relayed {} produced a non-text body", request.path);
                return RelayResponse::error(id, 502, "response body is not UTF-8 text");
            }
        };

        RelayResponse {
            id,
            status: parts.status.as_u16(),
            headers: parts
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.to_string(), v.to_string()))
                })
                .collect(),
            body,
        }
    }
}

/// An open tunnel. Dropping it tears the tunnel down.
pub struct Tunnel {
    closed: oneshot::Receiver<()>,
    task: Option<AbortHandle>,
}

impl Tunnel {
    /// A tunnel that reports closure when `closed` fires or its sender drops
    pub fn new(closed: oneshot::Receiver<()>) -> Self {
        Self { closed, task: None }
    }

    /// Abort `task` when the tunnel is dropped
    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.task = Some(task);
        self
    }

    /// Wait until the tunnel closes
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Opens relay tunnels
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(
        &self,
        url: &str,
        origin: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Tunnel, NodeError>;
}

/// WebSocket tunnel connector
#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    connect_timeout: Duration,
}

impl WsRelayConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    async fn open(
        &self,
        url: &str,
        origin: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Tunnel, NodeError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| NodeError::Network(e.to_string()))?;
        let origin = HeaderValue::from_str(origin)
            .map_err(|e| NodeError::Network(format!("bad origin {:?}: {}", origin, e)))?;
        request.headers_mut().insert("Origin", origin);

        let (ws, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| NodeError::Network(format!("{} timed out", url)))?
        .map_err(|e| NodeError::Network(format!("{}: {}", url, e)))?;

        log::info!("Relay tunnel to {} open", url);

        let (closed_tx, closed_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            serve_tunnel(ws, handler).await;
            let _ = closed_tx.send(());
        });

        Ok(Tunnel::new(closed_rx).with_task(task.abort_handle()))
    }
}

/// Answer relayed requests until the socket closes
pub async fn serve_tunnel<S>(ws: WebSocketStream<S>, handler: Arc<dyn RequestHandler>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut writer, mut reader) = ws.split();

    let (tx, mut rx) = mpsc::channel::<Message>(100);
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.send(msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                let request: RelayRequest = match serde_json::from_str(text.as_str()) {
                    Ok(request) => request,
                    Err(e) => {
                        log::warn!("Malformed relay request: {}", e);
                        continue;
                    }
                };
                log::debug!("Relayed {} {}", request.method, request.path);

                let handler = Arc::clone(&handler);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handler.serve(request).await;
                    match serde_json::to_string(&response) {
                        Ok(json) => {
                            let _ = tx.send(Message::text(json)).await;
                        }
                        Err(e) => log::warn!("Cannot encode relay response: {}", e),
                    }
                });
            }
            Some(Ok(Message::Close(_))) | None => {
                log::info!("Relay tunnel closed");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("Relay tunnel error: {}", e);
                break;
            }
        }
    }

    write_handle.abort();
}
