//! Relay maintenance for nodes behind NAT
//!
//! One task per process keeps trying to hold a relay tunnel open:
//! - sample every known peer, skipping ones that already failed
//! - on success, stay relayed until the tunnel closes, then start over
//!   right away
//! - if a whole pass fails, idle for the retry interval before resampling

use crate::config::DEFAULT_RELAY_RETRY_INTERVAL;
use crate::network::myself::Myself;
use crate::network::peer_set::PeerSampler;
use crate::network::slice::Slice;
use crate::network::tunnel::{RelayConnector, RequestHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives `Myself` between port0 and relayed
pub struct RelayMaintainer {
    myself: Arc<Myself>,
    peers: Arc<dyn PeerSampler>,
    connector: Arc<dyn RelayConnector>,
    handler: Arc<dyn RequestHandler>,
    retry_interval: Duration,
}

impl RelayMaintainer {
    pub fn new(
        myself: Arc<Myself>,
        peers: Arc<dyn PeerSampler>,
        connector: Arc<dyn RelayConnector>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            myself,
            peers,
            connector,
            handler,
            retry_interval: DEFAULT_RELAY_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Run on the tokio runtime until the returned task is cancelled
    pub fn spawn(self) -> RelayTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { self.run(token).await });
        RelayTask { cancel, handle }
    }

    /// Loop passes until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        log::info!("Relay maintenance started");

        loop {
            let relayed = tokio::select! {
                _ = cancel.cancelled() => break,
                relayed = self.run_pass() => relayed,
            };

            if !relayed {
                log::info!(
                    "No relay available, retrying in {}s",
                    self.retry_interval.as_secs()
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_interval) => {}
                }
            }
        }

        self.myself.detach_relay().await;
        log::info!("Relay maintenance stopped");
    }

    /// One sampling pass. Returns true if a tunnel was held (and has since
    /// closed), false if no candidate worked.
    pub async fn run_pass(&self) -> bool {
        let candidates = self.peers.random(&Slice::new(), 0).await;
        log::debug!("Relay pass over {} candidates", candidates.len());

        for node in &candidates {
            if node.cannot_relay() {
                continue;
            }

            let origin = self.myself.origin().await;
            let url = format!("ws://{}/request_relay/", node.nodestr());
            let mut tunnel = match self
                .connector
                .open(&url, &origin, Arc::clone(&self.handler))
                .await
            {
                Ok(tunnel) => tunnel,
                Err(e) => {
                    log::warn!("Cannot relay through {}: {}", node, e);
                    node.mark_cannot_relay();
                    continue;
                }
            };

            if !self.myself.attach_relay(Arc::clone(node)).await {
                return false;
            }
            tunnel.closed().await;
            log::info!("Relay tunnel through {} closed", node);
            self.myself.detach_relay().await;
            return true;
        }

        false
    }
}

/// Handle to the running relay task
#[derive(Debug)]
pub struct RelayTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RelayTask {
    /// Stop the task and wait for it to finish
    pub async fn cancel(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            log::warn!("Relay task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::myself::NatState;
    use crate::network::node::{Node, NodeConfig, NodeError};
    use crate::network::peer_set::PeerSet;
    use crate::network::testutil::test_config;
    use crate::network::tunnel::{RelayRequest, RelayResponse, Tunnel};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    struct NoopHandler;

    #[async_trait]
    impl RequestHandler for NoopHandler {
        async fn serve(&self, request: RelayRequest) -> RelayResponse {
            RelayResponse::error(request.id, 404, "")
        }
    }

    /// Counts sampling passes
    struct CountingSampler {
        inner: PeerSet,
        passes: AtomicUsize,
    }

    #[async_trait]
    impl PeerSampler for CountingSampler {
        async fn random(&self, exclude: &Slice, max: usize) -> Slice {
            self.passes.fetch_add(1, Ordering::SeqCst);
            self.inner.random(exclude, max).await
        }
    }

    /// Accepts tunnels to `accept`; each accepted tunnel's close trigger is
    /// handed to the test through `closers`.
    #[derive(Default)]
    struct FakeConnector {
        accept: HashSet<String>,
        attempts: Mutex<Vec<(String, Instant)>>,
        closers: Mutex<Vec<oneshot::Sender<()>>>,
    }

    impl FakeConnector {
        fn attempts(&self) -> Vec<(String, Instant)> {
            self.attempts.lock().unwrap().clone()
        }

        fn close_tunnel(&self) {
            if let Some(tx) = self.closers.lock().unwrap().pop() {
                let _ = tx.send(());
            }
        }
    }

    #[async_trait]
    impl RelayConnector for FakeConnector {
        async fn open(
            &self,
            url: &str,
            _origin: &str,
            _handler: Arc<dyn RequestHandler>,
        ) -> Result<Tunnel, NodeError> {
            self.attempts
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));
            if !self.accept.contains(url) {
                return Err(NodeError::Network(format!("{} refused", url)));
            }
            let (tx, rx) = oneshot::channel();
            self.closers.lock().unwrap().push(tx);
            Ok(Tunnel::new(rx))
        }
    }

    async fn sampler(config: &Arc<NodeConfig>, nodestrs: &[&str]) -> Arc<CountingSampler> {
        let inner = PeerSet::new();
        for nodestr in nodestrs {
            inner
                .add(Arc::new(Node::new(nodestr, config).unwrap()))
                .await;
        }
        Arc::new(CountingSampler {
            inner,
            passes: AtomicUsize::new(0),
        })
    }

    /// Let spawned tasks run without advancing the paused clock
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_backs_off() {
        let (config, _) = test_config();
        config.myself.set_port0(true).await;
        let peers = sampler(
            &config,
            &["1.1.1.1:8000/server.cgi", "2.2.2.2:8000/server.cgi"],
        )
        .await;
        let connector = Arc::new(FakeConnector::default());

        let task = config.myself.try_relay(
            peers.clone(),
            connector.clone(),
            Arc::new(NoopHandler),
            Duration::from_secs(600),
        );
        settle().await;

        // both candidates tried once, then marked and left alone
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(peers.passes.load(Ordering::SeqCst), 1);
        for node in peers.inner.nodes().await.iter() {
            assert!(node.cannot_relay());
        }

        tokio::time::advance(Duration::from_secs(599)).await;
        settle().await;
        assert_eq!(peers.passes.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(peers.passes.load(Ordering::SeqCst), 2);
        // sticky: no new attempts against marked peers
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(config.myself.state().await, NatState::Port0Undiscovered);

        task.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_tunnel_resamples_immediately() {
        let (config, _) = test_config();
        config.myself.set_port0(true).await;
        let peers = sampler(&config, &["1.1.1.1:8000/server.cgi"]).await;
        let connector = Arc::new(FakeConnector {
            accept: ["ws://1.1.1.1:8000/server.cgi/request_relay/".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        });

        let task = config.myself.try_relay(
            peers.clone(),
            connector.clone(),
            Arc::new(NoopHandler),
            Duration::from_secs(600),
        );
        settle().await;

        assert_eq!(config.myself.state().await, NatState::Relayed);
        assert_eq!(
            config.myself.relay_server().await.as_deref(),
            Some("1.1.1.1:8000/server.cgi")
        );

        let start = Instant::now();
        connector.close_tunnel();
        settle().await;

        // reconnected on a fresh pass without waiting
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].1, start);
        assert_eq!(peers.passes.load(Ordering::SeqCst), 2);
        assert_eq!(config.myself.state().await, NatState::Relayed);

        task.cancel().await;
        assert_eq!(config.myself.state().await, NatState::Port0Undiscovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_candidate_then_success() {
        let (config, _) = test_config();
        config.myself.set_port0(true).await;
        config.myself.set_ip("203.0.113.5").await;
        let peers = sampler(
            &config,
            &["1.1.1.1:8000/server.cgi", "2.2.2.2:8000/server.cgi"],
        )
        .await;
        let connector = Arc::new(FakeConnector {
            accept: ["ws://2.2.2.2:8000/server.cgi/request_relay/".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        });
        let maintainer = RelayMaintainer::new(
            config.myself.clone(),
            peers.clone(),
            connector.clone(),
            Arc::new(NoopHandler),
        );

        let pass = tokio::spawn(async move { maintainer.run_pass().await });
        settle().await;
        assert_eq!(
            config.myself.relay_server().await.as_deref(),
            Some("2.2.2.2:8000/server.cgi")
        );
        assert_eq!(
            config.myself.nodestr().await.unwrap(),
            "2.2.2.2:8000/server.cgi/relay/203.0.113.5:8000/server.cgi"
        );

        connector.close_tunnel();
        assert!(pass.await.unwrap());
        assert!(!config.myself.is_relayed().await);

        let marked: Vec<String> = peers
            .inner
            .nodes()
            .await
            .iter()
            .filter(|n| n.cannot_relay())
            .map(|n| n.nodestr().to_string())
            .collect();
        // only 1.1.1.1 can have failed; it may not have been tried if
        // 2.2.2.2 came first in the shuffle
        assert!(marked.len() <= 1);
        assert!(!marked.contains(&"2.2.2.2:8000/server.cgi".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_idle() {
        let (config, _) = test_config();
        config.myself.set_port0(true).await;
        let peers = sampler(&config, &[]).await;

        let task = config.myself.try_relay(
            peers,
            Arc::new(FakeConnector::default()),
            Arc::new(NoopHandler),
            Duration::from_secs(600),
        );
        settle().await;
        assert!(!task.is_finished());

        task.cancel().await;
    }
}
