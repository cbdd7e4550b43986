//! Fakes shared by the network tests

use crate::config::RegexList;
use crate::network::myself::Myself;
use crate::network::node::{NodeConfig, NodeError};
use crate::network::transport::Transport;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

/// Answers any URL containing a registered key with canned lines.
/// Unknown URLs fail with a network error.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<Vec<(String, Vec<String>)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeTransport {
    pub fn respond(&self, key: &str, lines: &[&str]) {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        let mut responses = self.responses.lock().unwrap();
        responses.retain(|(k, _)| k != key);
        responses.push((key.to_string(), lines));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_lines(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, NodeError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            user_agent: user_agent.to_string(),
            timeout,
        });

        self.responses
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| url.contains(key.as_str()))
            .map(|(_, lines)| lines.clone())
            .ok_or_else(|| NodeError::Network(format!("connection refused: {}", url)))
    }
}

pub fn test_config() -> (Arc<NodeConfig>, Arc<FakeTransport>) {
    test_config_with(RegexList::new(), RegexList::new())
}

pub fn test_config_with(
    node_allow: RegexList,
    node_deny: RegexList,
) -> (Arc<NodeConfig>, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::default());
    let myself = Arc::new(Myself::new(8000, "/server.cgi", ""));
    let config = NodeConfig::new(myself, node_allow, node_deny, transport.clone());
    (Arc::new(config), transport)
}
