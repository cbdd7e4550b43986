//! HTTP transport for protocol requests

use crate::network::node::NodeError;
use async_trait::async_trait;
use std::time::Duration;

/// Performs a GET and returns the response body split into lines
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_lines(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, NodeError>;
}

/// Transport backed by a shared reqwest client
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_lines(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, NodeError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| NodeError::Network(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| NodeError::Network(e.to_string()))?;

        Ok(body_lines(&body))
    }
}

/// Split a plain-text body into lines, dropping CR line endings
pub fn body_lines(body: &str) -> Vec<String> {
    body.lines().map(|line| line.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_lines() {
        assert_eq!(body_lines("PONG\r\n203.0.113.5\n"), vec!["PONG", "203.0.113.5"]);
        assert!(body_lines("").is_empty());
    }
}
