//! Typed HTTP client for one backend instance.

use std::time::Duration;

use anyhow::Context;
use log::debug;

use squadron_protocol::{
    AbortResponse, CommandRequest, CreateSessionRequest, CreateSessionResponse, PromptRequest,
    ServerInfo, ShellRequest,
};

use crate::error::{Error, Result};

/// Deadline for liveness probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default deadline for short calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for prompt dispatch. The turn itself is tracked via SSE; this
/// only bounds the synchronous acknowledgment.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(600);

/// Client for a squad's backend.
#[derive(Debug, Clone)]
pub struct OpencodeClient {
    base_url: String,
    http: reqwest::Client,
}

impl OpencodeClient {
    /// Build a client against a base URL like `http://127.0.0.1:41901`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building backend HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// SSE stream URL for a backend session.
    pub fn stream_url(&self, backend_session_id: &str) -> String {
        format!("{}/session/{}/stream", self.base_url, backend_session_id)
    }

    /// `GET /info`: server identity. Fails with `backend_unavailable` when
    /// the process is not reachable.
    pub async fn info(&self) -> Result<ServerInfo> {
        let url = format!("{}/info", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("connecting to {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::BackendUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::BackendProtocol(format!("decoding /info: {}", e)))
    }

    /// Lightweight liveness probe: `HEAD /info` with a 2 s deadline.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/info", self.base_url);
        self.http
            .head(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|res| res.status().is_success())
            .unwrap_or(false)
    }

    /// `POST /session`: create a backend session, returning its id.
    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse> {
        let url = format!("{}/session", self.base_url);
        debug!("Creating backend session at {}", url);
        self.post_json(&url, request, REQUEST_TIMEOUT).await
    }

    /// `POST /session/{id}/prompt`: dispatch a turn.
    pub async fn prompt(&self, backend_session_id: &str, request: &PromptRequest) -> Result<()> {
        let url = format!("{}/session/{}/prompt", self.base_url, backend_session_id);
        let _: serde_json::Value = self.post_json(&url, request, PROMPT_TIMEOUT).await?;
        Ok(())
    }

    /// `POST /session/{id}/command`: dispatch a slash command.
    pub async fn command(&self, backend_session_id: &str, request: &CommandRequest) -> Result<()> {
        let url = format!("{}/session/{}/command", self.base_url, backend_session_id);
        let _: serde_json::Value = self.post_json(&url, request, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// `POST /session/{id}/shell`: one-shot shell invocation.
    pub async fn shell(&self, backend_session_id: &str, request: &ShellRequest) -> Result<()> {
        let url = format!("{}/session/{}/shell", self.base_url, backend_session_id);
        let _: serde_json::Value = self.post_json(&url, request, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// `POST /mcp/reload`: ask the backend to re-read its MCP config file.
    pub async fn reload_mcp(&self) -> Result<()> {
        let url = format!("{}/mcp/reload", self.base_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("calling {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::BackendProtocol(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    /// `POST /session/{id}/abort`: stop the current turn.
    pub async fn abort(&self, backend_session_id: &str) -> Result<AbortResponse> {
        let url = format!("{}/session/{}/abort", self.base_url, backend_session_id);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("aborting via {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::BackendProtocol(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        // Some backends answer an empty body; treat it as not-aborted.
        Ok(response.json().await.unwrap_or_default())
    }

    async fn post_json<B, T>(&self, url: &str, body: &B, timeout: Duration) -> Result<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{} timed out", url))
                } else {
                    Error::BackendUnavailable(format!("calling {}: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BackendProtocol(format!(
                "{} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::BackendProtocol(format!("decoding response from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = OpencodeClient::new("http://127.0.0.1:41901/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:41901");
        assert_eq!(
            client.stream_url("ses_1"),
            "http://127.0.0.1:41901/session/ses_1/stream"
        );
    }

    #[tokio::test]
    async fn test_info_unreachable_is_backend_unavailable() {
        // Port 9 (discard) is a safe nothing-listening target.
        let client = OpencodeClient::new("http://127.0.0.1:9").unwrap();
        let err = client.info().await.unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
        assert!(!client.ping().await);
    }
}
