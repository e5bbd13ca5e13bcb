//! SSE subscription to a backend session, with automatic reconnection.
//!
//! The stream runs until cancelled. Connection drops reconnect with
//! jittered exponential backoff; reconnects resume from the last received
//! SSE id when the backend provided one. Records whose data is not valid
//! JSON are logged and skipped -- they never abort the stream.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest_eventsource::{Event, EventSource};
use tokio_util::sync::CancellationToken;

use squadron_protocol::BackendEvent;

/// Reconnect backoff bounds.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// A resilient subscription to one backend session's event stream.
pub struct SessionEventStream {
    url: String,
    config: StreamConfig,
    last_event_id: Option<String>,
}

impl SessionEventStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: StreamConfig::default(),
            last_event_id: None,
        }
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Consume the stream, invoking `on_event` for each parsed record.
    /// Returns when `shutdown` fires.
    pub async fn run<F>(mut self, shutdown: CancellationToken, mut on_event: F)
    where
        F: FnMut(BackendEvent) + Send,
    {
        let mut attempt = 0u32;

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                debug!(
                    "Reconnecting to {} in {:?} (attempt {})",
                    self.url, delay, attempt
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.connect_and_read(&shutdown, &mut on_event).await {
                Ok(true) => return, // cancelled
                Ok(false) => {
                    // Stream ended; reconnect from scratch.
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "SSE connection to {} failed (attempt {}): {:#}",
                        self.url, attempt, e
                    );
                }
            }
        }
    }

    /// Read one connection to exhaustion. Returns Ok(true) on cancellation,
    /// Ok(false) when the server closed the stream.
    async fn connect_and_read<F>(
        &mut self,
        shutdown: &CancellationToken,
        on_event: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(BackendEvent) + Send,
    {
        let client = reqwest::Client::new();
        let mut request = client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        if let Some(ref id) = self.last_event_id {
            request = request.header("Last-Event-ID", id.clone());
        }

        let mut source = EventSource::new(request).context("opening event source")?;
        info!("Connected to backend stream at {}", self.url);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    source.close();
                    return Ok(true);
                }
                next = source.next() => {
                    match next {
                        Some(Ok(Event::Open)) => {
                            debug!("SSE stream open: {}", self.url);
                        }
                        Some(Ok(Event::Message(msg))) => {
                            if !msg.id.is_empty() {
                                self.last_event_id = Some(msg.id.clone());
                            }
                            match serde_json::from_str(&msg.data) {
                                Ok(data) => on_event(BackendEvent::new(msg.event.clone(), data)),
                                Err(e) => {
                                    warn!(
                                        "Skipping malformed SSE payload on {} (event '{}'): {}",
                                        self.url, msg.event, e
                                    );
                                }
                            }
                        }
                        Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                            return Ok(false);
                        }
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("stream error: {:?}", e));
                        }
                        None => return Ok(false),
                    }
                }
            }
        }
    }

    /// Exponential backoff with up to 20% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_backoff.as_millis() as f64;
        let exp = 2.0_f64.powi(attempt.min(8) as i32);
        let delay = (base * exp) as u64;
        let jitter = (delay as f64 * 0.2 * rand::random::<f64>()) as u64;
        Duration::from_millis((delay + jitter).min(self.config.max_backoff.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_bounded() {
        let stream = SessionEventStream::new("http://127.0.0.1:9/session/x/stream");
        for attempt in 1..32 {
            let delay = stream.backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(250));
            assert!(delay <= Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let stream = SessionEventStream::new("http://127.0.0.1:9/session/x/stream");
        let token = CancellationToken::new();
        token.cancel();
        // Pre-cancelled token returns immediately instead of retrying a
        // dead endpoint.
        stream.run(token, |_| {}).await;
    }
}
