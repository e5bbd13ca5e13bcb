//! In-process event bus.
//!
//! Single-writer / many-reader fan-out over one broadcast channel. Every
//! published event carries project, session and agent keys; subscribers
//! apply a [`SubscriptionFilter`] on their side. Publishing never blocks:
//! a subscriber that falls behind the channel capacity loses its oldest
//! entries (`Lagged`) instead of slowing the publisher down, and filtered
//! streams silently resume after a lag gap.

use futures::Stream;
use log::debug;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::events::EventRecord;

/// Buffer capacity: ~a few seconds of burst during fast part streaming.
const EVENT_BUFFER_SIZE: usize = 1024;

/// Subscriber-side event filter.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
}

impl SubscriptionFilter {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    /// Every set key must match; unset keys match anything.
    pub fn matches(&self, event: &EventRecord) -> bool {
        if let Some(ref project_id) = self.project_id {
            if event.project_id != *project_id {
                return false;
            }
        }
        if let Some(ref session_id) = self.session_id {
            if event.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        if let Some(ref agent_id) = self.agent_id {
            if event.agent_id.as_deref() != Some(agent_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn publish(&self, event: EventRecord) {
        let _ = self.tx.send(event);
    }

    /// Raw subscription to every event.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    /// Filtered subscription as a stream. Lag gaps are logged and skipped;
    /// delivery order within a session is preserved per subscriber.
    pub fn subscribe_filtered(
        &self,
        filter: SubscriptionFilter,
    ) -> impl Stream<Item = EventRecord> + Send + 'static {
        let rx = self.tx.subscribe();
        BroadcastStream::new(rx).filter_map(move |result| match result {
            Ok(event) => filter.matches(&event).then_some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!("event bus subscriber lagged, dropped {} events", skipped);
                None
            }
        })
    }

    /// Number of live subscribers (for diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::kind;
    use serde_json::json;

    #[tokio::test]
    async fn test_filtered_subscription_sees_matching_events() {
        let bus = EventBus::new();
        let mut stream =
            Box::pin(bus.subscribe_filtered(SubscriptionFilter::session("s1")));

        bus.publish(EventRecord::new(kind::SESSION_IDLE, "p1", json!({})).with_session("s1"));
        bus.publish(EventRecord::new(kind::SESSION_IDLE, "p1", json!({})).with_session("s2"));
        bus.publish(
            EventRecord::new(kind::MESSAGE_UPDATED, "p1", json!({})).with_session("s1"),
        );

        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, "session:idle");
        let second = stream.next().await.unwrap();
        assert_eq!(second.kind, "message:updated");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(EventRecord::new(kind::SYSTEM_CONNECTED, "p1", json!({})));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_project_filter() {
        let bus = EventBus::new();
        let mut stream =
            Box::pin(bus.subscribe_filtered(SubscriptionFilter::project("p2")));

        bus.publish(EventRecord::new(kind::NODE_DISCOVERED, "p1", json!({})));
        bus.publish(EventRecord::new(kind::NODE_DISCOVERED, "p2", json!({})));

        let only = stream.next().await.unwrap();
        assert_eq!(only.project_id, "p2");
    }
}
