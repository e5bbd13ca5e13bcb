//! SSE fan-out of the event bus to UI subscribers.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use log::debug;
use serde_json::json;

use crate::bus::SubscriptionFilter;
use crate::events::{kind, EventRecord};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// `GET /projects/{id}/events`: every event for a project.
pub async fn project_events(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;

    Ok(event_stream(
        &state,
        SubscriptionFilter::project(&project_id),
        project_id,
    ))
}

/// `GET /sessions/{id}/events`: one session's stream.
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let session = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {} not found", session_id)))?;

    Ok(event_stream(
        &state,
        SubscriptionFilter::session(&session_id),
        session.project_id,
    ))
}

/// Bridge the bus into an SSE response. The first frame is always
/// `system:connected` so clients can confirm the subscription.
fn event_stream(
    state: &AppState,
    filter: SubscriptionFilter,
    project_id: String,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let connected = EventRecord::new(
        kind::SYSTEM_CONNECTED,
        &project_id,
        json!({"subscribed": true}),
    );

    let live = state.bus.subscribe_filtered(filter);
    let stream = stream::once(async move { connected })
        .chain(live)
        .map(|record| Ok(to_sse_event(&record)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(record: &EventRecord) -> SseEvent {
    let event = SseEvent::default().event(record.kind.clone()).id(&record.id);
    match serde_json::to_string(record) {
        Ok(data) => event.data(data),
        Err(e) => {
            debug!("Failed to serialize event {}: {}", record.id, e);
            event.data("{}")
        }
    }
}
