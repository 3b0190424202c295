//! Server-Sent Events (SSE) broadcaster
//!
//! Streams job progress and status events to connected clients.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use lektor_common::events::LektorEvent;

use crate::api::server::AppContext;

/// GET /events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected");

    // Snapshot of every job first, then the live feed.
    let initial = match ctx.store.list_snapshots().await {
        Ok(jobs) => Some(LektorEvent::InitialState {
            jobs,
            timestamp: Utc::now(),
        }),
        Err(e) => {
            warn!("failed to build initial SSE state: {e}");
            None
        }
    };

    let rx = ctx.events.subscribe();
    let live = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => encode_event(&event),
            Err(e) => {
                // BroadcastStream error (lagged or closed)
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    let stream = futures::stream::iter(initial.iter().filter_map(encode_event).collect::<Vec<_>>())
        .chain(live);

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn encode_event(event: &LektorEvent) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Ok(Event::default().event(event_type_str(event)).data(json))),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

/// Extract event type string from LektorEvent
fn event_type_str(event: &LektorEvent) -> &'static str {
    match event {
        LektorEvent::JobStatusChanged { .. } => "JobStatusChanged",
        LektorEvent::JobProgress { .. } => "JobProgress",
        LektorEvent::InitialState { .. } => "InitialState",
        LektorEvent::WorkerPoolResized { .. } => "WorkerPoolResized",
    }
}
