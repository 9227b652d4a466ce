use std::convert::Infallible;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use ulid::Ulid;

use super::{AppResult, AppState};

/// Server-sent feed of every event committed against one opportunity.
/// Each SSE event is named after the event kind and carries it as JSON.
pub async fn stream(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> AppResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let Path(opportunity_id) = id?;
    state.engine.get_opportunity(opportunity_id).await?;
    let rx = state.engine.notify.subscribe(opportunity_id);

    let events = futures::stream::unfold(rx, move |mut rx| async move {
        let sse = match rx.recv().await {
            Ok(event) => SseEvent::default()
                .event(event.kind())
                .json_data(&event)
                .unwrap_or_else(|e| SseEvent::default().comment(format!("encode error: {e}"))),
            Err(RecvError::Lagged(skipped)) => {
                warn!(%opportunity_id, skipped, "event subscriber lagged");
                SseEvent::default().event("lagged").data(skipped.to_string())
            }
            Err(RecvError::Closed) => return None,
        };
        Some((Ok::<_, Infallible>(sse), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
