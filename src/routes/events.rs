use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::auth::extractor::AdminAuth;
use crate::state::SharedState;

/// GET /api/v1/queue/events - live queue events as server-sent events.
pub async fn stream(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let rx = state.service.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event.as_str()).data(data)))
        }
        Err(e) => {
            tracing::debug!("Event subscriber lagged: {e}");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
