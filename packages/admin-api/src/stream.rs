//! Push updates for the admin UI: the active-jobs snapshot over SSE.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::Stream;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::routes::AppState;

const PUSH_INTERVAL: Duration = Duration::from_secs(2);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Emits the full active-jobs snapshot every two seconds. Serialization
/// failures become an `error` event followed by a backoff, so a bad snapshot
/// degrades the stream instead of killing it.
pub async fn jobs_stream(State(state): State<AppState>) -> impl IntoResponse {
    let stream = make_stream(state);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn make_stream(state: AppState) -> impl Stream<Item = Result<Event, Infallible>> {
    let ticker = IntervalStream::new(tokio::time::interval(PUSH_INTERVAL));

    ticker.then(move |_| {
        let state = state.clone();
        async move {
            let snapshots = state.scheduler.active_jobs(None);
            match serde_json::to_string(&snapshots) {
                Ok(payload) => Ok(Event::default().event("jobs").data(payload)),
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize job snapshots");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    Ok(Event::default()
                        .event("error")
                        .data(format!("{{\"error\":\"{err}\"}}")))
                }
            }
        }
    })
}
