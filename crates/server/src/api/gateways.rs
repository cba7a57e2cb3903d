//! Direct gateway access: single completions and SSE streaming.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::future;
use futures::stream::{once, Stream, StreamExt};

use brandlens_core::{ChatRequest, ChatResponse};

use super::error::ApiError;
use crate::state::AppState;

/// SSE field values may not carry carriage returns.
fn strip_cr(text: &str) -> String {
    text.replace('\r', "")
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let gateway = state.registry().resolve(&backend, state.credentials())?;
    let response = gateway.chat_completion(request).await?;
    Ok(Json(response))
}

/// Stream a completion as SSE `data:` events, then `event: done`.
///
/// Errors before the first byte map to an HTTP status. An error mid-stream is
/// sent as an `event: error` and no further chunks follow it.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let gateway = state.registry().resolve(&backend, state.credentials())?;
    let chunks = gateway.chat_completion_stream(request).await?;

    let events = chunks
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            let event = match item {
                Ok(text) => Event::default().data(strip_cr(&text)),
                Err(e) => {
                    *failed = true;
                    tracing::warn!(backend = e.backend(), error = %e, "Stream aborted");
                    Event::default().event("error").data(strip_cr(&e.to_string()))
                }
            };
            future::ready(Some(Ok::<_, Infallible>(event)))
        })
        .chain(once(async {
            Ok::<_, Infallible>(Event::default().event("done").data("[DONE]"))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
