//! `POST /chat` and `POST /chat/stream`.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::stream;
use health_assist_core::{
    domain::{ChatRequest, ChatResponse},
    error::{Error, Result},
    middleware::Claims,
    orchestrator,
    sse::SseEventExt,
    state::AppState,
    validation,
};
use http::header;
use std::convert::Infallible;

use super::subject_customer_id;

/// Reject empty/oversized/SQL-pattern-bearing text before the request
/// reaches the orchestrator: this is a boundary validation failure (400),
/// not the orchestrator's concern.
fn validate_request_text(request: &ChatRequest) -> Result<()> {
    validation::validate_chat_text(&request.text).map_err(|f| Error::BadRequest(f.message))?;
    Ok(())
}

/// Unary chat turn: runs the full pipeline and returns the finished answer.
pub async fn chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    validate_request_text(&request)?;
    let customer_id = subject_customer_id(&claims)?;
    let response = orchestrator::run_chat(&state, &claims.sub, customer_id, request).await?;
    Ok(Json(response))
}

/// Streaming chat turn: the same pipeline, surfaced as `chunk` / `translated`
/// / `done` server-sent events rather than a single JSON body. The pipeline
/// still runs to completion before the first event is written; streaming
/// here describes the wire framing of an already-computed answer, not
/// incremental generation from the language model.
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    validate_request_text(&request)?;
    let customer_id = subject_customer_id(&claims)?;
    let events = orchestrator::run_chat_stream(&state, &claims.sub, customer_id, request).await?;

    let encoded: Vec<std::result::Result<Event, Infallible>> = events
        .iter()
        .map(|event| Ok(Event::json(event).unwrap_or_else(|_| Event::default().data("{}"))))
        .collect();

    let sse = Sse::new(stream::iter(encoded)).keep_alive(KeepAlive::default());

    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().expect("static header value"));
    headers.insert(header::CONNECTION, "keep-alive".parse().expect("static header value"));
    headers.insert("x-accel-buffering", "no".parse().expect("static header value"));

    Ok(response)
}
