//! `GET/DELETE /session/{sid}` and `GET /session/{sid}/messages`.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use health_assist_core::{
    database,
    error::{Error, Result},
    middleware::Claims,
    responses::NoContent,
    state::AppState,
    validation::validate_uuid_path,
};
use serde::Serialize;

use super::is_owner_or_admin;

/// Default cap on the message history returned for a session.
const DEFAULT_MESSAGE_LIMIT: i64 = 200;

#[derive(Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    session: health_assist_core::domain::Session,
    messages: Vec<health_assist_core::domain::ChatMessage>,
}

async fn load_owned_session(
    state: &AppState,
    claims: &Claims,
    session_id: &str,
) -> Result<health_assist_core::domain::Session> {
    let session_id = validate_uuid_path("session_id", session_id).map_err(|f| Error::BadRequest(f.message))?;
    let pool = state.db().await.ok_or_else(|| Error::Internal("database pool unavailable".to_string()))?;

    let session = database::get_session(&pool, session_id)
        .await?
        .ok_or_else(|| Error::NotFound("session not found".to_string()))?;

    if !is_owner_or_admin(claims, session.customer_id) {
        return Err(Error::Forbidden("session does not belong to the caller".to_string()));
    }

    Ok(session)
}

/// Full session plus its message history.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let session = load_owned_session(&state, &claims, &session_id).await?;
    let pool = state.db().await.ok_or_else(|| Error::Internal("database pool unavailable".to_string()))?;
    let messages = database::get_session_messages(&pool, session.id, DEFAULT_MESSAGE_LIMIT).await?;

    Ok(Json(SessionResponse { session, messages }))
}

/// Message history alone, without the session envelope.
pub async fn get_session_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<health_assist_core::domain::ChatMessage>>> {
    let session = load_owned_session(&state, &claims, &session_id).await?;
    let pool = state.db().await.ok_or_else(|| Error::Internal("database pool unavailable".to_string()))?;
    let messages = database::get_session_messages(&pool, session.id, DEFAULT_MESSAGE_LIMIT).await?;

    Ok(Json(messages))
}

/// Delete a session and its messages, then evict its cache families.
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse> {
    let session = load_owned_session(&state, &claims, &session_id).await?;
    let pool = state.db().await.ok_or_else(|| Error::Internal("database pool unavailable".to_string()))?;

    database::delete_session(&pool, session.id).await?;
    state
        .cache()
        .invalidate_session_families(state.redis().await.as_ref(), &session.customer_id.to_string(), &session.id.to_string())
        .await;

    Ok(NoContent)
}
