//! `GET /customer/{uid}` and `GET /customer/{uid}/sessions`.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use health_assist_core::{
    database,
    domain::{Customer, Session},
    error::{Error, Result},
    middleware::Claims,
    state::AppState,
    validation::validate_uuid_path,
};

use super::is_owner_or_admin;

/// Default cap on the session list returned for a customer.
const DEFAULT_SESSION_LIMIT: i64 = 50;

/// Fetch a customer profile. Self-or-admin: the caller must either be the
/// customer named by `uid` or hold the administrative role.
pub async fn get_customer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uid): Path<String>,
) -> Result<Json<Customer>> {
    let customer_id = validate_uuid_path("customer_id", &uid).map_err(|f| Error::BadRequest(f.message))?;

    if !is_owner_or_admin(&claims, customer_id) {
        return Err(Error::Forbidden("customer profile does not belong to the caller".to_string()));
    }

    let pool = state.db().await.ok_or_else(|| Error::Internal("database pool unavailable".to_string()))?;
    let customer = database::get_customer(&pool, customer_id)
        .await?
        .ok_or_else(|| Error::NotFound("customer not found".to_string()))?;

    Ok(Json(customer))
}

/// List a customer's sessions, most recent first.
pub async fn get_customer_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uid): Path<String>,
) -> Result<Json<Vec<Session>>> {
    let customer_id = validate_uuid_path("customer_id", &uid).map_err(|f| Error::BadRequest(f.message))?;

    if !is_owner_or_admin(&claims, customer_id) {
        return Err(Error::Forbidden("customer sessions do not belong to the caller".to_string()));
    }

    let pool = state.db().await.ok_or_else(|| Error::Internal("database pool unavailable".to_string()))?;
    let sessions = database::get_customer_sessions(&pool, customer_id, DEFAULT_SESSION_LIMIT).await?;

    Ok(Json(sessions))
}
