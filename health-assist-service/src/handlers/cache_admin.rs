//! `GET /cache/stats` and `POST /cache/invalidate`, administrative surface
//! for inspecting and evicting the two-tier cache substrate.

use axum::{extract::State, Extension, Json};
use health_assist_core::{
    cache::{CacheFamily, CacheKey, CacheStats},
    error::{Error, Result},
    middleware::Claims,
    state::AppState,
};
use serde::{Deserialize, Serialize};

fn require_admin(claims: &Claims) -> Result<()> {
    if claims.has_role("admin") {
        Ok(())
    } else {
        Err(Error::Forbidden("administrative role required".to_string()))
    }
}

pub async fn cache_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<CacheStats>> {
    require_admin(&claims)?;
    Ok(Json(state.cache().stats()))
}

#[derive(Deserialize)]
pub struct InvalidateRequest {
    /// Evict the whole substrate rather than a single family/subject pair.
    #[serde(default)]
    all: bool,
    /// One of the `CacheFamily::as_str()` names (`customer`, `sessions`,
    /// `session_messages`, `session_full`, `user_info`, `ip_check`).
    family: Option<String>,
    subject: Option<String>,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    evicted: usize,
}

fn parse_family(name: &str) -> Result<CacheFamily> {
    let family = match name {
        "chat:response" => CacheFamily::ChatResponse,
        "user_info" => CacheFamily::UserInfo,
        "sessions" => CacheFamily::Sessions,
        "session_messages" => CacheFamily::SessionMessages,
        "session_full" => CacheFamily::SessionFull,
        "customer" => CacheFamily::Customer,
        "ip_check" => CacheFamily::IpCheck,
        other => return Err(Error::BadRequest(format!("unknown cache family '{}'", other))),
    };
    Ok(family)
}

pub async fn cache_invalidate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    require_admin(&claims)?;
    let redis = state.redis().await;

    if request.all {
        let evicted = state.cache().invalidate_all(redis.as_ref()).await;
        return Ok(Json(InvalidateResponse { evicted }));
    }

    let family = request
        .family
        .as_deref()
        .ok_or_else(|| Error::BadRequest("family is required unless all=true".to_string()))
        .and_then(parse_family)?;
    let subject = request
        .subject
        .ok_or_else(|| Error::BadRequest("subject is required unless all=true".to_string()))?;

    let pattern = CacheKey::prefix_pattern(family, &subject);
    let evicted = state.cache().invalidate(redis.as_ref(), &pattern).await;

    Ok(Json(InvalidateResponse { evicted }))
}
