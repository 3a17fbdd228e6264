pub mod cache_admin;
pub mod chat;
pub mod customer;
pub mod session;

/// Resolve the caller's own customer id from the bearer token's subject.
///
/// Tokens issued for end users carry a `user:<uuid>` subject (see
/// [`health_assist_core::middleware::Claims::user_id`]); anything else (a
/// client-credentials token, a malformed subject) cannot be resolved to a
/// customer and is rejected rather than guessed at.
pub(crate) fn subject_customer_id(claims: &health_assist_core::middleware::Claims) -> Result<uuid::Uuid, health_assist_core::error::Error> {
    let raw = claims
        .user_id()
        .ok_or_else(|| health_assist_core::error::Error::Unauthorized("token subject is not a user".to_string()))?;
    uuid::Uuid::parse_str(raw)
        .map_err(|_| health_assist_core::error::Error::Unauthorized("token subject is not a valid customer id".to_string()))
}

/// `true` if the caller may act on behalf of `owner_id`: either they are the
/// owner themselves, or they hold the administrative role.
pub(crate) fn is_owner_or_admin(claims: &health_assist_core::middleware::Claims, owner_id: uuid::Uuid) -> bool {
    if claims.has_role("admin") {
        return true;
    }
    let owner = owner_id.to_string();
    claims.user_id() == Some(owner.as_str())
}
