//! Request-scoped user identity (spec.md §1 Non-goals: OAuth login and
//! session-cookie handling are external collaborators). This extractor
//! assumes an upstream auth layer (out of scope here) has already
//! validated the caller and attached their identity to the request as an
//! `X-User-Id` header; it never itself issues, verifies, or refreshes a
//! login session.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use drivescout_core::error::Error;
use uuid::Uuid;

pub struct AuthUser(pub Uuid);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-user-id")
            .ok_or_else(|| Error::Auth("missing X-User-Id header".to_string()))?;
        let raw = header.to_str().map_err(|_| Error::Auth("invalid X-User-Id header".to_string()))?;
        let id = Uuid::parse_str(raw).map_err(|_| Error::Auth("invalid X-User-Id header".to_string()))?;
        Ok(AuthUser(id))
    }
}
