//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Caller identity. Authentication happens upstream; the identity layer forwards the caller as
// `x-user-id` (UUID) and `x-user-role` (`user`, `adjudicator` or `admin`, default `user`).
//--------------------------------------------------------------------------------------------------

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use super::error::ApiError;
use crate::domain::models::types::{Actor, ActorRole};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .ok_or_else(|| ApiError::Unauthorized(format!("{} header is required", USER_ID_HEADER)))?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| ApiError::Unauthorized(format!("{} is not a UUID", USER_ID_HEADER)))?;

        let role = match header(parts, USER_ROLE_HEADER)?.map(str::to_ascii_lowercase).as_deref() {
            None | Some("user") => ActorRole::User,
            Some("adjudicator") => ActorRole::Adjudicator,
            Some("admin") => ActorRole::Admin,
            Some(other) => return Err(ApiError::Unauthorized(format!("unknown role `{}`", other))),
        };

        Ok(Actor { user_id, role })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::Unauthorized(format!("{} is not text", name)))
        })
        .transpose()
}

/// Users read their own data; adjudicators and admins read anyone's.
pub fn ensure_can_read(actor: &Actor, user_id: Uuid) -> Result<(), ApiError> {
    if actor.user_id == user_id || actor.role != ActorRole::User {
        return Ok(());
    }
    Err(ApiError::Forbidden(format!("user {} may not read data of {}", actor.user_id, user_id)))
}
