//! Caller identity.
//!
//! Authentication itself happens upstream; requests arrive with
//! `Authorization: Bearer <user-uuid>`.  WebSocket upgrades from browsers
//! cannot set headers, so `?access_token=<user-uuid>` is accepted as well.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use scoutlink_shared::UserId;

use crate::error::ServerError;

/// The authenticated user making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub UserId);

fn parse_user(token: &str) -> Result<Viewer, ServerError> {
    token
        .trim()
        .parse::<UserId>()
        .map(Viewer)
        .map_err(|_| ServerError::Unauthenticated)
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(AUTHORIZATION) {
            let raw = value.to_str().map_err(|_| ServerError::Unauthenticated)?;
            let token = raw
                .strip_prefix("Bearer ")
                .ok_or(ServerError::Unauthenticated)?;
            return parse_user(token);
        }

        let Query(query) = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map_err(|_| ServerError::Unauthenticated)?;
        match query.access_token {
            Some(token) => parse_user(&token),
            None => Err(ServerError::Unauthenticated),
        }
    }
}
