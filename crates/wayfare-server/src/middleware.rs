use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use wayfare_chat::{get_user, ChatError};
use wayfare_types::{UserId, UserSummary};

use crate::{with_conn, AppState};

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "X-Wayfare-User";

/// Authenticated caller, stored in request extensions.
#[derive(Clone, Debug)]
pub struct UserContext(pub UserSummary);

/// Middleware to authenticate requests via `X-Wayfare-User` or
/// `Authorization: Bearer`.
///
/// Session issuance lives outside this service; the bearer token is the
/// numeric user id and is only checked against the user table.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let user_id = caller_id(req.headers())?;

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let user = with_conn(&state.pool, move |conn| get_user(conn, user_id))
        .await
        .map_err(|e| match e {
            ChatError::NotFound(_) => StatusCode::UNAUTHORIZED,
            other => {
                tracing::error!(user_id, "auth lookup failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    req.extensions_mut().insert(UserContext(user));

    Ok(next.run(req).await)
}

/// Extracts the caller's user id from the request headers.
fn caller_id(headers: &HeaderMap) -> Result<UserId, StatusCode> {
    let raw = if let Some(val) = headers.get(USER_HEADER) {
        val.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?
    } else if let Some(val) = headers.get(axum::http::header::AUTHORIZATION) {
        let val_str = val.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
        val_str
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?
    } else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    raw.trim().parse().map_err(|_| StatusCode::UNAUTHORIZED)
}
