use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;

use crate::auth::{self, Identity};
use crate::state::AppState;

/// The caller behind a request, resolved from its API key.
pub struct Authenticated(pub Identity);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let query_token = parts.uri.query().and_then(auth::extract_token_from_query);

        auth::validate_auth(&state.config, bearer_token(parts), query_token)
            .map(Authenticated)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
