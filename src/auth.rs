//! Upload authorization middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::ApiError;
use crate::users::AuthorizationToken;
use crate::AppState;

/// Id of the user that authenticated the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Author(pub Uuid);

/// Extract the hex token from the Authorization header.
/// The "Bearer" scheme is optional and case-insensitive.
fn extract_token(req: &Request) -> Option<AuthorizationToken> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        value[7..].trim_start()
    } else {
        value
    };
    AuthorizationToken::from_hex(token)
}

/// Reject requests without a valid authorization token and attach the
/// resolved [`Author`] to the rest.
pub async fn require_author(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(&req).ok_or_else(|| ApiError::unauthorized("unauthorized"))?;

    match state.users.check_authorization_token(&token) {
        Ok(Some(user)) => {
            tracing::debug!(user = %user, "Authorized request");
            req.extensions_mut().insert(Author(user));
            Ok(next.run(req).await)
        }
        Ok(None) => {
            tracing::debug!(path = %req.uri().path(), "Rejected unknown authorization token");
            Err(ApiError::unauthorized("unauthorized"))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to check authorization token");
            Err(ApiError::internal("internal server error"))
        }
    }
}
