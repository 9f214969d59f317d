use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

use super::store_error;
use crate::api::response::{ApiError, JSend};
use crate::auth::Author;
use crate::reference::is_valid_reference;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// Delete an entry and its content by delete reference.
/// Route: GET /updates/delete/:delete_reference
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Extension(Author(author)): Extension<Author>,
    Path(delete_reference): Path<String>,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    if !is_valid_reference(
        &delete_reference,
        state.config.references.delete_reference_length,
    ) {
        return Err(ApiError::not_found("entry not found"));
    }

    state
        .store
        .remove(&delete_reference)
        .await
        .map_err(|e| store_error("remove", &delete_reference, e))?;

    tracing::info!(author = %author, "Deleted entry");

    Ok(JSend::success(DeleteResponse {
        message: "the entry has been deleted".to_string(),
    }))
}
