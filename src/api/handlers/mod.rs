mod delete;
mod health;
mod request;
mod upload;

use crate::api::response::ApiError;
use crate::store::StoreError;

pub use delete::delete_entry;
pub use health::health;
pub use request::request_entry;
pub use upload::upload;

/// Map a StoreError to an ApiError. Only `NotFound` is visible to clients;
/// everything else is logged with context and reported as an opaque 500.
/// `subject` names what the operation was about (a reference or a filename).
fn store_error(operation: &'static str, subject: &str, e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound => ApiError::not_found("entry not found"),
        StoreError::Inconsistency(ref detail) => {
            tracing::error!(operation, subject, detail = %detail, "Content store inconsistency");
            ApiError::internal("internal server error")
        }
        e => {
            tracing::error!(operation, subject, error = %e, "Content store operation failed");
            ApiError::internal("internal server error")
        }
    }
}
