use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::store_error;
use crate::api::response::ApiError;
use crate::auth::Author;
use crate::store::{Entry, EntryWriter};
use crate::AppState;

/// Bytes collected from the request before each write to the store.
const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

const DEFAULT_FILENAME: &str = "upload";

/// Body the ShareX client reads the two links from.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub call_reference: String,
    pub delete_reference: String,
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(Author(author)): Extension<Author>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::bad_request(format!("Expected a multipart upload: {e}")))?;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_string();

        // The declared type is kept as sent; guess only when it is absent
        let content_type = field
            .content_type()
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&filename).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut entry = Entry::new(author, filename, content_type);
        let mut writer = state
            .store
            .store(&mut entry)
            .await
            .map_err(|e| store_error("store", &entry.filename, e))?;

        if let Err(e) = copy_field(&mut field, &mut writer, &entry.call_reference).await {
            if let Err(abort_err) = writer.abort().await {
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %abort_err,
                    "Failed to discard partial upload"
                );
            }
            return Err(e);
        }

        let entry = writer
            .finish()
            .await
            .map_err(|e| store_error("finish", &entry.call_reference, e))?;

        tracing::info!(
            call_reference = %entry.call_reference,
            author = %entry.author,
            byte_size = entry.byte_size,
            content_type = %entry.content_type,
            "Stored upload"
        );

        return Ok(Json(UploadResponse {
            call_reference: entry.call_reference,
            delete_reference: entry.delete_reference,
        }));
    }

    Err(ApiError::bad_request("file field is required"))
}

/// Stream one multipart field into the writer in bounded chunks.
async fn copy_field(
    field: &mut Field<'_>,
    writer: &mut EntryWriter,
    reference: &str,
) -> Result<(), ApiError> {
    let mut buffer = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        buffer.extend_from_slice(&chunk);
        if buffer.len() >= UPLOAD_CHUNK_SIZE {
            write_chunk(writer, &mut buffer, reference).await?;
        }
    }

    if !buffer.is_empty() {
        write_chunk(writer, &mut buffer, reference).await?;
    }
    Ok(())
}

async fn write_chunk(
    writer: &mut EntryWriter,
    buffer: &mut BytesMut,
    reference: &str,
) -> Result<(), ApiError> {
    writer
        .write(buffer.split().freeze())
        .await
        .map_err(|e| store_error("write", reference, e))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("File exceeds maximum upload size")
    } else {
        ApiError::bad_request(format!("Invalid multipart data: {}", e.body_text()))
    }
}
