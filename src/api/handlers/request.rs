use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::store_error;
use crate::api::response::ApiError;
use crate::reference::is_valid_reference;
use crate::store::Entry;
use crate::AppState;

/// Read size used while streaming content to the client.
const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// IMF-fixdate, as used by Last-Modified.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// How a `Range` header applies to an entry of a given size.
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    /// No usable range; serve everything.
    Full,
    /// Inclusive byte offsets.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Serve an entry's content by call reference.
/// Route: GET /:call_reference
pub async fn request_entry(
    State(state): State<Arc<AppState>>,
    Path(call_reference): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_valid_reference(&call_reference, state.config.references.call_reference_length) {
        return Err(ApiError::not_found("entry not found"));
    }

    let (entry, mut reader) = state
        .store
        .resolve(&call_reference)
        .await
        .map_err(|e| store_error("resolve", &call_reference, e))?;

    let last_modified = http_date(&entry.upload_date)?;

    if let Some(since) = header_date(&request_headers, header::IF_MODIFIED_SINCE) {
        // Header dates only carry whole seconds
        if since.timestamp() >= entry.upload_date.timestamp() {
            drop(reader);
            tracing::debug!(call_reference = %call_reference, "Entry not modified");
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            response
                .headers_mut()
                .insert(header::LAST_MODIFIED, last_modified);
            return Ok(response);
        }
    }

    let range = match request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) if if_range_matches(&request_headers, &entry) => {
            byte_range(value, entry.byte_size)
        }
        _ => ByteRange::Full,
    };

    let disposition = if state.config.is_whitelisted(&entry.content_type) {
        "inline"
    } else {
        "attachment"
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        entry
            .content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(disposition, &entry)?,
    );
    headers.insert(header::LAST_MODIFIED, last_modified);
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    // Content never changes once uploaded
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    match range {
        ByteRange::Full => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.byte_size));
            tracing::debug!(
                call_reference = %call_reference,
                byte_size = entry.byte_size,
                disposition,
                "Serving entry"
            );
            Ok((StatusCode::OK, headers, content_body(reader, call_reference)).into_response())
        }
        ByteRange::Partial { start, end } => {
            let length = end - start + 1;
            reader.seek(SeekFrom::Start(start)).await.map_err(|e| {
                tracing::error!(
                    call_reference = %call_reference,
                    start,
                    error = %e,
                    "Failed to seek entry content"
                );
                ApiError::internal("internal server error")
            })?;

            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            headers.insert(
                header::CONTENT_RANGE,
                content_range(&format!("bytes {start}-{end}/{}", entry.byte_size))?,
            );
            tracing::debug!(
                call_reference = %call_reference,
                start,
                end,
                disposition,
                "Serving entry range"
            );
            let body = content_body(reader.take(length), call_reference);
            Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
        }
        ByteRange::Unsatisfiable => {
            drop(reader);
            tracing::debug!(
                call_reference = %call_reference,
                byte_size = entry.byte_size,
                "Requested range not satisfiable"
            );
            let mut response =
                ApiError::Fail(StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable".into())
                    .into_response();
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                content_range(&format!("bytes */{}", entry.byte_size))?,
            );
            Ok(response)
        }
    }
}

/// Stream `reader` as a response body. A read error is logged and ends the
/// body with an error, which aborts the response.
fn content_body<R>(reader: R, call_reference: String) -> Body
where
    R: AsyncRead + Send + 'static,
{
    let stream = ReaderStream::with_capacity(reader, DOWNLOAD_CHUNK_SIZE).inspect_err(move |e| {
        tracing::error!(
            call_reference = %call_reference,
            error = %e,
            "Failed to stream entry content"
        );
    });
    Body::from_stream(stream)
}

/// Parse a single `bytes=` range. Malformed and multi-range headers are
/// ignored and the whole entry is served.
fn byte_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix form: the final `last` bytes
        let Ok(suffix) = last.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if last.is_empty() {
        u64::MAX
    } else {
        match last.parse::<u64>() {
            Ok(end) => end,
            Err(_) => return ByteRange::Full,
        }
    };
    if end < start {
        return ByteRange::Full;
    }
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial {
        start,
        end: end.min(size - 1),
    }
}

/// A range applies unless `If-Range` names an older date or an entity tag.
/// No entity tags are issued, so a tag never matches.
fn if_range_matches(headers: &HeaderMap, entry: &Entry) -> bool {
    if !headers.contains_key(header::IF_RANGE) {
        return true;
    }
    header_date(headers, header::IF_RANGE)
        .is_some_and(|date| date.timestamp() >= entry.upload_date.timestamp())
}

fn content_range(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::internal("internal server error"))
}

fn http_date(date: &DateTime<Utc>) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&date.format(HTTP_DATE_FORMAT).to_string())
        .map_err(|_| ApiError::internal("internal server error"))
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    let value = headers.get(name)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// `inline; filename="..."` with quotes and backslashes escaped.
fn content_disposition(disposition: &str, entry: &Entry) -> Result<HeaderValue, ApiError> {
    let mut filename = String::with_capacity(entry.filename.len());
    for c in entry.filename.chars() {
        match c {
            '"' | '\\' => {
                filename.push('\\');
                filename.push(c);
            }
            c if c.is_control() => filename.push('_'),
            c => filename.push(c),
        }
    }

    HeaderValue::from_bytes(format!("{disposition}; filename=\"{filename}\"").as_bytes())
        .map_err(|_| ApiError::internal("internal server error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use uuid::Uuid;

    /// Yields one chunk, then fails like a disk that went away.
    struct FailingReader {
        served: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::other("device removed")));
            }
            self.served = true;
            buf.put_slice(b"first chunk");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_failure_aborts_body() {
        let body = content_body(FailingReader { served: false }, "abcdef".to_string());
        assert!(axum::body::to_bytes(body, usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn test_content_body_streams_everything() {
        let data = vec![7u8; 3 * DOWNLOAD_CHUNK_SIZE / 2];
        let body = content_body(io::Cursor::new(data.clone()), "abcdef".to_string());
        assert_eq!(axum::body::to_bytes(body, usize::MAX).await.unwrap(), data);
    }

    #[test]
    fn test_byte_range_forms() {
        assert_eq!(
            byte_range("bytes=10-19", 100),
            ByteRange::Partial { start: 10, end: 19 }
        );
        assert_eq!(
            byte_range("bytes=90-", 100),
            ByteRange::Partial { start: 90, end: 99 }
        );
        assert_eq!(
            byte_range("bytes=-5", 100),
            ByteRange::Partial { start: 95, end: 99 }
        );
        // Clamped to the end of the entry
        assert_eq!(
            byte_range("bytes=50-500", 100),
            ByteRange::Partial { start: 50, end: 99 }
        );
        assert_eq!(
            byte_range("bytes=-500", 100),
            ByteRange::Partial { start: 0, end: 99 }
        );
    }

    #[test]
    fn test_byte_range_unsatisfiable() {
        assert_eq!(byte_range("bytes=100-", 100), ByteRange::Unsatisfiable);
        assert_eq!(byte_range("bytes=200-300", 100), ByteRange::Unsatisfiable);
        assert_eq!(byte_range("bytes=-0", 100), ByteRange::Unsatisfiable);
        assert_eq!(byte_range("bytes=0-", 0), ByteRange::Unsatisfiable);
    }

    #[test]
    fn test_byte_range_ignores_malformed() {
        for value in [
            "items=0-1",
            "bytes=0-1,5-6",
            "bytes=abc",
            "bytes=x-5",
            "bytes=5-x",
            "bytes=19-10",
        ] {
            assert_eq!(byte_range(value, 100), ByteRange::Full, "{value}");
        }
    }

    #[test]
    fn test_if_range_matches() {
        let mut entry = Entry::new(Uuid::new_v4(), "a.txt", "text/plain");
        entry.upload_date = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();

        let mut headers = HeaderMap::new();
        assert!(if_range_matches(&headers, &entry));

        headers.insert(
            header::IF_RANGE,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert!(if_range_matches(&headers, &entry));

        headers.insert(
            header::IF_RANGE,
            HeaderValue::from_static("Tue, 20 Oct 2015 07:28:00 GMT"),
        );
        assert!(!if_range_matches(&headers, &entry));

        headers.insert(header::IF_RANGE, HeaderValue::from_static("\"etag\""));
        assert!(!if_range_matches(&headers, &entry));
    }

    #[test]
    fn test_http_date_format() {
        let date = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(&date).unwrap(), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_header_date_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(
            header_date(&headers, header::IF_MODIFIED_SINCE),
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );

        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_static("yesterday"));
        assert_eq!(header_date(&headers, header::IF_MODIFIED_SINCE), None);
    }

    #[test]
    fn test_content_disposition_escapes_filename() {
        let entry = Entry::new(Uuid::new_v4(), "my \"best\" cat\\dog.png", "image/png");
        let value = content_disposition("inline", &entry).unwrap();
        assert_eq!(
            value.as_bytes(),
            br#"inline; filename="my \"best\" cat\\dog.png""#
        );

        let entry = Entry::new(Uuid::new_v4(), "line\nbreak.txt", "text/plain");
        let value = content_disposition("attachment", &entry).unwrap();
        assert_eq!(value.as_bytes(), br#"attachment; filename="line_break.txt""#);
    }

    #[test]
    fn test_content_disposition_keeps_utf8() {
        let entry = Entry::new(Uuid::new_v4(), "katze-ü.png", "image/png");
        let value = content_disposition("inline", &entry).unwrap();
        assert_eq!(
            value.as_bytes(),
            "inline; filename=\"katze-ü.png\"".as_bytes()
        );
    }
}
