use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A committed upload stored in redb. The content lives in the object store
/// under the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: String,
    pub call_reference: String,
    pub delete_reference: String,
    pub author: Uuid,
    pub filename: String,
    pub content_type: String,
    pub byte_size: u64,
    pub upload_date: DateTime<Utc>,
}

/// A user account stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uuid: Uuid,
    pub username: String,
    /// Argon2id hash in PHC string format
    pub password_hash: String,
    /// Hex sha256 digest of the current authorization token, if one was issued
    #[serde(default)]
    pub token_digest: Option<String>,
    pub created_at: DateTime<Utc>,
}
