//! User accounts, password hashing and upload authorization tokens.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Utc;
use ring::digest::{digest, SHA256};
use thiserror::Error;
use uuid::Uuid;

use crate::reference::ReferenceGenerator;
use crate::storage::models::UserRecord;
use crate::storage::{Database, DatabaseError};

/// Default number of random bytes in an authorization token.
pub const DEFAULT_AUTHORIZATION_TOKEN_LENGTH: usize = 20;

// Argon2id cost parameters
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("the provided username is already taken")]
    UsernameTaken,
    #[error("user not found")]
    NotFound,
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("invalid authorization token length: {0}")]
    InvalidTokenLength(usize),
    #[error("password hash error: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Raw authorization token bytes, shown as lowercase hex.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationToken(Vec<u8>);

impl AuthorizationToken {
    /// Parse a hex token. Returns `None` for empty or malformed input.
    pub fn from_hex(value: &str) -> Option<Self> {
        match hex::decode(value) {
            Ok(bytes) if !bytes.is_empty() => Some(Self(bytes)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex sha256 of the token; only this is persisted.
    fn digest(&self) -> String {
        hex::encode(digest(&SHA256, &self.0).as_ref())
    }
}

impl fmt::Display for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthorizationToken")
            .field(&"<redacted>")
            .finish()
    }
}

/// Manages user accounts stored in the shared metadata database.
#[derive(Clone)]
pub struct UserManager {
    db: Database,
    generator: Arc<ReferenceGenerator>,
}

impl UserManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            generator: Arc::new(ReferenceGenerator::default()),
        }
    }

    /// Create the user tables if they do not exist yet.
    pub fn initialize(&self) -> Result<(), UserError> {
        self.db.ensure_tables()?;
        Ok(())
    }

    /// Create a user with a fresh uuid and a hashed password.
    pub fn create_user(&self, username: &str, password: &str) -> Result<UserRecord, UserError> {
        validate_username(username)?;
        if self.db.get_user_by_username(username)?.is_some() {
            return Err(UserError::UsernameTaken);
        }

        let password_hash = hash_password(password)?;
        loop {
            let user = UserRecord {
                uuid: Uuid::new_v4(),
                username: username.to_string(),
                password_hash: password_hash.clone(),
                token_digest: None,
                created_at: Utc::now(),
            };

            if self.db.insert_user(&user)? {
                tracing::info!(user = %user.uuid, username, "Created user");
                return Ok(user);
            }
            // Lost a race on the username, or hit an existing uuid
            if self.db.get_user_by_username(username)?.is_some() {
                return Err(UserError::UsernameTaken);
            }
        }
    }

    /// Issue a new token for the user, revoking the previous one.
    pub fn regenerate_authorization_token(
        &self,
        uuid: &Uuid,
        length: usize,
    ) -> Result<AuthorizationToken, UserError> {
        if length == 0 {
            return Err(UserError::InvalidTokenLength(length));
        }

        loop {
            let mut bytes = vec![0u8; length];
            self.generator.fill_bytes(&mut bytes);
            let token = AuthorizationToken(bytes);
            let token_digest = token.digest();

            if self.db.token_digest_exists(&token_digest)? {
                continue;
            }
            match self.db.set_token_digest(uuid, &token_digest) {
                Ok(true) => {
                    tracing::info!(user = %uuid, "Regenerated authorization token");
                    return Ok(token);
                }
                Ok(false) => return Err(UserError::NotFound),
                Err(DatabaseError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolve a token to the uuid of its owner.
    pub fn check_authorization_token(
        &self,
        token: &AuthorizationToken,
    ) -> Result<Option<Uuid>, UserError> {
        Ok(self.db.get_user_id_by_token_digest(&token.digest())?)
    }

    pub fn load_user(&self, uuid: &Uuid) -> Result<UserRecord, UserError> {
        self.db.get_user(uuid)?.ok_or(UserError::NotFound)
    }

    pub fn update_username(&self, uuid: &Uuid, username: &str) -> Result<(), UserError> {
        validate_username(username)?;
        match self.db.rename_user(uuid, username)? {
            Some(true) => Ok(()),
            Some(false) => Err(UserError::UsernameTaken),
            None => Err(UserError::NotFound),
        }
    }

    pub fn update_password(&self, uuid: &Uuid, password: &str) -> Result<(), UserError> {
        let password_hash = hash_password(password)?;
        if self.db.set_password_hash(uuid, &password_hash)? {
            Ok(())
        } else {
            Err(UserError::NotFound)
        }
    }

    /// Check a password against the user's stored hash.
    pub fn verify_password(&self, uuid: &Uuid, password: &str) -> Result<bool, UserError> {
        let user = self.load_user(uuid)?;
        verify_password(password, &user.password_hash)
    }

    pub fn delete_user(&self, uuid: &Uuid) -> Result<(), UserError> {
        if self.db.delete_user(uuid)? {
            tracing::info!(user = %uuid, "Deleted user");
            Ok(())
        } else {
            Err(UserError::NotFound)
        }
    }
}

fn validate_username(username: &str) -> Result<(), UserError> {
    if username.trim().is_empty() {
        return Err(UserError::InvalidUsername("username must not be empty".to_string()));
    }
    if username.trim() != username {
        return Err(UserError::InvalidUsername(
            "username must not start or end with whitespace".to_string(),
        ));
    }
    Ok(())
}

fn argon2() -> Result<Argon2<'static>, UserError> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| UserError::PasswordHash(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with Argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String, UserError> {
    let salt = SaltString::generate(&mut OsRng);
    argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| UserError::PasswordHash(format!("failed to hash password: {e}")))
}

/// Verify a password against a PHC string. A malformed hash is an error,
/// not a failed match.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, UserError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| UserError::PasswordHash(format!("invalid password hash: {e}")))?;

    match argon2()?.verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(UserError::PasswordHash(format!("failed to verify password: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> UserManager {
        let manager = UserManager::new(Database::in_memory().unwrap());
        manager.initialize().unwrap();
        manager
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct-horse-battery-staple").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct-horse-battery-staple", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_format_is_an_error() {
        assert!(verify_password("password", "not-a-valid-hash").is_err());
    }

    #[test]
    fn test_token_hex_round_trip() {
        let token = AuthorizationToken::from_hex("00ff10").unwrap();
        assert_eq!(token.as_bytes(), &[0x00, 0xff, 0x10]);
        assert_eq!(token.to_string(), "00ff10");
        assert!(AuthorizationToken::from_hex("").is_none());
        assert!(AuthorizationToken::from_hex("xyz").is_none());
        assert!(AuthorizationToken::from_hex("abc").is_none());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AuthorizationToken::from_hex("deadbeef").unwrap();
        assert!(!format!("{token:?}").contains("deadbeef"));
    }

    #[test]
    fn test_create_user_rejects_duplicate_username() {
        let users = manager();
        users.create_user("alice", "pw").unwrap();
        assert!(matches!(
            users.create_user("alice", "other"),
            Err(UserError::UsernameTaken)
        ));
    }

    #[test]
    fn test_create_user_rejects_blank_username() {
        let users = manager();
        assert!(matches!(
            users.create_user("  ", "pw"),
            Err(UserError::InvalidUsername(_))
        ));
    }

    #[test]
    fn test_token_lifecycle() {
        let users = manager();
        let user = users.create_user("bob", "pw").unwrap();

        let first = users.regenerate_authorization_token(&user.uuid, 20).unwrap();
        assert_eq!(first.as_bytes().len(), 20);
        assert_eq!(
            users.check_authorization_token(&first).unwrap(),
            Some(user.uuid)
        );

        let second = users.regenerate_authorization_token(&user.uuid, 20).unwrap();
        assert_ne!(first, second);
        assert_eq!(users.check_authorization_token(&first).unwrap(), None);
        assert_eq!(
            users.check_authorization_token(&second).unwrap(),
            Some(user.uuid)
        );
    }

    #[test]
    fn test_token_for_unknown_user() {
        let users = manager();
        assert!(matches!(
            users.regenerate_authorization_token(&Uuid::new_v4(), 20),
            Err(UserError::NotFound)
        ));
        assert!(matches!(
            users.regenerate_authorization_token(&Uuid::new_v4(), 0),
            Err(UserError::InvalidTokenLength(0))
        ));
    }

    #[test]
    fn test_update_username_and_password() {
        let users = manager();
        let carol = users.create_user("carol", "old").unwrap();
        users.create_user("dave", "pw").unwrap();

        assert!(matches!(
            users.update_username(&carol.uuid, "dave"),
            Err(UserError::UsernameTaken)
        ));
        users.update_username(&carol.uuid, "caroline").unwrap();
        assert_eq!(users.load_user(&carol.uuid).unwrap().username, "caroline");
        assert!(matches!(
            users.create_user("caroline", "x"),
            Err(UserError::UsernameTaken)
        ));
        users.create_user("carol", "x").unwrap();

        users.update_password(&carol.uuid, "new").unwrap();
        assert!(users.verify_password(&carol.uuid, "new").unwrap());
        assert!(!users.verify_password(&carol.uuid, "old").unwrap());
    }

    #[test]
    fn test_delete_user_revokes_token() {
        let users = manager();
        let user = users.create_user("erin", "pw").unwrap();
        let token = users.regenerate_authorization_token(&user.uuid, 16).unwrap();

        users.delete_user(&user.uuid).unwrap();
        assert_eq!(users.check_authorization_token(&token).unwrap(), None);
        assert!(matches!(users.load_user(&user.uuid), Err(UserError::NotFound)));
        assert!(matches!(users.delete_user(&user.uuid), Err(UserError::NotFound)));
    }
}
