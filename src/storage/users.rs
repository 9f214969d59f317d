use redb::ReadableTable;
use uuid::Uuid;

use super::db::{Database, DatabaseError};
use super::models::UserRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Insert a new user. Returns `false` without writing anything if the
    /// username or the uuid is already taken.
    pub fn insert_user(&self, user: &UserRecord) -> Result<bool, DatabaseError> {
        let key = user.uuid.to_string();
        let write_txn = self.begin_write()?;
        let inserted = {
            let mut usernames = write_txn.open_table(USERNAMES)?;
            let mut users = write_txn.open_table(USERS)?;
            if usernames.get(user.username.as_str())?.is_some()
                || users.get(key.as_str())?.is_some()
            {
                false
            } else {
                let data = rmp_serde::to_vec_named(user)?;
                users.insert(key.as_str(), data.as_slice())?;
                usernames.insert(user.username.as_str(), key.as_str())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Get a user by uuid
    pub fn get_user(&self, uuid: &Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(uuid.to_string().as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get a user by username (resolves username -> uuid -> user)
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let usernames = read_txn.open_table(USERNAMES)?;

        let key = match usernames.get(username)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let users = read_txn.open_table(USERS)?;
        match users.get(key.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Check if a token digest is already assigned to any user
    pub fn token_digest_exists(&self, digest: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(AUTHORIZATION_TOKENS)?;
        Ok(table.get(digest)?.is_some())
    }

    /// Resolve a token digest to the uuid of its owner
    pub fn get_user_id_by_token_digest(&self, digest: &str) -> Result<Option<Uuid>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(AUTHORIZATION_TOKENS)?;
        let result = match table.get(digest)? {
            Some(data) => Uuid::parse_str(data.value()).ok(),
            None => None,
        };
        Ok(result)
    }

    /// Replace a user's token digest, revoking the previous one.
    /// Returns `Ok(false)` if the user does not exist; fails with
    /// `Conflict` if the digest already belongs to someone.
    pub fn set_token_digest(&self, uuid: &Uuid, digest: &str) -> Result<bool, DatabaseError> {
        let key = uuid.to_string();
        let write_txn = self.begin_write()?;
        let updated = {
            let mut users = write_txn.open_table(USERS)?;
            let existing: Option<UserRecord> = {
                let result = match users.get(key.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                result
            };

            match existing {
                Some(mut user) => {
                    let mut tokens = write_txn.open_table(AUTHORIZATION_TOKENS)?;
                    if tokens.get(digest)?.is_some() {
                        return Err(DatabaseError::Conflict(
                            "authorization token already assigned".to_string(),
                        ));
                    }
                    if let Some(ref old) = user.token_digest {
                        tokens.remove(old.as_str())?;
                    }
                    tokens.insert(digest, key.as_str())?;

                    user.token_digest = Some(digest.to_string());
                    let data = rmp_serde::to_vec_named(&user)?;
                    users.insert(key.as_str(), data.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Rename a user. Returns `Ok(None)` if the user does not exist and
    /// `Ok(Some(false))` if the new name is taken by someone else.
    pub fn rename_user(&self, uuid: &Uuid, username: &str) -> Result<Option<bool>, DatabaseError> {
        let key = uuid.to_string();
        let write_txn = self.begin_write()?;
        let outcome = {
            let mut users = write_txn.open_table(USERS)?;
            let existing: Option<UserRecord> = {
                let result = match users.get(key.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                result
            };

            match existing {
                Some(mut user) => {
                    let mut usernames = write_txn.open_table(USERNAMES)?;
                    let taken = usernames
                        .get(username)?
                        .is_some_and(|v| v.value() != key.as_str());
                    if taken {
                        Some(false)
                    } else {
                        usernames.remove(user.username.as_str())?;
                        usernames.insert(username, key.as_str())?;
                        user.username = username.to_string();
                        let data = rmp_serde::to_vec_named(&user)?;
                        users.insert(key.as_str(), data.as_slice())?;
                        Some(true)
                    }
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Replace a user's password hash. Returns `false` if the user does not exist.
    pub fn set_password_hash(&self, uuid: &Uuid, password_hash: &str) -> Result<bool, DatabaseError> {
        let key = uuid.to_string();
        let write_txn = self.begin_write()?;
        let updated = {
            let mut users = write_txn.open_table(USERS)?;
            let existing: Option<UserRecord> = {
                let result = match users.get(key.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                result
            };

            match existing {
                Some(mut user) => {
                    user.password_hash = password_hash.to_string();
                    let data = rmp_serde::to_vec_named(&user)?;
                    users.insert(key.as_str(), data.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete a user together with its username and token index entries
    pub fn delete_user(&self, uuid: &Uuid) -> Result<bool, DatabaseError> {
        let key = uuid.to_string();
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut users = write_txn.open_table(USERS)?;
            let removed: Option<UserRecord> = {
                let result = match users.remove(key.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                result
            };

            match removed {
                Some(user) => {
                    let mut usernames = write_txn.open_table(USERNAMES)?;
                    usernames.remove(user.username.as_str())?;
                    if let Some(ref digest) = user.token_digest {
                        let mut tokens = write_txn.open_table(AUTHORIZATION_TOKENS)?;
                        tokens.remove(digest.as_str())?;
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(deleted)
    }
}
