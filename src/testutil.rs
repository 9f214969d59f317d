//! Shared test helpers for handler and middleware tests.

use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::object_store::MemoryStore;
use crate::storage::Database;
use crate::store::{ContentStore, EntryRepository};
use crate::users::{AuthorizationToken, UserManager};
use crate::AppState;

/// Create a test AppState backed by memory, with one user and its token.
pub async fn test_state() -> (Arc<AppState>, AuthorizationToken) {
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.storage.backend = StorageBackend::Memory;
    config.max_upload_size = 10 * 1024 * 1024; // 10MB for tests

    let db = Database::in_memory().expect("Failed to open test database");
    let store = EntryRepository::new(
        db.clone(),
        Arc::new(MemoryStore::new()),
        config.store_settings(),
    );
    store
        .initialize()
        .await
        .expect("Failed to initialize test store");

    let users = UserManager::new(db);
    users.initialize().expect("Failed to create user tables");
    let user = users
        .create_user("tester", "password")
        .expect("Failed to create test user");
    let token = users
        .regenerate_authorization_token(&user.uuid, config.authorization_token_length)
        .expect("Failed to issue test token");

    let state = Arc::new(AppState {
        config,
        store: Arc::new(store),
        users,
    });
    (state, token)
}
