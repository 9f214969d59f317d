//! sharex-server - A self-hosted upload server for the ShareX client
//!
//! This crate provides authenticated uploads, short download links and secret
//! delete links on top of a reference-backed content store:
//! - Collision-free call/delete references from a secure random source
//! - redb embedded database for metadata (ACID, serialized writers)
//! - Swappable blob backends (local filesystem, in-memory)
//! - Argon2id-hashed user accounts with hex authorization tokens

pub mod api;
pub mod auth;
pub mod config;
pub mod object_store;
pub mod reference;
pub mod storage;
pub mod store;
#[cfg(test)]
pub mod testutil;
pub mod users;

use std::sync::Arc;

use config::Config;
use store::ContentStore;
use users::UserManager;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ContentStore>,
    pub users: UserManager,
}
