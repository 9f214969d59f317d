use redb::TableDefinition;

/// Committed entries: entry id -> EntryRecord (msgpack)
pub const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Call reference index: call reference -> entry id (reserved at store time)
pub const CALL_REFERENCES: TableDefinition<&str, &str> = TableDefinition::new("call_references");

/// Delete reference index: delete reference -> entry id (reserved at store time)
pub const DELETE_REFERENCES: TableDefinition<&str, &str> =
    TableDefinition::new("delete_references");

/// User accounts: user uuid -> UserRecord (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Username index: username -> user uuid
pub const USERNAMES: TableDefinition<&str, &str> = TableDefinition::new("usernames");

/// Authorization tokens: hex sha256 of the raw token -> user uuid
pub const AUTHORIZATION_TOKENS: TableDefinition<&str, &str> =
    TableDefinition::new("authorization_tokens");
