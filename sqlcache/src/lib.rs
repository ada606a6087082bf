//! SQLite-backed informer object cache.
//!
//! One local database file holds a table per cached resource type; rows are
//! JSON-encoded (optionally encrypted) object blobs keyed by
//! `<namespace>|<name>`. The cache is a disposable materialization: the
//! journal runs with `synchronous=off` and the file is rebuilt from upstream
//! state at every process start.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod db;
mod encryption;
mod store;

pub use self::db::{connection_string, Client, INFORMER_OBJECT_CACHE_DB_PATH};
pub use self::encryption::KeyChain;
pub use self::store::{object_key, CacheEvent, ObjectCache};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any failure inside a transactional scope.
    #[error("transaction: {0}")]
    Transaction(#[source] Box<Error>),

    #[error("while executing query: {query} got error: {source}")]
    Query {
        query: String,
        #[source]
        source: Box<Error>,
    },

    /// Rollback after a failed transaction body also failed; both errors are
    /// retained.
    #[error("{primary}; rollback failed: {rollback}")]
    RollbackFailed {
        primary: Box<Error>,
        rollback: Box<Error>,
    },

    #[error("operation aborted due to canceled context")]
    Canceled,

    #[error("commit failed due to canceled context")]
    CanceledCommit,

    #[error("rollback failed due to canceled context")]
    CanceledRollback,

    #[error("encrypt: {0}")]
    Encrypt(String),

    #[error("decrypt: {0}")]
    Decrypt(String),

    #[error("unknown encryption key id {0}")]
    UnknownKey(u32),

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    fn query(query: &str, source: Error) -> Self {
        Self::Query {
            query: query.to_string(),
            source: Box::new(source),
        }
    }
}
