use crate::{encryption::KeyChain, Error};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ToSql, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Database file name, relative to the working directory. In temp mode the
/// same stem gets a random suffix under the system temp dir.
pub const INFORMER_OBJECT_CACHE_DB_PATH: &str = "informer_object_cache.db";
const INFORMER_OBJECT_CACHE_DB_PATH_ROOT: &str = "informer_object_cache";

#[cfg(unix)]
const INFORMER_OBJECT_CACHE_PERMS: u32 = 0o600;

/// How long a writer waits on the file lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_millis(120_000);

/// The canonical connection string for the cache database.
///
/// Writers serialize on an immediate-mode lock at BEGIN time, bounded by the
/// two-minute busy timeout; durability is explicitly not attempted, the
/// database is thrown away at process restart.
pub fn connection_string(path: &Path) -> String {
    format!(
        "file:{}?mode=rwc&_pragma=journal_mode=wal&_pragma=synchronous=off&_pragma=foreign_keys=on&_pragma=busy_timeout=120000&_txlock=immediate",
        path.display()
    )
}

/// A database client over one SQLite connection.
///
/// The mutex is a handle-swap lock, not the SQLite transaction lock: queries
/// hold it for their duration and [`Client::new_connection`] takes it to
/// replace the handle atomically.
pub struct Client {
    handle: Mutex<Handle>,
    keychain: Option<Arc<KeyChain>>,
}

struct Handle {
    conn: Connection,
    path: PathBuf,
}

impl Client {
    /// Opens the database, deleting any previous file: the cache is
    /// reconstructible from upstream and never migrated.
    pub fn new(use_temp: bool, keychain: Option<Arc<KeyChain>>) -> Result<Self, Error> {
        let (conn, path) = open_connection(use_temp)?;
        Ok(Self {
            handle: Mutex::new(Handle { conn, path }),
            keychain,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.handle.lock().path.clone()
    }

    /// Replaces the connection (and, in temp mode, the backing file) under
    /// the exclusive handle lock.
    pub fn new_connection(&self, use_temp: bool) -> Result<PathBuf, Error> {
        let mut guard = self.handle.lock();
        let (conn, path) = open_connection(use_temp)?;
        guard.conn = conn;
        guard.path = path.clone();
        Ok(path)
    }

    /// Runs `f` within a transaction.
    ///
    /// If `for_writing` is true the transaction begins in immediate mode and
    /// concurrent writers serialize on the SQLite file lock, bounded by the
    /// busy timeout. Readers begin deferred and proceed concurrently under
    /// WAL. The transaction commits iff `f` returns `Ok`; otherwise a
    /// rollback is attempted and its error, if any, is retained alongside the
    /// primary one.
    pub fn with_transaction<T>(
        &self,
        cancel: &CancellationToken,
        for_writing: bool,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.transaction(cancel, for_writing, f)
            .map_err(|e| Error::Transaction(Box::new(e)))
    }

    fn transaction<T>(
        &self,
        cancel: &CancellationToken,
        for_writing: bool,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let mut handle = self.handle.lock();
        let behavior = if for_writing {
            TransactionBehavior::Immediate
        } else {
            TransactionBehavior::Deferred
        };
        let tx = handle.conn.transaction_with_behavior(behavior)?;

        match f(&tx) {
            Ok(value) => {
                commit(cancel, tx)?;
                Ok(value)
            }
            Err(err) => match rollback(cancel, tx) {
                Ok(()) => Err(err),
                Err(rerr) => Err(Error::RollbackFailed {
                    primary: Box::new(err),
                    rollback: Box::new(rerr),
                }),
            },
        }
    }

    /// Upserts one `(key, data, nonce, kid)` row, JSON-encoding the object
    /// and encrypting it when the client carries a keychain.
    pub fn upsert<T: Serialize>(
        &self,
        tx: &Transaction<'_>,
        table: &str,
        key: &str,
        obj: &T,
        should_encrypt: bool,
    ) -> Result<(), Error> {
        let mut data = to_bytes(obj)?;
        let mut nonce: Option<Vec<u8>> = None;
        let mut kid = 0u32;
        if should_encrypt {
            if let Some(keychain) = &self.keychain {
                let (ciphertext, n, k) = keychain.encrypt(&data)?;
                data = ciphertext;
                nonce = Some(n);
                kid = k;
            }
        }

        let query = upsert_stmt(table);
        let mut stmt = tx.prepare_cached(&query)?;
        stmt.execute(rusqlite::params![key, data, nonce, kid])
            .map_err(|e| Error::query(&query, e.into()))?;
        Ok(())
    }

    /// Queries `(data, nonce, kid)` rows, decrypting and decoding each into a
    /// `T`. The first error aborts iteration; the cursor closes when the row
    /// handle drops.
    pub fn read_objects<T: DeserializeOwned>(
        &self,
        tx: &Transaction<'_>,
        query: &str,
        params: &[&dyn ToSql],
        should_decrypt: bool,
    ) -> Result<Vec<T>, Error> {
        let mut stmt = tx.prepare_cached(query)?;
        let mut rows = stmt.query(params)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::query(query, e.into()))? {
            let data: Vec<u8> = row.get(0)?;
            let nonce: Option<Vec<u8>> = row.get(1)?;
            let kid: u32 = row.get(2)?;

            let plaintext = match (&self.keychain, should_decrypt) {
                (Some(keychain), true) => {
                    keychain.decrypt(&data, nonce.as_deref().unwrap_or_default(), kid)?
                }
                _ => data,
            };
            result.push(from_bytes(&plaintext).map_err(|e| Error::query(query, e))?);
        }
        Ok(result)
    }

    /// Scans single-string rows.
    pub fn read_strings(
        &self,
        tx: &Transaction<'_>,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<String>, Error> {
        let mut stmt = tx.prepare_cached(query)?;
        let mut rows = stmt.query(params)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::query(query, e.into()))? {
            result.push(row.get(0)?);
        }
        Ok(result)
    }

    /// Scans string-pair rows.
    pub fn read_string_pairs(
        &self,
        tx: &Transaction<'_>,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<(String, String)>, Error> {
        let mut stmt = tx.prepare_cached(query)?;
        let mut rows = stmt.query(params)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::query(query, e.into()))? {
            result.push((row.get(0)?, row.get(1)?));
        }
        Ok(result)
    }

    /// Scans the first row into a single integer, e.g. for COUNT queries.
    pub fn read_int(
        &self,
        tx: &Transaction<'_>,
        query: &str,
        params: &[&dyn ToSql],
    ) -> Result<i64, Error> {
        let mut stmt = tx.prepare_cached(query)?;
        let mut rows = stmt.query(params)?;
        let row = rows
            .next()
            .map_err(|e| Error::query(query, e.into()))?
            .ok_or_else(|| Error::query(query, rusqlite::Error::QueryReturnedNoRows.into()))?;
        Ok(row.get(0)?)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("path", &self.path())
            .field("encrypted", &self.keychain.is_some())
            .finish_non_exhaustive()
    }
}

fn commit(cancel: &CancellationToken, tx: Transaction<'_>) -> Result<(), Error> {
    match tx.commit() {
        Ok(()) => Ok(()),
        Err(_) if cancel.is_cancelled() => Err(Error::CanceledCommit),
        Err(e) => Err(e.into()),
    }
}

fn rollback(cancel: &CancellationToken, tx: Transaction<'_>) -> Result<(), Error> {
    match tx.rollback() {
        Ok(()) => Ok(()),
        Err(_) if cancel.is_cancelled() => Err(Error::CanceledRollback),
        Err(e) => Err(e.into()),
    }
}

fn upsert_stmt(table: &str) -> String {
    format!(
        r#"INSERT INTO "{table}"(key, data, nonce, kid) VALUES (?, ?, ?, ?)
ON CONFLICT(key) DO UPDATE SET data = excluded.data, nonce = excluded.nonce, kid = excluded.kid"#
    )
}

fn to_bytes<T: Serialize>(obj: &T) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(obj)?)
}

fn from_bytes<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Error> {
    Ok(serde_json::from_slice(buf)?)
}

fn open_connection(use_temp: bool) -> Result<(Connection, PathBuf), Error> {
    let path = if use_temp {
        let file = tempfile::Builder::new()
            .prefix(INFORMER_OBJECT_CACHE_DB_PATH_ROOT)
            .suffix(".db")
            .tempfile()?;
        file.into_temp_path().keep().map_err(|e| e.error)?
    } else {
        // The cache is rebuilt from upstream state; a file left behind by a
        // previous process is stale and must not be reused.
        let path = PathBuf::from(INFORMER_OBJECT_CACHE_DB_PATH);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        path
    };
    touch(&path)?;

    let conn = Connection::open(&path)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode=wal", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA synchronous=off; PRAGMA foreign_keys=on;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    register_functions(&conn)?;
    Ok((conn, path))
}

// Creates the file up front so its permissions are ours to control rather
// than the sqlite library's.
fn touch(path: &Path) -> Result<(), Error> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    drop(file);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(INFORMER_OBJECT_CACHE_PERMS))?;
    }
    Ok(())
}

/// Registers the deterministic `extractBarredValue(text, int)` scalar: splits
/// the first argument on `|` and returns the Nth piece, or the empty string
/// when the index is out of range.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "extractBarredValue",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text = match ctx.get_raw(0) {
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    std::str::from_utf8(bytes).map_err(|e| {
                        rusqlite::Error::UserFunctionError(
                            format!("problem with arg1: {e}").into(),
                        )
                    })?
                }
                other => {
                    return Err(rusqlite::Error::UserFunctionError(
                        format!(
                            "unsupported type for arg1: expected a string, got: {:?}",
                            other.data_type()
                        )
                        .into(),
                    ))
                }
            };
            let index = match ctx.get_raw(1) {
                ValueRef::Integer(i) => i,
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        rusqlite::Error::UserFunctionError(
                            "problem with arg2: expected an integer".into(),
                        )
                    })?,
                other => {
                    return Err(rusqlite::Error::UserFunctionError(
                        format!(
                            "unsupported type for arg2: expected an int, got: {:?}",
                            other.data_type()
                        )
                        .into(),
                    ))
                }
            };

            let parts: Vec<&str> = text.split('|').collect();
            if index < 0 || index as usize >= parts.len() {
                return Ok(String::new());
            }
            Ok(parts[index as usize].to_string())
        },
    )
}
