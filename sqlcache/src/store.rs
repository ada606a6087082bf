use crate::{Client, Error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Row keys are bar-separated so `extractBarredValue(key, 0)` can serve
/// namespace-scoped queries without an extra column.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}|{name}")
}

/// A committed mutation, published to watch subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEvent {
    Upserted { key: String },
    Deleted { key: String },
}

/// One cached resource type: a single table of object rows plus a broadcast
/// channel fanning out committed mutations.
pub struct ObjectCache {
    client: Arc<Client>,
    table: String,
    encrypt: bool,
    events: broadcast::Sender<CacheEvent>,
}

impl ObjectCache {
    /// Creates (or re-creates) the backing table.
    pub fn new(
        client: Arc<Client>,
        cancel: &CancellationToken,
        name: &str,
        encrypt: bool,
    ) -> Result<Self, Error> {
        let table = quote_check(name);
        client.with_transaction(cancel, true, |tx| {
            tx.execute_batch(&format!(
                r#"CREATE TABLE IF NOT EXISTS "{table}" (
key TEXT PRIMARY KEY,
data BLOB,
nonce BLOB,
kid INT
)"#
            ))?;
            Ok(())
        })?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            table,
            encrypt,
            events,
        })
    }

    /// Subscribes to committed mutations. Events are published only after
    /// their transaction commits, so an observed event is always visible to a
    /// subsequent read.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn upsert<T: Serialize>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        obj: &T,
    ) -> Result<(), Error> {
        self.client.with_transaction(cancel, true, |tx| {
            self.client.upsert(tx, &self.table, key, obj, self.encrypt)
        })?;
        let _ = self.events.send(CacheEvent::Upserted {
            key: key.to_string(),
        });
        Ok(())
    }

    pub fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<(), Error> {
        let deleted = self.client.with_transaction(cancel, true, |tx| {
            let query = format!(r#"DELETE FROM "{}" WHERE key = ?"#, self.table);
            Ok(tx.execute(&query, [key])?)
        })?;
        if deleted > 0 {
            let _ = self.events.send(CacheEvent::Deleted {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<Option<T>, Error> {
        let query = format!(
            r#"SELECT data, nonce, kid FROM "{}" WHERE key = ?"#,
            self.table
        );
        let mut objects = self.client.with_transaction(cancel, false, |tx| {
            self.client
                .read_objects::<T>(tx, &query, &[&key], self.encrypt)
        })?;
        Ok(objects.pop())
    }

    /// Lists objects, optionally restricted to one namespace by matching the
    /// first bar-separated key segment.
    pub fn list<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        namespace: Option<&str>,
    ) -> Result<Vec<T>, Error> {
        self.client.with_transaction(cancel, false, |tx| {
            match namespace {
                Some(namespace) => {
                    let query = format!(
                        r#"SELECT data, nonce, kid FROM "{}" WHERE extractBarredValue(key, 0) = ? ORDER BY key"#,
                        self.table
                    );
                    self.client
                        .read_objects(tx, &query, &[&namespace], self.encrypt)
                }
                None => {
                    let query = format!(
                        r#"SELECT data, nonce, kid FROM "{}" ORDER BY key"#,
                        self.table
                    );
                    self.client.read_objects(tx, &query, &[], self.encrypt)
                }
            }
        })
    }

    pub fn list_keys(&self, cancel: &CancellationToken) -> Result<Vec<String>, Error> {
        let query = format!(r#"SELECT key FROM "{}" ORDER BY key"#, self.table);
        self.client
            .with_transaction(cancel, false, |tx| self.client.read_strings(tx, &query, &[]))
    }

    pub fn count(&self, cancel: &CancellationToken) -> Result<i64, Error> {
        let query = format!(r#"SELECT COUNT(*) FROM "{}""#, self.table);
        self.client
            .with_transaction(cancel, false, |tx| self.client.read_int(tx, &query, &[]))
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("table", &self.table)
            .field("encrypt", &self.encrypt)
            .finish_non_exhaustive()
    }
}

// Table names come from schema ids, which are not attacker-controlled, but a
// stray quote would still corrupt the DDL.
fn quote_check(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .collect()
}
