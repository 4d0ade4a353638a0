use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use sqlx::{query, query_as, sqlite::SqlitePool, Sqlite, Transaction};
use tokio::sync::{broadcast, Mutex};

/// Old and new value of one key after a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Persisted string-keyed JSON values shared by settings, cache and audit
/// log, with a change feed for subscribers.
///
/// Writes are serialized through one lock so a read-modify-write in
/// [`KvStore::update`] never interleaves with another writer.
#[derive(Clone)]
pub struct KvStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StorageChange>,
    write_lock: Arc<Mutex<()>>,
}

impl KvStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            pool,
            changes,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    /// Returns the requested keys that exist. Missing keys are simply absent.
    pub async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let mut found = Map::new();
        for key in keys {
            if let Some(value) = self.get_one(key).await? {
                found.insert((*key).to_string(), value);
            }
        }
        Ok(found)
    }

    pub async fn get_one(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<(String,)> = query_as(r#"SELECT value FROM storage WHERE key = ?1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read storage key {key}"))?;
        Ok(row.and_then(|(raw,)| decode(key, &raw)))
    }

    /// Writes every item in one transaction, then notifies subscribers of
    /// the keys whose value changed.
    pub async fn set(&self, items: Map<String, Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut changes = Vec::new();

        for (key, value) in items {
            let old_value = read_in(&mut tx, &key).await?;
            write_in(&mut tx, &key, &value).await?;
            changes.extend(change_for(key, old_value, value));
        }

        tx.commit().await?;
        self.publish(changes);
        Ok(())
    }

    /// Replaces the value under `key` with `apply(current)`, atomically with
    /// respect to every other write through this store. Returns the new value.
    pub async fn update<F>(&self, key: &str, apply: F) -> Result<Value>
    where
        F: FnOnce(Option<Value>) -> Result<Value> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let old_value = read_in(&mut tx, key).await?;
        let value = apply(old_value.clone())?;
        write_in(&mut tx, key, &value).await?;

        tx.commit().await?;
        self.publish(change_for(key.to_string(), old_value, value.clone()));
        Ok(value)
    }

    pub async fn set_one(&self, key: &str, value: Value) -> Result<()> {
        let mut items = Map::new();
        items.insert(key.to_string(), value);
        self.set(items).await
    }
}

impl KvStore {
    fn publish(&self, changes: impl IntoIterator<Item = StorageChange>) {
        for change in changes {
            let _ = self.changes.send(change);
        }
    }
}

async fn read_in(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<Option<Value>> {
    let previous: Option<(String,)> = query_as(r#"SELECT value FROM storage WHERE key = ?1"#)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .with_context(|| format!("failed to read storage key {key}"))?;
    Ok(previous.and_then(|(raw,)| decode(key, &raw)))
}

async fn write_in(tx: &mut Transaction<'_, Sqlite>, key: &str, value: &Value) -> Result<()> {
    query(
        r#"INSERT INTO storage (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"#,
    )
    .bind(key)
    .bind(serde_json::to_string(value)?)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to write storage key {key}"))?;
    Ok(())
}

fn change_for(key: String, old_value: Option<Value>, new_value: Value) -> Option<StorageChange> {
    (old_value.as_ref() != Some(&new_value)).then(|| StorageChange {
        key,
        old_value,
        new_value: Some(new_value),
    })
}

fn decode(key: &str, raw: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(target: "db", key, error = %err, "ignoring undecodable storage value");
            None
        }
    }
}
