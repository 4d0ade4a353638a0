use anyhow::Result;
use serde_json::Value;

use crate::domain::{settings::KEY_FILTERED_POSTS, AuditEntry};

use super::store::KvStore;

pub const AUDIT_LOG_CAPACITY: usize = 100;

/// Most-recent-first record of filtered posts, capped at
/// [`AUDIT_LOG_CAPACITY`].
#[derive(Clone)]
pub struct AuditRepo {
    store: KvStore,
    capacity: usize,
}

impl AuditRepo {
    pub fn new(store: KvStore) -> Self {
        Self {
            store,
            capacity: AUDIT_LOG_CAPACITY,
        }
    }

    /// Prepends the entry, drops whatever falls past capacity and returns the
    /// new length.
    pub async fn append(&self, entry: AuditEntry) -> Result<usize> {
        let entry = serde_json::to_value(&entry)?;
        let capacity = self.capacity;
        let stored = self
            .store
            .update(KEY_FILTERED_POSTS, move |current| {
                let mut entries = match current {
                    Some(Value::Array(entries)) => entries,
                    _ => Vec::new(),
                };
                entries.insert(0, entry);
                entries.truncate(capacity);
                Ok(Value::Array(entries))
            })
            .await?;
        Ok(stored.as_array().map_or(0, Vec::len))
    }

    /// Entries newest first. Malformed entries are skipped.
    pub async fn list(&self) -> Result<Vec<AuditEntry>> {
        Ok(self
            .raw_entries()
            .await?
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect())
    }

    async fn raw_entries(&self) -> Result<Vec<Value>> {
        Ok(match self.store.get_one(KEY_FILTERED_POSTS).await? {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        })
    }
}
