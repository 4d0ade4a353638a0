use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::Value;

use crate::domain::{settings::KEY_PROCESSED_POSTS, CacheEntry, ScoreSet};

use super::store::KvStore;

pub const CACHE_TTL_HOURS: i64 = 24;

type CacheMap = HashMap<String, CacheEntry>;

/// Classification results keyed by platform post id.
///
/// Every mutation is a read-modify-write of the whole map through
/// [`KvStore::update`], so concurrent puts from one scan all land.
#[derive(Clone)]
pub struct CacheRepo {
    store: KvStore,
    ttl: Duration,
}

impl CacheRepo {
    pub fn new(store: KvStore) -> Self {
        Self {
            store,
            ttl: Duration::hours(CACHE_TTL_HOURS),
        }
    }

    pub async fn is_fresh(&self, post_id: &str) -> Result<bool> {
        self.is_fresh_at(post_id, now_ms()).await
    }

    pub async fn get(&self, post_id: &str) -> Result<Option<ScoreSet>> {
        self.get_at(post_id, now_ms()).await
    }

    pub async fn put(&self, post_id: &str, scores: ScoreSet) -> Result<()> {
        self.put_at(post_id, scores, now_ms()).await
    }

    /// False when absent or expired; an expired entry is purged.
    pub async fn is_fresh_at(&self, post_id: &str, now: i64) -> Result<bool> {
        let map = self.load().await?;
        let Some(entry) = map.get(post_id) else {
            return Ok(false);
        };
        if !self.is_expired(entry, now) {
            return Ok(true);
        }
        self.modify(|map| {
            if map.get(post_id).is_some_and(|entry| self.is_expired(entry, now)) {
                map.remove(post_id);
            }
        })
        .await?;
        tracing::debug!(target: "cache", post_id, "purged expired cache entry");
        Ok(false)
    }

    /// Scores cached for the post, if still fresh.
    pub async fn get_at(&self, post_id: &str, now: i64) -> Result<Option<ScoreSet>> {
        if !self.is_fresh_at(post_id, now).await? {
            return Ok(None);
        }
        Ok(self
            .load()
            .await?
            .remove(post_id)
            .and_then(|entry| entry.scores))
    }

    /// Stores the scores and sweeps every other expired entry in the same
    /// write.
    pub async fn put_at(&self, post_id: &str, scores: ScoreSet, now: i64) -> Result<()> {
        let mut swept = 0;
        self.modify(|map| {
            map.insert(
                post_id.to_string(),
                CacheEntry {
                    timestamp: now,
                    scores: Some(scores),
                },
            );
            let before = map.len();
            map.retain(|_, entry| !self.is_expired(entry, now));
            swept = before - map.len();
        })
        .await?;
        if swept > 0 {
            tracing::debug!(target: "cache", swept, "swept expired cache entries");
        }
        Ok(())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    fn is_expired(&self, entry: &CacheEntry, now: i64) -> bool {
        now - entry.timestamp > self.ttl.num_milliseconds()
    }

    async fn load(&self) -> Result<CacheMap> {
        Ok(decode_map(self.store.get_one(KEY_PROCESSED_POSTS).await?))
    }

    async fn modify<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut CacheMap) + Send,
    {
        self.store
            .update(KEY_PROCESSED_POSTS, |current| {
                let mut map = decode_map(current);
                edit(&mut map);
                Ok(serde_json::to_value(map)?)
            })
            .await?;
        Ok(())
    }
}

fn decode_map(value: Option<Value>) -> CacheMap {
    let Some(value) = value else {
        return CacheMap::new();
    };
    serde_json::from_value(value).unwrap_or_else(|err| {
        tracing::warn!(target: "cache", error = %err, "discarding malformed post cache");
        CacheMap::new()
    })
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
