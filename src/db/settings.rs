use anyhow::Result;
use serde_json::{json, Map, Value};

use crate::domain::{
    settings::{
        KEY_API_KEY, KEY_BLUR_MODE, KEY_DEBUG_MODE, KEY_FILTERED_POSTS, KEY_FILTER_SETTINGS,
        KEY_IS_ENABLED, SETTINGS_KEYS,
    },
    FilterSettings, Label, Settings,
};

use super::store::KvStore;

/// Typed view of the settings keys.
#[derive(Clone)]
pub struct SettingsRepo {
    store: KvStore,
}

impl SettingsRepo {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Reads every setting, filling missing or malformed keys with defaults.
    pub async fn load(&self) -> Result<Settings> {
        let stored = self.store.get(&SETTINGS_KEYS).await?;
        let defaults = Settings::default();

        Ok(Settings {
            api_key: stored
                .get(KEY_API_KEY)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.api_key),
            is_enabled: stored
                .get(KEY_IS_ENABLED)
                .and_then(Value::as_bool)
                .unwrap_or(defaults.is_enabled),
            filter_settings: stored
                .get(KEY_FILTER_SETTINGS)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(defaults.filter_settings),
            blur_mode: stored
                .get(KEY_BLUR_MODE)
                .and_then(Value::as_bool)
                .unwrap_or(defaults.blur_mode),
            debug_mode: stored
                .get(KEY_DEBUG_MODE)
                .and_then(Value::as_bool)
                .unwrap_or(defaults.debug_mode),
        })
    }

    /// First-run initialization: writes defaults for missing keys only and
    /// never replaces a stored API key. Returns the keys written.
    pub async fn initialize_defaults(&self, seed_api_key: Option<&str>) -> Result<Vec<String>> {
        let existing = self
            .store
            .get(&[
                KEY_API_KEY,
                KEY_IS_ENABLED,
                KEY_FILTER_SETTINGS,
                KEY_BLUR_MODE,
                KEY_DEBUG_MODE,
                KEY_FILTERED_POSTS,
            ])
            .await?;
        let defaults = Settings::default();
        let mut updates = Map::new();

        let has_key = existing
            .get(KEY_API_KEY)
            .and_then(Value::as_str)
            .is_some_and(|key| !key.trim().is_empty());
        if !has_key {
            match seed_api_key.map(str::trim).filter(|key| !key.is_empty()) {
                Some(seed) => {
                    updates.insert(KEY_API_KEY.into(), json!(seed));
                }
                None if !existing.contains_key(KEY_API_KEY) => {
                    updates.insert(KEY_API_KEY.into(), json!(""));
                }
                None => {}
            }
        }

        let fallbacks = [
            (KEY_IS_ENABLED, json!(defaults.is_enabled)),
            (KEY_FILTER_SETTINGS, serde_json::to_value(defaults.filter_settings)?),
            (KEY_BLUR_MODE, json!(defaults.blur_mode)),
            (KEY_DEBUG_MODE, json!(defaults.debug_mode)),
            (KEY_FILTERED_POSTS, json!([])),
        ];
        for (key, value) in fallbacks {
            if !existing.contains_key(key) {
                updates.insert(key.into(), value);
            }
        }

        let written: Vec<String> = updates.keys().cloned().collect();
        if !updates.is_empty() {
            self.store.set(updates).await?;
        }
        Ok(written)
    }

    pub async fn set_api_key(&self, key: &str) -> Result<()> {
        self.store.set_one(KEY_API_KEY, json!(key.trim())).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store.set_one(KEY_IS_ENABLED, json!(enabled)).await
    }

    pub async fn set_blur_mode(&self, blur: bool) -> Result<()> {
        self.store.set_one(KEY_BLUR_MODE, json!(blur)).await
    }

    pub async fn set_debug_mode(&self, debug: bool) -> Result<()> {
        self.store.set_one(KEY_DEBUG_MODE, json!(debug)).await
    }

    pub async fn set_filter_settings(&self, filters: FilterSettings) -> Result<()> {
        self.store
            .set_one(KEY_FILTER_SETTINGS, serde_json::to_value(filters)?)
            .await
    }

    /// Toggles one label and returns the resulting filter map.
    pub async fn set_filter(&self, label: Label, enabled: bool) -> Result<FilterSettings> {
        let mut filters = self.load().await?.filter_settings;
        filters.set(label, enabled);
        self.set_filter_settings(filters).await?;
        Ok(filters)
    }
}
