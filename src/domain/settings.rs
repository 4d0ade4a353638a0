use serde::{Deserialize, Serialize};

use super::label::Label;

pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_IS_ENABLED: &str = "isEnabled";
pub const KEY_FILTER_SETTINGS: &str = "filterSettings";
pub const KEY_BLUR_MODE: &str = "blurMode";
pub const KEY_DEBUG_MODE: &str = "debugMode";
pub const KEY_FILTERED_POSTS: &str = "filteredPosts";
pub const KEY_PROCESSED_POSTS: &str = "processedPosts";

pub const SETTINGS_KEYS: [&str; 5] = [
    KEY_API_KEY,
    KEY_IS_ENABLED,
    KEY_FILTER_SETTINGS,
    KEY_BLUR_MODE,
    KEY_DEBUG_MODE,
];

/// Which labels are allowed to filter a post.
///
/// A stored map with missing labels reads them as disabled; only an absent
/// `filterSettings` key falls back to [`FilterSettings::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub cynical: bool,
    #[serde(default)]
    pub sarcastic: bool,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default)]
    pub threatening: bool,
    #[serde(default)]
    pub politics: bool,
    #[serde(default)]
    pub racism: bool,
}

impl FilterSettings {
    pub fn none() -> Self {
        Self {
            cynical: false,
            sarcastic: false,
            aggressive: false,
            threatening: false,
            politics: false,
            racism: false,
        }
    }

    pub fn only(labels: &[Label]) -> Self {
        let mut settings = Self::none();
        for label in labels {
            settings.set(*label, true);
        }
        settings
    }

    pub fn is_enabled(&self, label: Label) -> bool {
        *self.slot(label)
    }

    pub fn set(&mut self, label: Label, enabled: bool) {
        *self.slot_mut(label) = enabled;
    }

    /// Labels in evaluation order with their toggle.
    pub fn iter(&self) -> impl Iterator<Item = (Label, bool)> + '_ {
        Label::ALL.into_iter().map(|label| (label, self.is_enabled(label)))
    }

    pub fn enabled(&self) -> impl Iterator<Item = Label> + '_ {
        self.iter().filter(|(_, on)| *on).map(|(label, _)| label)
    }

    fn slot(&self, label: Label) -> &bool {
        match label {
            Label::Cynical => &self.cynical,
            Label::Sarcastic => &self.sarcastic,
            Label::Aggressive => &self.aggressive,
            Label::Threatening => &self.threatening,
            Label::Politics => &self.politics,
            Label::Racism => &self.racism,
        }
    }

    fn slot_mut(&mut self, label: Label) -> &mut bool {
        match label {
            Label::Cynical => &mut self.cynical,
            Label::Sarcastic => &mut self.sarcastic,
            Label::Aggressive => &mut self.aggressive,
            Label::Threatening => &mut self.threatening,
            Label::Politics => &mut self.politics,
            Label::Racism => &mut self.racism,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self::only(&[Label::Cynical])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: String,
    pub is_enabled: bool,
    pub filter_settings: FilterSettings,
    pub blur_mode: bool,
    pub debug_mode: bool,
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            is_enabled: true,
            filter_settings: FilterSettings::default(),
            blur_mode: false,
            debug_mode: false,
        }
    }
}
