use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Content dimension scored by the model. Declaration order is the iteration
/// order used by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Cynical,
    Sarcastic,
    Aggressive,
    Threatening,
    Politics,
    Racism,
}

impl Label {
    pub const ALL: [Label; 6] = [
        Label::Cynical,
        Label::Sarcastic,
        Label::Aggressive,
        Label::Threatening,
        Label::Politics,
        Label::Racism,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Cynical => "cynical",
            Label::Sarcastic => "sarcastic",
            Label::Aggressive => "aggressive",
            Label::Threatening => "threatening",
            Label::Politics => "politics",
            Label::Racism => "racism",
        }
    }

    /// Labels every model reply must carry. The extended ones are optional.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Label::Cynical | Label::Sarcastic | Label::Aggressive | Label::Threatening
        )
    }

    pub fn definition(&self) -> &'static str {
        match self {
            Label::Cynical => "The text is highly cynical and negative.",
            Label::Sarcastic => "The text is sarcastic and mocking.",
            Label::Aggressive => "The text is aggressive and hostile.",
            Label::Threatening => {
                "The text is threatening and contains violent or harmful content."
            }
            Label::Politics => "The text is highly political and contains political content.",
            Label::Racism => {
                "The text contains racist content, hate speech, or discriminatory language."
            }
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Label::ALL
            .into_iter()
            .find(|label| label.as_str() == needle)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// Scores for one post, each within `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreSet(BTreeMap<Label, f32>);

impl ScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a score, clamping it into `[0, 1]`. NaN becomes 0.
    pub fn insert(&mut self, label: Label, score: f32) {
        self.0.insert(label, clamp_score(score));
    }

    pub fn get(&self, label: Label) -> Option<f32> {
        self.0.get(&label).copied()
    }

    /// Missing labels score 0.
    pub fn score(&self, label: Label) -> f32 {
        self.get(label).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, f32)> + '_ {
        self.0.iter().map(|(label, score)| (*label, *score))
    }
}

impl FromIterator<(Label, f32)> for ScoreSet {
    fn from_iter<I: IntoIterator<Item = (Label, f32)>>(iter: I) -> Self {
        let mut set = ScoreSet::new();
        for (label, score) in iter {
            set.insert(label, score);
        }
        set
    }
}

pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Per-label filter thresholds. A post trips a label when its score is
/// strictly greater than the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    thresholds: BTreeMap<Label, f32>,
}

impl ThresholdTable {
    pub fn uniform(threshold: f32) -> Self {
        Self {
            thresholds: Label::ALL.into_iter().map(|l| (l, threshold)).collect(),
        }
    }

    pub fn with(mut self, label: Label, threshold: f32) -> Self {
        self.thresholds.insert(label, threshold);
        self
    }

    pub fn get(&self, label: Label) -> f32 {
        self.thresholds
            .get(&label)
            .copied()
            .unwrap_or(DEFAULT_THRESHOLD)
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::uniform(DEFAULT_THRESHOLD)
    }
}
