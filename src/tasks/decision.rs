use std::str::FromStr;

use thiserror::Error;

use crate::domain::{FilterSettings, Label, ScoreSet, ThresholdTable};

/// How a single triggering label is chosen when several exceed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelPolicy {
    /// First enabled label in evaluation order.
    #[default]
    FirstMatch,
    /// Enabled label with the highest score; ties go to evaluation order.
    HighestScore,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown label policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for LabelPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_match" | "first-match" => Ok(LabelPolicy::FirstMatch),
            "highest_score" | "highest-score" => Ok(LabelPolicy::HighestScore),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    thresholds: ThresholdTable,
    policy: LabelPolicy,
}

impl DecisionEngine {
    pub fn new(thresholds: ThresholdTable, policy: LabelPolicy) -> Self {
        Self { thresholds, policy }
    }

    /// Returns the label that filters the post, if any. At most one label is
    /// ever reported.
    pub fn decide(&self, scores: &ScoreSet, filters: &FilterSettings) -> Option<Label> {
        let mut tripped = filters
            .enabled()
            .filter(|label| scores.score(*label) > self.thresholds.get(*label));

        match self.policy {
            LabelPolicy::FirstMatch => tripped.next(),
            LabelPolicy::HighestScore => tripped.fold(None, |best: Option<Label>, label| {
                match best {
                    Some(current) if scores.score(current) >= scores.score(label) => Some(current),
                    _ => Some(label),
                }
            }),
        }
    }
}
