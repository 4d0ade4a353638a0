use serde::{Deserialize, Serialize};

use super::label::{Label, ScoreSet};

/// One cached classification under `processedPosts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
    #[serde(default)]
    pub scores: Option<ScoreSet>,
}

/// One filtered post under `filteredPosts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub text: String,
    pub scores: ScoreSet,
    /// Entries written by older builds may lack a label; readers must
    /// validate before trusting it.
    #[serde(default)]
    pub filter_type: Option<Label>,
    #[serde(default)]
    pub url: String,
    pub timestamp: i64,
}

impl AuditEntry {
    pub fn new(text: String, scores: ScoreSet, filter_type: Label, url: String, timestamp: i64) -> Self {
        Self {
            text,
            scores,
            filter_type: Some(filter_type),
            url,
            timestamp,
        }
    }
}

/// A post node picked up by a page scan, ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCandidate {
    /// Value of the node key attribute written during the scan.
    pub node_key: String,
    pub post_id: Option<String>,
    pub text: String,
}

/// Outcome for a post that tripped a label.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub node_key: String,
    pub label: Label,
    pub text: String,
    pub scores: ScoreSet,
}
