pub mod label;
pub mod post;
pub mod settings;

pub use label::{Label, ScoreSet, ThresholdTable};
pub use post::{AuditEntry, CacheEntry, PostCandidate, Verdict};
pub use settings::{FilterSettings, Settings};
