use std::collections::BTreeMap;

use crate::domain::{AuditEntry, Label};

const REPORT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;
/// Entries whose recorded label scores below this are treated as stale.
const REPORT_MIN_SCORE: f32 = 0.5;

/// Blocked-post summary over the last 24 hours.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub total: usize,
    pub by_label: BTreeMap<Label, usize>,
    /// Newest first.
    pub posts: Vec<AuditEntry>,
}

impl StatsReport {
    pub fn build(entries: &[AuditEntry], now: i64) -> Self {
        let cutoff = now - REPORT_WINDOW_MS;
        let mut posts: Vec<AuditEntry> = entries
            .iter()
            .filter(|entry| entry.timestamp > cutoff)
            .filter(|entry| counted_label(entry).is_some())
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut by_label: BTreeMap<Label, usize> =
            Label::ALL.into_iter().map(|label| (label, 0)).collect();
        for post in &posts {
            if let Some(label) = counted_label(post) {
                *by_label.entry(label).or_default() += 1;
            }
        }

        Self {
            total: posts.len(),
            by_label,
            posts,
        }
    }

    pub fn count(&self, label: Label) -> usize {
        self.by_label.get(&label).copied().unwrap_or(0)
    }

    pub fn render(&self, now: i64) -> String {
        let mut out = format!("Total Blocked: {}\n", self.total);
        for (label, count) in &self.by_label {
            out.push_str(&format!("{label} Blocked: {count}\n"));
        }
        if self.posts.is_empty() {
            out.push_str("\nNo posts have been blocked in the last 24 hours.\n");
            return out;
        }
        for post in &self.posts {
            out.push('\n');
            out.push_str(&format!("[{}] {}\n", time_ago(now, post.timestamp), post.text));
            let scores = post
                .scores
                .iter()
                .map(|(label, score)| format!("{label}: {:.0}%", score * 100.0))
                .collect::<Vec<_>>()
                .join("  ");
            out.push_str(&format!("    {scores}\n"));
        }
        out
    }
}

fn counted_label(entry: &AuditEntry) -> Option<Label> {
    let label = entry.filter_type?;
    let score = entry.scores.get(label)?;
    (score >= REPORT_MIN_SCORE).then_some(label)
}

pub fn time_ago(now: i64, timestamp: i64) -> String {
    const UNITS: [(&str, i64); 7] = [
        ("year", 31_536_000),
        ("month", 2_592_000),
        ("week", 604_800),
        ("day", 86_400),
        ("hour", 3_600),
        ("minute", 60),
        ("second", 1),
    ];
    let seconds = (now - timestamp).max(0) / 1000;
    for (unit, size) in UNITS {
        let count = seconds / size;
        if count >= 1 {
            let plural = if count == 1 { "" } else { "s" };
            return format!("{count} {unit}{plural} ago");
        }
    }
    "just now".to_string()
}
