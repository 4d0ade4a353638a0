use dom_query::{Document, Selection};

use crate::domain::{PostCandidate, Verdict};

use super::platform::Platform;

pub const PROCESSED_ATTR: &str = "data-content-processed";
pub const NODE_KEY_ATTR: &str = "data-mtw-node";
pub const FILTER_TYPE_ATTR: &str = "data-filter-type";
pub const HIDDEN_CLASS: &str = "content-hidden";
pub const BLURRED_CLASS: &str = "content-blurred";
pub const REVEALED_CLASS: &str = "revealed";
pub const SHOW_FILTERED_CLASS: &str = "mtw-show-filtered";
const STYLE_ID: &str = "mutetheweb-style";

const FILTER_STYLES: &str = r#"
.content-hidden { display: none !important; }
.content-blurred {
    filter: blur(10px) !important;
    user-select: none !important;
    cursor: pointer !important;
    transition: filter 0.3s ease !important;
}
.content-blurred:hover { filter: blur(8px) !important; }
.content-blurred.revealed { filter: none !important; user-select: auto !important; }
.mtw-show-filtered .content-hidden {
    display: block !important;
    border: 2px solid #ff4444 !important;
    padding: 10px !important;
    margin: 10px 0 !important;
    border-radius: 4px !important;
}
.content-hidden[data-filter-type]::before {
    display: block;
    padding: 4px 8px;
    margin-bottom: 8px;
    border-radius: 4px;
    font-size: 12px;
    font-weight: bold;
    color: white;
    background: #ff4444;
    content: "Filtered: " attr(data-filter-type);
}
"#;

/// Result of one pass over a page snapshot.
#[derive(Debug, Clone)]
pub struct PageScan {
    pub url: String,
    pub platform: Platform,
    /// Newly picked-up posts with text, in document order.
    pub candidates: Vec<PostCandidate>,
    /// Posts marked during this scan, including those without text.
    pub marked: usize,
    /// Snapshot with the new markers applied.
    pub html: String,
}

/// Canonical URL of a saved page.
pub fn page_url(doc: &Document) -> Option<String> {
    let canonical = doc.select(r#"link[rel="canonical"]"#).attr("href");
    let og_url = || doc.select(r#"meta[property="og:url"]"#).attr("content");
    canonical
        .or_else(og_url)
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Marks every unprocessed post on the page and extracts its text.
///
/// Markers are set before classification so a rescan racing this one never
/// submits the same node twice. Returns `None` for pages on unsupported
/// platforms.
pub fn scan_page(html: &str) -> Option<PageScan> {
    let doc = Document::from(html);
    let url = page_url(&doc)?;
    let platform = Platform::detect(&url)?;

    let mut next_key = next_node_key(&doc);
    let posts: Vec<Selection> = doc
        .select(platform.post_selector())
        .iter()
        .filter(|post| !post.has_attr(PROCESSED_ATTR))
        .collect();

    let mut candidates = Vec::new();
    for post in &posts {
        let node_key = next_key.to_string();
        next_key += 1;
        post.set_attr(PROCESSED_ATTR, "true");
        post.set_attr(NODE_KEY_ATTR, &node_key);

        let text = platform.extract_text(post);
        if text.is_empty() {
            tracing::debug!(target: "feed", node_key = %node_key, "no text found in post, skipping");
            continue;
        }
        candidates.push(PostCandidate {
            node_key,
            post_id: platform.extract_post_id(post),
            text,
        });
    }

    Some(PageScan {
        url,
        platform,
        candidates,
        marked: posts.len(),
        html: doc.html().to_string(),
    })
}

/// Hides or blurs the posts named by `verdicts`. Returns the new snapshot
/// and how many posts were found and filtered.
pub fn apply_verdicts(html: &str, verdicts: &[Verdict], blur_mode: bool) -> (String, usize) {
    let doc = Document::from(html);
    ensure_styles(&doc);

    let mut applied = 0;
    for verdict in verdicts {
        let node = doc.select(&node_selector(&verdict.node_key));
        if !node.exists() {
            tracing::warn!(target: "feed", node_key = %verdict.node_key, "filtered post vanished from page");
            continue;
        }
        node.add_class(display_class(blur_mode));
        node.set_attr(FILTER_TYPE_ATTR, verdict.label.as_str());
        applied += 1;
    }
    (doc.html().to_string(), applied)
}

/// Switches every filtered post to the given display mode.
pub fn restyle(html: &str, blur_mode: bool) -> (String, usize) {
    let doc = Document::from(html);
    let filtered = doc.select(&format!(".{HIDDEN_CLASS}, .{BLURRED_CLASS}"));
    let count = filtered.length();
    for post in filtered.iter() {
        post.remove_class(HIDDEN_CLASS);
        post.remove_class(BLURRED_CLASS);
        post.remove_class(REVEALED_CLASS);
        post.add_class(display_class(blur_mode));
    }
    (doc.html().to_string(), count)
}

/// Flips whether hidden posts are shown with a marker frame. Returns the
/// new snapshot and the new state.
pub fn toggle_show_filtered(html: &str) -> (String, bool) {
    let doc = Document::from(html);
    ensure_styles(&doc);
    let body = doc.select("body");
    let showing = body.has_class(SHOW_FILTERED_CLASS);
    if showing {
        body.remove_class(SHOW_FILTERED_CLASS);
    } else {
        body.add_class(SHOW_FILTERED_CLASS);
    }
    (doc.html().to_string(), !showing)
}

fn ensure_styles(doc: &Document) {
    if doc.select(&format!("style#{STYLE_ID}")).exists() {
        return;
    }
    doc.select("head")
        .append_html(format!(r#"<style id="{STYLE_ID}">{FILTER_STYLES}</style>"#));
}

/// One past the highest key on the page. Posts dropped from the feed leave
/// gaps, so the count of keyed nodes is not a free key.
fn next_node_key(doc: &Document) -> usize {
    doc.select(&format!("[{NODE_KEY_ATTR}]"))
        .iter()
        .filter_map(|node| node.attr(NODE_KEY_ATTR)?.parse::<usize>().ok())
        .max()
        .map_or(0, |max| max + 1)
}

fn node_selector(node_key: &str) -> String {
    format!(r#"[{NODE_KEY_ATTR}="{node_key}"]"#)
}

fn display_class(blur_mode: bool) -> &'static str {
    if blur_mode {
        BLURRED_CLASS
    } else {
        HIDDEN_CLASS
    }
}
