use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use futures::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs;

use crate::{
    ai::{Classifier, ClassifyError},
    db::{audit::AuditRepo, cache::{now_ms, CacheRepo}, settings::SettingsRepo},
    domain::{AuditEntry, PostCandidate, Settings, Verdict},
    feed::{page, watcher::list_pages},
};

use super::decision::DecisionEngine;

/// Back-to-back rescans after an invalidated context before the page is left
/// for its next watcher batch.
const MAX_INVALIDATED_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page context invalidated while processing")]
    ContextInvalidated,
    #[error("failed to access page {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub marked: usize,
    pub candidates: usize,
    pub cache_hits: usize,
    pub filtered: usize,
    pub unscored: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum PostOutcome {
    Filtered { verdict: Verdict, cached: bool },
    Visible { cached: bool },
    Unscored,
    Failed,
}

pub struct ModerationPipeline {
    settings: SettingsRepo,
    cache: CacheRepo,
    audit: AuditRepo,
    classifier: Arc<dyn Classifier>,
    engine: DecisionEngine,
    /// Pages being scanned, each with whether another scan was requested
    /// meanwhile.
    scans: Mutex<HashMap<PathBuf, bool>>,
}

impl ModerationPipeline {
    pub fn new(
        settings: SettingsRepo,
        cache: CacheRepo,
        audit: AuditRepo,
        classifier: Arc<dyn Classifier>,
        engine: DecisionEngine,
    ) -> Self {
        Self {
            settings,
            cache,
            audit,
            classifier,
            engine,
            scans: Mutex::new(HashMap::new()),
        }
    }

    /// Processes every page in the batch concurrently.
    pub async fn process_batch(&self, paths: Vec<PathBuf>) {
        tracing::debug!(target: "processor", pages = paths.len(), "processing batch");
        join_all(paths.iter().map(|path| self.process_page(path))).await;
    }

    /// Scans one page, serialized per path. A request for a page already
    /// being scanned is folded into one more pass once the current one ends.
    pub async fn process_page(&self, path: &Path) {
        if !self.begin_scan(path) {
            tracing::debug!(target: "processor", path = %path.display(), "scan already running, queued rescan");
            return;
        }

        let mut retries = 0;
        loop {
            match self.scan_once(path).await {
                Ok(summary) if summary.marked > 0 => {
                    tracing::info!(
                        target: "processor",
                        path = %path.display(),
                        posts = summary.candidates,
                        cached = summary.cache_hits,
                        filtered = summary.filtered,
                        unscored = summary.unscored,
                        failed = summary.failed,
                        "page scanned"
                    );
                }
                Ok(_) => {}
                Err(PageError::ContextInvalidated) if retries < MAX_INVALIDATED_RETRIES => {
                    retries += 1;
                    tracing::info!(target: "processor", path = %path.display(), retries, "page context invalidated, reloading");
                    continue;
                }
                Err(PageError::ContextInvalidated) => {
                    tracing::warn!(target: "processor", path = %path.display(), "page keeps changing, waiting for its next change");
                }
                Err(err) => {
                    tracing::warn!(target: "processor", path = %path.display(), error = %err, "page scan failed");
                }
            }
            if !self.finish_pass(path) {
                break;
            }
            retries = 0;
        }
    }

    /// Claims the page for scanning, or records a rescan request when a scan
    /// already holds it.
    fn begin_scan(&self, path: &Path) -> bool {
        let mut scans = self.scans.lock();
        match scans.get_mut(path) {
            Some(requested) => {
                *requested = true;
                false
            }
            None => {
                scans.insert(path.to_path_buf(), false);
                true
            }
        }
    }

    /// Ends one pass. Returns true, keeping the claim, when a rescan was
    /// requested during the pass; otherwise releases the page.
    fn finish_pass(&self, path: &Path) -> bool {
        let mut scans = self.scans.lock();
        match scans.get_mut(path) {
            Some(requested) if *requested => {
                *requested = false;
                true
            }
            _ => {
                scans.remove(path);
                false
            }
        }
    }

    /// One mark → extract → classify → decide → mutate → audit pass.
    pub async fn scan_once(&self, path: &Path) -> Result<ScanSummary, PageError> {
        let settings = self.settings.load().await?;
        if !settings.is_enabled {
            tracing::debug!(target: "processor", "filtering disabled, skipping scan");
            return Ok(ScanSummary::default());
        }

        let original = read_page(path).await?;
        let Some(scan) = page::scan_page(&original) else {
            tracing::debug!(target: "processor", path = %path.display(), "not a supported feed page");
            return Ok(ScanSummary::default());
        };
        let mut summary = ScanSummary {
            marked: scan.marked,
            candidates: scan.candidates.len(),
            ..ScanSummary::default()
        };
        if scan.marked == 0 {
            return Ok(summary);
        }
        tracing::debug!(
            target: "processor",
            platform = scan.platform.name(),
            posts = scan.candidates.len(),
            "found posts to process"
        );

        let outcomes = join_all(
            scan.candidates
                .iter()
                .map(|candidate| self.process_post(candidate, &settings)),
        )
        .await;

        let mut verdicts = Vec::new();
        for outcome in outcomes {
            match outcome? {
                PostOutcome::Filtered { verdict, cached } => {
                    summary.cache_hits += usize::from(cached);
                    verdicts.push(verdict);
                }
                PostOutcome::Visible { cached } => summary.cache_hits += usize::from(cached),
                PostOutcome::Unscored => summary.unscored += 1,
                PostOutcome::Failed => summary.failed += 1,
            }
        }

        if read_page(path).await? != original {
            return Err(PageError::ContextInvalidated);
        }
        let (html, applied) = page::apply_verdicts(&scan.html, &verdicts, settings.blur_mode);
        write_page(path, &html).await?;
        summary.filtered = applied;

        let now = now_ms();
        for verdict in verdicts {
            let entry = AuditEntry::new(verdict.text, verdict.scores, verdict.label, scan.url.clone(), now);
            if let Err(err) = self.audit.append(entry).await {
                tracing::warn!(target: "processor", error = %err, "failed to record filtered post");
            }
        }
        Ok(summary)
    }

    async fn process_post(
        &self,
        candidate: &PostCandidate,
        settings: &Settings,
    ) -> Result<PostOutcome, PageError> {
        match self.evaluate_post(candidate, settings).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if is_invalidated(&err) => Err(PageError::ContextInvalidated),
            Err(err) => {
                tracing::warn!(
                    target: "processor",
                    node_key = %candidate.node_key,
                    error = %err,
                    "post processing failed"
                );
                Ok(PostOutcome::Failed)
            }
        }
    }

    async fn evaluate_post(&self, candidate: &PostCandidate, settings: &Settings) -> Result<PostOutcome> {
        let cached_scores = match &candidate.post_id {
            Some(post_id) => self.cache.get(post_id).await?,
            None => None,
        };

        let cached = cached_scores.is_some();
        let scores = match cached_scores {
            Some(scores) => {
                tracing::debug!(target: "processor", post_id = ?candidate.post_id, "using cached scores");
                scores
            }
            None => match self.classifier.classify(&candidate.text).await {
                Ok(Some(scores)) => {
                    if let Some(post_id) = &candidate.post_id {
                        self.cache.put(post_id, scores.clone()).await?;
                    }
                    scores
                }
                Ok(None) => return Ok(PostOutcome::Unscored),
                Err(ClassifyError::ContextInvalidated) => {
                    return Err(ClassifyError::ContextInvalidated.into())
                }
                Err(err @ ClassifyError::ApiKeyMissing) => {
                    tracing::error!(target: "processor", error = %err, "cannot classify posts");
                    return Ok(PostOutcome::Unscored);
                }
                Err(err) => {
                    tracing::warn!(target: "processor", error = %err, "classification failed, leaving post visible");
                    return Ok(PostOutcome::Unscored);
                }
            },
        };

        let Some(label) = self.engine.decide(&scores, &settings.filter_settings) else {
            return Ok(PostOutcome::Visible { cached });
        };
        tracing::debug!(
            target: "processor",
            label = %label,
            score = scores.score(label),
            mode = if settings.blur_mode { "blurred" } else { "hidden" },
            "post filtered"
        );
        Ok(PostOutcome::Filtered {
            verdict: Verdict {
                node_key: candidate.node_key.clone(),
                label,
                text: candidate.text.clone(),
                scores,
            },
            cached,
        })
    }
}

/// Display-only rewrites of every page in the pages directory.
#[derive(Debug, Clone)]
pub struct PageDisplay {
    pages_dir: PathBuf,
}

impl PageDisplay {
    pub fn new(pages_dir: PathBuf) -> Self {
        Self { pages_dir }
    }

    /// Toggles show-filtered display on every page. Returns pages rewritten.
    pub async fn toggle_show_filtered(&self) -> Result<usize> {
        self.rewrite_pages(|html| Some(page::toggle_show_filtered(html).0))
            .await
    }

    /// Moves every filtered post to the given display mode.
    pub async fn restyle_all(&self, blur_mode: bool) -> Result<usize> {
        self.rewrite_pages(|html| {
            let (restyled, count) = page::restyle(html, blur_mode);
            (count > 0).then_some(restyled)
        })
        .await
    }

    async fn rewrite_pages<F>(&self, transform: F) -> Result<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rewritten = 0;
        for path in list_pages(&self.pages_dir)? {
            let html = read_page(&path).await?;
            if let Some(updated) = transform(&html) {
                if updated != html {
                    write_page(&path, &updated).await?;
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }
}

fn is_invalidated(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ClassifyError>(),
        Some(ClassifyError::ContextInvalidated)
    )
}

async fn read_page(path: &Path) -> Result<String, PageError> {
    fs::read_to_string(path).await.map_err(|source| PageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_page(path: &Path, html: &str) -> Result<(), PageError> {
    fs::write(path, html).await.map_err(|source| PageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{init_memory_pool, store::KvStore},
        domain::{Label, ScoreSet},
        feed::page::{BLURRED_CLASS, FILTER_TYPE_ATTR, HIDDEN_CLASS, PROCESSED_ATTR},
    };
    use async_trait::async_trait;
    use dom_query::Document;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Scores text by keyword: "gloom" is cynical, "snark" is sarcastic,
    /// "fail" errors, "invalid" tears the context down.
    #[derive(Default)]
    struct KeywordClassifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for KeywordClassifier {
        async fn classify(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("invalid") {
                return Err(ClassifyError::ContextInvalidated);
            }
            if text.contains("fail") {
                return Err(ClassifyError::ApiKeyMissing);
            }
            if text.contains("garbled") {
                return Ok(None);
            }
            let mut scores: ScoreSet = Label::ALL
                .into_iter()
                .filter(|l| l.is_required())
                .map(|l| (l, 0.1))
                .collect();
            if text.contains("gloom") {
                scores.insert(Label::Cynical, 0.6);
            }
            if text.contains("snark") {
                scores.insert(Label::Sarcastic, 0.9);
            }
            Ok(Some(scores))
        }
    }

    struct Fixture {
        dir: TempDir,
        pipeline: ModerationPipeline,
        classifier: Arc<KeywordClassifier>,
        settings: SettingsRepo,
        cache: CacheRepo,
        audit: AuditRepo,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::new(init_memory_pool().await.unwrap());
        let settings = SettingsRepo::new(store.clone());
        let cache = CacheRepo::new(store.clone());
        let audit = AuditRepo::new(store);
        let classifier = Arc::new(KeywordClassifier::default());
        let pipeline = ModerationPipeline::new(
            settings.clone(),
            cache.clone(),
            audit.clone(),
            classifier.clone(),
            DecisionEngine::default(),
        );
        Fixture {
            dir,
            pipeline,
            classifier,
            settings,
            cache,
            audit,
        }
    }

    fn feed(posts: &[(&str, &str)]) -> String {
        let articles: String = posts
            .iter()
            .map(|(id, text)| {
                format!(
                    r#"<article data-testid="tweet"><a href="/u/status/{id}">1m</a><div data-testid="tweetText">{text}</div></article>"#
                )
            })
            .collect();
        format!(
            r#"<html><head><link rel="canonical" href="https://x.com/home"></head><body>{articles}</body></html>"#
        )
    }

    fn post_with_status<'a>(doc: &'a Document, id: &str) -> dom_query::Selection<'a> {
        doc.select(r#"article[data-testid="tweet"]"#)
            .iter()
            .find(|post| post.select(&format!(r#"a[href="/u/status/{id}"]"#)).exists())
            .expect("post present")
    }

    #[tokio::test]
    async fn rescan_requests_during_a_scan_are_never_dropped() {
        let fx = fixture().await;
        let page = fx.dir.path().join("home.html");

        assert!(fx.pipeline.begin_scan(&page));
        for _ in 0..4 {
            assert!(!fx.pipeline.begin_scan(&page));
            assert!(fx.pipeline.finish_pass(&page));
        }
        assert!(!fx.pipeline.finish_pass(&page));
        assert!(fx.pipeline.begin_scan(&page));
        assert!(!fx.pipeline.finish_pass(&page));
    }

    #[tokio::test]
    async fn cynical_post_is_hidden_and_logged() {
        let fx = fixture().await;
        let path = fx.dir.path().join("home.html");
        std::fs::write(&path, feed(&[("1", "such gloom"), ("2", "nice day")])).unwrap();

        let summary = fx.pipeline.scan_once(&path).await.unwrap();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.filtered, 1);

        let html = std::fs::read_to_string(&path).unwrap();
        let doc = Document::from(html.as_str());
        let hidden = post_with_status(&doc, "1");
        assert!(hidden.has_class(HIDDEN_CLASS));
        assert_eq!(hidden.attr(FILTER_TYPE_ATTR).as_deref(), Some("cynical"));
        let visible = post_with_status(&doc, "2");
        assert!(!visible.has_class(HIDDEN_CLASS));
        assert!(visible.has_attr(PROCESSED_ATTR));

        let entries = fx.audit.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filter_type, Some(Label::Cynical));
        assert_eq!(entries[0].url, "https://x.com/home");
        assert!(fx.cache.is_fresh("1").await.unwrap());
        assert!(fx.cache.is_fresh("2").await.unwrap());
    }

    #[tokio::test]
    async fn first_enabled_label_is_recorded() {
        let fx = fixture().await;
        fx.settings.set_filter(Label::Sarcastic, true).await.unwrap();
        let path = fx.dir.path().join("home.html");
        std::fs::write(&path, feed(&[("7", "gloom and snark")])).unwrap();

        fx.pipeline.scan_once(&path).await.unwrap();
        let entries = fx.audit.list().await.unwrap();
        assert_eq!(entries[0].filter_type, Some(Label::Cynical));
    }

    #[tokio::test]
    async fn cached_posts_skip_the_classifier() {
        let fx = fixture().await;
        let path = fx.dir.path().join("home.html");
        std::fs::write(&path, feed(&[("1", "such gloom"), ("2", "nice day")])).unwrap();
        fx.pipeline.scan_once(&path).await.unwrap();
        assert_eq!(fx.classifier.calls.load(Ordering::SeqCst), 2);

        let reloaded = fx.dir.path().join("reloaded.html");
        std::fs::write(&reloaded, feed(&[("1", "such gloom"), ("2", "nice day")])).unwrap();
        let summary = fx.pipeline.scan_once(&reloaded).await.unwrap();
        assert_eq!(summary.cache_hits, 2);
        assert_eq!(summary.filtered, 1);
        assert_eq!(fx.classifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn marked_posts_are_not_reprocessed() {
        let fx = fixture().await;
        let path = fx.dir.path().join("home.html");
        std::fs::write(&path, feed(&[("1", "such gloom")])).unwrap();
        fx.pipeline.scan_once(&path).await.unwrap();

        let again = fx.pipeline.scan_once(&path).await.unwrap();
        assert_eq!(again, ScanSummary::default());
        assert_eq!(fx.audit.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failures_stay_isolated_to_their_post() {
        let fx = fixture().await;
        let path = fx.dir.path().join("home.html");
        std::fs::write(
            &path,
            feed(&[("1", "this will fail"), ("2", "garbled"), ("3", "gloom")]),
        )
        .unwrap();

        let summary = fx.pipeline.scan_once(&path).await.unwrap();
        assert_eq!(summary.unscored, 2);
        assert_eq!(summary.filtered, 1);
        assert!(!fx.cache.is_fresh("1").await.unwrap());

        let html = std::fs::read_to_string(&path).unwrap();
        let doc = Document::from(html.as_str());
        assert!(post_with_status(&doc, "1").has_attr(PROCESSED_ATTR));
        assert!(!post_with_status(&doc, "1").has_class(HIDDEN_CLASS));
    }

    #[tokio::test]
    async fn invalidated_context_leaves_page_untouched() {
        let fx = fixture().await;
        let path = fx.dir.path().join("home.html");
        let original = feed(&[("1", "gloom"), ("2", "invalid")]);
        std::fs::write(&path, &original).unwrap();

        let err = fx.pipeline.scan_once(&path).await.unwrap_err();
        assert!(matches!(err, PageError::ContextInvalidated));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert!(fx.audit.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidation_retries_are_bounded() {
        let fx = fixture().await;
        let path = fx.dir.path().join("home.html");
        std::fs::write(&path, feed(&[("2", "invalid")])).unwrap();

        fx.pipeline.process_page(&path).await;
        assert_eq!(
            fx.classifier.calls.load(Ordering::SeqCst),
            1 + MAX_INVALIDATED_RETRIES
        );
        assert!(fx.pipeline.begin_scan(&path));
    }

    #[tokio::test]
    async fn disabled_filter_leaves_posts_unmarked() {
        let fx = fixture().await;
        fx.settings.set_enabled(false).await.unwrap();
        let path = fx.dir.path().join("home.html");
        let original = feed(&[("1", "gloom")]);
        std::fs::write(&path, &original).unwrap();

        fx.pipeline.process_page(&path).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert_eq!(fx.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blur_mode_blurs_and_restyle_switches_back() {
        let fx = fixture().await;
        fx.settings.set_blur_mode(true).await.unwrap();
        let path = fx.dir.path().join("home.html");
        std::fs::write(&path, feed(&[("1", "gloom")])).unwrap();
        fx.pipeline.process_batch(vec![path.clone()]).await;

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(post_with_status(&Document::from(html.as_str()), "1").has_class(BLURRED_CLASS));

        let display = PageDisplay::new(fx.dir.path().to_path_buf());
        assert_eq!(display.restyle_all(false).await.unwrap(), 1);
        let html = std::fs::read_to_string(&path).unwrap();
        let doc = Document::from(html.as_str());
        assert!(post_with_status(&doc, "1").has_class(HIDDEN_CLASS));
        assert!(!post_with_status(&doc, "1").has_class(BLURRED_CLASS));

        assert_eq!(display.toggle_show_filtered().await.unwrap(), 1);
        assert_eq!(display.restyle_all(false).await.unwrap(), 0);
    }
}
