//! Change feed for the pages directory.
//!
//! Filesystem events are collapsed into batches: every relevant event pushes
//! the deadline out by the debounce delay, and the pending paths are emitted
//! once the directory has been quiet that long.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};

use crate::infrastructure::shutdown::ShutdownListener;

pub fn is_page_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

pub fn is_relevant_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| is_page_file(p))
}

/// Page files currently in `dir`, sorted.
pub fn list_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_page_file(&path) {
            pages.push(path);
        }
    }
    pages.sort();
    Ok(pages)
}

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: BTreeSet::new(),
            last_event: None,
        }
    }

    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path);
        self.last_event = Some(now);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|at| at + self.delay)
    }

    /// Drains the pending paths once the quiet period has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_event = None;
        let batch: Vec<PathBuf> = std::mem::take(&mut self.pending).into_iter().collect();
        (!batch.is_empty()).then_some(batch)
    }
}

pub struct FeedWatcher {
    _watcher: RecommendedWatcher,
    batches: mpsc::Receiver<Vec<PathBuf>>,
}

impl FeedWatcher {
    /// Watches `dir` and emits debounced batches of changed page files. The
    /// first batch lists the pages already present.
    pub fn start(dir: PathBuf, debounce: Duration, mut shutdown: ShutdownListener) -> Result<Self> {
        let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let (batch_tx, batches) = mpsc::channel::<Vec<PathBuf>>(16);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("failed to create page watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        tracing::info!(target: "feed", dir = %dir.display(), "watching pages directory");

        let initial = list_pages(&dir)?;

        tokio::spawn(async move {
            if !initial.is_empty() && batch_tx.send(initial).await.is_err() {
                return;
            }

            let mut debouncer = Debouncer::new(debounce);
            loop {
                let deadline = debouncer.deadline();
                tokio::select! {
                    received = event_rx.recv() => match received {
                        Some(Ok(event)) => {
                            if is_relevant_event(&event) {
                                let now = Instant::now();
                                for path in event.paths.into_iter().filter(|p| is_page_file(p)) {
                                    tracing::debug!(target: "feed", path = %path.display(), "page change detected");
                                    debouncer.record(path, now);
                                }
                            }
                        }
                        Some(Err(err)) => {
                            tracing::warn!(target: "feed", error = %err, "page watcher error");
                        }
                        None => break,
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        if let Some(batch) = debouncer.take_due(Instant::now()) {
                            tracing::debug!(target: "feed", pages = batch.len(), "scheduling rescan");
                            if batch_tx.send(batch).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
            tracing::info!(target: "feed", "page watcher stopped");
        });

        Ok(Self {
            _watcher: watcher,
            batches,
        })
    }

    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.batches.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::shutdown::Shutdown;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tokio::time::timeout;

    fn names(batch: &[PathBuf]) -> Vec<String> {
        batch
            .iter()
            .filter_map(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn only_page_files_are_relevant() {
        let create = Event {
            kind: EventKind::Create(CreateKind::File),
            paths: vec![PathBuf::from("/pages/home.html")],
            attrs: Default::default(),
        };
        assert!(is_relevant_event(&create));

        let modify = Event {
            kind: EventKind::Modify(ModifyKind::Any),
            paths: vec![PathBuf::from("/pages/notes.txt")],
            attrs: Default::default(),
        };
        assert!(!is_relevant_event(&modify));

        let remove = Event {
            kind: EventKind::Remove(RemoveKind::File),
            paths: vec![PathBuf::from("/pages/home.HTM")],
            attrs: Default::default(),
        };
        assert!(!is_relevant_event(&remove));
    }

    #[test]
    fn bursts_collapse_into_one_batch() {
        let mut debouncer = Debouncer::new(Duration::from_millis(250));
        let start = Instant::now();
        debouncer.record(PathBuf::from("a.html"), start);
        debouncer.record(PathBuf::from("b.html"), start + Duration::from_millis(100));
        debouncer.record(PathBuf::from("a.html"), start + Duration::from_millis(200));

        assert!(debouncer.take_due(start + Duration::from_millis(300)).is_none());
        let batch = debouncer
            .take_due(start + Duration::from_millis(450))
            .expect("batch");
        assert_eq!(batch, vec![PathBuf::from("a.html"), PathBuf::from("b.html")]);
        assert!(debouncer.deadline().is_none());
        assert!(debouncer.take_due(start + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn list_pages_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.html"), "<html></html>").unwrap();
        fs::write(dir.path().join("a.htm"), "<html></html>").unwrap();
        fs::write(dir.path().join("readme.md"), "#").unwrap();

        let pages = list_pages(dir.path()).unwrap();
        assert_eq!(pages, vec![dir.path().join("a.htm"), dir.path().join("b.html")]);
    }

    #[tokio::test]
    async fn emits_existing_pages_then_debounced_changes() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("home.html");
        fs::write(&page, "<html></html>").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let shutdown = Shutdown::new();
        let mut watcher = FeedWatcher::start(
            dir.path().to_path_buf(),
            Duration::from_millis(50),
            shutdown.subscribe(),
        )
        .unwrap();

        let initial = timeout(Duration::from_secs(2), watcher.next_batch())
            .await
            .expect("initial batch")
            .expect("watcher open");
        assert_eq!(names(&initial), vec!["home.html"]);

        fs::write(&page, "<html><body>updated</body></html>").unwrap();
        let changed = timeout(Duration::from_secs(5), async {
            loop {
                match watcher.next_batch().await {
                    Some(batch) if names(&batch).iter().any(|n| n == "home.html") => break batch,
                    Some(_) => continue,
                    None => panic!("watcher closed before the change arrived"),
                }
            }
        })
        .await
        .expect("debounced batch");
        assert!(names(&changed).iter().all(|n| n.ends_with(".html")));

        shutdown.trigger("test");
        let closed = timeout(Duration::from_secs(2), async {
            while watcher.next_batch().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
