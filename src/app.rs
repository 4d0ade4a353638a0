use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle, time::timeout};

use crate::{
    ai::{Classifier, ClassifyError, OpenRouterClient},
    config::AppConfig,
    console::ConsoleService,
    db::{
        self,
        audit::AuditRepo,
        cache::CacheRepo,
        settings::SettingsRepo,
        store::{KvStore, StorageChange},
    },
    domain::{
        settings::{KEY_API_KEY, KEY_DEBUG_MODE},
        ScoreSet,
    },
    feed::FeedWatcher,
    infrastructure::{directories::ResolvedPaths, logging::DebugSwitch, shutdown::Shutdown},
    tasks::{
        control::{spawn_control_service, ControlHandle, ControlHandler, ControlRequest},
        decision::DecisionEngine,
        processor::{ModerationPipeline, PageDisplay},
    },
};

/// Privileged side of the control channel: owns the remote classifier and
/// the page display operations.
struct BackgroundHandler {
    client: Arc<OpenRouterClient>,
    display: PageDisplay,
    debug: DebugSwitch,
}

#[async_trait]
impl ControlHandler for BackgroundHandler {
    async fn analyze(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError> {
        self.client.classify(text).await
    }

    async fn show_filtered(&self) -> Result<()> {
        let pages = self.display.toggle_show_filtered().await?;
        tracing::info!(target: "control", pages, "toggled filtered posts");
        Ok(())
    }

    async fn update_blur_mode(&self, blur_mode: bool) -> Result<()> {
        let pages = self.display.restyle_all(blur_mode).await?;
        tracing::info!(target: "control", blur_mode, pages, "display mode updated");
        Ok(())
    }

    fn update_debug_mode(&self, debug_mode: bool) {
        self.debug.set(debug_mode);
    }
}

pub struct MuteTheWebApp {
    paths: ResolvedPaths,
    store: KvStore,
    sync: SettingsSync,
    control_task: JoinHandle<()>,
    pipeline: Arc<ModerationPipeline>,
    console: ConsoleService,
    config: Arc<AppConfig>,
    shutdown: Shutdown,
}

impl MuteTheWebApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        debug: DebugSwitch,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let pool = db::init_pool(&paths.db_path).await?;
        let store = KvStore::new(pool);
        let settings = SettingsRepo::new(store.clone());
        let cache = CacheRepo::new(store.clone());
        let audit = AuditRepo::new(store.clone());

        let written = settings
            .initialize_defaults(config.openrouter.api_key.as_deref())
            .await?;
        if !written.is_empty() {
            tracing::info!(target: "db", keys = ?written, "initialized default settings");
        }
        let current = settings.load().await?;

        let http_client = Client::builder()
            .user_agent(format!("mutetheweb/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        let client = Arc::new(OpenRouterClient::new(
            http_client,
            config.openrouter.clone(),
        ));
        apply_api_key(&client, &current.api_key);
        if current.debug_mode {
            debug.set(true);
        }

        let handler = Arc::new(BackgroundHandler {
            client: client.clone(),
            display: PageDisplay::new(paths.pages_dir.clone()),
            debug,
        });
        let (control, control_task) = spawn_control_service(handler, shutdown.subscribe());

        let engine = DecisionEngine::new(config.filter.thresholds.clone(), config.filter.policy);
        let pipeline = Arc::new(ModerationPipeline::new(
            settings.clone(),
            cache,
            audit.clone(),
            Arc::new(control.clone()),
            engine,
        ));
        let console = ConsoleService::new(settings.clone(), audit, control.clone());
        let sync = SettingsSync {
            settings,
            client,
            control,
        };

        Ok(Self {
            paths,
            store,
            sync,
            control_task,
            pipeline,
            console,
            config,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let MuteTheWebApp {
            paths,
            store,
            sync,
            mut control_task,
            pipeline,
            console,
            config,
            shutdown,
        } = self;

        tracing::info!(
            pages = %paths.pages_dir.display(),
            data = %paths.data_dir.display(),
            model = %config.openrouter.model,
            "MuteTheWeb started"
        );

        let mut watcher = FeedWatcher::start(
            paths.pages_dir.clone(),
            config.feed.debounce,
            shutdown.subscribe(),
        )?;
        let mut changes = store.subscribe();
        let console_task = tokio::spawn(console.run(shutdown.subscribe()));
        let mut shutdown_listener = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_listener.notified() => break,
                batch = watcher.next_batch() => {
                    let Some(batch) = batch else {
                        tracing::warn!(target: "feed", "page watcher closed");
                        break;
                    };
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move { pipeline.process_batch(batch).await });
                }
                change = changes.recv() => match change {
                    Ok(change) => sync.on_change(change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "db", skipped, "missed storage changes, reloading settings");
                        sync.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        shutdown.trigger("main loop finished");
        let shutdown_timeout = Duration::from_secs(5);
        console_task.abort();

        let control_sleep = tokio::time::sleep(shutdown_timeout);
        tokio::pin!(control_sleep);
        tokio::select! {
            res = &mut control_task => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!("control service panicked");
                    }
                }
            }
            _ = &mut control_sleep => {
                tracing::warn!(
                    target: "control",
                    "control service did not stop within {:?}; aborting",
                    shutdown_timeout
                );
                control_task.abort();
            }
        }

        if timeout(shutdown_timeout, store.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "storage did not close within {:?}",
                shutdown_timeout
            );
        }

        tracing::info!("MuteTheWeb stopped");
        Ok(())
    }
}

/// Mirrors settings written by the console into the live services.
struct SettingsSync {
    settings: SettingsRepo,
    client: Arc<OpenRouterClient>,
    control: ControlHandle,
}

impl SettingsSync {
    async fn on_change(&self, change: StorageChange) {
        match change.key.as_str() {
            KEY_API_KEY => {
                let key = change
                    .new_value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                apply_api_key(&self.client, key);
            }
            KEY_DEBUG_MODE => {
                let debug_mode = change
                    .new_value
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.forward_debug_mode(debug_mode).await;
            }
            _ => {}
        }
    }

    /// Re-reads every setting after change notifications were dropped.
    async fn resync(&self) {
        match self.settings.load().await {
            Ok(current) => {
                apply_api_key(&self.client, &current.api_key);
                self.forward_debug_mode(current.debug_mode).await;
            }
            Err(err) => {
                tracing::error!(target: "db", error = %err, "failed to reload settings");
            }
        }
    }

    async fn forward_debug_mode(&self, debug_mode: bool) {
        if let Err(err) = self
            .control
            .send(ControlRequest::UpdateDebugMode { debug_mode })
            .await
        {
            tracing::warn!(target: "control", error = %err, "failed to forward debug mode");
        }
    }
}

fn apply_api_key(client: &OpenRouterClient, key: &str) {
    client.set_api_key(key);
    if client.has_api_key() {
        tracing::info!(target: "ai", "API key configured");
    } else {
        tracing::warn!(target: "ai", "API key not set (!) - posts will not be classified until one is saved");
    }
}
