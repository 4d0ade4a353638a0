use anyhow::Result;
use tokio::io::{self, AsyncBufReadExt, BufReader};

use crate::{
    db::{audit::AuditRepo, cache::now_ms, settings::SettingsRepo},
    infrastructure::shutdown::ShutdownListener,
    stats::StatsReport,
    tasks::control::{ControlHandle, ControlRequest},
};

use super::command::{ConsoleCommand, HELP};

/// Operator surface over stdin: settings writes, display toggles and stats.
pub struct ConsoleService {
    settings: SettingsRepo,
    audit: AuditRepo,
    control: ControlHandle,
}

impl ConsoleService {
    pub fn new(settings: SettingsRepo, audit: AuditRepo, control: ControlHandle) -> Self {
        Self {
            settings,
            audit,
            control,
        }
    }

    pub async fn run(self, mut shutdown: ShutdownListener) {
        let mut lines = BufReader::new(io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => println!("{}", self.handle_line(&line).await),
                    Ok(None) => {
                        tracing::debug!(target: "console", "stdin closed");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(target: "console", error = %err, "failed to read command");
                        break;
                    }
                },
                _ = shutdown.notified() => break,
            }
        }
    }

    pub async fn handle_line(&self, line: &str) -> String {
        match line.parse::<ConsoleCommand>() {
            Ok(command) => self.execute(command).await,
            Err(err) => err.to_string(),
        }
    }

    pub async fn execute(&self, command: ConsoleCommand) -> String {
        tracing::debug!(target: "console", ?command, "console command");
        match command {
            ConsoleCommand::Status => self.status().await.unwrap_or_else(|err| {
                tracing::error!(target: "console", error = %err, "failed to load settings");
                "Error loading settings!".to_string()
            }),
            ConsoleCommand::SetKey(key) => saved(
                self.settings.set_api_key(key.trim()).await,
                "API key saved!",
                "Error saving API key!",
            ),
            ConsoleCommand::Enable(enabled) => saved(
                self.settings.set_enabled(enabled).await,
                if enabled { "Filter enabled!" } else { "Filter disabled!" },
                "Error saving settings!",
            ),
            ConsoleCommand::Filter(label, enabled) => saved(
                self.settings.set_filter(label, enabled).await.map(|_| ()),
                &format!("{label} filter {}!", if enabled { "enabled" } else { "disabled" }),
                "Error saving settings!",
            ),
            ConsoleCommand::Blur(blur_mode) => {
                if let Err(err) = self.settings.set_blur_mode(blur_mode).await {
                    tracing::error!(target: "console", error = %err, "failed to save blur mode");
                    return "Error saving settings!".to_string();
                }
                self.request(
                    ControlRequest::UpdateBlurMode { blur_mode },
                    if blur_mode { "Blur mode enabled!" } else { "Blur mode disabled!" },
                )
                .await
            }
            ConsoleCommand::ShowFiltered => {
                self.request(ControlRequest::ShowFilteredPosts, "Toggled filtered posts.")
                    .await
            }
            ConsoleCommand::Debug(debug) => saved(
                self.settings.set_debug_mode(debug).await,
                if debug { "Debug mode enabled!" } else { "Debug mode disabled!" },
                "Error saving settings!",
            ),
            ConsoleCommand::Stats => match self.audit.list().await {
                Ok(entries) => {
                    let now = now_ms();
                    StatsReport::build(&entries, now).render(now)
                }
                Err(err) => {
                    tracing::error!(target: "console", error = %err, "failed to read filtered posts");
                    "Error loading stats!".to_string()
                }
            },
            ConsoleCommand::Help => HELP.to_string(),
        }
    }

    async fn status(&self) -> Result<String> {
        let settings = self.settings.load().await?;
        let on_off = |on: bool| if on { "on" } else { "off" };
        let mut out = format!(
            "Filtering: {}\nAPI key: {}\nBlur mode: {}\nDebug mode: {}\nFilters:",
            on_off(settings.is_enabled),
            if settings.has_api_key() { "set" } else { "missing (!)" },
            on_off(settings.blur_mode),
            on_off(settings.debug_mode),
        );
        for (label, enabled) in settings.filter_settings.iter() {
            out.push_str(&format!("\n  {:<12} {}", label.as_str(), on_off(enabled)));
        }
        Ok(out)
    }

    async fn request(&self, request: ControlRequest, success: &str) -> String {
        match self.control.send(request).await {
            Ok(response) if response.success => success.to_string(),
            Ok(response) => format!(
                "Request failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            ),
            Err(err) => format!("Request failed: {err}"),
        }
    }
}

fn saved(result: Result<()>, success: &str, failure: &str) -> String {
    match result {
        Ok(()) => success.to_string(),
        Err(err) => {
            tracing::error!(target: "console", error = %err, "failed to save settings");
            failure.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        ai::ClassifyError,
        db::{init_memory_pool, store::KvStore},
        domain::{AuditEntry, Label, ScoreSet},
        infrastructure::shutdown::Shutdown,
        tasks::control::{spawn_control_service, ControlHandler},
    };

    #[derive(Default)]
    struct Display {
        blur: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl ControlHandler for Display {
        async fn analyze(&self, _text: &str) -> Result<Option<ScoreSet>, ClassifyError> {
            Ok(None)
        }

        async fn show_filtered(&self) -> anyhow::Result<()> {
            anyhow::bail!("no pages")
        }

        async fn update_blur_mode(&self, blur_mode: bool) -> anyhow::Result<()> {
            *self.blur.lock() = Some(blur_mode);
            Ok(())
        }

        fn update_debug_mode(&self, _debug_mode: bool) {}
    }

    async fn console() -> (ConsoleService, SettingsRepo, AuditRepo, Arc<Display>, Shutdown) {
        let store = KvStore::new(init_memory_pool().await.unwrap());
        let settings = SettingsRepo::new(store.clone());
        let audit = AuditRepo::new(store);
        let display = Arc::new(Display::default());
        let shutdown = Shutdown::new();
        let (control, _task) = spawn_control_service(display.clone(), shutdown.subscribe());
        let console = ConsoleService::new(settings.clone(), audit.clone(), control);
        (console, settings, audit, display, shutdown)
    }

    #[tokio::test]
    async fn settings_commands_persist() {
        let (console, settings, _, _, _shutdown) = console().await;

        assert_eq!(console.handle_line("key sk-or-abc").await, "API key saved!");
        assert_eq!(console.handle_line("disable").await, "Filter disabled!");
        assert_eq!(
            console.handle_line("filter racism on").await,
            "racism filter enabled!"
        );
        assert_eq!(console.handle_line("debug on").await, "Debug mode enabled!");

        let stored = settings.load().await.unwrap();
        assert_eq!(stored.api_key, "sk-or-abc");
        assert!(!stored.is_enabled);
        assert!(stored.filter_settings.is_enabled(Label::Racism));
        assert!(stored.debug_mode);

        let status = console.handle_line("status").await;
        assert!(status.contains("Filtering: off"));
        assert!(status.contains("API key: set"));
    }

    #[tokio::test]
    async fn display_commands_go_through_control_channel() {
        let (console, settings, _, display, _shutdown) = console().await;

        assert_eq!(console.handle_line("blur on").await, "Blur mode enabled!");
        assert_eq!(*display.blur.lock(), Some(true));
        assert!(settings.load().await.unwrap().blur_mode);

        assert_eq!(console.handle_line("show").await, "Request failed: no pages");
    }

    #[tokio::test]
    async fn stats_and_errors_render() {
        let (console, _, audit, _, _shutdown) = console().await;
        let scores: ScoreSet = [(Label::Cynical, 0.8)].into_iter().collect();
        audit
            .append(AuditEntry::new(
                "meh".into(),
                scores,
                Label::Cynical,
                "https://x.com/home".into(),
                now_ms(),
            ))
            .await
            .unwrap();

        let stats = console.handle_line("stats").await;
        assert!(stats.starts_with("Total Blocked: 1"));
        assert!(console.handle_line("frobnicate").await.starts_with("unknown command"));
    }
}
