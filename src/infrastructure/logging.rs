use std::io;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::{config::AppConfig, infrastructure::directories::ResolvedPaths};

/// Verbose directives; dependency chatter stays at info.
const DEBUG_DIRECTIVES: &str = "debug,sqlx=info,hyper=info,hyper_util=info,h2=info,rustls=info,reqwest=info";

static SWITCH: OnceCell<DebugSwitch> = OnceCell::new();
static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Flips the live log filter between the configured level and debug output.
#[derive(Clone)]
pub struct DebugSwitch {
    handle: reload::Handle<EnvFilter, Registry>,
    base: String,
}

impl DebugSwitch {
    pub fn set(&self, enabled: bool) {
        let directives = if enabled { DEBUG_DIRECTIVES } else { self.base.as_str() };
        let filter = match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::warn!(target: "logging", error = %err, directives, "invalid log filter");
                return;
            }
        };
        match self.handle.reload(filter) {
            Ok(()) => tracing::info!(target: "logging", debug = enabled, "log level updated"),
            Err(err) => tracing::warn!(target: "logging", error = %err, "failed to update log level"),
        }
    }
}

pub fn init_tracing(config: &AppConfig, paths: &ResolvedPaths) -> Result<DebugSwitch> {
    let switch = SWITCH.get_or_try_init::<_, anyhow::Error>(|| {
        let base = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| EnvFilter::try_new(v).is_ok())
            .unwrap_or_else(|| config.logging.level.clone());
        let env_filter = EnvFilter::try_new(&base).unwrap_or_else(|_| EnvFilter::new("info"));
        let (filter_layer, handle) = reload::Layer::new(env_filter);

        let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "mutetheweb.log");
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = GUARD.set(guard);

        let console_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(true);

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!(logs = %paths.logs_dir.display(), level = %base, "tracing initialized");
        Ok(DebugSwitch { handle, base })
    })?;
    Ok(switch.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_toggles_between_debug_and_base_level() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
        let switch = DebugSwitch {
            handle: handle.clone(),
            base: "warn".to_string(),
        };
        let current = || handle.with_current(|filter| filter.to_string()).unwrap();

        switch.set(true);
        assert!(current().contains("sqlx=info"));
        switch.set(false);
        assert_eq!(current(), "warn");
    }
}
