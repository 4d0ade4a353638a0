use tokio::sync::watch;

/// Fan-out stop signal for the watcher, console and control service.
#[derive(Clone)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

/// Receiving half of [`Shutdown`]. Resolves immediately once triggered, even
/// for listeners subscribed afterwards.
#[derive(Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn trigger(&self, reason: &str) {
        let first = self.sender.send_if_modified(|stopped| !std::mem::replace(stopped, true));
        if first {
            tracing::info!(reason, "shutting down");
        }
    }

    /// Triggers on ctrl-c, and on SIGTERM where available.
    pub fn listen_for_signals(&self) {
        let ctrlc = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrlc.trigger("ctrl-c");
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let term = self.clone();
            tokio::spawn(async move {
                if let Ok(mut sig) = signal(SignalKind::terminate()) {
                    sig.recv().await;
                    term.trigger("SIGTERM");
                }
            });
        }
    }
}

impl ShutdownListener {
    pub async fn notified(&mut self) {
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}
