use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    ai::{Classifier, ClassifyError, ClassifyErrorKind},
    domain::ScoreSet,
    infrastructure::shutdown::ShutdownListener,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlRequest {
    AnalyzeContent {
        text: String,
    },
    ShowFilteredPosts,
    #[serde(rename_all = "camelCase")]
    UpdateBlurMode {
        blur_mode: bool,
    },
    #[serde(rename_all = "camelCase")]
    UpdateDebugMode {
        debug_mode: bool,
    },
}

impl ControlRequest {
    fn kind(&self) -> &'static str {
        match self {
            ControlRequest::AnalyzeContent { .. } => "analyzeContent",
            ControlRequest::ShowFilteredPosts => "showFilteredPosts",
            ControlRequest::UpdateBlurMode { .. } => "updateBlurMode",
            ControlRequest::UpdateDebugMode { .. } => "updateDebugMode",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ClassifyErrorKind>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, kind: Option<ClassifyErrorKind>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: kind,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control channel closed")]
    Disconnected,
}

/// Privileged side of the control channel.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError>;
    async fn show_filtered(&self) -> anyhow::Result<()>;
    async fn update_blur_mode(&self, blur_mode: bool) -> anyhow::Result<()>;
    fn update_debug_mode(&self, debug_mode: bool);
}

struct Envelope {
    request: ControlRequest,
    reply: oneshot::Sender<ControlResponse>,
}

/// Sending side of the control channel. Every request waits for its answer.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Envelope>,
}

impl ControlHandle {
    pub async fn send(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| ControlError::Disconnected)?;
        answer.await.map_err(|_| ControlError::Disconnected)
    }
}

#[async_trait]
impl Classifier for ControlHandle {
    async fn classify(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError> {
        let response = self
            .send(ControlRequest::AnalyzeContent {
                text: text.to_string(),
            })
            .await
            .map_err(|_| ClassifyError::ContextInvalidated)?;

        if response.success {
            return Ok(response.scores);
        }
        let detail = response.error.unwrap_or_default();
        match response.error_kind {
            Some(ClassifyErrorKind::ApiKeyMissing) => Err(ClassifyError::ApiKeyMissing),
            Some(ClassifyErrorKind::ContextInvalidated) => Err(ClassifyError::ContextInvalidated),
            Some(ClassifyErrorKind::RequestFailed) => Err(ClassifyError::Relayed(detail)),
            None => {
                tracing::debug!(target: "control", error = %detail, "analysis produced no scores");
                Ok(None)
            }
        }
    }
}

/// Starts the service loop. Each request runs on its own task so slow
/// classifications never hold up display toggles.
pub fn spawn_control_service(
    handler: Arc<dyn ControlHandler>,
    mut shutdown: ShutdownListener,
) -> (ControlHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(64);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(Envelope { request, reply }) = received else { break };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let response = dispatch(handler.as_ref(), request).await;
                        let _ = reply.send(response);
                    });
                }
                _ = shutdown.notified() => break,
            }
        }
        tracing::info!(target: "control", "control service stopped");
    });
    (ControlHandle { tx }, task)
}

pub async fn dispatch(handler: &dyn ControlHandler, request: ControlRequest) -> ControlResponse {
    let kind = request.kind();
    tracing::debug!(target: "control", kind, "received control message");
    match request {
        ControlRequest::AnalyzeContent { text } => match handler.analyze(&text).await {
            Ok(Some(scores)) => ControlResponse {
                scores: Some(scores),
                ..ControlResponse::ok()
            },
            Ok(None) => ControlResponse::failed("Failed to analyze content", None),
            Err(err) => {
                match &err {
                    ClassifyError::ApiKeyMissing => {
                        tracing::error!(target: "control", error = %err, "analysis refused")
                    }
                    _ => tracing::debug!(target: "control", error = %err, "analysis failed"),
                }
                ControlResponse::failed(err.to_string(), Some(err.kind()))
            }
        },
        ControlRequest::ShowFilteredPosts => into_response(kind, handler.show_filtered().await),
        ControlRequest::UpdateBlurMode { blur_mode } => {
            into_response(kind, handler.update_blur_mode(blur_mode).await)
        }
        ControlRequest::UpdateDebugMode { debug_mode } => {
            handler.update_debug_mode(debug_mode);
            ControlResponse::ok()
        }
    }
}

fn into_response(kind: &str, result: anyhow::Result<()>) -> ControlResponse {
    match result {
        Ok(()) => ControlResponse::ok(),
        Err(err) => {
            tracing::warn!(target: "control", kind, error = %err, "control message failed");
            ControlResponse::failed(err.to_string(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::Label, infrastructure::shutdown::Shutdown};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        missing_key: bool,
        upstream_down: bool,
    }

    #[async_trait]
    impl ControlHandler for Recorder {
        async fn analyze(&self, text: &str) -> Result<Option<ScoreSet>, ClassifyError> {
            self.calls.lock().push(format!("analyze:{text}"));
            if self.missing_key {
                return Err(ClassifyError::ApiKeyMissing);
            }
            if self.upstream_down {
                return Err(ClassifyError::RequestFailed {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    body: "upstream down".into(),
                });
            }
            if text.is_empty() {
                return Ok(None);
            }
            Ok(Some([(Label::Cynical, 0.7)].into_iter().collect()))
        }

        async fn show_filtered(&self) -> anyhow::Result<()> {
            self.calls.lock().push("show".into());
            Ok(())
        }

        async fn update_blur_mode(&self, blur_mode: bool) -> anyhow::Result<()> {
            self.calls.lock().push(format!("blur:{blur_mode}"));
            anyhow::ensure!(blur_mode, "cannot unblur");
            Ok(())
        }

        fn update_debug_mode(&self, debug_mode: bool) {
            self.calls.lock().push(format!("debug:{debug_mode}"));
        }
    }

    #[test]
    fn requests_use_type_discriminator() {
        let json = serde_json::to_value(ControlRequest::UpdateBlurMode { blur_mode: true }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "updateBlurMode", "blurMode": true}));

        let parsed: ControlRequest =
            serde_json::from_str(r#"{"type": "analyzeContent", "text": "hi"}"#).unwrap();
        assert_eq!(parsed, ControlRequest::AnalyzeContent { text: "hi".into() });
    }

    #[tokio::test]
    async fn dispatch_routes_each_message() {
        let recorder = Recorder::default();
        let analysed = dispatch(&recorder, ControlRequest::AnalyzeContent { text: "x".into() }).await;
        assert!(analysed.success);
        assert_eq!(analysed.scores.unwrap().get(Label::Cynical), Some(0.7));

        let failed = dispatch(&recorder, ControlRequest::AnalyzeContent { text: String::new() }).await;
        assert!(!failed.success);
        assert_eq!(failed.error_kind, None);

        assert!(dispatch(&recorder, ControlRequest::ShowFilteredPosts).await.success);
        assert!(!dispatch(&recorder, ControlRequest::UpdateBlurMode { blur_mode: false }).await.success);
        assert!(dispatch(&recorder, ControlRequest::UpdateDebugMode { debug_mode: true }).await.success);

        assert_eq!(
            *recorder.calls.lock(),
            vec!["analyze:x", "analyze:", "show", "blur:false", "debug:true"]
        );
    }

    #[tokio::test]
    async fn handle_maps_failures_back_to_errors() {
        let shutdown = Shutdown::new();
        let handler = Arc::new(Recorder {
            missing_key: true,
            ..Recorder::default()
        });
        let (handle, _task) = spawn_control_service(handler, shutdown.subscribe());

        let err = handle.classify("anything").await.unwrap_err();
        assert!(matches!(err, ClassifyError::ApiKeyMissing));

        shutdown.trigger("test over");
        let mut closed = false;
        for _ in 0..50 {
            if matches!(handle.classify("late").await, Err(ClassifyError::ContextInvalidated)) {
                closed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(closed, "closed channel should invalidate the context");
    }

    #[tokio::test]
    async fn relayed_request_failures_stay_errors() {
        let shutdown = Shutdown::new();
        let handler = Arc::new(Recorder {
            upstream_down: true,
            ..Recorder::default()
        });
        let (handle, _task) = spawn_control_service(handler, shutdown.subscribe());

        let err = handle.classify("anything").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Relayed(ref detail) if detail.contains("502")));
        assert_eq!(err.kind(), ClassifyErrorKind::RequestFailed);
    }
}
