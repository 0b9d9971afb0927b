//! Live deployment phase stream
//!
//! A background task watches the namespace's pods and recomputes the phase
//! on every change. The task stops once the phase is terminal, when the
//! watch fails, or when the consumer goes away: dropping the `PhaseStream`
//! cancels the task, which releases the watch on its way out.

use futures::{Stream, StreamExt};
use serde_json::{Value as JsonValue, json};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use fleetdeck_core::phase::PhaseResult;
use fleetdeck_core::validate::validate_namespace;

use crate::cluster::PodEvent;
use crate::error::{KubeError, Result};
use crate::lifecycle::DeploymentManager;

const CHANNEL_CAPACITY: usize = 32;

/// Resource version that starts a fresh watch
const FRESH_WATCH: &str = "0";

/// One message of the phase stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected { namespace: String },
    Phase(PhaseResult),
    PodUpdate(PodEvent),
    /// Terminal phase reached; last message
    Complete(PhaseResult),
    Error { error: String },
    /// Keepalive after a quiet period
    Heartbeat,
}

impl StreamEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Phase(_) => "phase",
            StreamEvent::PodUpdate(_) => "pod_update",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Heartbeat => "heartbeat",
        }
    }

    /// JSON payload; `Null` for heartbeats
    pub fn data(&self) -> JsonValue {
        match self {
            StreamEvent::Connected { namespace } => json!({ "namespace": namespace }),
            StreamEvent::Phase(phase) | StreamEvent::Complete(phase) => {
                serde_json::to_value(phase).unwrap_or(JsonValue::Null)
            }
            StreamEvent::PodUpdate(event) => serde_json::to_value(event).unwrap_or(JsonValue::Null),
            StreamEvent::Error { error } => json!({ "error": error }),
            StreamEvent::Heartbeat => JsonValue::Null,
        }
    }
}

/// Stream of phase events for one namespace
pub struct PhaseStream {
    inner: ReceiverStream<StreamEvent>,
    _cancel: DropGuard,
}

impl Stream for PhaseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl DeploymentManager {
    /// Subscribe to phase changes of a deployment
    pub fn stream_phase(&self, namespace: &str) -> Result<PhaseStream> {
        validate_namespace(namespace)?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = PhaseTask {
            manager: self.clone(),
            namespace: namespace.to_string(),
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        Ok(PhaseStream {
            inner: ReceiverStream::new(rx),
            _cancel: cancel.drop_guard(),
        })
    }
}

struct PhaseTask {
    manager: DeploymentManager,
    namespace: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl PhaseTask {
    async fn run(self) {
        tracing::debug!(namespace = %self.namespace, "Phase stream opened");
        self.stream().await;
        tracing::debug!(namespace = %self.namespace, "Phase stream closed");
    }

    /// `false` once the consumer is gone
    async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    async fn stream(&self) {
        let connected = StreamEvent::Connected {
            namespace: self.namespace.clone(),
        };
        if !self.send(connected).await {
            return;
        }

        match self.manager.observe_phase(&self.namespace).await {
            Ok(phase) => {
                let terminal = phase.phase.is_terminal();
                if !self.send(StreamEvent::Phase(phase.clone())).await {
                    return;
                }
                if terminal {
                    self.send(StreamEvent::Complete(phase)).await;
                    return;
                }
            }
            Err(e) => {
                tracing::error!(namespace = %self.namespace, "Error getting initial phase: {}", e);
            }
        }

        let settings = self.manager.settings();
        let cluster = self.manager.cluster();
        let mut resource_version = FRESH_WATCH.to_string();

        loop {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return,
                opened = cluster.watch_pods(&self.namespace, &resource_version, settings.watch_timeout_secs) => opened,
            };
            let mut watch = match opened {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::error!(namespace = %self.namespace, "Failed to watch pods: {}", e);
                    self.send(StreamEvent::Error { error: e.to_string() }).await;
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(settings.heartbeat) => {
                        if !self.send(StreamEvent::Heartbeat).await {
                            return;
                        }
                        continue;
                    }
                    next = watch.next() => next,
                };

                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(KubeError::WatchExpired)) => {
                        tracing::debug!(namespace = %self.namespace, "Resource version expired, restarting watch");
                        resource_version = FRESH_WATCH.to_string();
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(namespace = %self.namespace, "Phase stream error: {}", e);
                        self.send(StreamEvent::Error { error: e.to_string() }).await;
                        return;
                    }
                    None => {
                        tracing::debug!(namespace = %self.namespace, "Pod watch expired, re-establishing");
                        break;
                    }
                };
                if let Some(version) = &event.resource_version {
                    resource_version.clone_from(version);
                }

                let phase = match self.manager.observe_phase(&self.namespace).await {
                    Ok(phase) => phase,
                    Err(e) => {
                        tracing::error!(namespace = %self.namespace, "Error processing pod event: {}", e);
                        continue;
                    }
                };
                let terminal = phase.phase.is_terminal();

                if !self.send(StreamEvent::Phase(phase.clone())).await {
                    return;
                }
                if !self.send(StreamEvent::PodUpdate(event)).await {
                    return;
                }
                if terminal {
                    self.send(StreamEvent::Complete(phase)).await;
                    return;
                }
            }
        }
    }
}
