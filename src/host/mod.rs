//! Native-messaging host loop.
//!
//! One reader task owns the input stream and feeds a bounded work queue;
//! a small worker pool drains it and runs orchestrator pipelines
//! concurrently; a dedicated writer task owns the output stream so frames
//! are never interleaved. `ping`, `get_config`, `set_config` and
//! `health_check` are handled inline on the reader task, which is what
//! serializes them against the config-reload path: a reload is fully
//! applied before any later-read classify frame is enqueued.

use crate::batch::{select_mode, BatchCoordinator, ProcessingMode};
use crate::config::WardenConfig;
use crate::framing::{FrameError, FrameReader, FrameWriter};
use crate::orchestrator::{ClassifyOptions, Orchestrator, RequestError};
use crate::provider::ProviderHealth;
use crate::wire::{
    self, BatchStatusResponse, ClassificationResponse, HealthLevel, HealthResponse, Request,
    Response, StatsResponse,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Writer channel depth. Responses to advisory frames are dropped when
/// the writer is this far behind; everything else applies backpressure.
const RESPONSE_CHANNEL: usize = 64;

/// The long-lived host: wires the framing layer to the orchestrator.
pub struct Host {
    orchestrator: Arc<Orchestrator>,
    batches: Arc<BatchCoordinator>,
    cancel: CancellationToken,
}

impl Host {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> Self {
        let batches = Arc::new(BatchCoordinator::new(
            Arc::clone(&orchestrator),
            cancel.child_token(),
        ));
        Self {
            orchestrator,
            batches,
            cancel,
        }
    }

    /// Run the dispatch loop until EOF, cancellation, or an
    /// unrecoverable framing fault (the only error return).
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<(), FrameError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let runtime = self.orchestrator.engine().config.runtime.clone();

        let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(RESPONSE_CHANNEL);
        let writer_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(output);
            while let Some(response) = resp_rx.recv().await {
                if let Err(e) = writer.write_frame(&response).await {
                    tracing::error!(error = %e, "Failed to write response frame");
                    if !e.is_recoverable() {
                        break;
                    }
                }
            }
        });

        let (work_tx, work_rx) = mpsc::channel::<Request>(runtime.queue_depth);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..runtime.workers {
            let work_rx = Arc::clone(&work_rx);
            let orchestrator = Arc::clone(&self.orchestrator);
            let batches = Arc::clone(&self.batches);
            let resp_tx = resp_tx.clone();
            workers.spawn(async move {
                loop {
                    let item = { work_rx.lock().await.recv().await };
                    let Some(request) = item else { break };
                    handle_work(request, &orchestrator, &batches, &resp_tx).await;
                }
            });
        }

        let mut reader = FrameReader::new(input);
        let outcome = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }
                frame = reader.read_frame() => match frame {
                    Ok(value) => self.dispatch(value, &work_tx, &resp_tx).await,
                    Err(FrameError::Eof) => {
                        tracing::info!("Input stream closed, shutting down");
                        break Ok(());
                    }
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(error = %e, "Dropped malformed frame");
                        let _ = resp_tx
                            .send(Response::error(None, e.code(), Some(e.to_string())))
                            .await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Unrecoverable framing error");
                        break Err(e);
                    }
                }
            }
        };

        // Let queued work drain within the grace period, then give up.
        drop(work_tx);
        let drained = tokio::time::timeout(runtime.grace_period(), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Grace period elapsed, aborting workers");
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
        self.cancel.cancel();

        drop(resp_tx);
        let _ = writer_task.await;
        outcome
    }

    /// Route one parsed frame. Config-path and trivial frames are
    /// answered inline; classification-path frames are queued.
    async fn dispatch(
        &self,
        value: serde_json::Value,
        work_tx: &mpsc::Sender<Request>,
        resp_tx: &mpsc::Sender<Response>,
    ) {
        let request = match wire::parse_request(value) {
            Ok(request) => request,
            Err(wire::ParseError::UnknownType(type_name)) => {
                tracing::warn!(frame_type = ?type_name, "Unknown frame type");
                let _ = resp_tx
                    .send(Response::error(None, "unknown_type", type_name))
                    .await;
                return;
            }
            Err(wire::ParseError::Invalid {
                request_id,
                message,
            }) => {
                let _ = resp_tx
                    .send(Response::error(request_id, "invalid_request", Some(message)))
                    .await;
                return;
            }
        };

        match request {
            Request::Ping { request_id } => {
                let _ = resp_tx.send(Response::Pong { request_id }).await;
            }
            Request::GetConfig { request_id } => {
                let _ = resp_tx
                    .send(Response::Config {
                        request_id,
                        config: self.orchestrator.config_value(),
                    })
                    .await;
            }
            Request::SetConfig { request_id, config } => {
                let response = match WardenConfig::from_value(config)
                    .map_err(|e| e.to_string())
                    .and_then(|config| {
                        self.orchestrator.reload(config).map_err(|e| e.to_string())
                    }) {
                    Ok(()) => Response::Config {
                        request_id,
                        config: self.orchestrator.config_value(),
                    },
                    Err(message) => {
                        tracing::warn!(error = %message, "Configuration rejected, keeping previous");
                        Response::error(Some(request_id), "config_rejected", Some(message))
                    }
                };
                let _ = resp_tx.send(response).await;
            }
            Request::HealthCheck { request_id } => {
                let report = self.orchestrator.health().await;
                let status = match (&report.provider_health, report.breaker_state) {
                    (ProviderHealth::Ok, crate::breaker::CircuitState::Closed) => HealthLevel::Ok,
                    (ProviderHealth::Ok, _) | (ProviderHealth::RateLimited, _) => {
                        HealthLevel::Degraded
                    }
                    _ => HealthLevel::Error,
                };
                let _ = resp_tx
                    .send(Response::Health(HealthResponse {
                        request_id,
                        status,
                        provider_healthy: report.provider_health.is_ok(),
                        provider_name: report.provider_name,
                    }))
                    .await;
            }
            queued => {
                let depth = self.orchestrator.engine().config.runtime.queue_depth;
                match work_tx.try_send(queued) {
                    Ok(()) => {
                        metrics::gauge!("mailwarden_queue_depth")
                            .set((depth - work_tx.capacity()) as f64);
                    }
                    Err(mpsc::error::TrySendError::Full(rejected))
                    | Err(mpsc::error::TrySendError::Closed(rejected)) => {
                        tracing::warn!("Work queue full, refusing frame");
                        let _ = resp_tx
                            .send(Response::error(request_id_of(&rejected), "busy", None))
                            .await;
                    }
                }
            }
        }
    }
}

/// Echoable request id of a queued frame, for error responses.
fn request_id_of(request: &Request) -> Option<String> {
    match request {
        Request::Classify(req) => Some(req.request_id.clone()),
        Request::BatchStart { request_id, .. }
        | Request::BatchStatus { request_id, .. }
        | Request::Stats { request_id }
        | Request::Ping { request_id }
        | Request::HealthCheck { request_id }
        | Request::GetConfig { request_id }
        | Request::SetConfig { request_id, .. } => Some(request_id.clone()),
        Request::Feedback(frame) => frame.request_id.clone(),
    }
}

/// Worker-side handling of classification-path frames.
async fn handle_work(
    request: Request,
    orchestrator: &Arc<Orchestrator>,
    batches: &Arc<BatchCoordinator>,
    resp_tx: &mpsc::Sender<Response>,
) {
    match request {
        Request::Classify(request) => {
            let threshold = orchestrator.engine().config.batch.realtime_threshold;
            let options =
                match select_mode(request.origin.as_deref(), 1, threshold, None) {
                    ProcessingMode::Realtime => ClassifyOptions::realtime(),
                    // Bulk-labeled one-off requests still answer inline but
                    // draw from the relaxed budget and wait out the limiter.
                    ProcessingMode::Batch => ClassifyOptions::batch(),
                };
            match orchestrator.classify(&request, options).await {
                Ok(decision) => {
                    let header = orchestrator.header_for(&decision);
                    let _ = resp_tx
                        .send(Response::Classification(ClassificationResponse::from_decision(
                            request.request_id,
                            request.message_id,
                            decision,
                            header,
                        )))
                        .await;
                }
                Err(RequestError::Invalid(message)) => {
                    let _ = resp_tx
                        .send(Response::error(
                            Some(request.request_id),
                            "invalid_request",
                            Some(message),
                        ))
                        .await;
                }
            }
        }
        Request::BatchStart { request_id, items } => {
            let (batch_id, queued) = batches.start(items);
            let _ = resp_tx
                .send(Response::BatchAck {
                    request_id,
                    batch_id,
                    queued,
                })
                .await;
        }
        Request::BatchStatus {
            request_id,
            batch_id,
        } => {
            let response = match batches.status(&batch_id) {
                Some(snapshot) => Response::BatchStatus(BatchStatusResponse {
                    request_id,
                    batch_id,
                    queued: snapshot.queued,
                    in_flight: snapshot.in_flight,
                    completed: snapshot.completed,
                    failed: snapshot.failed,
                    results: snapshot.results,
                }),
                None => Response::error(Some(request_id), "unknown_batch", None),
            };
            let _ = resp_tx.send(response).await;
        }
        Request::Feedback(frame) => {
            orchestrator.feedback(frame.previous_folder.as_deref(), &frame.actual_folder);
            let _ = resp_tx
                .send(Response::Ack {
                    request_id: frame.request_id.unwrap_or_default(),
                })
                .await;
        }
        Request::Stats { request_id } => {
            let stats = orchestrator.stats();
            let response = Response::Stats(StatsResponse {
                request_id,
                cache: serde_json::to_value(&stats.cache).unwrap_or_default(),
                circuit: serde_json::to_value(&stats.circuit).unwrap_or_default(),
                rate: serde_json::to_value(&stats.rate).unwrap_or_default(),
                calibration: serde_json::to_value(&stats.calibration).unwrap_or_default(),
            });
            // Advisory: dropped rather than blocking the writer.
            if resp_tx.try_send(response).is_err() {
                tracing::debug!("Writer busy, dropped stats response");
            }
        }
        // Inline-handled types never reach the queue.
        other => {
            tracing::error!(request = ?request_id_of(&other), "Unexpected frame in work queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ClassificationRequest;

    #[test]
    fn test_request_id_extraction() {
        let request = Request::Classify(ClassificationRequest {
            request_id: "r1".to_string(),
            message_id: "m1".to_string(),
            subject: String::new(),
            sender: String::new(),
            body: String::new(),
            folders: vec!["A".to_string()],
            attachments: vec![],
            mode: None,
            origin: None,
        });
        assert_eq!(request_id_of(&request).as_deref(), Some("r1"));

        let stats = Request::Stats {
            request_id: "r2".to_string(),
        };
        assert_eq!(request_id_of(&stats).as_deref(), Some("r2"));
    }
}
