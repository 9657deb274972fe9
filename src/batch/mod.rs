//! Batch coordination: real-time vs deferred processing.
//!
//! Real-time is the default for classify frames. A `batch_start` frame
//! enqueues many items to a background worker that runs the same
//! orchestrator pipeline under the relaxed batch rate budget. Status is
//! queryable per job until the process exits.

use crate::orchestrator::{
    ClassificationRequest, ClassifyOptions, Orchestrator, RationaleTag,
};
use crate::wire::{BatchItem, ClassificationResponse};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Processing mode for classification work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// One request, one synchronous decision.
    Realtime,
    /// Enqueued to the background worker.
    Batch,
}

/// Mode selection: a new-mail origin label forces real-time, archive
/// labels force batch, otherwise item count decides. An explicit client
/// request always wins.
pub fn select_mode(
    origin: Option<&str>,
    item_count: usize,
    realtime_threshold: usize,
    requested: Option<ProcessingMode>,
) -> ProcessingMode {
    if let Some(mode) = requested {
        return mode;
    }
    match origin {
        Some("new_mail") => ProcessingMode::Realtime,
        Some("archive") | Some("bulk_import") | Some("manual_batch") => ProcessingMode::Batch,
        _ => {
            if item_count > realtime_threshold {
                ProcessingMode::Batch
            } else {
                ProcessingMode::Realtime
            }
        }
    }
}

#[derive(Debug, Default)]
struct JobState {
    queued: usize,
    in_flight: usize,
    completed: usize,
    failed: usize,
    results: Vec<ClassificationResponse>,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub queued: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<ClassificationResponse>,
}

struct BatchJob {
    state: Mutex<JobState>,
}

/// Owns batch jobs and their background worker tasks.
pub struct BatchCoordinator {
    orchestrator: Arc<Orchestrator>,
    jobs: DashMap<String, Arc<BatchJob>>,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            jobs: DashMap::new(),
            cancel,
        }
    }

    /// Enqueue a job and spawn its worker. Returns (batch id, queued).
    pub fn start(&self, items: Vec<BatchItem>) -> (String, usize) {
        let batch_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let queued = items.len();

        let job = Arc::new(BatchJob {
            state: Mutex::new(JobState {
                queued,
                ..JobState::default()
            }),
        });
        self.jobs.insert(batch_id.clone(), Arc::clone(&job));

        let orchestrator = Arc::clone(&self.orchestrator);
        let cancel = self.cancel.child_token();
        let worker_id = batch_id.clone();
        tokio::spawn(async move {
            run_job(worker_id, items, job, orchestrator, cancel).await;
        });

        tracing::info!(batch_id = %batch_id, queued, "Batch job started");
        (batch_id, queued)
    }

    pub fn status(&self, batch_id: &str) -> Option<BatchSnapshot> {
        self.jobs.get(batch_id).map(|job| {
            let state = job.state.lock().expect("batch state lock poisoned");
            BatchSnapshot {
                queued: state.queued,
                in_flight: state.in_flight,
                completed: state.completed,
                failed: state.failed,
                results: state.results.clone(),
            }
        })
    }
}

async fn run_job(
    batch_id: String,
    items: Vec<BatchItem>,
    job: Arc<BatchJob>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
) {
    let started_at = chrono::Utc::now();
    for (index, item) in items.into_iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(batch_id = %batch_id, "Batch job cancelled");
            break;
        }

        let request = request_from_item(&batch_id, index, item);
        {
            let mut state = job.state.lock().expect("batch state lock poisoned");
            state.queued -= 1;
            state.in_flight += 1;
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = orchestrator.classify(&request, ClassifyOptions::batch()) => Some(result),
        };

        let mut state = job.state.lock().expect("batch state lock poisoned");
        state.in_flight -= 1;
        match outcome {
            Some(Ok(decision)) => {
                let header = orchestrator.header_for(&decision);
                if decision.rationale_tag == RationaleTag::ProviderFailed {
                    state.failed += 1;
                } else {
                    state.completed += 1;
                }
                state.results.push(ClassificationResponse::from_decision(
                    request.request_id.clone(),
                    request.message_id.clone(),
                    decision,
                    header,
                ));
            }
            Some(Err(e)) => {
                tracing::warn!(batch_id = %batch_id, error = %e, "Batch item rejected");
                state.failed += 1;
            }
            None => {
                // Cancelled mid-call; the item is abandoned.
                state.failed += 1;
                break;
            }
        }
    }
    let elapsed = chrono::Utc::now() - started_at;
    tracing::info!(
        batch_id = %batch_id,
        elapsed_ms = elapsed.num_milliseconds(),
        "Batch job finished"
    );
}

fn request_from_item(batch_id: &str, index: usize, item: BatchItem) -> ClassificationRequest {
    ClassificationRequest {
        request_id: item
            .request_id
            .unwrap_or_else(|| format!("{}-{}", batch_id, index)),
        message_id: item.message_id,
        subject: item.subject,
        sender: item.sender,
        body: item.body,
        folders: item.folders,
        attachments: item.attachments,
        mode: item.mode,
        origin: None,
    }
}
