//! Batch replay: inject recorded jobs at their recorded offsets.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use loadgrid_autoscale::Scaler;
use loadgrid_core::{Job, JobSpec, epoch_millis};
use loadgrid_pipeline::Dispatcher;

use crate::ReplayError;
use crate::recorder::ResultWriter;

/// Progress of the currently replaying batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub name: String,
    pub total: usize,
    pub completed: usize,
    pub started_at_ms: i64,
}

struct ActiveBatch {
    name: String,
    total: usize,
    completed: usize,
    started_at_ms: i64,
    recorder: ResultWriter,
}

struct Inner {
    dispatcher: Dispatcher,
    scaler: Scaler,
    output_dir: PathBuf,
    shutdown: watch::Receiver<bool>,
    active: Mutex<Option<ActiveBatch>>,
}

/// Replays one batch at a time: a timer loop injects each job when its
/// recorded offset from batch start elapses, and the completion sink
/// records terminal jobs until the whole batch has drained.
///
/// Cloning shares the scheduler.
#[derive(Clone)]
pub struct ReplayScheduler {
    inner: Arc<Inner>,
}

impl ReplayScheduler {
    pub fn new(
        dispatcher: Dispatcher,
        scaler: Scaler,
        output_dir: impl Into<PathBuf>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                scaler,
                output_dir: output_dir.into(),
                shutdown,
                active: Mutex::new(None),
            }),
        }
    }

    /// Begin replaying a batch. Rejected outright while another batch is
    /// active; a completed batch frees the slot for the next submission.
    pub fn submit_batch(
        &self,
        name: &str,
        specs: Vec<JobSpec>,
    ) -> Result<BatchStatus, ReplayError> {
        if specs.is_empty() {
            return Err(ReplayError::EmptyBatch);
        }

        let mut active = lock(&self.inner.active);
        if let Some(batch) = active.as_ref() {
            return Err(ReplayError::AlreadyActive {
                active: batch.name.clone(),
            });
        }

        let recorder = ResultWriter::create(&self.result_path(name))?;
        let started_at_ms = epoch_millis();
        self.inner
            .scaler
            .start(name, started_at_ms)
            .map_err(ReplayError::ControlLoop)?;

        let batch = ActiveBatch {
            name: name.to_string(),
            total: specs.len(),
            completed: 0,
            started_at_ms,
            recorder,
        };
        let status = status_of(&batch);
        *active = Some(batch);
        drop(active);

        info!(batch = name, jobs = specs.len(), "replay batch started");
        tokio::spawn(replay(self.inner.clone(), specs, Instant::now()));
        Ok(status)
    }

    /// Progress of the active batch, if any.
    pub fn status(&self) -> Option<BatchStatus> {
        lock(&self.inner.active).as_ref().map(status_of)
    }

    /// Consume the pipeline's completion channel until it closes. Run this
    /// once, for the lifetime of the process.
    pub async fn run_completions(&self, mut done_rx: mpsc::Receiver<Job>) {
        while let Some(job) = done_rx.recv().await {
            self.inner.scaler.post_process_job(&job);

            let mut active = lock(&self.inner.active);
            let Some(batch) = active.as_mut() else {
                warn!(job = %job.id, "completion with no active batch");
                continue;
            };
            if let Err(e) = batch.recorder.append(&job) {
                warn!(batch = %batch.name, error = %e, "result row write failed");
            }
            batch.completed += 1;
            let done = batch.completed >= batch.total;

            if done && let Some(finished) = active.take() {
                drop(active);
                info!(
                    batch = %finished.name,
                    jobs = finished.total,
                    elapsed_ms = epoch_millis() - finished.started_at_ms,
                    "replay batch completed"
                );
                self.inner.scaler.stop();
            }
        }
    }

    /// Where the result file for a batch lands.
    pub fn result_path(&self, batch: &str) -> PathBuf {
        self.inner.output_dir.join(format!("{batch}-result.csv"))
    }
}

/// The timer loop: sleep until each job's offset, then inject. Jobs whose
/// offset has already passed (bursts) go out back to back; a job is never
/// injected before its offset.
async fn replay(inner: Arc<Inner>, specs: Vec<JobSpec>, start: Instant) {
    let mut shutdown = inner.shutdown.clone();
    for spec in specs {
        let due = Duration::from_millis(spec.offset_ms);
        let elapsed = start.elapsed();
        if due > elapsed {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown during replay, aborting batch");
                    abort_active(&inner);
                    return;
                }
                _ = tokio::time::sleep(due - elapsed) => {}
            }
        }

        let mut job = Job::from(spec);
        // The recorded offset decided when to inject; from here on the
        // job's own clock starts at the actual injection time.
        job.request_time = epoch_millis();
        inner.scaler.pre_process_job(&job);
        if inner.dispatcher.submit(job).await.is_err() {
            error!("dispatch pipeline stopped mid-replay, aborting batch");
            abort_active(&inner);
            return;
        }
    }
    info!("replay batch fully injected");
}

fn abort_active(inner: &Inner) {
    if let Some(batch) = lock(&inner.active).take() {
        warn!(batch = %batch.name, completed = batch.completed, "batch aborted");
        inner.scaler.stop();
    }
}

fn status_of(batch: &ActiveBatch) -> BatchStatus {
    BatchStatus {
        name: batch.name.clone(),
        total: batch.total,
        completed: batch.completed,
        started_at_ms: batch.started_at_ms,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
