//! Worker — one endpoint-bound job processing loop.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use loadgrid_core::{Endpoint, Job, epoch_millis};
use loadgrid_metrics::keys;
use loadgrid_metrics::{Label, MetricStore, MetricsSink};

use crate::backend::GenerateBackend;
use crate::dispatcher::SharedReceiver;

pub(crate) struct Worker {
    pub(crate) endpoint: Endpoint,
    pub(crate) backend: Arc<dyn GenerateBackend>,
    pub(crate) store: MetricStore,
    pub(crate) sink: Arc<dyn MetricsSink>,
    pub(crate) max_retry: u32,
    pub(crate) job_rx: SharedReceiver,
    pub(crate) retry_rx: SharedReceiver,
    pub(crate) retry_tx: mpsc::Sender<Job>,
    pub(crate) done_tx: mpsc::Sender<Job>,
    /// hostname + endpoint labels applied to every per-job metric.
    pub(crate) tags: Vec<Label>,
}

impl Worker {
    /// Select among the stop signal and the two queues until stopped or
    /// the queues close.
    pub(crate) async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            let job = tokio::select! {
                _ = stop.changed() => break,
                job = recv_next(&self.job_rx) => job,
                job = recv_next(&self.retry_rx) => job,
            };
            let Some(job) = job else {
                break; // queues closed
            };
            self.process(job).await;
        }
        debug!(endpoint = %self.endpoint, "worker stopped");
    }

    async fn process(&self, mut job: Job) {
        job.start_time = epoch_millis();

        // The remote call runs in its own task so an unexpected panic while
        // handling this one job cannot take the worker loop down with it.
        let backend = self.backend.clone();
        let endpoint = self.endpoint.clone();
        let params = job.params.clone();
        let id = job.id.clone();
        let call =
            tokio::spawn(async move { backend.generate(endpoint, params, id).await });

        let result = match call.await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    endpoint = %self.endpoint,
                    job = %job.id,
                    panicked = e.is_panic(),
                    "generation task aborted, dropping job"
                );
                return;
            }
        };

        match result {
            Ok(_) => {
                job.success = true;
                job.end_time = epoch_millis();

                self.store.count_tagged(&keys::JOB_SUCCESS, &self.tags);
                self.sink.count(&keys::JOB_SUCCESS, &self.tags);

                let duration = millis(job.duration_ms());
                self.store.time_tagged(&keys::JOB_DURATION, duration, &self.tags);
                self.sink.time(&keys::JOB_DURATION, duration, &self.tags);

                let latency = millis(job.latency_ms());
                self.store.time_tagged(&keys::JOB_LATENCY, latency, &self.tags);
                self.sink.time(&keys::JOB_LATENCY, latency, &self.tags);

                self.emit(job).await;
            }
            Err(e) if job.retry < self.max_retry => {
                job.retry += 1;
                debug!(
                    endpoint = %self.endpoint,
                    job = %job.id,
                    retry = job.retry,
                    error = %e,
                    "generation failed, requeueing"
                );
                // A full retry queue blocks this worker, the same
                // backpressure policy as the primary queue.
                if self.retry_tx.send(job).await.is_err() {
                    warn!("retry queue closed, dropping job");
                }
            }
            Err(e) => {
                job.success = false;
                job.end_time = epoch_millis();
                warn!(
                    endpoint = %self.endpoint,
                    job = %job.id,
                    retry = job.retry,
                    error = %e,
                    "generation failed terminally"
                );

                self.store.count_tagged(&keys::JOB_FAILURE, &self.tags);
                self.sink.count(&keys::JOB_FAILURE, &self.tags);

                self.emit(job).await;
            }
        }
    }

    async fn emit(&self, job: Job) {
        if self.done_tx.send(job).await.is_err() {
            warn!(endpoint = %self.endpoint, "completion channel closed");
        }
    }
}

/// Receive the next job from a shared queue. The mutex guarantees
/// single-consumer semantics per message across the worker set.
async fn recv_next(rx: &SharedReceiver) -> Option<Job> {
    rx.lock().await.recv().await
}

fn millis(ms: i64) -> std::time::Duration {
    std::time::Duration::from_millis(ms.max(0) as u64)
}
