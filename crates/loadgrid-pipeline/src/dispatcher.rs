//! Dispatcher — queue plumbing and the endpoint-keyed worker set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use loadgrid_core::config::PipelineConfig;
use loadgrid_core::{Endpoint, Job};
use loadgrid_fleet::{FleetEvent, FleetView};
use loadgrid_metrics::{Label, MetricStore, MetricsSink};

use crate::PipelineError;
use crate::backend::GenerateBackend;
use crate::worker::Worker;

/// Queue receivers are shared across workers; the mutex makes each
/// received job exclusive to exactly one worker.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

struct WorkerHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct Inner {
    backend: Arc<dyn GenerateBackend>,
    fleet: FleetView,
    store: MetricStore,
    sink: Arc<dyn MetricsSink>,
    max_retry: u32,
    job_tx: mpsc::Sender<Job>,
    job_rx: SharedReceiver,
    retry_tx: mpsc::Sender<Job>,
    retry_rx: SharedReceiver,
    done_tx: mpsc::Sender<Job>,
    workers: Mutex<HashMap<Endpoint, WorkerHandle>>,
}

/// The dispatch pipeline: bounded primary and retry queues feeding a set
/// of endpoint-bound workers, with a completion channel out the back.
///
/// Cloning shares the pipeline.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Build the pipeline. Returns the dispatcher and the receiving end of
    /// the completion channel (owned by the replay completion sink).
    pub fn new(
        backend: Arc<dyn GenerateBackend>,
        fleet: FleetView,
        store: MetricStore,
        sink: Arc<dyn MetricsSink>,
        config: &PipelineConfig,
    ) -> (Self, mpsc::Receiver<Job>) {
        let (job_tx, job_rx) = mpsc::channel(config.max_queue);
        let (retry_tx, retry_rx) = mpsc::channel(config.max_retry_queue);
        let (done_tx, done_rx) = mpsc::channel(64);

        let dispatcher = Self {
            inner: Arc::new(Inner {
                backend,
                fleet,
                store,
                sink,
                max_retry: config.max_retry,
                job_tx,
                job_rx: Arc::new(Mutex::new(job_rx)),
                retry_tx,
                retry_rx: Arc::new(Mutex::new(retry_rx)),
                done_tx,
                workers: Mutex::new(HashMap::new()),
            }),
        };
        (dispatcher, done_rx)
    }

    /// Hand a job to the primary queue.
    ///
    /// Blocks while the queue is full — this is the pipeline's explicit
    /// backpressure point, and it is what slows the replay loop down when
    /// the fleet cannot keep up.
    pub async fn submit(&self, job: Job) -> Result<(), PipelineError> {
        self.inner
            .job_tx
            .send(job)
            .await
            .map_err(|_| PipelineError::Stopped)
    }

    /// Apply one discovery event: start a worker for an added endpoint,
    /// stop the worker of a removed one. Tolerates duplicates and removes
    /// of unknown endpoints.
    pub async fn apply_event(&self, event: FleetEvent) {
        match event {
            FleetEvent::Added { endpoint, hostname } => {
                self.inner.fleet.insert(endpoint.clone(), hostname.clone());
                let mut workers = self.inner.workers.lock().await;
                if workers.contains_key(&endpoint) {
                    return;
                }
                let handle = self.spawn_worker(endpoint.clone(), hostname);
                workers.insert(endpoint, handle);
            }
            FleetEvent::Removed { endpoint } => {
                self.inner.fleet.remove(&endpoint);
                let mut workers = self.inner.workers.lock().await;
                if let Some(handle) = workers.remove(&endpoint) {
                    info!(%endpoint, "stopping worker for removed endpoint");
                    let _ = handle.stop.send(true);
                    // Let the in-flight job (if any) finish naturally.
                    tokio::spawn(async move {
                        let _ = handle.join.await;
                    });
                }
            }
        }
    }

    /// Consume discovery events until the stream ends or shutdown fires.
    pub async fn run_discovery(
        &self,
        mut events: mpsc::Receiver<FleetEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.apply_event(event).await,
                    None => break,
                },
            }
        }
        debug!("discovery loop stopped");
    }

    fn spawn_worker(&self, endpoint: Endpoint, hostname: String) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker {
            tags: vec![
                Label::new("hostname", hostname.clone()),
                Label::new("endpoint", endpoint.to_string()),
            ],
            endpoint: endpoint.clone(),
            backend: self.inner.backend.clone(),
            store: self.inner.store.clone(),
            sink: self.inner.sink.clone(),
            max_retry: self.inner.max_retry,
            job_rx: self.inner.job_rx.clone(),
            retry_rx: self.inner.retry_rx.clone(),
            retry_tx: self.inner.retry_tx.clone(),
            done_tx: self.inner.done_tx.clone(),
        };
        info!(%endpoint, %hostname, "starting worker");
        let join = tokio::spawn(worker.run(stop_rx));
        WorkerHandle { stop: stop_tx, join }
    }

    /// Number of live workers.
    pub async fn worker_count(&self) -> usize {
        self.inner.workers.lock().await.len()
    }

    /// Stop the pipeline: wait out the grace period so in-flight jobs can
    /// drain, then stop every worker. Channel closure follows from channel
    /// sender ownership, so a double close cannot be expressed.
    pub async fn shutdown(&self, grace: Duration) {
        tokio::time::sleep(grace).await;
        let mut workers = self.inner.workers.lock().await;
        for (endpoint, handle) in workers.drain() {
            debug!(%endpoint, "stopping worker");
            let _ = handle.stop.send(true);
            let _ = handle.join.await;
        }
        info!("dispatch pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use loadgrid_core::GenerateParams;
    use loadgrid_metrics::NoopSink;

    use crate::backend::BoxFuture;

    /// Scriptable backend: fails the first `fail_times` calls per job id,
    /// then succeeds. `panic_ids` panic instead.
    struct MockBackend {
        fail_times: u32,
        panic_ids: Vec<String>,
        calls: AtomicUsize,
        attempts: StdMutex<HashMap<String, u32>>,
    }

    impl MockBackend {
        fn new(fail_times: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_times,
                panic_ids: Vec::new(),
                calls: AtomicUsize::new(0),
                attempts: StdMutex::new(HashMap::new()),
            })
        }

        fn panicking(ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_times: 0,
                panic_ids: ids.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                attempts: StdMutex::new(HashMap::new()),
            })
        }
    }

    impl GenerateBackend for MockBackend {
        fn generate(
            &self,
            _endpoint: Endpoint,
            _params: GenerateParams,
            job_id: String,
        ) -> BoxFuture<anyhow::Result<Duration>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_ids.contains(&job_id) {
                return Box::pin(async { panic!("backend fault") });
            }
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(job_id).or_insert(0);
                *n += 1;
                *n
            };
            let fail = attempt <= self.fail_times;
            Box::pin(async move {
                if fail {
                    anyhow::bail!("simulated generation failure");
                }
                Ok(Duration::from_millis(5))
            })
        }
    }

    fn params() -> GenerateParams {
        GenerateParams {
            prompt: "test".to_string(),
            steps: 20,
            cfg_scale: 7.0,
            sampler_index: "DDIM".to_string(),
            width: 512,
            height: 512,
        }
    }

    fn job(id: &str) -> Job {
        let mut job = Job::new(id, params());
        job.request_time = loadgrid_core::epoch_millis();
        job
    }

    fn pipeline_config(max_retry: u32) -> PipelineConfig {
        PipelineConfig {
            max_queue: 16,
            max_retry_queue: 16,
            max_retry,
            shutdown_grace_secs: 0,
        }
    }

    fn build(
        backend: Arc<dyn GenerateBackend>,
        max_retry: u32,
    ) -> (Dispatcher, mpsc::Receiver<Job>, FleetView) {
        let fleet = FleetView::new();
        let store = MetricStore::new(Duration::from_secs(10));
        let (dispatcher, done_rx) = Dispatcher::new(
            backend,
            fleet.clone(),
            store,
            Arc::new(NoopSink),
            &pipeline_config(max_retry),
        );
        (dispatcher, done_rx, fleet)
    }

    fn added(n: u8) -> FleetEvent {
        FleetEvent::Added {
            endpoint: Endpoint::new(format!("10.0.0.{n}"), 8000),
            hostname: format!("node-{n}"),
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<Job>) -> Job {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for completion")
            .expect("completion channel closed")
    }

    #[tokio::test]
    async fn first_try_success_keeps_retry_zero() {
        let backend = MockBackend::new(0);
        let (dispatcher, mut done_rx, _) = build(backend.clone(), 1);
        dispatcher.apply_event(added(1)).await;

        dispatcher.submit(job("a")).await.unwrap();
        let done = recv(&mut done_rx).await;

        assert!(done.success);
        assert_eq!(done.retry, 0);
        assert!(done.end_time >= done.start_time);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_terminal_failure() {
        // max_retry = 1 and the backend fails twice: the record must show
        // retry = 1, success = false.
        let backend = MockBackend::new(2);
        let (dispatcher, mut done_rx, _) = build(backend.clone(), 1);
        dispatcher.apply_event(added(1)).await;

        dispatcher.submit(job("a")).await.unwrap();
        let done = recv(&mut done_rx).await;

        assert!(!done.success);
        assert_eq!(done.retry, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let backend = MockBackend::new(1);
        let (dispatcher, mut done_rx, _) = build(backend.clone(), 2);
        dispatcher.apply_event(added(1)).await;

        dispatcher.submit(job("a")).await.unwrap();
        let done = recv(&mut done_rx).await;

        assert!(done.success);
        assert_eq!(done.retry, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panic_drops_job_but_worker_survives() {
        let backend = MockBackend::panicking(&["bad"]);
        let (dispatcher, mut done_rx, _) = build(backend.clone(), 0);
        dispatcher.apply_event(added(1)).await;

        dispatcher.submit(job("bad")).await.unwrap();
        dispatcher.submit(job("good")).await.unwrap();

        // Only the good job reaches the completion channel; the panicked
        // one is dropped, and the same worker processed both.
        let done = recv(&mut done_rx).await;
        assert_eq!(done.id, "good");
        assert!(done.success);
        assert_eq!(dispatcher.worker_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_add_spawns_one_worker() {
        let backend = MockBackend::new(0);
        let (dispatcher, _done_rx, fleet) = build(backend, 0);
        dispatcher.apply_event(added(1)).await;
        dispatcher.apply_event(added(1)).await;
        assert_eq!(dispatcher.worker_count().await, 1);
        assert_eq!(fleet.len(), 1);
    }

    #[tokio::test]
    async fn removed_endpoint_stops_consuming() {
        let backend = MockBackend::new(0);
        let (dispatcher, mut done_rx, fleet) = build(backend.clone(), 0);

        dispatcher.apply_event(added(1)).await;
        dispatcher
            .apply_event(FleetEvent::Removed {
                endpoint: Endpoint::new("10.0.0.1", 8000),
            })
            .await;
        assert_eq!(dispatcher.worker_count().await, 0);
        assert!(fleet.is_empty());

        // Give the stopped worker time to observe its stop signal, then
        // submit: nothing may pick the job up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.submit(job("a")).await.unwrap();
        let waited =
            tokio::time::timeout(Duration::from_millis(100), done_rx.recv()).await;
        assert!(waited.is_err(), "job was processed by a stopped worker");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remove_of_unknown_endpoint_is_noop() {
        let backend = MockBackend::new(0);
        let (dispatcher, _done_rx, _) = build(backend, 0);
        dispatcher.apply_event(added(1)).await;
        dispatcher
            .apply_event(FleetEvent::Removed {
                endpoint: Endpoint::new("10.9.9.9", 8000),
            })
            .await;
        assert_eq!(dispatcher.worker_count().await, 1);
    }

    #[tokio::test]
    async fn two_workers_share_the_queue() {
        let backend = MockBackend::new(0);
        let (dispatcher, mut done_rx, _) = build(backend, 0);
        dispatcher.apply_event(added(1)).await;
        dispatcher.apply_event(added(2)).await;

        for i in 0..10 {
            dispatcher.submit(job(&format!("job-{i}"))).await.unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(recv(&mut done_rx).await.id);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 10, "a job was delivered to two workers");
    }

    #[tokio::test]
    async fn discovery_loop_applies_events_until_shutdown() {
        let backend = MockBackend::new(0);
        let (dispatcher, _done_rx, _) = build(backend, 0);
        let (event_tx, event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_dispatcher = dispatcher.clone();
        let discovery =
            tokio::spawn(async move { loop_dispatcher.run_discovery(event_rx, shutdown_rx).await });

        event_tx.send(added(1)).await.unwrap();
        event_tx.send(added(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.worker_count().await, 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), discovery)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_all_workers() {
        let backend = MockBackend::new(0);
        let (dispatcher, _done_rx, _) = build(backend, 0);
        dispatcher.apply_event(added(1)).await;
        dispatcher.apply_event(added(2)).await;

        dispatcher.shutdown(Duration::from_millis(0)).await;
        assert_eq!(dispatcher.worker_count().await, 0);
    }
}
