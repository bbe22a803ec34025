//! The autoscaling control loop.
//!
//! While a batch replays, two tickers run: a step tick every metrics
//! window that aggregates the window into a `DataPoint`, accumulates the
//! reward, and (when enabled) asks the external forecaster for the next
//! worker count; and a report tick every second that polls the fleet
//! dashboard and refreshes the worker gauges.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

use loadgrid_core::Job;
use loadgrid_core::config::ScalerConfig;
use loadgrid_fleet::FleetView;
use loadgrid_metrics::keys;
use loadgrid_metrics::{MetricStore, MetricsSink};

use crate::audit::AuditWriter;
use crate::control::{FleetControl, ForecastPoint};

/// One aggregated metrics window.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub expected_worker: u32,
    pub running_worker: u32,
    pub total_worker: u32,
    pub new_job: u64,
    pub ongoing_job: i64,
    pub completed_job: u64,
    pub avg_duration_ms: f64,
    pub avg_delay_ms: f64,
    pub reward: f64,
}

struct Inner {
    config: ScalerConfig,
    output_dir: PathBuf,
    store: MetricStore,
    sink: Arc<dyn MetricsSink>,
    remote: Arc<dyn FleetControl>,
    fleet: FleetView,
    queue_depth: AtomicI64,
    expected_workers: AtomicU32,
    window_completed: Mutex<Vec<Job>>,
    run_stop: Mutex<Option<watch::Sender<bool>>>,
}

/// Per-run mutable state, owned by the control-loop task.
struct RunState {
    batch_start_ms: i64,
    elapsed_secs: u64,
    reward: f64,
    history: Vec<DataPoint>,
    audit: AuditWriter,
}

/// Handle to the autoscaling control loop. Cloning shares the loop.
#[derive(Clone)]
pub struct Scaler {
    inner: Arc<Inner>,
}

impl Scaler {
    pub fn new(
        config: ScalerConfig,
        output_dir: impl Into<PathBuf>,
        store: MetricStore,
        sink: Arc<dyn MetricsSink>,
        remote: Arc<dyn FleetControl>,
        fleet: FleetView,
    ) -> Self {
        let expected = config.init_workers;
        Self {
            inner: Arc::new(Inner {
                config,
                output_dir: output_dir.into(),
                store,
                sink,
                remote,
                fleet,
                queue_depth: AtomicI64::new(0),
                expected_workers: AtomicU32::new(expected),
                window_completed: Mutex::new(Vec::new()),
                run_stop: Mutex::new(None),
            }),
        }
    }

    /// Called by the replay loop the moment a job is injected.
    pub fn pre_process_job(&self, _job: &Job) {
        self.inner.queue_depth.fetch_add(1, Ordering::Relaxed);
        self.inner.store.count(&keys::JOB_REQUEST);
        self.inner.sink.count(&keys::JOB_REQUEST, &[]);
    }

    /// Called by the completion sink for every terminal job.
    pub fn post_process_job(&self, job: &Job) {
        self.inner.queue_depth.fetch_sub(1, Ordering::Relaxed);
        let mut window = lock(&self.inner.window_completed);
        window.push(job.clone());
    }

    /// Jobs currently inside the pipeline (injected, not yet terminal).
    pub fn queue_depth(&self) -> i64 {
        self.inner.queue_depth.load(Ordering::Relaxed)
    }

    /// The forecaster's current worker target.
    pub fn expected_workers(&self) -> u32 {
        self.inner.expected_workers.load(Ordering::Relaxed)
    }

    /// Begin a control run for a batch. Opens the batch's audit file and
    /// spawns the ticker loop; a previous run still active is stopped.
    pub fn start(&self, batch: &str, start_time_ms: i64) -> anyhow::Result<()> {
        let audit = AuditWriter::create(&self.audit_path(batch))?;
        self.inner
            .expected_workers
            .store(self.inner.config.init_workers, Ordering::Relaxed);
        lock(&self.inner.window_completed).clear();

        let (stop_tx, stop_rx) = watch::channel(false);
        if let Some(previous) = lock(&self.inner.run_stop).replace(stop_tx) {
            warn!("control loop already running, replacing it");
            let _ = previous.send(true);
        }

        let state = RunState {
            batch_start_ms: start_time_ms,
            elapsed_secs: 0,
            reward: 0.0,
            history: Vec::new(),
            audit,
        };
        info!(
            batch,
            window_secs = self.inner.config.metrics_window_secs,
            autoscaling = self.inner.config.enable_autoscaling,
            "control loop started"
        );
        tokio::spawn(run_loop(self.inner.clone(), state, stop_rx));
        Ok(())
    }

    /// Stop the active control run, if any.
    pub fn stop(&self) {
        if let Some(stop) = lock(&self.inner.run_stop).take() {
            let _ = stop.send(true);
            info!("control loop stopped");
        }
    }

    /// Where the audit trail for a batch lands.
    pub fn audit_path(&self, batch: &str) -> PathBuf {
        self.inner.output_dir.join(format!("{batch}-audit.csv"))
    }
}

async fn run_loop(inner: Arc<Inner>, mut state: RunState, mut stop: watch::Receiver<bool>) {
    let window = Duration::from_secs(inner.config.metrics_window_secs);
    let second = Duration::from_secs(1);
    let mut step_tick = interval_at(Instant::now() + window, window);
    let mut report_tick = interval_at(Instant::now() + second, second);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = step_tick.tick() => step(&inner, &mut state),
            _ = report_tick.tick() => report(&inner).await,
        }
    }
    debug!("control loop exited");
}

/// One metrics-window step: aggregate, accumulate reward, forecast.
fn step(inner: &Arc<Inner>, state: &mut RunState) {
    state.elapsed_secs += inner.config.metrics_window_secs;
    let at_ms = state.batch_start_ms + state.elapsed_secs as i64 * 1000;

    let completed: Vec<Job> = std::mem::take(&mut *lock(&inner.window_completed));
    let qualifying = qualifying_jobs(&completed, inner.config.latency_threshold_ms);
    let total_worker = inner.store.read_gauge(at_ms, &keys::WORKER_NUM).round() as u32;
    state.reward += reward_delta(qualifying, total_worker, &inner.config);

    let dp = DataPoint {
        expected_worker: inner.expected_workers.load(Ordering::Relaxed),
        running_worker: inner
            .store
            .read_gauge(at_ms, &keys::RUNNING_WORKER_NUM)
            .round() as u32,
        total_worker,
        new_job: inner.store.read_count(at_ms, &keys::JOB_REQUEST).round() as u64,
        ongoing_job: inner.queue_depth.load(Ordering::Relaxed),
        completed_job: inner.store.read_count(at_ms, &keys::JOB_SUCCESS).round() as u64,
        avg_duration_ms: inner.store.read_time(at_ms, &keys::JOB_DURATION).as_millis() as f64,
        avg_delay_ms: inner.store.read_time(at_ms, &keys::JOB_LATENCY).as_millis() as f64,
        reward: state.reward,
    };
    debug!(
        elapsed_secs = state.elapsed_secs,
        new_job = dp.new_job,
        ongoing_job = dp.ongoing_job,
        completed_job = dp.completed_job,
        reward = dp.reward,
        "control step"
    );
    state.history.push(dp.clone());

    if inner.config.enable_autoscaling {
        let points = forecast_points(&state.history, inner.config.forecast_window);
        let elapsed_secs = state.elapsed_secs;
        let inner = inner.clone();
        // Fire and forget: a slow or failing forecaster must never stall
        // the step ticker.
        tokio::spawn(async move {
            let target = match inner.remote.forecast(elapsed_secs, points).await {
                Ok(target) => target,
                Err(e) => {
                    error!(error = %e, "forecast call failed");
                    return;
                }
            };
            if target == inner.expected_workers.load(Ordering::Relaxed) {
                return;
            }
            inner.expected_workers.store(target, Ordering::Relaxed);
            if let Err(e) = inner.remote.resize(target).await {
                error!(target, error = %e, "fleet resize failed");
            } else {
                info!(target, "fleet resized");
            }
        });
    }

    if let Err(e) = state.audit.append(state.elapsed_secs, &dp) {
        warn!(error = %e, "audit row write failed");
    }
}

/// One report tick: poll the dashboard, refresh the worker gauges.
async fn report(inner: &Arc<Inner>) {
    let counts = match inner.remote.worker_counts().await {
        Ok(counts) => counts,
        Err(e) => {
            error!(error = %e, "worker count poll failed");
            return;
        }
    };

    let depth = inner.queue_depth.load(Ordering::Relaxed) as f64;
    let expected = inner.expected_workers.load(Ordering::Relaxed) as f64;
    let nodes = inner.fleet.node_count() as f64;

    inner.store.gauge(&keys::QUEUE_SIZE, depth);
    inner.sink.gauge(&keys::QUEUE_SIZE, depth, &[]);
    inner.store.gauge(&keys::EXPECTED_WORKER_NUM, expected);
    inner.sink.gauge(&keys::EXPECTED_WORKER_NUM, expected, &[]);
    inner
        .store
        .gauge(&keys::RUNNING_WORKER_NUM, counts.running as f64);
    inner
        .sink
        .gauge(&keys::RUNNING_WORKER_NUM, counts.running as f64, &[]);
    inner.store.gauge(&keys::WORKER_NUM, counts.total as f64);
    inner.sink.gauge(&keys::WORKER_NUM, counts.total as f64, &[]);
    inner.store.gauge(&keys::NODE_NUM, nodes);
    inner.sink.gauge(&keys::NODE_NUM, nodes, &[]);
}

/// Completed jobs that earn the per-job reward: successful and under the
/// latency threshold.
fn qualifying_jobs(completed: &[Job], latency_threshold_ms: i64) -> usize {
    completed
        .iter()
        .filter(|job| job.success && job.latency_ms() < latency_threshold_ms)
        .count()
}

/// Reward earned in one window: per-job reward for qualifying completions
/// minus the fleet's prorated hourly cost.
fn reward_delta(qualifying: usize, total_worker: u32, config: &ScalerConfig) -> f64 {
    qualifying as f64 * config.job_reward
        - config.worker_cost_per_hour * config.metrics_window_secs as f64 / 3600.0
            * total_worker as f64
}

/// The most recent `window` data points, oldest first. A short history
/// yields a short list; the forecaster is never fed padding.
fn forecast_points(history: &[DataPoint], window: usize) -> Vec<ForecastPoint> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|dp| ForecastPoint {
            running_worker: dp.running_worker,
            new_job: dp.new_job,
            ongoing_job: dp.ongoing_job,
            completed_job: dp.completed_job,
            avg_duration_ms: dp.avg_duration_ms,
            avg_delay_ms: dp.avg_delay_ms,
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{BoxFuture, WorkerCounts};

    use loadgrid_core::{GenerateParams, epoch_millis};
    use loadgrid_metrics::NoopSink;

    struct MockControl {
        counts: WorkerCounts,
        forecast_target: u32,
        forecast_inputs: Mutex<Vec<Vec<ForecastPoint>>>,
        resize_calls: Mutex<Vec<u32>>,
    }

    impl MockControl {
        fn new(forecast_target: u32) -> Arc<Self> {
            Arc::new(Self {
                counts: WorkerCounts {
                    running: 2,
                    total: 3,
                },
                forecast_target,
                forecast_inputs: Mutex::new(Vec::new()),
                resize_calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl FleetControl for MockControl {
        fn worker_counts(&self) -> BoxFuture<anyhow::Result<WorkerCounts>> {
            let counts = self.counts;
            Box::pin(async move { Ok(counts) })
        }

        fn forecast(
            &self,
            _elapsed_secs: u64,
            points: Vec<ForecastPoint>,
        ) -> BoxFuture<anyhow::Result<u32>> {
            self.forecast_inputs.lock().unwrap().push(points);
            let target = self.forecast_target;
            Box::pin(async move { Ok(target) })
        }

        fn resize(&self, workers: u32) -> BoxFuture<anyhow::Result<()>> {
            self.resize_calls.lock().unwrap().push(workers);
            Box::pin(async { Ok(()) })
        }
    }

    fn config(window_secs: u64, autoscaling: bool) -> ScalerConfig {
        ScalerConfig {
            metrics_window_secs: window_secs,
            forecast_window: 6,
            enable_autoscaling: autoscaling,
            init_workers: 1,
            job_reward: 0.02,
            worker_cost_per_hour: 1.2,
            latency_threshold_ms: 60_000,
        }
    }

    fn completed_job(id: &str, success: bool, latency_ms: i64) -> Job {
        let mut job = Job::new(
            id,
            GenerateParams {
                prompt: "test".to_string(),
                steps: 20,
                cfg_scale: 7.0,
                sampler_index: "DDIM".to_string(),
                width: 512,
                height: 512,
            },
        );
        job.request_time = 1_000;
        job.start_time = 1_100;
        job.end_time = 1_000 + latency_ms;
        job.success = success;
        job
    }

    fn point(n: u64) -> DataPoint {
        DataPoint {
            expected_worker: 1,
            running_worker: n as u32,
            total_worker: n as u32,
            new_job: n,
            ongoing_job: n as i64,
            completed_job: n,
            avg_duration_ms: n as f64,
            avg_delay_ms: n as f64,
            reward: 0.0,
        }
    }

    #[test]
    fn reward_delta_exact_arithmetic() {
        // 2 qualifying jobs at 0.02 each, 3 workers at 1.2/h over a 10s
        // window: 0.04 - 1.2 * 10/3600 * 3 = 0.04 - 0.01.
        let delta = reward_delta(2, 3, &config(10, false));
        assert!((delta - 0.03).abs() < 1e-12);
    }

    #[test]
    fn qualifying_needs_success_and_low_latency() {
        let jobs = vec![
            completed_job("ok", true, 1_000),
            completed_job("slow", true, 60_000), // at the threshold: excluded
            completed_job("failed", false, 1_000),
        ];
        assert_eq!(qualifying_jobs(&jobs, 60_000), 1);
    }

    #[test]
    fn forecast_points_take_recent_suffix_oldest_first() {
        let history: Vec<DataPoint> = (1..=10).map(point).collect();
        let points = forecast_points(&history, 6);
        assert_eq!(points.len(), 6);
        assert_eq!(points[0].new_job, 5);
        assert_eq!(points[5].new_job, 10);
    }

    #[test]
    fn forecast_points_short_history_is_not_padded() {
        let history: Vec<DataPoint> = (1..=2).map(point).collect();
        let points = forecast_points(&history, 6);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].new_job, 1);
    }

    #[test]
    fn forecast_point_wire_names() {
        let json = serde_json::to_value(&forecast_points(&[point(3)], 6)[0]).unwrap();
        assert_eq!(json["active_workers"], 3);
        assert_eq!(json["num_new_tasks"], 3);
        assert_eq!(json["num_ongoing_tasks"], 3);
        assert_eq!(json["num_completed_tasks"], 3);
        assert!(json.get("running_worker").is_none());
    }

    fn scaler(
        window_secs: u64,
        autoscaling: bool,
        remote: Arc<MockControl>,
        dir: &std::path::Path,
    ) -> Scaler {
        Scaler::new(
            config(window_secs, autoscaling),
            dir,
            MetricStore::new(Duration::from_secs(window_secs)),
            Arc::new(NoopSink),
            remote,
            FleetView::new(),
        )
    }

    #[test]
    fn job_hooks_track_queue_depth() {
        let dir = tempfile::tempdir().unwrap();
        let scaler = scaler(10, false, MockControl::new(1), dir.path());

        let job = completed_job("a", true, 100);
        scaler.pre_process_job(&job);
        scaler.pre_process_job(&job);
        assert_eq!(scaler.queue_depth(), 2);
        scaler.post_process_job(&job);
        assert_eq!(scaler.queue_depth(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn step_forecasts_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockControl::new(4);
        let scaler = scaler(1, true, remote.clone(), dir.path());

        scaler.start("batch-a", epoch_millis()).unwrap();
        scaler.post_process_job(&completed_job("a", true, 100));

        // Let the first step tick fire and the spawned forecast task run.
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        scaler.stop();

        assert_eq!(remote.forecast_inputs.lock().unwrap().len(), 1);
        assert_eq!(remote.resize_calls.lock().unwrap().as_slice(), &[4]);
        assert_eq!(scaler.expected_workers(), 4);

        let audit = std::fs::read_to_string(scaler.audit_path("batch-a")).unwrap();
        assert!(audit.lines().count() >= 2, "audit has no step rows");
    }

    #[tokio::test(start_paused = true)]
    async fn forecast_matching_target_skips_resize() {
        let dir = tempfile::tempdir().unwrap();
        // Forecast returns the init target: no resize expected.
        let remote = MockControl::new(1);
        let scaler = scaler(1, true, remote.clone(), dir.path());

        scaler.start("batch-b", epoch_millis()).unwrap();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        scaler.stop();

        assert_eq!(remote.forecast_inputs.lock().unwrap().len(), 1);
        assert!(remote.resize_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn report_refreshes_worker_gauges() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockControl::new(1);
        let store = MetricStore::new(Duration::from_secs(10));
        let scaler = Scaler::new(
            config(10, false),
            dir.path(),
            store.clone(),
            Arc::new(NoopSink),
            remote,
            FleetView::new(),
        );

        scaler.start("batch-c", epoch_millis()).unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        scaler.stop();

        let now = epoch_millis();
        assert_eq!(store.read_gauge(now, &keys::RUNNING_WORKER_NUM), 2.0);
        assert_eq!(store.read_gauge(now, &keys::WORKER_NUM), 3.0);
        assert_eq!(store.read_gauge(now, &keys::EXPECTED_WORKER_NUM), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn autoscaling_disabled_never_calls_forecaster() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockControl::new(9);
        let scaler = scaler(1, false, remote.clone(), dir.path());

        scaler.start("batch-d", epoch_millis()).unwrap();
        tokio::time::sleep(Duration::from_millis(2_200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        scaler.stop();

        assert!(remote.forecast_inputs.lock().unwrap().is_empty());
        assert!(remote.resize_calls.lock().unwrap().is_empty());
    }
}
