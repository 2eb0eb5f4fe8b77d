//! Load test orchestration: client pool, worker threads, stats reporter and
//! the final summary.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::client::{ClientFactory, ClientPool, ConnectionEvents, StoreClient};
use crate::config::{RunnerConfig, WorkloadSpec};
use crate::error::{LoadGenError, LoadResult};
use crate::metrics::MetricsCollector;
use crate::rate_limiter::RateLimiter;
use crate::report::ResultsReport;
use crate::shutdown::{join_with_timeout, CancellationToken, StopReason};
use crate::summary::RunSummary;
use crate::telemetry::{RunIdentity, Telemetry};
use crate::values::{self, ValuePool};
use crate::workload::{self, Strategy, WorkloadContext};

/// Pause after a unit of work returns an error.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound on how long the orchestrator sleeps between checks.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// When the thread-health line is logged.
const HEALTH_CHECK_AFTER: Duration = Duration::from_secs(1);

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Connecting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Initializing => "initializing",
            EngineState::Connecting => "connecting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What `LoadEngine::run` produces.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub stop_reason: StopReason,
}

/// Started/failed worker counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCounts {
    pub started: usize,
    pub failed: usize,
}

impl HealthCounts {
    pub fn connected(&self) -> usize {
        self.started.saturating_sub(self.failed)
    }
}

/// Worker start/failure bookkeeping shared by all workers.
#[derive(Debug, Default)]
pub struct ThreadHealth {
    counts: Mutex<HealthCounts>,
}

impl ThreadHealth {
    pub fn counts(&self) -> HealthCounts {
        *self.counts.lock()
    }

    fn mark_started(&self) {
        self.counts.lock().started += 1;
    }

    /// Returns the failed count after this failure.
    fn mark_failed(&self) -> usize {
        let mut counts = self.counts.lock();
        counts.failed += 1;
        counts.failed
    }
}

/// Per-worker state, owned by its thread and handed back on join.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub index: usize,
    pub started: bool,
    pub failed: bool,
    pub operations: u64,
    pub pacing_start: Instant,
}

impl WorkerState {
    fn new(index: usize) -> Self {
        Self {
            index,
            started: false,
            failed: false,
            operations: 0,
            pacing_start: Instant::now(),
        }
    }
}

/// Drives one load test run.
pub struct LoadEngine {
    config: RunnerConfig,
    strategy: Strategy,
    factory: Arc<dyn ClientFactory>,
    identity: RunIdentity,
    token: CancellationToken,
    state: Mutex<EngineState>,
    health: Arc<ThreadHealth>,
    started: AtomicBool,
}

impl LoadEngine {
    /// Validate `config` and resolve the workload strategy. Nothing connects
    /// until [`LoadEngine::run`].
    pub fn new(config: RunnerConfig, factory: Arc<dyn ClientFactory>) -> LoadResult<Self> {
        config.validate()?;
        let strategy = Strategy::resolve(&config.test.workload)?;
        let identity = RunIdentity::from_config(&config.telemetry);
        Ok(Self {
            config,
            strategy,
            factory,
            identity,
            token: CancellationToken::new(),
            state: Mutex::new(EngineState::Initializing),
            health: Arc::new(ThreadHealth::default()),
            started: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Token that stops the run when cancelled, e.g. from a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn health(&self) -> HealthCounts {
        self.health.counts()
    }

    fn transition(&self, next: EngineState) {
        let mut state = self.state.lock();
        let previous = *state;
        info!(from = %previous, to = %next, "Engine state change");
        *state = next;
    }

    /// Run the load test to completion. May be called once.
    pub fn run(&self) -> LoadResult<RunOutcome> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LoadGenError::InvalidState(
                "run() may only be called once per engine".to_string(),
            ));
        }

        let test = &self.config.test;
        info!(
            run_id = %self.identity.run_id,
            app_name = %self.identity.app_name,
            clients = test.clients,
            threads_per_client = test.threads_per_client,
            strategy = %self.strategy,
            driver = self.factory.name(),
            "Starting load test"
        );
        match test.duration_secs {
            Some(secs) => info!(duration_secs = secs, "Test duration configured"),
            None => info!("Test duration: unlimited (until interrupted)"),
        }

        let telemetry = Telemetry::new(&self.identity, self.config.telemetry.enabled);
        let metrics = Arc::new(MetricsCollector::new(test.latency_window, telemetry));
        let values = values::init_global(&test.workload.value_size);

        self.transition(EngineState::Connecting);
        let events: Arc<dyn ConnectionEvents> = metrics.clone();
        let pool = ClientPool::connect_all(self.factory.as_ref(), test.clients, events);
        if pool.is_empty() {
            error!(attempted = test.clients, "Failed to create any client instances");
            self.token.cancel(StopReason::NoClients);
            self.transition(EngineState::Stopped);
            return Ok(self.finish(&metrics, StopReason::NoClients));
        }

        self.transition(EngineState::Running);
        let started_at = Instant::now();
        let reporter = if self.config.output.quiet {
            None
        } else {
            self.spawn_reporter(Arc::clone(&metrics))
        };
        let workers = self.spawn_workers(&pool, &metrics, &values);
        info!(workers = workers.len(), handles = pool.len(), "Worker threads started");

        let reason = self.wait_for_stop(started_at);

        self.transition(EngineState::Stopping);
        self.token.cancel(reason);
        let reason = self.token.reason().unwrap_or(reason);
        self.join_workers(workers);
        if let Some(reporter) = reporter {
            if join_with_timeout(reporter, self.join_timeout()).is_err() {
                warn!("Stats reporter did not stop gracefully");
            }
        }
        let close_failures = pool.close_all();
        if close_failures > 0 {
            warn!(failures = close_failures, "Some client handles failed to close");
        }

        self.transition(EngineState::Stopped);
        Ok(self.finish(&metrics, reason))
    }

    /// Block until cancelled or the duration elapses.
    fn wait_for_stop(&self, started_at: Instant) -> StopReason {
        let deadline = self
            .config
            .test
            .duration_secs
            .map(|secs| started_at + Duration::from_secs(secs));
        let health_at = started_at + HEALTH_CHECK_AFTER;
        let mut health_logged = false;

        loop {
            if let Some(reason) = self.token.reason() {
                info!(reason = %reason, "Stop requested");
                return reason;
            }
            let now = Instant::now();
            if !health_logged && now >= health_at {
                self.log_health();
                health_logged = true;
            }
            if let Some(deadline) = deadline {
                if now >= deadline {
                    info!("Test duration completed");
                    return StopReason::DurationElapsed;
                }
            }

            let mut wait = POLL_INTERVAL;
            if let Some(deadline) = deadline {
                wait = wait.min(deadline.saturating_duration_since(now));
            }
            if !health_logged {
                wait = wait.min(health_at.saturating_duration_since(now));
            }
            self.token.wait_timeout(wait);
        }
    }

    fn log_health(&self) {
        let counts = self.health.counts();
        if counts.failed > 0 {
            warn!(
                connected = counts.connected(),
                started = counts.started,
                failed = counts.failed,
                "Thread health: some workers failed to start"
            );
        } else {
            info!(connected = counts.connected(), "Thread health: all workers connected");
        }
    }

    fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.config.test.join_timeout_secs)
    }

    fn spawn_reporter(&self, metrics: Arc<MetricsCollector>) -> Option<JoinHandle<()>> {
        let token = self.token.clone();
        let interval = Duration::from_secs(self.config.output.metrics_interval_secs);
        let spawned = thread::Builder::new()
            .name("stats-reporter".to_string())
            .spawn(move || stats_reporter(&metrics, &token, interval));
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to start stats reporter");
                None
            }
        }
    }

    fn spawn_workers(
        &self,
        pool: &ClientPool,
        metrics: &Arc<MetricsCollector>,
        values: &Arc<ValuePool>,
    ) -> Vec<JoinHandle<WorkerState>> {
        let test = &self.config.test;
        let total = test.total_workers();
        let limiter = RateLimiter::new(test.target_ops_per_second, total);
        if let Some(per_worker) = limiter.per_worker_target() {
            info!(per_worker_ops = per_worker, "Rate limiting enabled");
        }

        let mut handles = Vec::with_capacity(total);
        for index in 0..total {
            let Some(client) = pool.next() else {
                break;
            };
            let worker = Worker {
                index,
                total,
                client,
                spec: test.workload.clone(),
                strategy: self.strategy,
                metrics: Arc::clone(metrics),
                values: Arc::clone(values),
                token: self.token.clone(),
                health: Arc::clone(&self.health),
                limiter: limiter.clone(),
                seed: test.seed,
            };
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(worker = index, error = %e, "Failed to spawn worker thread");
                    let failed = self.health.mark_failed();
                    if failed >= total {
                        self.token.cancel(StopReason::AllWorkersFailed);
                    }
                }
            }
        }
        handles
    }

    /// Join workers against one shared grace period.
    fn join_workers(&self, workers: Vec<JoinHandle<WorkerState>>) {
        let deadline = Instant::now() + self.join_timeout();
        let mut operations = 0u64;
        let mut stuck = Vec::new();
        for handle in workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match join_with_timeout(handle, remaining) {
                Ok(Ok(state)) => operations += state.operations,
                Ok(Err(_)) => error!(thread = %name, "Worker thread panicked"),
                Err(_) => stuck.push(name),
            }
        }
        if !stuck.is_empty() {
            warn!(threads = ?stuck, "Threads did not stop gracefully");
        }
        debug!(operations, "Workers joined");
    }

    /// Build and emit the summary. Runs exactly once per run.
    fn finish(&self, metrics: &MetricsCollector, reason: StopReason) -> RunOutcome {
        let summary = metrics.final_summary(&self.identity, Some(reason));
        if let Err(e) = ResultsReport::emit(&summary, &self.config.output) {
            error!(error = %e, "Failed to output final summary");
        }
        info!(
            total = summary.total_commands_count,
            failed = summary.failed_commands_count,
            reason = %reason,
            "Load test stopped"
        );
        RunOutcome {
            summary,
            stop_reason: reason,
        }
    }
}

struct Worker {
    index: usize,
    total: usize,
    client: Arc<dyn StoreClient>,
    spec: WorkloadSpec,
    strategy: Strategy,
    metrics: Arc<MetricsCollector>,
    values: Arc<ValuePool>,
    token: CancellationToken,
    health: Arc<ThreadHealth>,
    limiter: RateLimiter,
    seed: Option<u64>,
}

impl Worker {
    fn run(self) -> WorkerState {
        let mut state = WorkerState::new(self.index);
        self.health.mark_started();
        state.started = true;

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.index as u64)),
            None => StdRng::from_entropy(),
        };
        let ctx = WorkloadContext {
            client: Arc::clone(&self.client),
            metrics: Arc::clone(&self.metrics),
            values: Arc::clone(&self.values),
            token: self.token.clone(),
            rng,
        };
        let mut workload = match workload::create(self.strategy, &self.spec, ctx) {
            Ok(workload) => workload,
            Err(e) => {
                state.failed = true;
                let failed = self.health.mark_failed();
                error!(
                    worker = self.index,
                    error = %e,
                    failed,
                    total = self.total,
                    "Worker stopping after connection failure"
                );
                if failed >= self.total {
                    error!("All worker threads failed to connect; stopping test");
                    self.token.cancel(StopReason::AllWorkersFailed);
                }
                return state;
            }
        };
        debug!(worker = self.index, workload = workload.name(), "Worker connected");

        let mut limiter = self.limiter;
        limiter.restart();
        state.pacing_start = Instant::now();

        while !self.token.is_cancelled() {
            match workload.execute() {
                Ok(done) => {
                    state.operations += done;
                    // pay off the whole pacing debt, one capped slice at a time
                    while let Some(pause) = limiter.pause(state.operations) {
                        if self.token.wait_timeout(pause) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(worker = self.index, error = %e, "Error in operation");
                    self.token.wait_timeout(ERROR_BACKOFF);
                }
            }
        }

        workload.cleanup();
        debug!(worker = self.index, operations = state.operations, "Worker finished");
        state
    }
}

fn stats_reporter(metrics: &MetricsCollector, token: &CancellationToken, interval: Duration) {
    while !token.wait_timeout(interval) {
        let stats = metrics.snapshot_overall();
        info!(
            total_ops = stats.total_operations,
            ops_per_sec = %format!("{:.1}", stats.throughput),
            interval_ops_per_sec = %format!("{:.1}", stats.interval_throughput),
            success_rate = %format!("{:.2}%", stats.success_rate),
            "Stats"
        );
        metrics.publish_rates();
        metrics.reset_interval();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryClientFactory, MemoryOptions};

    fn config() -> RunnerConfig {
        let mut config = RunnerConfig::default();
        config.test.clients = 2;
        config.test.threads_per_client = 2;
        config.test.duration_secs = Some(1);
        config.output.quiet = true;
        config.telemetry.enabled = false;
        config
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let mut bad = config();
        bad.test.threads_per_client = 0;
        let factory = Arc::new(MemoryClientFactory::new(MemoryOptions::default()));
        let err = LoadEngine::new(bad, factory).err().unwrap();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_run_only_once() {
        let factory = Arc::new(MemoryClientFactory::new(MemoryOptions::default()));
        let engine = LoadEngine::new(config(), factory).unwrap();
        assert_eq!(engine.state(), EngineState::Initializing);
        let outcome = engine.run().unwrap();
        assert_eq!(outcome.stop_reason, StopReason::DurationElapsed);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(outcome.summary.total_commands_count > 0);
        assert_eq!(engine.health().started, 4);
        assert!(matches!(engine.run(), Err(LoadGenError::InvalidState(_))));
    }

    #[test]
    fn test_external_cancel_stops_unlimited_run() {
        let mut cfg = config();
        cfg.test.duration_secs = None;
        let factory = Arc::new(MemoryClientFactory::new(MemoryOptions::default()));
        let engine = LoadEngine::new(cfg, factory).unwrap();
        let token = engine.cancellation_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            token.cancel(StopReason::Cancelled);
        });
        let started = Instant::now();
        let outcome = engine.run().unwrap();
        canceller.join().unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_health_counts() {
        let counts = HealthCounts {
            started: 5,
            failed: 2,
        };
        assert_eq!(counts.connected(), 3);
    }
}
