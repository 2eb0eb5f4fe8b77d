//! End-to-end runs of the engine against the in-memory store.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loadgen_core::{
    EngineState, LoadEngine, MemoryClientFactory, MemoryOptions, Operation, RunSummary,
    RunnerConfig, StopReason, WorkloadProfile,
};

fn base_config(clients: usize, threads: usize, secs: u64) -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.test.clients = clients;
    config.test.threads_per_client = threads;
    config.test.duration_secs = Some(secs);
    config.test.seed = Some(42);
    config.output.quiet = true;
    config.telemetry.enabled = false;
    config
}

fn memory(options: MemoryOptions) -> Arc<MemoryClientFactory> {
    Arc::new(MemoryClientFactory::new(options))
}

#[test]
fn weighted_mix_matches_configured_weights() {
    // unthrottled, stopped once at least 10,000 operations have gone through
    let mut config = base_config(2, 2, 60);
    config.test.target_ops_per_second = None;
    config.test.workload.operations = vec![Operation::Set, Operation::Get];
    config.test.workload.operation_weights =
        Some([(Operation::Set, 0.4), (Operation::Get, 0.6)].into_iter().collect());

    let factory = memory(MemoryOptions::default());
    let engine = LoadEngine::new(config, factory.clone()).unwrap();
    let token = engine.cancellation_token();

    let outcome = thread::scope(|scope| {
        let run = scope.spawn(|| engine.run());
        // round trips include one PING per worker on top of the operations
        let deadline = Instant::now() + Duration::from_secs(30);
        while factory.round_trips() < 10_100 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        token.cancel(StopReason::Cancelled);
        run.join().unwrap()
    })
    .unwrap();
    let summary = outcome.summary;

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(summary.total_commands_count >= 10_000, "{}", summary.total_commands_count);
    assert_eq!(summary.failed_commands_count, 0);

    let set = summary.operation("SET").unwrap().total_count as f64;
    let get = summary.operation("GET").unwrap().total_count as f64;
    let total = set + get;
    assert!((set / total - 0.4).abs() <= 0.05, "SET share was {}", set / total);
    assert!((get / total - 0.6).abs() <= 0.05, "GET share was {}", get / total);
    assert_eq!(set as u64 + get as u64, summary.total_commands_count);
}

#[test]
fn no_clients_fails_fast() {
    let config = base_config(3, 2, 30);
    let engine = LoadEngine::new(
        config,
        memory(MemoryOptions {
            fail_connect: true,
            ..MemoryOptions::default()
        }),
    )
    .unwrap();

    let started = Instant::now();
    let outcome = engine.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::NoClients);
    assert!(outcome.stop_reason.is_failure());
    assert_eq!(outcome.summary.total_commands_count, 0);
    assert_eq!(outcome.summary.connections.attempts, 3);
    assert_eq!(outcome.summary.connections.failures, 3);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn rate_limited_single_worker() {
    let mut config = base_config(1, 1, 2);
    config.test.target_ops_per_second = Some(100.0);

    let engine = LoadEngine::new(config, memory(MemoryOptions::default())).unwrap();
    let outcome = engine.run().unwrap();
    let total = outcome.summary.total_commands_count;

    assert!((180..=220).contains(&total), "completed {total} operations");
}

#[test]
fn low_per_worker_target_is_not_overshot() {
    // 8 ops/s over four workers leaves each worker 2 ops/s
    let mut config = base_config(1, 4, 2);
    config.test.target_ops_per_second = Some(8.0);

    let engine = LoadEngine::new(config, memory(MemoryOptions::default())).unwrap();
    let outcome = engine.run().unwrap();
    let total = outcome.summary.total_commands_count;

    assert_eq!(outcome.stop_reason, StopReason::DurationElapsed);
    assert!((12..=24).contains(&total), "completed {total} operations");
}

#[test]
fn all_workers_failing_stops_the_run() {
    let config = base_config(2, 2, 30);
    let engine = LoadEngine::new(
        config,
        memory(MemoryOptions {
            fail_commands: true,
            ..MemoryOptions::default()
        }),
    )
    .unwrap();

    let started = Instant::now();
    let outcome = engine.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::AllWorkersFailed);
    assert_eq!(engine.health().failed, 4);
    assert_eq!(engine.health().connected(), 0);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn summary_written_to_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results").join("summary.json");
    let mut config = base_config(1, 2, 1);
    config.output.output_file = Some(path.clone());

    let engine = LoadEngine::new(config, memory(MemoryOptions::default())).unwrap();
    let outcome = engine.run().unwrap();

    let written: RunSummary =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.run_id, outcome.summary.run_id);
    assert_eq!(written.total_commands_count, outcome.summary.total_commands_count);
    assert_eq!(written.stop_reason.as_deref(), Some("duration_elapsed"));
}

#[test]
fn pubsub_profile_publishes_and_receives() {
    let mut config = base_config(1, 2, 2);
    config.test.workload = WorkloadProfile::PubsubHeavy.spec();

    let engine = LoadEngine::new(config, memory(MemoryOptions::default())).unwrap();
    let summary = engine.run().unwrap().summary;

    assert!(summary.pubsub.published > 0);
    assert!(summary.pubsub.received > 0);
    assert!(summary.operation("PUBLISH").is_some());
}

#[test]
fn pipeline_profile_counts_logical_operations() {
    let mut config = base_config(1, 2, 1);
    config.test.workload = WorkloadProfile::HighThroughput.spec();

    let engine = LoadEngine::new(config, memory(MemoryOptions::default())).unwrap();
    let summary = engine.run().unwrap().summary;

    assert!(summary.total_commands_count >= 10);
    let per_op: u64 = summary.operations.iter().map(|o| o.total_count).sum();
    assert_eq!(per_op, summary.total_commands_count);
}
