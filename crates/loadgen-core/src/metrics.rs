//! Metrics collection and statistics.
//!
//! One `MetricsCollector` is shared by every worker. All bookkeeping happens
//! under a single mutex; telemetry export happens after the lock is dropped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::client::ConnectionEvents;
use crate::error::ClientError;
use crate::operation::Operation;
use crate::shutdown::StopReason;
use crate::summary::{
    format_duration, percent, ConnectionStats, LatencyStats, OperationSummary, PubSubStats,
    RunSummary,
};
use crate::telemetry::{PubSubDirection, RunIdentity, Telemetry};

/// Default number of latency samples kept per operation.
pub const DEFAULT_LATENCY_WINDOW: usize = 10_000;

/// Outcome of one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub operation: Operation,
    pub success: bool,
    pub elapsed_secs: f64,
    pub error_kind: Option<&'static str>,
}

impl OperationRecord {
    pub fn success(operation: Operation, elapsed: Duration) -> Self {
        Self {
            operation,
            success: true,
            elapsed_secs: elapsed.as_secs_f64(),
            error_kind: None,
        }
    }

    pub fn failure(operation: Operation, elapsed: Duration, error: &ClientError) -> Self {
        Self {
            operation,
            success: false,
            elapsed_secs: elapsed.as_secs_f64(),
            error_kind: Some(error.kind_tag()),
        }
    }
}

/// Running counters for one operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration_secs: f64,
    pub errors_by_kind: BTreeMap<String, u64>,
    latencies_ms: VecDeque<f64>,
    window: usize,
}

impl OperationMetrics {
    fn new(window: usize) -> Self {
        Self {
            total_count: 0,
            success_count: 0,
            error_count: 0,
            total_duration_secs: 0.0,
            errors_by_kind: BTreeMap::new(),
            latencies_ms: VecDeque::with_capacity(window.min(1024)),
            window,
        }
    }

    fn record(&mut self, success: bool, elapsed_secs: f64, error_kind: Option<&str>) {
        self.total_count += 1;
        self.total_duration_secs += elapsed_secs;
        if self.latencies_ms.len() == self.window {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(elapsed_secs * 1000.0);
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
            if let Some(kind) = error_kind {
                *self.errors_by_kind.entry(kind.to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Samples currently in the window, oldest first.
    pub fn latencies_ms(&self) -> impl Iterator<Item = f64> + '_ {
        self.latencies_ms.iter().copied()
    }

    fn summarize(&self, operation: Operation) -> OperationSummary {
        let mut samples: Vec<f64> = self.latencies_ms().collect();
        OperationSummary {
            operation: operation.as_str().to_string(),
            total_count: self.total_count,
            success_count: self.success_count,
            error_count: self.error_count,
            success_rate: percent(self.success_count, self.total_count),
            avg_duration_ms: if self.total_count > 0 {
                self.total_duration_secs * 1000.0 / self.total_count as f64
            } else {
                0.0
            },
            latency: latency_stats(&mut samples),
            errors_by_kind: self.errors_by_kind.clone(),
        }
    }
}

/// Point-in-time view used by the periodic reporter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallStats {
    pub elapsed_secs: f64,
    pub interval_secs: f64,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Percent.
    pub success_rate: f64,
    pub throughput: f64,
    pub interval_throughput: f64,
    pub connections: ConnectionStats,
    pub pubsub: PubSubStats,
}

impl OverallStats {
    pub fn error_rate(&self) -> f64 {
        percent(self.failed_operations, self.total_operations)
    }
}

struct State {
    operations: HashMap<Operation, OperationMetrics>,
    connection_attempts: u64,
    connection_failures: u64,
    reconnections: u64,
    reconnection_secs: f64,
    pubsub: PubSubStats,
    last_reset: Instant,
    ops_at_last_reset: u64,
}

impl State {
    fn totals(&self) -> (u64, u64, u64) {
        self.operations.values().fold((0, 0, 0), |acc, m| {
            (acc.0 + m.total_count, acc.1 + m.success_count, acc.2 + m.error_count)
        })
    }

    fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            attempts: self.connection_attempts,
            failures: self.connection_failures,
            success_rate: percent(
                self.connection_attempts - self.connection_failures,
                self.connection_attempts,
            ),
            reconnections: self.reconnections,
            avg_reconnection_ms: if self.reconnections > 0 {
                self.reconnection_secs * 1000.0 / self.reconnections as f64
            } else {
                0.0
            },
        }
    }
}

/// Thread-safe aggregator for every worker's results.
pub struct MetricsCollector {
    state: Mutex<State>,
    window: usize,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    telemetry: Telemetry,
}

impl MetricsCollector {
    pub fn new(window: usize, telemetry: Telemetry) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(State {
                operations: HashMap::new(),
                connection_attempts: 0,
                connection_failures: 0,
                reconnections: 0,
                reconnection_secs: 0.0,
                pubsub: PubSubStats::default(),
                last_reset: now,
                ops_at_last_reset: 0,
            }),
            window: window.max(1),
            started_at: now,
            started_wall: Utc::now(),
            telemetry,
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn record(&self, record: OperationRecord) {
        let elapsed = sanitize(record.elapsed_secs);
        {
            let mut state = self.state.lock();
            state
                .operations
                .entry(record.operation)
                .or_insert_with(|| OperationMetrics::new(self.window))
                .record(record.success, elapsed, record.error_kind);
        }
        self.telemetry.operation(
            record.operation,
            record.success,
            elapsed * 1000.0,
            record.error_kind,
        );
    }

    /// Record a batch that took `elapsed_secs` for one round trip. The time is
    /// split evenly across members and every member shares the outcome.
    pub fn record_batch(&self, operations: &[Operation], elapsed_secs: f64, error: Option<&ClientError>) {
        if operations.is_empty() {
            return;
        }
        let share = sanitize(elapsed_secs) / operations.len() as f64;
        let error_kind = error.map(ClientError::kind_tag);
        let success = error.is_none();
        {
            let mut state = self.state.lock();
            for op in operations {
                state
                    .operations
                    .entry(*op)
                    .or_insert_with(|| OperationMetrics::new(self.window))
                    .record(success, share, error_kind);
            }
        }
        for op in operations {
            self.telemetry.operation(*op, success, share * 1000.0, error_kind);
        }
    }

    pub fn record_pubsub(
        &self,
        channel: &str,
        direction: PubSubDirection,
        subscriber_id: Option<&str>,
        success: bool,
    ) {
        {
            let mut state = self.state.lock();
            let stats = &mut state.pubsub;
            match (direction, success) {
                (PubSubDirection::Publish, true) => stats.published += 1,
                (PubSubDirection::Publish, false) => stats.publish_failures += 1,
                (PubSubDirection::Receive, true) => stats.received += 1,
                (PubSubDirection::Receive, false) => stats.receive_errors += 1,
            }
        }
        self.telemetry.pubsub(channel, direction, subscriber_id, success);
    }

    pub fn record_connection_attempt(&self, success: bool) {
        {
            let mut state = self.state.lock();
            state.connection_attempts += 1;
            if !success {
                state.connection_failures += 1;
            }
        }
        self.telemetry.connection(success);
    }

    pub fn record_reconnection(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        {
            let mut state = self.state.lock();
            state.reconnections += 1;
            state.reconnection_secs += secs;
        }
        self.telemetry.reconnection(secs * 1000.0);
    }

    pub fn snapshot_overall(&self) -> OverallStats {
        let state = self.state.lock();
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let interval = state.last_reset.elapsed().as_secs_f64();
        let (total, success, failed) = state.totals();
        OverallStats {
            elapsed_secs: elapsed,
            interval_secs: interval,
            total_operations: total,
            successful_operations: success,
            failed_operations: failed,
            success_rate: percent(success, total),
            throughput: rate(total, elapsed),
            interval_throughput: rate(total - state.ops_at_last_reset, interval),
            connections: state.connection_stats(),
            pubsub: state.pubsub.clone(),
        }
    }

    /// Start a new reporting interval. Cumulative counters are untouched.
    pub fn reset_interval(&self) {
        let mut state = self.state.lock();
        state.ops_at_last_reset = state.totals().0;
        state.last_reset = Instant::now();
    }

    pub fn operation_stats(&self, operation: Operation) -> Option<OperationSummary> {
        let state = self.state.lock();
        state
            .operations
            .get(&operation)
            .filter(|m| m.total_count > 0)
            .map(|m| m.summarize(operation))
    }

    /// Refresh the derived throughput and error-rate gauges.
    pub fn publish_rates(&self) {
        let stats = self.snapshot_overall();
        self.telemetry.rates(stats.throughput, stats.error_rate());
    }

    pub fn final_summary(&self, identity: &RunIdentity, stop_reason: Option<StopReason>) -> RunSummary {
        let end = Utc::now();
        let state = self.state.lock();
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let (total, success, failed) = state.totals();

        let mut combined: Vec<f64> = state
            .operations
            .values()
            .flat_map(|m| m.latencies_ms())
            .collect();

        let mut operations: Vec<OperationSummary> = state
            .operations
            .iter()
            .map(|(op, m)| m.summarize(*op))
            .collect();
        operations.sort_by(|a, b| a.operation.cmp(&b.operation));

        RunSummary {
            app_name: identity.app_name.clone(),
            instance_id: identity.instance_id.clone(),
            run_id: identity.run_id.clone(),
            version: identity.version.clone(),
            start_time: self.started_wall.to_rfc3339(),
            end_time: end.to_rfc3339(),
            duration_secs: elapsed,
            duration: format_duration(elapsed),
            stop_reason: stop_reason.map(|r| r.as_str().to_string()),
            total_commands_count: total,
            successful_commands_count: success,
            failed_commands_count: failed,
            success_rate: percent(success, total),
            overall_throughput: rate(total, elapsed),
            latency: latency_stats(&mut combined),
            connections: state.connection_stats(),
            pubsub: state.pubsub.clone(),
            operations,
        }
    }
}

impl ConnectionEvents for MetricsCollector {
    fn on_connect(&self, success: bool) {
        self.record_connection_attempt(success);
    }

    fn on_reconnect(&self, duration: Duration) {
        self.record_reconnection(duration);
    }
}

/// Nearest-rank percentile over an ascending slice: the value at
/// `ceil(p/100 * n) - 1`. Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

/// Sort `samples` in place and summarize them. p95 needs at least 20
/// samples and p99 at least 100; below that they report the maximum.
pub fn latency_stats(samples: &mut [f64]) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let n = samples.len();
    let max = samples[n - 1];
    LatencyStats {
        samples: n,
        min_ms: samples[0],
        avg_ms: samples.iter().sum::<f64>() / n as f64,
        p50_ms: percentile(samples, 50.0),
        p95_ms: if n >= 20 { percentile(samples, 95.0) } else { max },
        p99_ms: if n >= 100 { percentile(samples, 99.0) } else { max },
        max_ms: max,
    }
}

fn sanitize(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}

fn rate(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(DEFAULT_LATENCY_WINDOW, Telemetry::disabled())
    }

    #[test]
    fn test_percentiles_on_one_to_hundred() {
        let mut samples: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let stats = latency_stats(&mut samples);
        assert_eq!(stats.p50_ms, 50.0);
        assert_eq!(stats.p95_ms, 95.0);
        assert_eq!(stats.p99_ms, 99.0);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 100.0);
        assert_eq!(stats.avg_ms, 50.5);
    }

    #[test]
    fn test_small_sample_falls_back_to_max() {
        let mut samples: Vec<f64> = (1..=10).map(f64::from).collect();
        let stats = latency_stats(&mut samples);
        assert_eq!(stats.p50_ms, 5.0);
        assert_eq!(stats.p95_ms, 10.0);
        assert_eq!(stats.p99_ms, 10.0);

        let mut samples: Vec<f64> = (1..=50).map(f64::from).collect();
        let stats = latency_stats(&mut samples);
        assert_eq!(stats.p95_ms, 48.0);
        assert_eq!(stats.p99_ms, 50.0);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        assert_eq!(latency_stats(&mut []), LatencyStats::default());
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_record_tracks_errors_by_kind() {
        let metrics = collector();
        metrics.record(OperationRecord::success(Operation::Get, Duration::from_millis(2)));
        metrics.record(OperationRecord::failure(
            Operation::Get,
            Duration::from_millis(4),
            &ClientError::timeout("slow"),
        ));
        metrics.record(OperationRecord {
            operation: Operation::Get,
            success: true,
            elapsed_secs: -1.0,
            error_kind: None,
        });

        let stats = metrics.operation_stats(Operation::Get).unwrap();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.errors_by_kind.get("TimeoutError"), Some(&1));
        assert_eq!(stats.latency.min_ms, 0.0);
        assert!(metrics.operation_stats(Operation::Set).is_none());
    }

    #[test]
    fn test_batch_duration_is_apportioned() {
        let metrics = collector();
        let ops = [Operation::Set, Operation::Get, Operation::Set, Operation::Incr];
        metrics.record_batch(&ops, 0.008, None);

        let summary = metrics.final_summary(&identity(), None);
        assert_eq!(summary.total_commands_count, 4);
        let total_ms: f64 = summary
            .operations
            .iter()
            .map(|op| op.avg_duration_ms * op.total_count as f64)
            .sum();
        assert!((total_ms - 8.0).abs() < 1e-9);
        assert_eq!(summary.operation("SET").unwrap().total_count, 2);
        assert!((summary.latency.max_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_batch_marks_every_member() {
        let metrics = collector();
        let err = ClientError::connection("reset by peer");
        metrics.record_batch(&[Operation::Lpush, Operation::Lpop], 0.002, Some(&err));
        let overall = metrics.snapshot_overall();
        assert_eq!(overall.failed_operations, 2);
        assert_eq!(overall.error_rate(), 100.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let metrics = MetricsCollector::new(3, Telemetry::disabled());
        for ms in [100u64, 1, 2, 3] {
            metrics.record(OperationRecord::success(Operation::Set, Duration::from_millis(ms)));
        }
        let stats = metrics.operation_stats(Operation::Set).unwrap();
        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.latency.samples, 3);
        assert!((stats.latency.max_ms - 3.0).abs() < 1e-9);
        // cumulative average still includes the evicted sample
        assert!((stats.avg_duration_ms - 26.5).abs() < 1e-9);
    }

    #[test]
    fn test_connection_and_pubsub_counters() {
        let metrics = collector();
        metrics.on_connect(true);
        metrics.on_connect(false);
        metrics.on_reconnect(Duration::from_millis(40));
        metrics.record_pubsub("news", PubSubDirection::Publish, None, true);
        metrics.record_pubsub("news", PubSubDirection::Receive, Some("subscriber_1"), true);

        let overall = metrics.snapshot_overall();
        assert_eq!(overall.connections.attempts, 2);
        assert_eq!(overall.connections.failures, 1);
        assert_eq!(overall.connections.success_rate, 50.0);
        assert_eq!(overall.connections.reconnections, 1);
        assert!((overall.connections.avg_reconnection_ms - 40.0).abs() < 1e-6);
        assert_eq!(overall.pubsub.published, 1);
        assert_eq!(overall.pubsub.received, 1);
        assert_eq!(overall.total_operations, 0);
    }

    #[test]
    fn test_reset_interval_keeps_totals() {
        let metrics = collector();
        metrics.record(OperationRecord::success(Operation::Set, Duration::from_micros(10)));
        metrics.reset_interval();
        let overall = metrics.snapshot_overall();
        assert_eq!(overall.total_operations, 1);
        assert_eq!(overall.interval_throughput, 0.0);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = std::sync::Arc::new(collector());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record(OperationRecord::success(
                            Operation::Incr,
                            Duration::from_micros(5),
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot_overall().total_operations, 4_000);
    }

    fn identity() -> RunIdentity {
        RunIdentity {
            app_name: "test".to_string(),
            instance_id: "i".to_string(),
            run_id: "r".to_string(),
            version: "0".to_string(),
        }
    }
}
