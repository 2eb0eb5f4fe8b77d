//! Final run summary and the statistics blocks it is built from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Connection lifecycle counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub failures: u64,
    /// Percent of attempts that succeeded.
    pub success_rate: f64,
    pub reconnections: u64,
    pub avg_reconnection_ms: f64,
}

/// Publish/receive counters. Receives are not operations; they do not feed
/// latency percentiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PubSubStats {
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub receive_errors: u64,
}

/// Per-operation breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation: String,
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    /// Mean over every recorded sample, not just the window.
    pub avg_duration_ms: f64,
    pub latency: LatencyStats,
    pub errors_by_kind: BTreeMap<String, u64>,
}

/// Emitted once at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub app_name: String,
    pub instance_id: String,
    pub run_id: String,
    pub version: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub total_commands_count: u64,
    pub successful_commands_count: u64,
    pub failed_commands_count: u64,
    pub success_rate: f64,
    pub overall_throughput: f64,
    pub latency: LatencyStats,
    pub connections: ConnectionStats,
    pub pubsub: PubSubStats,
    pub operations: Vec<OperationSummary>,
}

impl RunSummary {
    pub fn error_rate(&self) -> f64 {
        if self.total_commands_count == 0 {
            0.0
        } else {
            100.0 - self.success_rate
        }
    }

    pub fn operation(&self, name: &str) -> Option<&OperationSummary> {
        self.operations.iter().find(|op| op.operation == name)
    }
}

/// Human-readable duration, e.g. `1h 2m 3s`, `4m 5s`, `12.34s`.
pub fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "0s".to_string();
    }
    if secs < 60.0 {
        return format!("{:.2}s", secs);
    }
    let total = secs.round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

/// Percentage helper that treats an empty denominator as zero.
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12.345), "12.35s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3723.0), "1h 2m 3s");
        assert_eq!(format_duration(-1.0), "0s");
    }

    #[test]
    fn test_percent_of_zero() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
