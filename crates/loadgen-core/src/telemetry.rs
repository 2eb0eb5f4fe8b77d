//! Telemetry export through the `metrics` facade.
//!
//! Nothing here is exported unless a recorder is installed (the binary
//! installs the Prometheus exporter); without one every call is a no-op.

use metrics::{counter, gauge, histogram, Label};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::operation::Operation;

/// Identifies one run in telemetry and in the final summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub app_name: String,
    pub instance_id: String,
    pub run_id: String,
    pub version: String,
}

impl RunIdentity {
    /// Take identifiers from config, generating the ones that are missing.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            app_name: config.app_name.clone(),
            instance_id: config
                .instance_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            run_id: config
                .run_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            version: config
                .version
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

/// Direction of a pub/sub event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubDirection {
    Publish,
    Receive,
}

impl PubSubDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PubSubDirection::Publish => "publish",
            PubSubDirection::Receive => "receive",
        }
    }
}

/// Pushes counters, histograms and gauges tagged with the run identity.
#[derive(Debug, Clone)]
pub struct Telemetry {
    enabled: bool,
    base: Vec<Label>,
}

impl Telemetry {
    pub fn new(identity: &RunIdentity, enabled: bool) -> Self {
        let base = vec![
            Label::new("app_name", identity.app_name.clone()),
            Label::new("instance_id", identity.instance_id.clone()),
            Label::new("run_id", identity.run_id.clone()),
            Label::new("version", identity.version.clone()),
        ];
        Self { enabled, base }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            base: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn labels(&self, extra: &[(&'static str, &str)]) -> Vec<Label> {
        let mut labels = self.base.clone();
        labels.extend(
            extra
                .iter()
                .map(|(key, value)| Label::new(*key, value.to_string())),
        );
        labels
    }

    pub fn operation(&self, op: Operation, success: bool, duration_ms: f64, error_type: Option<&str>) {
        if !self.enabled {
            return;
        }
        let status = status(success);
        let counted = self.labels(&[
            ("operation", op.as_str()),
            ("status", status),
            ("error_type", error_type.unwrap_or("none")),
        ]);
        counter!("loadgen_operations_total", counted).increment(1);

        let timed = self.labels(&[("operation", op.as_str()), ("status", status)]);
        histogram!("loadgen_operation_duration_ms", timed).record(duration_ms);
    }

    pub fn connection(&self, success: bool) {
        if !self.enabled {
            return;
        }
        let labels = self.labels(&[("status", status(success))]);
        counter!("loadgen_connections_total", labels).increment(1);
    }

    pub fn reconnection(&self, duration_ms: f64) {
        if !self.enabled {
            return;
        }
        histogram!("loadgen_reconnection_duration_ms", self.base.clone()).record(duration_ms);
    }

    pub fn pubsub(
        &self,
        channel: &str,
        direction: PubSubDirection,
        subscriber_id: Option<&str>,
        success: bool,
    ) {
        if !self.enabled {
            return;
        }
        let labels = self.labels(&[
            ("channel", channel),
            ("direction", direction.as_str()),
            ("subscriber_id", subscriber_id.unwrap_or("none")),
            ("status", status(success)),
        ]);
        counter!("loadgen_pubsub_operations_total", labels).increment(1);
    }

    /// Derived gauges, refreshed by the stats reporter.
    pub fn rates(&self, throughput_ops: f64, error_rate_percent: f64) {
        if !self.enabled {
            return;
        }
        gauge!("loadgen_throughput_ops", self.base.clone()).set(throughput_ops);
        gauge!("loadgen_error_rate_percent", self.base.clone()).set(error_rate_percent);
    }
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}
