//! Configuration loading and management.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoadGenError, LoadResult};
use crate::operation::Operation;

/// Main runner configuration loaded from YAML/JSON or built from the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub connection: ConnectionConfig,
    pub test: TestConfig,
    pub output: OutputConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

/// Store connection parameters. Consumed only by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub client_name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: i64,
    pub connect_timeout_secs: Option<f64>,
    pub socket_timeout_secs: Option<f64>,
    /// Upper bound on pooled connections per client handle.
    pub max_connections: usize,
    /// Connect with `rediss://`.
    pub use_tls: bool,
    /// When false any server certificate is accepted.
    pub verify_peer: bool,
    /// PEM bundle trusted instead of the system roots.
    pub ssl_ca_certs: Option<PathBuf>,
    /// PEM client certificate for mutual TLS; needs `ssl_keyfile`.
    pub ssl_certfile: Option<PathBuf>,
    pub ssl_keyfile: Option<PathBuf>,
    pub protocol: Protocol,
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_name: "kv-loadgen".to_string(),
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            connect_timeout_secs: Some(5.0),
            socket_timeout_secs: Some(5.0),
            max_connections: 50,
            use_tls: false,
            verify_peer: true,
            ssl_ca_certs: None,
            ssl_certfile: None,
            ssl_keyfile: None,
            protocol: Protocol::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ConnectionConfig {
    fn validate(&self) -> LoadResult<()> {
        if self.max_connections == 0 {
            return Err(LoadGenError::invalid_config(
                "connection.max_connections",
                "must be > 0",
            ));
        }
        let uses_certs =
            self.ssl_ca_certs.is_some() || self.ssl_certfile.is_some() || self.ssl_keyfile.is_some();
        if uses_certs && !self.use_tls {
            return Err(LoadGenError::invalid_config(
                "connection.use_tls",
                "certificate files are set but TLS is disabled",
            ));
        }
        if self.ssl_certfile.is_some() != self.ssl_keyfile.is_some() {
            return Err(LoadGenError::invalid_config(
                "connection.ssl_certfile",
                "client certificate and key must be given together",
            ));
        }
        self.retry.validate()
    }
}

/// RESP protocol version negotiated with the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Resp2,
    Resp3,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Resp2 => "resp2",
            Protocol::Resp3 => "resp3",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = LoadGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2" | "resp2" => Ok(Protocol::Resp2),
            "3" | "resp3" => Ok(Protocol::Resp3),
            other => Err(LoadGenError::invalid_config(
                "connection.protocol",
                format!("expected 2 or 3, got '{}'", other),
            )),
        }
    }
}

/// Driver-level retries for commands that fail on a broken connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first; 0 disables retries.
    pub attempts: u32,
    /// Base delay before the first retry.
    pub delay_secs: f64,
    /// Double the delay on every attempt, with full jitter.
    pub exponential_backoff: bool,
    /// Ceiling for a single backoff delay.
    pub max_delay_secs: f64,
    /// Also retry commands that timed out.
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 0.1,
            exponential_backoff: true,
            max_delay_secs: 2.0,
            retry_on_timeout: true,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> LoadResult<()> {
        if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
            return Err(LoadGenError::invalid_config(
                "connection.retry.delay_secs",
                "must be >= 0",
            ));
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < self.delay_secs {
            return Err(LoadGenError::invalid_config(
                "connection.retry.max_delay_secs",
                "must be >= delay_secs",
            ));
        }
        Ok(())
    }
}

/// Test shape: how many clients and threads, for how long, how fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub clients: usize,
    pub threads_per_client: usize,
    /// Unlimited (until interrupted) when absent.
    pub duration_secs: Option<u64>,
    pub target_ops_per_second: Option<f64>,
    pub seed: Option<u64>, // Optional RNG seed for reproducible key/op sequences
    pub join_timeout_secs: u64,
    pub latency_window: usize,
    pub workload: WorkloadSpec,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            clients: 4,
            threads_per_client: 10,
            duration_secs: None,
            target_ops_per_second: None,
            seed: None,
            join_timeout_secs: 5,
            latency_window: 10_000,
            workload: WorkloadSpec::default(),
        }
    }
}

impl TestConfig {
    pub fn total_workers(&self) -> usize {
        self.clients * self.threads_per_client
    }
}

/// Workload category. Drives the default operation set and strategy choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    #[default]
    #[serde(alias = "custom")]
    GetSet,
    BasicRw,
    HighThroughput,
    ListOperations,
    PubsubHeavy,
    TransactionHeavy,
    AsyncMixed,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::GetSet => "get_set",
            WorkloadKind::BasicRw => "basic_rw",
            WorkloadKind::HighThroughput => "high_throughput",
            WorkloadKind::ListOperations => "list_operations",
            WorkloadKind::PubsubHeavy => "pubsub_heavy",
            WorkloadKind::TransactionHeavy => "transaction_heavy",
            WorkloadKind::AsyncMixed => "async_mixed",
        }
    }

    /// Operations used when the configuration names none.
    pub fn default_operations(&self) -> Vec<Operation> {
        match self {
            WorkloadKind::HighThroughput => vec![Operation::Set, Operation::Get, Operation::Incr],
            WorkloadKind::ListOperations => {
                vec![Operation::Lpush, Operation::Lrange, Operation::Lpop]
            }
            WorkloadKind::PubsubHeavy => vec![Operation::Publish, Operation::Subscribe],
            _ => vec![Operation::Set, Operation::Get],
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = LoadGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get_set" | "custom" => Ok(WorkloadKind::GetSet),
            "basic_rw" => Ok(WorkloadKind::BasicRw),
            "high_throughput" => Ok(WorkloadKind::HighThroughput),
            "list_operations" => Ok(WorkloadKind::ListOperations),
            "pubsub_heavy" => Ok(WorkloadKind::PubsubHeavy),
            "transaction_heavy" => Ok(WorkloadKind::TransactionHeavy),
            "async_mixed" => Ok(WorkloadKind::AsyncMixed),
            other => Err(LoadGenError::invalid_config(
                "workload.type",
                format!("unknown workload type '{}'", other),
            )),
        }
    }
}

/// Payload size policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSize {
    Fixed(usize),
    /// Inclusive bounds; one size is drawn per pool entry.
    Range { min: usize, max: usize },
}

impl Default for ValueSize {
    fn default() -> Self {
        ValueSize::Fixed(100)
    }
}

/// How operations are grouped into round trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    #[default]
    None,
    Pipeline,
    Transaction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Batching {
    pub mode: BatchMode,
    /// Falls back to the strategy default (10 pipeline, 5 transaction).
    pub size: Option<usize>,
}

/// Immutable description of the traffic mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSpec {
    #[serde(rename = "type")]
    pub kind: WorkloadKind,
    pub operations: Vec<Operation>,
    pub operation_weights: Option<BTreeMap<Operation, f64>>,
    pub key_prefix: String,
    pub key_range: u64,
    pub value_size: ValueSize,
    pub batching: Batching,
    pub channels: Vec<String>,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            kind: WorkloadKind::GetSet,
            operations: Vec::new(),
            operation_weights: None,
            key_prefix: "test_key".to_string(),
            key_range: 10_000,
            value_size: ValueSize::default(),
            batching: Batching::default(),
            channels: vec!["test_channel".to_string()],
        }
    }
}

impl WorkloadSpec {
    /// Configured operations, or the category defaults when none are given.
    pub fn effective_operations(&self) -> Vec<Operation> {
        if self.operations.is_empty() {
            self.kind.default_operations()
        } else {
            self.operations.clone()
        }
    }

    /// Weight map, if one is configured and non-empty.
    pub fn weights(&self) -> Option<&BTreeMap<Operation, f64>> {
        self.operation_weights.as_ref().filter(|w| !w.is_empty())
    }

    /// Check the workload on its own, without the surrounding run settings.
    pub fn validate(&self) -> LoadResult<()> {
        if self.key_prefix.is_empty() {
            return Err(LoadGenError::invalid_config(
                "workload.key_prefix",
                "must not be empty",
            ));
        }
        match self.value_size {
            ValueSize::Fixed(_) => {}
            ValueSize::Range { min, max } if min > max => {
                return Err(LoadGenError::invalid_config(
                    "workload.value_size",
                    format!("min ({}) must be <= max ({})", min, max),
                ));
            }
            ValueSize::Range { .. } => {}
        }
        if self.batching.size == Some(0) {
            return Err(LoadGenError::invalid_config(
                "workload.batching.size",
                "must be >= 1",
            ));
        }
        if let Some(weights) = self.weights() {
            let operations = self.effective_operations();
            for (op, weight) in weights {
                if !operations.contains(op) {
                    return Err(LoadGenError::invalid_config(
                        "workload.operation_weights",
                        format!("{} is weighted but not in the operation set", op),
                    ));
                }
                if !weight.is_finite() || *weight <= 0.0 {
                    return Err(LoadGenError::invalid_config(
                        "workload.operation_weights",
                        format!("weight for {} must be a positive number, got {}", op, weight),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Console summary format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = LoadGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(LoadGenError::invalid_config(
                "output.format",
                format!("expected table, json or csv, got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Final summary is written here as JSON instead of printed.
    pub output_file: Option<PathBuf>,
    /// Suppresses periodic stats and the console summary.
    pub quiet: bool,
    pub metrics_interval_secs: u64,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_file: None,
            quiet: false,
            metrics_interval_secs: 5,
            format: OutputFormat::Table,
        }
    }
}

/// Telemetry export and run identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub metrics_port: u16,
    pub app_name: String,
    /// Generated when absent.
    pub instance_id: Option<String>,
    /// Generated when absent.
    pub run_id: Option<String>,
    pub version: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_port: 8000,
            app_name: "rust".to_string(),
            instance_id: None,
            run_id: None,
            version: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a YAML (`.yaml`/`.yml`) or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    /// Save configuration to a YAML or JSON file, chosen by extension.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> LoadResult<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) || path.extension().is_none() {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> LoadResult<()> {
        let test = &self.test;
        if test.clients == 0 {
            return Err(LoadGenError::invalid_config("test.clients", "must be > 0"));
        }
        if test.threads_per_client == 0 {
            return Err(LoadGenError::invalid_config(
                "test.threads_per_client",
                "must be > 0",
            ));
        }
        if test.duration_secs == Some(0) {
            return Err(LoadGenError::invalid_config(
                "test.duration_secs",
                "must be > 0 (omit for unlimited)",
            ));
        }
        if let Some(target) = test.target_ops_per_second {
            if !target.is_finite() || target <= 0.0 {
                return Err(LoadGenError::invalid_config(
                    "test.target_ops_per_second",
                    "must be a positive number",
                ));
            }
        }
        if test.latency_window == 0 {
            return Err(LoadGenError::invalid_config("test.latency_window", "must be > 0"));
        }
        if self.output.metrics_interval_secs == 0 {
            return Err(LoadGenError::invalid_config(
                "output.metrics_interval_secs",
                "must be > 0",
            ));
        }
        self.connection.validate()?;
        test.workload.validate()
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        RunnerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("3".parse::<Protocol>().unwrap(), Protocol::Resp3);
        assert_eq!("RESP2".parse::<Protocol>().unwrap(), Protocol::Resp2);
        assert!("4".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_tls_settings_validated() {
        let mut config = RunnerConfig::default();
        config.connection.ssl_ca_certs = Some(PathBuf::from("ca.pem"));
        assert!(config.validate().is_err());

        config.connection.use_tls = true;
        config.validate().unwrap();

        config.connection.ssl_certfile = Some(PathBuf::from("client.pem"));
        assert!(config.validate().is_err());
        config.connection.ssl_keyfile = Some(PathBuf::from("client.key"));
        config.validate().unwrap();
    }

    #[test]
    fn test_retry_settings_validated() {
        let mut config = RunnerConfig::default();
        config.connection.retry.delay_secs = 5.0;
        assert!(config.validate().is_err());
        config.connection.retry.max_delay_secs = 5.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_connection_section_from_yaml() {
        let yaml = "connection:\n  use_tls: true\n  protocol: resp3\n  retry:\n    attempts: 5\n";
        let config: RunnerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.connection.use_tls);
        assert_eq!(config.connection.protocol, Protocol::Resp3);
        assert_eq!(config.connection.retry.attempts, 5);
        assert_eq!(config.connection.retry.delay_secs, 0.1);
    }

    #[test]
    fn test_yaml_workload_parsing() {
        let yaml = r#"
test:
  clients: 2
  threads_per_client: 3
  duration_secs: 30
  workload:
    type: high_throughput
    operations: [set, GET]
    operation_weights:
      SET: 0.4
      GET: 0.6
    value_size: { min: 10, max: 20 }
    batching: { mode: pipeline, size: 20 }
"#;
        let config: RunnerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.test.total_workers(), 6);
        let workload = &config.test.workload;
        assert_eq!(workload.kind, WorkloadKind::HighThroughput);
        assert_eq!(workload.operations, vec![Operation::Set, Operation::Get]);
        assert_eq!(workload.value_size, ValueSize::Range { min: 10, max: 20 });
        assert_eq!(workload.batching.mode, BatchMode::Pipeline);
        assert_eq!(workload.batching.size, Some(20));
        assert_eq!(workload.key_prefix, "test_key");
        config.validate().unwrap();
    }

    #[test]
    fn test_fixed_value_size_from_number() {
        let spec: WorkloadSpec = serde_json::from_str(r#"{"value_size": 256}"#).unwrap();
        assert_eq!(spec.value_size, ValueSize::Fixed(256));
    }

    #[test]
    fn test_weights_must_be_subset_of_operations() {
        let mut spec = WorkloadSpec {
            operations: vec![Operation::Set],
            ..WorkloadSpec::default()
        };
        spec.operation_weights = Some(BTreeMap::from([(Operation::Get, 1.0)]));
        let err = spec.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("GET"));
    }

    #[test]
    fn test_weights_checked_against_default_set() {
        let spec = WorkloadSpec {
            operation_weights: Some(BTreeMap::from([(Operation::Set, 1.0), (Operation::Get, 2.0)])),
            ..WorkloadSpec::default()
        };
        spec.validate().unwrap();
    }

    #[test]
    fn test_non_positive_weight_rejected() {
        let spec = WorkloadSpec {
            operations: vec![Operation::Set, Operation::Get],
            operation_weights: Some(BTreeMap::from([(Operation::Set, 0.0)])),
            ..WorkloadSpec::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_weight_map_is_uniform() {
        let spec = WorkloadSpec {
            operation_weights: Some(BTreeMap::new()),
            ..WorkloadSpec::default()
        };
        assert!(spec.weights().is_none());
        spec.validate().unwrap();
    }

    #[test]
    fn test_invalid_test_shape() {
        let mut config = RunnerConfig::default();
        config.test.clients = 0;
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.test.duration_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.test.target_ops_per_second = Some(-5.0);
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.test.workload.value_size = ValueSize::Range { min: 50, max: 10 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.yaml");
        let mut config = RunnerConfig::default();
        config.test.clients = 7;
        config.test.workload.kind = WorkloadKind::ListOperations;
        config.save_to_file(&path).unwrap();

        let loaded = RunnerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.test.clients, 7);
        assert_eq!(loaded.test.workload.kind, WorkloadKind::ListOperations);

        let json_path = dir.path().join("runner.json");
        config.save_to_file(&json_path).unwrap();
        let loaded = RunnerConfig::from_file(&json_path).unwrap();
        assert_eq!(loaded.test.workload, config.test.workload);
    }

    #[test]
    fn test_workload_kind_parsing() {
        assert_eq!("custom".parse::<WorkloadKind>().unwrap(), WorkloadKind::GetSet);
        assert_eq!(
            "PUBSUB_HEAVY".parse::<WorkloadKind>().unwrap(),
            WorkloadKind::PubsubHeavy
        );
        assert!("nope".parse::<WorkloadKind>().is_err());
    }
}
