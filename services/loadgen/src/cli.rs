//! Command line arguments and their mapping onto [`RunnerConfig`].
//!
//! Every option falls back to an environment variable. Values are layered:
//! config file (or defaults), then the workload profile, then explicit
//! options.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use loadgen_core::{
    BatchMode, ConnectionConfig, LoadResult, Operation, OutputFormat, Protocol, RunnerConfig,
    ValueSize, WorkloadKind, WorkloadProfile,
};

#[derive(Parser, Debug)]
#[command(name = "redis-loadgen")]
#[command(version, about = "Redis load generator for client resilience testing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a load test
    Run(RunArgs),

    /// List the built-in workload profiles
    ListProfiles,

    /// Show the settings of one workload profile
    ShowProfile {
        /// Profile name (see list-profiles)
        name: WorkloadProfile,
    },

    /// Connect, PING and print server details
    TestConnection(ConnectionArgs),
}

/// Which store the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Driver {
    Redis,
    /// In-process store, for dry runs
    Memory,
}

#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Redis host
    #[arg(long, env = "REDIS_HOST")]
    pub host: Option<String>,

    /// Redis port
    #[arg(long, env = "REDIS_PORT")]
    pub port: Option<u16>,

    /// Redis ACL username
    #[arg(long, env = "REDIS_USERNAME")]
    pub username: Option<String>,

    /// Redis password
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Redis database number
    #[arg(long, env = "REDIS_DB")]
    pub db: Option<i64>,

    /// Name reported through CLIENT SETNAME
    #[arg(long, env = "REDIS_CLIENT_NAME")]
    pub client_name: Option<String>,

    /// Socket timeout in seconds
    #[arg(long, env = "REDIS_SOCKET_TIMEOUT")]
    pub socket_timeout: Option<f64>,

    /// Socket connect timeout in seconds
    #[arg(long, env = "REDIS_SOCKET_CONNECT_TIMEOUT")]
    pub socket_connect_timeout: Option<f64>,

    /// Maximum pooled connections per client
    #[arg(long, env = "REDIS_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Connect over TLS
    #[arg(long, env = "REDIS_USE_TLS")]
    pub use_tls: bool,

    /// Accept any server certificate
    #[arg(long, env = "REDIS_TLS_INSECURE")]
    pub tls_insecure: bool,

    /// PEM CA bundle to trust instead of the system roots
    #[arg(long, env = "REDIS_SSL_CA_CERTS")]
    pub ssl_ca_certs: Option<PathBuf>,

    /// PEM client certificate for mutual TLS
    #[arg(long, env = "REDIS_SSL_CERTFILE")]
    pub ssl_certfile: Option<PathBuf>,

    /// PEM private key for the client certificate
    #[arg(long, env = "REDIS_SSL_KEYFILE")]
    pub ssl_keyfile: Option<PathBuf>,

    /// RESP version (2 or 3)
    #[arg(long, env = "REDIS_PROTOCOL")]
    pub protocol: Option<Protocol>,

    /// Retries for a command that failed on the network
    #[arg(long, env = "REDIS_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    /// Base delay between retries in seconds
    #[arg(long, env = "REDIS_RETRY_DELAY")]
    pub retry_delay: Option<f64>,

    /// Keep the retry delay fixed instead of doubling it
    #[arg(long, env = "REDIS_NO_EXPONENTIAL_BACKOFF")]
    pub no_exponential_backoff: bool,

    /// Do not retry commands that timed out
    #[arg(long, env = "REDIS_NO_RETRY_ON_TIMEOUT")]
    pub no_retry_on_timeout: bool,
}

impl ConnectionArgs {
    pub fn apply(&self, connection: &mut ConnectionConfig) {
        if let Some(host) = &self.host {
            connection.host = host.clone();
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if self.username.is_some() {
            connection.username = self.username.clone();
        }
        if self.password.is_some() {
            connection.password = self.password.clone();
        }
        if let Some(db) = self.db {
            connection.database = db;
        }
        if let Some(name) = &self.client_name {
            connection.client_name = name.clone();
        }
        if self.socket_timeout.is_some() {
            connection.socket_timeout_secs = self.socket_timeout;
        }
        if self.socket_connect_timeout.is_some() {
            connection.connect_timeout_secs = self.socket_connect_timeout;
        }
        if let Some(max) = self.max_connections {
            connection.max_connections = max;
        }
        if self.use_tls {
            connection.use_tls = true;
        }
        if self.tls_insecure {
            connection.verify_peer = false;
        }
        if self.ssl_ca_certs.is_some() {
            connection.ssl_ca_certs = self.ssl_ca_certs.clone();
        }
        if self.ssl_certfile.is_some() {
            connection.ssl_certfile = self.ssl_certfile.clone();
        }
        if self.ssl_keyfile.is_some() {
            connection.ssl_keyfile = self.ssl_keyfile.clone();
        }
        if let Some(protocol) = self.protocol {
            connection.protocol = protocol;
        }

        let retry = &mut connection.retry;
        if let Some(attempts) = self.retry_attempts {
            retry.attempts = attempts;
        }
        if let Some(delay) = self.retry_delay {
            retry.delay_secs = delay;
            retry.max_delay_secs = retry.max_delay_secs.max(delay);
        }
        if self.no_exponential_backoff {
            retry.exponential_backoff = false;
        }
        if self.no_retry_on_timeout {
            retry.retry_on_timeout = false;
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct WorkloadArgs {
    /// Pre-defined workload profile
    #[arg(long, env = "TEST_WORKLOAD_PROFILE")]
    pub workload_profile: Option<WorkloadProfile>,

    /// Comma-separated list of operations (e.g. SET,GET,INCR)
    #[arg(long, env = "TEST_OPERATIONS", value_delimiter = ',')]
    pub operations: Option<Vec<Operation>>,

    /// JSON object of operation weights (e.g. {"SET": 0.4, "GET": 0.6})
    #[arg(long, env = "TEST_OPERATION_WEIGHTS", value_parser = parse_weights)]
    pub operation_weights: Option<BTreeMap<Operation, f64>>,

    /// Prefix for generated keys
    #[arg(long, env = "TEST_KEY_PREFIX")]
    pub key_prefix: Option<String>,

    /// Number of distinct key ids
    #[arg(long, env = "TEST_KEY_RANGE")]
    pub key_range: Option<u64>,

    /// Fixed value size in bytes (overrides min/max)
    #[arg(long, env = "TEST_VALUE_SIZE")]
    pub value_size: Option<usize>,

    /// Minimum value size in bytes
    #[arg(long, env = "TEST_VALUE_SIZE_MIN")]
    pub value_size_min: Option<usize>,

    /// Maximum value size in bytes
    #[arg(long, env = "TEST_VALUE_SIZE_MAX")]
    pub value_size_max: Option<usize>,

    /// Send operations in pipelines
    #[arg(long, env = "TEST_USE_PIPELINE")]
    pub use_pipeline: bool,

    /// Operations per pipeline
    #[arg(long, env = "TEST_PIPELINE_SIZE")]
    pub pipeline_size: Option<usize>,

    /// Send operations in MULTI/EXEC transactions
    #[arg(long, env = "TEST_USE_TRANSACTION")]
    pub use_transaction: bool,

    /// Operations per transaction
    #[arg(long, env = "TEST_TRANSACTION_SIZE")]
    pub transaction_size: Option<usize>,

    /// Comma-separated list of pub/sub channels
    #[arg(long, env = "TEST_PUBSUB_CHANNELS", value_delimiter = ',')]
    pub pubsub_channels: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// Test duration in seconds (unlimited if not specified)
    #[arg(long, env = "TEST_DURATION")]
    pub duration: Option<u64>,

    /// Target operations per second across all workers
    #[arg(long, env = "TEST_TARGET_OPS_PER_SECOND")]
    pub target_ops_per_second: Option<f64>,

    /// Number of client handles
    #[arg(long, env = "TEST_CLIENT_INSTANCES")]
    pub clients: Option<usize>,

    /// Worker threads per client handle
    #[arg(long, env = "TEST_THREADS_PER_CLIENT")]
    pub threads_per_client: Option<usize>,

    /// RNG seed for reproducible key and operation sequences
    #[arg(long, env = "TEST_SEED")]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warning, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Write the final summary to this file as JSON instead of printing it
    #[arg(long, env = "OUTPUT_FILE")]
    pub output_file: Option<PathBuf>,

    /// Console summary format
    #[arg(long, env = "OUTPUT_FORMAT")]
    pub output_format: Option<OutputFormat>,

    /// Suppress periodic stats output
    #[arg(long)]
    pub quiet: bool,

    /// Seconds between periodic stats lines
    #[arg(long, env = "METRICS_INTERVAL")]
    pub metrics_interval: Option<u64>,

    /// Port for the Prometheus scrape endpoint
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Disable the Prometheus endpoint
    #[arg(long, env = "TELEMETRY_DISABLED")]
    pub no_telemetry: bool,

    /// Application name used to tag metrics
    #[arg(long, env = "APP_NAME")]
    pub app_name: Option<String>,

    /// Unique instance identifier (generated if not provided)
    #[arg(long, env = "INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Unique run identifier (generated if not provided)
    #[arg(long, env = "RUN_ID")]
    pub run_id: Option<String>,

    /// Version identifier attached to metrics
    #[arg(long = "run-version", env = "VERSION")]
    pub version: Option<String>,

    /// Load configuration from a YAML or JSON file
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Save the resulting configuration to a file and exit
    #[arg(long)]
    pub save_config: Option<PathBuf>,

    /// Store driver
    #[arg(long, env = "LOADGEN_DRIVER", value_enum, default_value_t = Driver::Redis)]
    pub driver: Driver,
}

fn parse_weights(raw: &str) -> Result<BTreeMap<Operation, f64>, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid operation weights: {}", e))
}

impl RunArgs {
    /// Layer file, profile and explicit options into one configuration.
    pub fn build_config(&self) -> LoadResult<RunnerConfig> {
        let mut config = match &self.config_file {
            Some(path) => RunnerConfig::from_file(path)?,
            None => RunnerConfig::default(),
        };

        if let Some(profile) = self.workload.workload_profile {
            config.test.workload = profile.spec();
            config.test.duration_secs = Some(profile.duration_secs());
        }

        self.connection.apply(&mut config.connection);
        self.apply_test(&mut config);
        self.apply_workload(&mut config);
        self.apply_output(&mut config);
        self.apply_telemetry(&mut config);
        Ok(config)
    }

    fn apply_test(&self, config: &mut RunnerConfig) {
        let test = &mut config.test;
        if self.duration.is_some() {
            test.duration_secs = self.duration;
        }
        if self.target_ops_per_second.is_some() {
            test.target_ops_per_second = self.target_ops_per_second;
        }
        if let Some(clients) = self.clients {
            test.clients = clients;
        }
        if let Some(threads) = self.threads_per_client {
            test.threads_per_client = threads;
        }
        if self.seed.is_some() {
            test.seed = self.seed;
        }
    }

    fn apply_workload(&self, config: &mut RunnerConfig) {
        let args = &self.workload;
        let spec = &mut config.test.workload;

        if let Some(operations) = &args.operations {
            spec.operations = operations.clone();
            if args.workload_profile.is_none() && self.config_file.is_none() {
                spec.kind = WorkloadKind::GetSet;
            }
            // Profile weights for operations no longer in the set would fail validation.
            if let Some(weights) = spec.operation_weights.as_mut() {
                weights.retain(|op, _| operations.contains(op));
            }
        }
        if args.operation_weights.is_some() {
            spec.operation_weights = args.operation_weights.clone();
        }
        if let Some(prefix) = &args.key_prefix {
            spec.key_prefix = prefix.clone();
        }
        if let Some(range) = args.key_range {
            spec.key_range = range;
        }

        match (args.value_size, args.value_size_min, args.value_size_max) {
            (Some(size), _, _) => spec.value_size = ValueSize::Fixed(size),
            (None, None, None) => {}
            (None, min, max) => {
                let (cur_min, cur_max) = match spec.value_size {
                    ValueSize::Fixed(n) => (n, n),
                    ValueSize::Range { min, max } => (min, max),
                };
                spec.value_size = ValueSize::Range {
                    min: min.unwrap_or(cur_min),
                    max: max.unwrap_or(cur_max),
                };
            }
        }

        if args.use_transaction {
            spec.batching.mode = BatchMode::Transaction;
        } else if args.use_pipeline {
            spec.batching.mode = BatchMode::Pipeline;
        }
        let size = match spec.batching.mode {
            BatchMode::Transaction => args.transaction_size,
            BatchMode::Pipeline => args.pipeline_size,
            BatchMode::None => None,
        };
        if size.is_some() {
            spec.batching.size = size;
        }

        if let Some(channels) = &args.pubsub_channels {
            spec.channels = channels
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
    }

    fn apply_output(&self, config: &mut RunnerConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log_file.is_some() {
            config.logging.file = self.log_file.clone();
        }
        if self.log_json {
            config.logging.json = true;
        }
        if self.output_file.is_some() {
            config.output.output_file = self.output_file.clone();
        }
        if let Some(format) = self.output_format {
            config.output.format = format;
        }
        if self.quiet {
            config.output.quiet = true;
        }
        if let Some(interval) = self.metrics_interval {
            config.output.metrics_interval_secs = interval;
        }
    }

    fn apply_telemetry(&self, config: &mut RunnerConfig) {
        let telemetry = &mut config.telemetry;
        if self.no_telemetry {
            telemetry.enabled = false;
        }
        if let Some(port) = self.metrics_port {
            telemetry.metrics_port = port;
        }
        if self.config_file.is_none() || self.app_name.is_some() {
            let base = self.app_name.as_deref().unwrap_or(&telemetry.app_name);
            let profile = self
                .workload
                .workload_profile
                .map(|p| p.name())
                .unwrap_or("custom");
            telemetry.app_name = format!("{}-{}", base, profile);
        }
        if self.instance_id.is_some() {
            telemetry.instance_id = self.instance_id.clone();
        }
        if self.run_id.is_some() {
            telemetry.run_id = self.run_id.clone();
        }
        if self.version.is_some() {
            telemetry.version = self.version.clone();
        }
        telemetry
            .instance_id
            .get_or_insert_with(|| Uuid::new_v4().to_string());
        telemetry.run_id.get_or_insert_with(|| Uuid::new_v4().to_string());
    }
}
