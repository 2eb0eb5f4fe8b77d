//! Concurrent load generation against key-value stores.
//!
//! [`LoadEngine`] connects a pool of [`StoreClient`] handles through a
//! [`ClientFactory`], runs `clients × threads_per_client` worker threads over
//! a weighted operation mix and produces a [`RunSummary`].

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod operation;
pub mod profiles;
pub mod rate_limiter;
pub mod report;
pub mod shutdown;
pub mod summary;
pub mod telemetry;
pub mod values;
pub mod workload;

pub use client::{
    Batch, ClientFactory, ClientPool, Command, ConnectionEvents, Message, Reply, StoreClient,
    Subscription,
};
pub use config::{
    BatchMode, Batching, ConnectionConfig, LoggingConfig, OutputConfig, OutputFormat, Protocol,
    RetryConfig, RunnerConfig, TelemetryConfig, TestConfig, ValueSize, WorkloadKind,
    WorkloadSpec,
};
pub use engine::{EngineState, HealthCounts, LoadEngine, RunOutcome};
pub use error::{ClientError, ClientErrorKind, LoadGenError, LoadResult};
pub use memory::{MemoryClientFactory, MemoryOptions};
pub use metrics::{MetricsCollector, OperationRecord, OverallStats};
pub use operation::Operation;
pub use profiles::WorkloadProfile;
pub use report::ResultsReport;
pub use shutdown::{CancellationToken, StopReason};
pub use summary::{OperationSummary, RunSummary};
pub use telemetry::RunIdentity;
pub use workload::{Strategy, Workload};
