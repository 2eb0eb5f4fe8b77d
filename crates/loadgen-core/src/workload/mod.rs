//! Workload strategies: what one worker does per iteration.

mod batch;
mod pubsub;
pub mod selector;
mod single;

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::client::StoreClient;
use crate::config::{BatchMode, WorkloadKind, WorkloadSpec};
use crate::error::{ClientError, LoadGenError, LoadResult};
use crate::metrics::MetricsCollector;
use crate::operation::{OpFamily, Operation};
use crate::shutdown::CancellationToken;
use crate::values::{KeyGenerator, ValuePool};

pub use batch::BatchWorkload;
pub use pubsub::PubSubWorkload;
pub use selector::OperationSelector;
pub use single::SingleOpWorkload;

pub const DEFAULT_PIPELINE_SIZE: usize = 10;
pub const DEFAULT_TRANSACTION_SIZE: usize = 5;

/// One worker's unit of traffic generation.
pub trait Workload: Send {
    /// Run one logical unit; returns how many operations it completed.
    fn execute(&mut self) -> Result<u64, ClientError>;

    /// Release background resources. Called once when the worker exits.
    fn cleanup(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Execution strategy resolved from a workload spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Basic,
    List,
    Pipeline { size: usize },
    Transaction { size: usize },
    PubSub,
}

impl Strategy {
    /// Pick the strategy for `spec`. The first matching rule wins:
    ///
    /// 1. `transaction_heavy` or batching mode `transaction` → Transaction
    /// 2. `high_throughput`/`async_mixed` or batching mode `pipeline` → Pipeline
    /// 3. `pubsub_heavy` or any PUBLISH/SUBSCRIBE → PubSub
    /// 4. `list_operations` or any list operation → List
    /// 5. Basic
    ///
    /// Returns a configuration error when the chosen strategy cannot serve
    /// the operation set.
    pub fn resolve(spec: &WorkloadSpec) -> LoadResult<Strategy> {
        let selector = OperationSelector::from_spec(spec);
        let ops = selector.candidates();
        let mode = spec.batching.mode;

        let strategy = if spec.kind == WorkloadKind::TransactionHeavy || mode == BatchMode::Transaction {
            Strategy::Transaction {
                size: spec.batching.size.unwrap_or(DEFAULT_TRANSACTION_SIZE),
            }
        } else if matches!(spec.kind, WorkloadKind::HighThroughput | WorkloadKind::AsyncMixed)
            || mode == BatchMode::Pipeline
        {
            Strategy::Pipeline {
                size: spec.batching.size.unwrap_or(DEFAULT_PIPELINE_SIZE),
            }
        } else if spec.kind == WorkloadKind::PubsubHeavy || ops.iter().any(|op| op.is_pubsub()) {
            Strategy::PubSub
        } else if spec.kind == WorkloadKind::ListOperations || ops.iter().any(|op| op.is_list()) {
            Strategy::List
        } else {
            Strategy::Basic
        };

        strategy.check(spec, ops)?;
        Ok(strategy)
    }

    fn check(&self, spec: &WorkloadSpec, ops: &[Operation]) -> LoadResult<()> {
        match self {
            Strategy::Pipeline { .. } | Strategy::Transaction { .. } => {
                if let Some(op) = ops.iter().find(|op| !op.is_batchable()) {
                    return Err(LoadGenError::invalid_config(
                        "workload.operations",
                        format!("{} cannot be part of a {} batch", op, self),
                    ));
                }
            }
            Strategy::List => {
                if !ops.iter().any(|op| op.is_list()) {
                    return Err(LoadGenError::invalid_config(
                        "workload.operations",
                        "list workload needs at least one list operation",
                    ));
                }
            }
            Strategy::PubSub => {
                if spec.channels.is_empty() {
                    return Err(LoadGenError::invalid_config(
                        "workload.channels",
                        "pub/sub workload needs at least one channel",
                    ));
                }
                if !ops.iter().any(|op| op.is_pubsub()) {
                    return Err(LoadGenError::invalid_config(
                        "workload.operations",
                        "pub/sub workload needs PUBLISH or SUBSCRIBE",
                    ));
                }
            }
            Strategy::Basic => {}
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Basic => "basic",
            Strategy::List => "list",
            Strategy::Pipeline { .. } => "pipeline",
            Strategy::Transaction { .. } => "transaction",
            Strategy::PubSub => "pubsub",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a workload instance needs from its worker.
pub struct WorkloadContext {
    pub client: Arc<dyn StoreClient>,
    pub metrics: Arc<MetricsCollector>,
    pub values: Arc<ValuePool>,
    pub token: CancellationToken,
    pub rng: StdRng,
}

/// Shared per-instance state of every strategy.
pub(crate) struct Generator {
    pub(crate) selector: OperationSelector,
    pub(crate) keys: KeyGenerator,
    pub(crate) values: Arc<ValuePool>,
    pub(crate) rng: StdRng,
}

/// Build the workload for `strategy`. Probes the client first so a dead
/// handle fails construction instead of every operation.
pub fn create(
    strategy: Strategy,
    spec: &WorkloadSpec,
    ctx: WorkloadContext,
) -> Result<Box<dyn Workload>, ClientError> {
    ctx.client.ping()?;

    let generator = Generator {
        selector: OperationSelector::from_spec(spec),
        keys: KeyGenerator::new(spec.key_prefix.clone(), spec.key_range),
        values: ctx.values,
        rng: ctx.rng,
    };

    let workload: Box<dyn Workload> = match strategy {
        Strategy::Basic => Box::new(SingleOpWorkload::new(None, generator, ctx.client, ctx.metrics)),
        Strategy::List => Box::new(SingleOpWorkload::new(
            Some(OpFamily::List),
            generator,
            ctx.client,
            ctx.metrics,
        )),
        Strategy::Pipeline { size } => Box::new(BatchWorkload::new(
            false,
            size,
            generator,
            ctx.client,
            ctx.metrics,
        )),
        Strategy::Transaction { size } => Box::new(BatchWorkload::new(
            true,
            size,
            generator,
            ctx.client,
            ctx.metrics,
        )),
        Strategy::PubSub => Box::new(PubSubWorkload::new(
            spec.channels.clone(),
            generator,
            ctx.client,
            ctx.metrics,
            ctx.token,
        )),
    };
    Ok(workload)
}
