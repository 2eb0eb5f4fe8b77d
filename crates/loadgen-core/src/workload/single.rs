use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use super::{Generator, Workload};
use crate::client::StoreClient;
use crate::error::ClientError;
use crate::metrics::{MetricsCollector, OperationRecord};
use crate::operation::{OpFamily, Operation};

/// One operation per unit. Covers the basic and list strategies; a family
/// restriction limits which operations are executed.
pub struct SingleOpWorkload {
    family: Option<OpFamily>,
    generator: Generator,
    client: Arc<dyn StoreClient>,
    metrics: Arc<MetricsCollector>,
}

impl SingleOpWorkload {
    pub(crate) fn new(
        family: Option<OpFamily>,
        generator: Generator,
        client: Arc<dyn StoreClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            family,
            generator,
            client,
            metrics,
        }
    }

    fn accepts(&self, op: Operation) -> bool {
        match self.family {
            Some(family) => op.family() == family,
            None => op.is_batchable(),
        }
    }
}

impl Workload for SingleOpWorkload {
    fn execute(&mut self) -> Result<u64, ClientError> {
        let op = self.generator.selector.pick(&mut self.generator.rng);
        if !self.accepts(op) {
            warn!(operation = %op, workload = self.name(), "Operation not supported by workload");
            return Ok(0);
        }
        Ok(execute_keyed(op, &mut self.generator, self.client.as_ref(), &self.metrics))
    }

    fn name(&self) -> &'static str {
        match self.family {
            Some(OpFamily::List) => "list",
            _ => "basic",
        }
    }
}

/// Run one keyed operation and record it. Failures are recorded and logged,
/// not propagated; returns 1 on success and 0 otherwise.
pub(crate) fn execute_keyed(
    op: Operation,
    generator: &mut Generator,
    client: &dyn StoreClient,
    metrics: &MetricsCollector,
) -> u64 {
    let Some(command) = op.build_command(&mut generator.keys, &generator.values, &mut generator.rng)
    else {
        warn!(operation = %op, "Operation has no keyed command");
        return 0;
    };
    let start = Instant::now();
    match client.execute(&command) {
        Ok(_) => {
            metrics.record(OperationRecord::success(op, start.elapsed()));
            1
        }
        Err(e) => {
            metrics.record(OperationRecord::failure(op, start.elapsed(), &e));
            warn!(operation = %op, error = %e, "Operation failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ValueSize, WorkloadKind, WorkloadSpec};
    use crate::memory::{MemoryClientFactory, MemoryOptions};
    use crate::shutdown::CancellationToken;
    use crate::telemetry::Telemetry;
    use crate::values::{KeyGenerator, ValuePool};
    use crate::workload::{create, OperationSelector, Strategy, WorkloadContext};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build(spec: &WorkloadSpec, options: MemoryOptions) -> (Box<dyn Workload>, Arc<MetricsCollector>, MemoryClientFactory) {
        let factory = MemoryClientFactory::new(options);
        let metrics = Arc::new(MetricsCollector::new(1_000, Telemetry::disabled()));
        let mut rng = StdRng::seed_from_u64(9);
        let ctx = WorkloadContext {
            client: factory.client(),
            metrics: metrics.clone(),
            values: Arc::new(ValuePool::build(&ValueSize::Fixed(16), 8, &mut rng)),
            token: CancellationToken::new(),
            rng,
        };
        let strategy = Strategy::resolve(spec).unwrap();
        (create(strategy, spec, ctx).unwrap(), metrics, factory)
    }

    #[test]
    fn test_basic_records_each_operation() {
        let spec = WorkloadSpec::default();
        let (mut workload, metrics, _) = build(&spec, MemoryOptions::default());
        assert_eq!(workload.name(), "basic");
        let done: u64 = (0..200).map(|_| workload.execute().unwrap()).sum();
        assert_eq!(done, 200);

        let overall = metrics.snapshot_overall();
        assert_eq!(overall.total_operations, 200);
        assert_eq!(overall.failed_operations, 0);
        assert!(metrics.operation_stats(Operation::Set).is_some());
        assert!(metrics.operation_stats(Operation::Get).is_some());
    }

    #[test]
    fn test_list_workload_writes_lists() {
        let spec = WorkloadSpec {
            kind: WorkloadKind::ListOperations,
            operations: vec![Operation::Lpush],
            key_range: 1,
            ..WorkloadSpec::default()
        };
        let (mut workload, _, factory) = build(&spec, MemoryOptions::default());
        assert_eq!(workload.name(), "list");
        for _ in 0..5 {
            assert_eq!(workload.execute().unwrap(), 1);
        }
        assert_eq!(factory.list_len("test_key:0"), 5);
    }

    #[test]
    fn test_list_workload_skips_foreign_operations() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let metrics = Arc::new(MetricsCollector::new(1_000, Telemetry::disabled()));
        let mut rng = StdRng::seed_from_u64(3);
        let values = Arc::new(ValuePool::build(&ValueSize::Fixed(4), 4, &mut rng));
        let generator = Generator {
            selector: OperationSelector::uniform(vec![Operation::Get]),
            keys: KeyGenerator::new("k", 10),
            values,
            rng,
        };
        let mut workload =
            SingleOpWorkload::new(Some(OpFamily::List), generator, factory.client(), metrics.clone());
        assert_eq!(workload.execute().unwrap(), 0);
        assert_eq!(metrics.snapshot_overall().total_operations, 0);
    }

    #[test]
    fn test_failures_are_recorded_not_propagated() {
        let spec = WorkloadSpec::default();
        let (mut workload, metrics, factory) = build(&spec, MemoryOptions::default());
        factory.set_fail_commands(true);
        assert_eq!(workload.execute().unwrap(), 0);
        let overall = metrics.snapshot_overall();
        assert_eq!(overall.failed_operations, 1);
        let op = metrics
            .operation_stats(Operation::Set)
            .or_else(|| metrics.operation_stats(Operation::Get))
            .unwrap();
        assert_eq!(op.errors_by_kind.get("ConnectionError"), Some(&1));
    }
}
