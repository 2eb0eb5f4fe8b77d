use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use super::{Generator, Workload};
use crate::client::StoreClient;
use crate::error::ClientError;
use crate::metrics::MetricsCollector;

/// Sends `size` weighted picks per round trip, pipelined or as a
/// MULTI/EXEC transaction.
pub struct BatchWorkload {
    transactional: bool,
    size: usize,
    generator: Generator,
    client: Arc<dyn StoreClient>,
    metrics: Arc<MetricsCollector>,
}

impl BatchWorkload {
    pub(crate) fn new(
        transactional: bool,
        size: usize,
        generator: Generator,
        client: Arc<dyn StoreClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            transactional,
            size: size.max(1),
            generator,
            client,
            metrics,
        }
    }
}

impl Workload for BatchWorkload {
    fn execute(&mut self) -> Result<u64, ClientError> {
        let name = self.name();
        let g = &mut self.generator;
        let mut batch = self.client.open_batch(self.transactional);
        let mut members = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            let op = g.selector.pick(&mut g.rng);
            if let Some(command) = op.build_command(&mut g.keys, &g.values, &mut g.rng) {
                batch.add(command);
                members.push(op);
            }
        }

        if members.is_empty() {
            warn!(
                workload = name,
                operations = ?g.selector.candidates(),
                "No operations added to batch"
            );
            return Ok(0);
        }

        let start = Instant::now();
        let result = batch.execute();
        let elapsed = start.elapsed().as_secs_f64();
        match result {
            Ok(_) => {
                self.metrics.record_batch(&members, elapsed, None);
                Ok(members.len() as u64)
            }
            Err(e) => {
                self.metrics.record_batch(&members, elapsed, Some(&e));
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        if self.transactional {
            "transaction"
        } else {
            "pipeline"
        }
    }
}
